//! Browser Launcher
//!
//! Finds Chrome, launches it with a throwaway profile, points its downloads at
//! the staging directory and hands out pages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cdp::{launch_chrome, Connection, Transport};
use crate::error::{Error, Result};
use crate::page::Page;
use crate::BrowserConfig;

/// Global counter for unique user data directories
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Locate a Chrome/Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

/// Command-line flags for an unattended dashboard session
fn chrome_args(config: &BrowserConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--no-sandbox".into(),
        "--disable-dev-shm-usage".into(),
        "--disable-gpu".into(),
        "--disable-extensions".into(),
        "--disable-default-apps".into(),
        "--disable-popup-blocking".into(),
        "--disable-sync".into(),
        "--disable-translate".into(),
        "--disable-background-timer-throttling".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--password-store=basic".into(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];

    if config.headless {
        args.push("--headless=new".into());
    }

    args
}

/// A running Chrome instance
pub struct Browser {
    connection: Connection,
    config: Arc<BrowserConfig>,
    /// User data directory (removed on close or drop)
    user_data_dir: PathBuf,
}

impl Browser {
    /// Launch Chrome with the given config
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        let config = Arc::new(config);

        let instance_id = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "vahan-harvest-{}-{}",
            std::process::id(),
            instance_id
        ));
        let _ = std::fs::remove_dir_all(&user_data_dir);
        std::fs::create_dir_all(&user_data_dir)?;

        let chrome_path = match &config.chrome_path {
            Some(p) => p.clone(),
            None => find_chrome()?,
        };

        tracing::info!(path = %chrome_path.display(), headless = config.headless, "Launching Chrome");
        let (child, ws_url) = launch_chrome(&chrome_path, &chrome_args(&config, &user_data_dir))?;

        // From here on the Transport owns the child and kills it on drop
        let connection = Connection::new(Transport::new(child, &ws_url, config.command_timeout)?);

        let version = connection.version().await?;
        tracing::info!(product = %version.product, "Connected to Chrome");

        std::fs::create_dir_all(&config.download_dir)?;
        let download_dir = config
            .download_dir
            .canonicalize()
            .unwrap_or_else(|_| config.download_dir.clone());
        connection.set_download_dir(&download_dir).await?;
        tracing::debug!(dir = %download_dir.display(), "Download staging directory set");

        Ok(Self {
            connection,
            config,
            user_data_dir,
        })
    }

    /// Open a new tab and navigate it to `url`
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let session = self.connection.open_tab("about:blank").await?;
        session.page_enable().await?;

        let nav = session.navigate(url).await?;
        if let Some(error) = nav.error_text {
            return Err(Error::Navigation(format!("{}: {}", url, error)));
        }

        Ok(Page::new(session, Arc::clone(&self.config)))
    }

    /// Close the browser and remove its profile
    pub async fn close(self) -> Result<()> {
        self.connection.close().await?;
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The Transport's Drop kills Chrome; the profile is ours to clean up
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_flag_and_profile_dir() {
        let config = BrowserConfig {
            headless: true,
            ..Default::default()
        };
        let args = chrome_args(&config, Path::new("/tmp/profile"));
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--user-data-dir=/tmp/profile"));

        let visible = BrowserConfig {
            headless: false,
            ..Default::default()
        };
        let args = chrome_args(&visible, Path::new("/tmp/profile"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }
}
