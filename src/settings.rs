//! Run settings and wait timings

use std::path::PathBuf;
use std::time::Duration;

use crate::pointer::PointerSpeed;
use crate::BrowserConfig;

/// Report page of the public dashboard
pub const DEFAULT_DASHBOARD_URL: &str =
    "https://vahan.parivahan.gov.in/vahan4dashboard/vahan/view/reportview.xhtml";

/// Bounds and settle delays for every wait in a run
///
/// All waits are polling loops: a short fixed sleep up to a ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Ceiling for an overlay blocker to clear; the click proceeds anyway afterwards
    pub overlay_timeout: Duration,
    /// Ceiling for an option panel to show after a click
    pub panel_timeout: Duration,
    pub panel_poll: Duration,
    /// Pause after the open click before looking for the panel
    pub open_delay: Duration,
    /// Pause after an option is clicked
    pub option_settle: Duration,
    /// Pause after the refresh button
    pub refresh_settle: Duration,
    /// Pause after the month is chosen, before the export
    pub month_settle: Duration,
    pub page_ready_timeout: Duration,
    /// Pause after the page reports ready, for late scripts
    pub page_settle: Duration,
    pub download_timeout: Duration,
    pub download_poll: Duration,
    /// Ceiling for the liveness probe
    pub liveness_timeout: Duration,
    pub overlay_poll: Duration,
    /// Ceiling for any single DevTools command
    pub command_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            overlay_timeout: Duration::from_secs(5),
            panel_timeout: Duration::from_secs(3),
            panel_poll: Duration::from_millis(100),
            open_delay: Duration::from_millis(300),
            option_settle: Duration::from_millis(300),
            refresh_settle: Duration::from_millis(1500),
            month_settle: Duration::from_secs(2),
            page_ready_timeout: Duration::from_secs(30),
            page_settle: Duration::from_secs(4),
            download_timeout: Duration::from_secs(15),
            download_poll: Duration::from_millis(500),
            liveness_timeout: Duration::from_secs(5),
            overlay_poll: Duration::from_millis(200),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl Timings {
    /// Zero settle delays and tight ceilings, for tests
    pub fn instant() -> Self {
        Self {
            overlay_timeout: Duration::from_millis(50),
            panel_timeout: Duration::from_millis(50),
            panel_poll: Duration::from_millis(5),
            open_delay: Duration::ZERO,
            option_settle: Duration::ZERO,
            refresh_settle: Duration::ZERO,
            month_settle: Duration::ZERO,
            page_ready_timeout: Duration::from_millis(200),
            page_settle: Duration::ZERO,
            download_timeout: Duration::from_millis(200),
            download_poll: Duration::from_millis(10),
            liveness_timeout: Duration::from_millis(50),
            overlay_poll: Duration::from_millis(5),
            command_timeout: Duration::from_secs(2),
        }
    }
}

/// Everything a run needs to know besides the filters
#[derive(Debug, Clone)]
pub struct Settings {
    pub dashboard_url: String,
    /// Directory holding the `outputs*` folders
    pub base_dir: PathBuf,
    pub prompt_path: PathBuf,
    /// Where the browser saves exports before they are filed
    pub staging_dir: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub debug_dir: Option<PathBuf>,
    /// Session restarts attempted before a run gives up
    pub max_restarts: u32,
    pub timings: Timings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dashboard_url: DEFAULT_DASHBOARD_URL.to_string(),
            base_dir: PathBuf::from("."),
            prompt_path: PathBuf::from("prompt.txt"),
            staging_dir: PathBuf::from("downloads"),
            chrome_path: None,
            headless: true,
            debug_dir: None,
            max_restarts: 3,
            timings: Timings::default(),
        }
    }
}

impl Settings {
    /// Browser launch options derived from these settings
    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            download_dir: self.staging_dir.clone(),
            debug_dir: self.debug_dir.clone(),
            pointer_speed: PointerSpeed::Fast,
            command_timeout: self.timings.command_timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_config_follows_settings() {
        let settings = Settings {
            headless: false,
            staging_dir: PathBuf::from("/tmp/staging"),
            ..Default::default()
        };
        let config = settings.browser_config();
        assert!(!config.headless);
        assert_eq!(config.download_dir, PathBuf::from("/tmp/staging"));
        assert_eq!(config.command_timeout, Timings::default().command_timeout);
    }

    #[test]
    fn test_instant_timings_have_no_settle_delays() {
        let t = Timings::instant();
        assert_eq!(t.option_settle, Duration::ZERO);
        assert_eq!(t.month_settle, Duration::ZERO);
        assert!(t.download_timeout < Timings::default().download_timeout);
    }
}
