//! The remote report form as the session sees it
//!
//! [`Form`] is the whole surface the selection session drives: pick a value
//! for a role, read a role's options, press refresh, press download, probe
//! liveness. [`ChromeForm`] implements it over a real tab; tests substitute
//! their own.

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use crate::browser::Browser;
use crate::dropdown::Dropdown;
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::page::Page;
use crate::role::Role;
use crate::settings::{Settings, Timings};

/// Operations on the report form
#[async_trait]
pub trait Form: Send + Sync {
    /// Cheap probe; false once the browser or tab is gone
    async fn is_alive(&self) -> bool;

    /// Select the option matching `value`; returns the chosen option text
    async fn select(&self, role: Role, value: &str) -> Result<String>;

    /// Visible option texts of a dropdown, in DOM order
    async fn list_options(&self, role: Role) -> Result<Vec<String>>;

    /// Press the refresh button and let the form settle
    async fn refresh(&self) -> Result<()>;

    /// Press the export control
    async fn trigger_download(&self) -> Result<()>;

    /// Release the browser
    async fn close(self);
}

/// Creates fresh forms, one browser session each
#[async_trait]
pub trait Launcher: Send + Sync {
    type Form: Form;

    async fn launch(&self) -> Result<Self::Form>;
}

/// [`Form`] over a Chrome tab showing the dashboard
pub struct ChromeForm {
    browser: Browser,
    page: Page,
    timings: Timings,
}

impl ChromeForm {
    pub fn page(&self) -> &Page {
        &self.page
    }

    fn dropdown(&self) -> Dropdown<'_> {
        Dropdown::new(&self.page, &self.timings)
    }
}

#[async_trait]
impl Form for ChromeForm {
    async fn is_alive(&self) -> bool {
        match timeout(self.timings.liveness_timeout, self.page.title()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Liveness probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timings.liveness_timeout.as_millis() as u64,
                    "Liveness probe timed out"
                );
                false
            }
        }
    }

    async fn select(&self, role: Role, value: &str) -> Result<String> {
        if !role.is_dropdown() {
            return Err(Error::Config(format!("{} is not a dropdown", role)));
        }
        let handle = Locator::new(&self.page).locate(role).await?;
        self.dropdown().select(&handle, value).await
    }

    async fn list_options(&self, role: Role) -> Result<Vec<String>> {
        let handle = Locator::new(&self.page).locate(role).await?;
        self.dropdown().list_options(&handle).await
    }

    async fn refresh(&self) -> Result<()> {
        let handle = Locator::new(&self.page).locate(Role::Refresh).await?;
        self.dropdown().press(&handle).await?;
        sleep(self.timings.refresh_settle).await;
        Ok(())
    }

    async fn trigger_download(&self) -> Result<()> {
        let handle = Locator::new(&self.page).locate(Role::Download).await?;
        self.dropdown().press(&handle).await
    }

    async fn close(self) {
        if let Err(e) = self.browser.close().await {
            // Dropping the transport still kills the process
            tracing::debug!(error = %e, "Browser close failed");
        }
    }
}

/// Launches Chrome and opens the dashboard
pub struct ChromeLauncher {
    settings: Settings,
}

impl ChromeLauncher {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    type Form = ChromeForm;

    async fn launch(&self) -> Result<ChromeForm> {
        let timings = self.settings.timings.clone();
        let browser = Browser::launch(self.settings.browser_config()).await?;
        let page = browser.new_page(&self.settings.dashboard_url).await?;
        page.wait_for_navigation(timings.page_ready_timeout).await?;
        // The form's scripts keep wiring widgets after readyState flips
        sleep(timings.page_settle).await;

        tracing::info!(url = %self.settings.dashboard_url, "Dashboard loaded");
        Ok(ChromeForm {
            browser,
            page,
            timings,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory form for session and run tests

    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Launch(usize),
        Select(Role, String),
        List(Role),
        Refresh,
        Download,
        Close,
    }

    /// How the fake dashboard behaves
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Script {
        pub states: Vec<String>,
        pub months: Vec<String>,
        pub staging: PathBuf,
        /// Roles whose selection fails as not found
        pub failing_roles: Vec<Role>,
        /// Number of initial launches that fail
        pub launch_failures: usize,
        /// Download attempts (1-based, across sessions) that kill the browser
        pub lose_session_on_downloads: Vec<usize>,
    }

    struct Shared {
        script: Script,
        journal: Mutex<Vec<Call>>,
        launches: AtomicUsize,
        downloads: AtomicUsize,
        alive: Mutex<Option<Arc<AtomicBool>>>,
    }

    #[derive(Clone)]
    pub(crate) struct MockLauncher {
        shared: Arc<Shared>,
    }

    impl MockLauncher {
        pub(crate) fn new(script: Script) -> Self {
            Self {
                shared: Arc::new(Shared {
                    script,
                    journal: Mutex::default(),
                    launches: AtomicUsize::new(0),
                    downloads: AtomicUsize::new(0),
                    alive: Mutex::default(),
                }),
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.shared.journal.lock().unwrap().clone()
        }

        pub(crate) fn launches(&self) -> usize {
            self.shared.launches.load(Ordering::SeqCst)
        }

        /// Make the current browser stop answering
        pub(crate) fn kill_current(&self) {
            if let Some(alive) = self.shared.alive.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }

    pub(crate) struct MockForm {
        shared: Arc<Shared>,
        alive: Arc<AtomicBool>,
    }

    impl MockForm {
        fn record(&self, call: Call) {
            self.shared.journal.lock().unwrap().push(call);
        }

        fn check_alive(&self) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::transport("Response channel closed"))
            }
        }
    }

    #[async_trait]
    impl Launcher for MockLauncher {
        type Form = MockForm;

        async fn launch(&self) -> Result<MockForm> {
            let n = self.shared.launches.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.shared.script.launch_failures {
                return Err(Error::Launch(format!("launch {} refused", n)));
            }
            let alive = Arc::new(AtomicBool::new(true));
            *self.shared.alive.lock().unwrap() = Some(Arc::clone(&alive));
            self.shared.journal.lock().unwrap().push(Call::Launch(n));
            Ok(MockForm {
                shared: Arc::clone(&self.shared),
                alive,
            })
        }
    }

    #[async_trait]
    impl Form for MockForm {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn select(&self, role: Role, value: &str) -> Result<String> {
            self.check_alive()?;
            self.record(Call::Select(role, value.to_string()));
            if self.shared.script.failing_roles.contains(&role) {
                return Err(Error::NotFound { role });
            }
            Ok(value.to_string())
        }

        async fn list_options(&self, role: Role) -> Result<Vec<String>> {
            self.check_alive()?;
            self.record(Call::List(role));
            Ok(match role {
                Role::State => self.shared.script.states.clone(),
                Role::Month => self.shared.script.months.clone(),
                _ => Vec::new(),
            })
        }

        async fn refresh(&self) -> Result<()> {
            self.check_alive()?;
            self.record(Call::Refresh);
            Ok(())
        }

        async fn trigger_download(&self) -> Result<()> {
            self.check_alive()?;
            let n = self.shared.downloads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.shared.script.lose_session_on_downloads.contains(&n) {
                self.alive.store(false, Ordering::SeqCst);
                return Err(Error::transport("Response channel closed"));
            }
            self.record(Call::Download);
            std::fs::create_dir_all(&self.shared.script.staging)?;
            std::fs::write(
                self.shared.script.staging.join(format!("export_{}.xlsx", n)),
                b"PK",
            )?;
            Ok(())
        }

        async fn close(self) {
            self.record(Call::Close);
        }
    }
}
