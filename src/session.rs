//! Selection Session State Machine
//!
//! Tracks what the remote form currently has selected and drives it through
//! one work item at a time:
//!
//! ```text
//! Fresh -> GlobalFiltersApplied -> StateSelected -> YearConfirmed -> MonthSelected -> Downloaded
//!   ^                                                                                    |
//!   +------------------------ liveness probe failed: new browser ------------------------+
//! ```
//!
//! A new browser starts at `Fresh`; the global filters are replayed in their
//! declared order before any state is chosen, and the state is always chosen
//! again, since nothing selected in the old browser survives.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;

use crate::download::DownloadCapture;
use crate::dropdown::{first_match, month_options, state_options};
use crate::error::{Error, Result};
use crate::form::{Form, Launcher};
use crate::role::Role;
use crate::scan::WorkItem;

/// Default number of browser launches tried before giving up
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Where the remote form is in the selection sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fresh,
    GlobalFiltersApplied,
    StateSelected,
    YearConfirmed,
    MonthSelected,
    Downloaded,
}

/// Result of one work item that did not abort the run
#[derive(Debug)]
pub enum ItemOutcome {
    Downloaded(PathBuf),
    /// The month is not offered for the year yet
    MonthUnavailable,
    Failed(Error),
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemOutcome::Downloaded(path) => write!(f, "downloaded to {}", path.display()),
            ItemOutcome::MonthUnavailable => f.write_str("month not offered"),
            ItemOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// One logical browser session, replaced whenever it dies
pub struct SelectionSession<L: Launcher> {
    launcher: L,
    form: Option<L::Form>,
    globals: Vec<(Role, String)>,
    phase: Phase,
    /// State selected in the current form, if any
    state: Option<String>,
    max_restarts: u32,
    month_settle: Duration,
    restarts: u32,
}

impl<L: Launcher> SelectionSession<L> {
    /// `globals` are replayed in the given order on every new browser
    pub fn new(launcher: L, globals: Vec<(Role, String)>) -> Self {
        Self {
            launcher,
            form: None,
            globals,
            phase: Phase::Fresh,
            state: None,
            max_restarts: DEFAULT_MAX_RESTARTS,
            month_settle: Duration::ZERO,
            restarts: 0,
        }
    }

    pub fn with_max_restarts(mut self, attempts: u32) -> Self {
        self.max_restarts = attempts.max(1);
        self
    }

    /// Pause between choosing the month and pressing download
    pub fn with_month_settle(mut self, settle: Duration) -> Self {
        self.month_settle = settle;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Browsers launched after the first
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Launch the first browser and apply the global filters
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_live().await
    }

    /// Probe the current browser; replace it when it does not answer
    ///
    /// Fails only when no browser can be launched at all.
    async fn ensure_live(&mut self) -> Result<()> {
        if let Some(form) = &self.form {
            if form.is_alive().await {
                return Ok(());
            }
            tracing::warn!(phase = ?self.phase, "Browser session lost, starting a new one");
            self.discard().await;
            self.restarts += 1;
        }
        self.launch().await
    }

    async fn discard(&mut self) {
        if let Some(form) = self.form.take() {
            form.close().await;
        }
        self.phase = Phase::Fresh;
        self.state = None;
    }

    async fn launch(&mut self) -> Result<()> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_restarts {
            match self.launcher.launch().await {
                Ok(form) => {
                    self.form = Some(form);
                    self.phase = Phase::Fresh;
                    self.state = None;
                    tracing::info!(attempt, "Browser session started");
                    return self.apply_globals().await;
                }
                Err(e) => {
                    tracing::warn!(attempt, max = self.max_restarts, error = %e, "Browser launch failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::RetryExhausted {
            attempts: self.max_restarts,
            last_error,
        })
    }

    /// Replay the global filters in declared order
    ///
    /// A filter that cannot be set is logged and skipped. Only a lost session
    /// stops the replay, and the next probe replaces the browser.
    async fn apply_globals(&mut self) -> Result<()> {
        let Some(form) = &self.form else {
            return Err(Error::SessionLost("no browser session".into()));
        };

        for (role, value) in &self.globals {
            match form.select(*role, value).await {
                Ok(chosen) => tracing::info!(%role, value = %value, chosen = %chosen, "Applied filter"),
                Err(e) if e.is_session_lost() => {
                    tracing::warn!(%role, error = %e, "Session lost while applying filters");
                    return Ok(());
                }
                Err(e) => tracing::warn!(%role, value = %value, error = %e, "Skipping filter"),
            }
        }

        self.phase = Phase::GlobalFiltersApplied;
        Ok(())
    }

    /// States offered by the form's State dropdown, sentinels removed
    pub async fn state_options(&mut self) -> Result<Vec<String>> {
        self.ensure_live().await?;
        let form = self.current()?;
        Ok(state_options(form.list_options(Role::State).await?))
    }

    fn current(&self) -> Result<&L::Form> {
        self.form
            .as_ref()
            .ok_or_else(|| Error::SessionLost("no browser session".into()))
    }

    /// Drive one item to a download
    ///
    /// Failures that only cost this item come back as
    /// [`ItemOutcome::Failed`]. A session lost mid-item gets one retry on a
    /// new browser. The error return is reserved for "no browser at all".
    pub async fn process(
        &mut self,
        item: &WorkItem,
        capture: &DownloadCapture,
        root: &Path,
    ) -> Result<ItemOutcome> {
        let mut retried = false;

        loop {
            self.ensure_live().await?;

            match self.attempt(item, capture, root).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_session_lost() && !retried => {
                    tracing::warn!(%item, error = %e, "Session lost during item, retrying once");
                    retried = true;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(%item, phase = ?self.phase, error = %e, "Work item failed");
                    return Ok(ItemOutcome::Failed(e));
                }
                Err(e) => {
                    tracing::error!(%item, phase = ?self.phase, error = %e, "Work item failed");
                    if e.is_session_lost() {
                        self.discard().await;
                        self.restarts += 1;
                    }
                    return Ok(ItemOutcome::Failed(e));
                }
            }
        }
    }

    async fn attempt(
        &mut self,
        item: &WorkItem,
        capture: &DownloadCapture,
        root: &Path,
    ) -> Result<ItemOutcome> {
        let form = self
            .form
            .as_ref()
            .ok_or_else(|| Error::SessionLost("no browser session".into()))?;

        if self.state.as_deref() != Some(item.state.as_str()) {
            self.state = None;
            form.select(Role::State, &item.state).await?;
            self.state = Some(item.state.clone());
        }
        self.phase = Phase::StateSelected;

        form.select(Role::Year, &item.year.to_string()).await?;
        form.refresh().await?;
        self.phase = Phase::YearConfirmed;

        let months = month_options(form.list_options(Role::Month).await?);
        if first_match(&months, item.month.abbr()).is_none() {
            tracing::info!(%item, offered = ?months, "Month not offered, skipping");
            return Ok(ItemOutcome::MonthUnavailable);
        }

        form.select(Role::Month, item.month.abbr()).await?;
        self.phase = Phase::MonthSelected;
        sleep(self.month_settle).await;

        let saved = capture.trigger_and_capture(form, item, root).await?;
        self.phase = Phase::Downloaded;
        Ok(ItemOutcome::Downloaded(saved))
    }

    /// Close the browser
    pub async fn shutdown(mut self) {
        self.discard().await;
    }
}
