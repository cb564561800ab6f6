//! Run orchestration
//!
//! A full run and a missing-only run are the same loop: compute the missing
//! items under an output root, then drive one session through them. A full
//! run just starts from a brand-new root.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::download::DownloadCapture;
use crate::error::{Error, Result};
use crate::filters::{year_month_range, FilterSet, YearMonth};
use crate::form::{ChromeLauncher, Launcher};
use crate::scan::{self, WorkItem, MASTER_STATES};
use crate::session::{ItemOutcome, SelectionSession};
use crate::settings::Settings;

/// Summary of one run
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub planned: usize,
    pub downloaded: usize,
    /// Items whose month the form did not offer
    pub unavailable: usize,
    /// Item and error, for every item that failed
    pub failed: Vec<(String, String)>,
    pub restarts: u32,
    /// Stopped early by a shutdown request
    pub interrupted: bool,
}

/// Which states a run covers
#[derive(Debug, Clone)]
pub enum Universe {
    /// Exactly these states
    Fixed(Vec<String>),
    /// Configured states, else the form's State options, else the master list
    Configured,
}

/// Where a missing-only run writes and what it still needs
#[derive(Debug, Clone, Serialize)]
pub struct MissingPlan {
    pub folder: String,
    pub root: PathBuf,
    pub start: String,
    pub end: String,
    #[serde(skip)]
    pub range: (YearMonth, YearMonth),
    /// Whether the range came from the folder name rather than the prompt file
    pub range_from_folder: bool,
    pub required: usize,
    pub items: Vec<WorkItem>,
}

/// Gap scan of an output folder against the master state list
///
/// Without `folder` the newest output folder is used. The range comes from
/// the folder name when it carries one, else from `filters`.
pub fn plan_missing(base_dir: &Path, filters: &FilterSet, folder: Option<&str>) -> Result<MissingPlan> {
    let folder = match folder {
        Some(name) => {
            if !scan::is_output_folder_name(name) {
                return Err(Error::Config(format!("not an output folder: '{}'", name)));
            }
            name.to_string()
        }
        None => scan::output_folders(base_dir)?
            .pop()
            .ok_or_else(|| Error::Config(format!("no output folders in {}", base_dir.display())))?,
    };

    let root = base_dir.join(&folder);
    if !root.is_dir() {
        return Err(Error::Config(format!("output folder not found: {}", root.display())));
    }

    let (range, range_from_folder) = match scan::parse_folder_range(&folder) {
        Some(range) => (range, true),
        None => {
            tracing::info!(%folder, "Folder name carries no range, using the prompt file");
            ((filters.start(), filters.end()), false)
        }
    };
    let (start, end): (YearMonth, YearMonth) = range;
    let months = year_month_range(start, end);
    let items = scan::compute_missing(&root, &MASTER_STATES, &months);

    Ok(MissingPlan {
        folder,
        root,
        start: start.to_string(),
        end: end.to_string(),
        range: (start, end),
        range_from_folder,
        required: MASTER_STATES.len() * months.len(),
        items,
    })
}

/// Download every configured item into a new output folder
///
/// The run stops and closes its browser once `shutdown` completes.
pub async fn run_full(
    settings: &Settings,
    filters: &FilterSet,
    shutdown: impl Future<Output = ()>,
) -> Result<RunReport> {
    let name = scan::run_folder_name(filters, chrono::Local::now().naive_local());
    let root = settings.base_dir.join(name);
    std::fs::create_dir_all(&root)?;
    tracing::info!(root = %root.display(), "Output directory for this run");

    let launcher = ChromeLauncher::new(settings.clone());
    execute(launcher, settings, filters, &root, Universe::Configured, shutdown).await
}

/// Download what an existing output folder is missing
pub async fn run_missing(
    settings: &Settings,
    filters: &FilterSet,
    folder: Option<&str>,
    shutdown: impl Future<Output = ()>,
) -> Result<RunReport> {
    let plan = plan_missing(&settings.base_dir, filters, folder)?;
    if plan.items.is_empty() {
        tracing::info!(folder = %plan.folder, "Nothing missing");
        return Ok(RunReport {
            output_dir: plan.root,
            ..Default::default()
        });
    }

    let (start, end) = plan.range;
    let filters = filters.clone().with_range(start, end);

    let launcher = ChromeLauncher::new(settings.clone());
    execute(
        launcher,
        settings,
        &filters,
        &plan.root,
        Universe::Fixed(MASTER_STATES.iter().map(|s| s.to_string()).collect()),
        shutdown,
    )
    .await
}

async fn resolve_states<L: Launcher>(
    session: &mut SelectionSession<L>,
    filters: &FilterSet,
) -> Result<Vec<String>> {
    if !filters.states().is_empty() {
        return Ok(filters.states().to_vec());
    }

    match session.state_options().await {
        Ok(states) if !states.is_empty() => {
            tracing::info!(count = states.len(), "Using states offered by the form");
            return Ok(states);
        }
        Ok(_) => tracing::warn!("Form offered no states"),
        Err(e @ Error::RetryExhausted { .. }) => return Err(e),
        Err(e) => tracing::warn!(error = %e, "Could not read state options"),
    }

    tracing::info!("Using the master state list");
    Ok(MASTER_STATES.iter().map(|s| s.to_string()).collect())
}

/// Drive one session through every missing item under `root`
///
/// Only the failure to launch any browser is an error; everything else
/// lands in the report. When `shutdown` completes the current item is
/// abandoned, the browser is closed and the report comes back interrupted.
pub async fn execute<L: Launcher>(
    launcher: L,
    settings: &Settings,
    filters: &FilterSet,
    root: &Path,
    universe: Universe,
    shutdown: impl Future<Output = ()>,
) -> Result<RunReport> {
    let mut shutdown = std::pin::pin!(shutdown);
    let mut session = SelectionSession::new(launcher, filters.globals())
        .with_max_restarts(settings.max_restarts)
        .with_month_settle(settings.timings.month_settle);

    let started = tokio::select! {
        biased;
        _ = &mut shutdown => None,
        started = session.start() => Some(started),
    };
    match started {
        Some(result) => result?,
        None => {
            tracing::warn!("Shutdown requested before work started");
            session.shutdown().await;
            return Ok(RunReport {
                output_dir: root.to_path_buf(),
                interrupted: true,
                ..Default::default()
            });
        }
    }

    let states = match universe {
        Universe::Fixed(states) => states,
        Universe::Configured => resolve_states(&mut session, filters).await?,
    };

    let items = scan::compute_missing(root, &states, &filters.year_months());
    let capture = DownloadCapture::new(&settings.staging_dir, &settings.timings);
    let mut report = RunReport {
        output_dir: root.to_path_buf(),
        planned: items.len(),
        ..Default::default()
    };

    tracing::info!(
        states = states.len(),
        months = filters.year_months().len(),
        items = items.len(),
        "Starting work"
    );

    for item in &items {
        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            outcome = session.process(item, &capture, root) => Some(outcome),
        };
        match outcome {
            Some(Ok(ItemOutcome::Downloaded(_))) => report.downloaded += 1,
            Some(Ok(ItemOutcome::MonthUnavailable)) => report.unavailable += 1,
            Some(Ok(ItemOutcome::Failed(e))) => report.failed.push((item.to_string(), e.to_string())),
            Some(Err(e)) => {
                tracing::error!(%item, error = %e, "No browser session, stopping run");
                session.shutdown().await;
                return Err(e);
            }
            None => {
                tracing::warn!(%item, "Shutdown requested, closing the browser");
                report.interrupted = true;
                break;
            }
        }
    }

    report.restarts = session.restarts();
    session.shutdown().await;

    tracing::info!(
        planned = report.planned,
        downloaded = report.downloaded,
        unavailable = report.unavailable,
        failed = report.failed.len(),
        restarts = report.restarts,
        interrupted = report.interrupted,
        "Run finished"
    );
    Ok(report)
}
