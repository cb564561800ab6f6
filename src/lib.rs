//! # vahan-harvest
//!
//! Harvest vehicle-registration reports from the Vahan dashboard.
//!
//! The dashboard is a server-rendered form built from component-framework
//! dropdowns whose element ids change between sessions. This crate drives it
//! over a hand-written Chrome DevTools Protocol client, files each exported
//! spreadsheet under `state/year/month`, and resumes interrupted runs by
//! scanning what is already on disk.
//!
//! ## Layers
//!
//! - [`locator`] finds a control by its semantic [`Role`] through an ordered
//!   list of strategies
//! - [`dropdown`] opens a control, waits for its option panel and picks an
//!   option, climbing the click [`ladder`] when a click does not land
//! - [`session`] keeps track of what the remote form has selected and replays
//!   the global filters after a browser restart
//! - [`download`] captures the exported file from the staging directory
//! - [`scan`] computes which (state, year, month) items are still missing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vahan_harvest::{run, FilterSet, PromptFile, Settings};
//!
//! #[tokio::main]
//! async fn main() -> vahan_harvest::Result<()> {
//!     let settings = Settings::default();
//!     let prompt = PromptFile::load(&settings.prompt_path)?;
//!     let filters = FilterSet::from_prompt(&prompt);
//!
//!     let ctrl_c = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     let report = run::run_full(&settings, &filters, ctrl_c).await?;
//!     println!("{} downloaded, {} failed", report.downloaded, report.failed.len());
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod browser;
pub mod cdp;
pub mod download;
pub mod dropdown;
pub mod error;
pub mod filters;
pub mod form;
pub mod ladder;
pub mod locator;
pub mod normalize;
pub mod page;
pub mod pointer;
pub mod role;
pub mod run;
pub mod scan;
pub mod scripts;
pub mod session;
pub mod settings;
pub mod web;

// Re-exports
pub use browser::Browser;
pub use download::DownloadCapture;
pub use dropdown::Dropdown;
pub use error::{Error, Result};
pub use filters::{FilterSet, Month, PromptFile, YearMonth};
pub use form::{ChromeForm, ChromeLauncher, Form, Launcher};
pub use locator::{Handle, Locator};
pub use normalize::normalize;
pub use page::{Element, Page};
pub use pointer::PointerSpeed;
pub use role::{Role, Strategy, TargetDescriptor};
pub use run::RunReport;
pub use scan::WorkItem;
pub use session::{Phase, SelectionSession};
pub use settings::{Settings, Timings};

/// How Chrome is launched for one session
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Headless mode
    pub headless: bool,
    /// Path to Chrome/Chromium binary (None = search the usual locations)
    pub chrome_path: Option<PathBuf>,
    /// Directory the browser saves exports into
    pub download_dir: PathBuf,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Where diagnostic screenshots go; none are taken when unset
    pub debug_dir: Option<PathBuf>,
    /// Speed of the simulated pointer
    pub pointer_speed: PointerSpeed,
    /// Ceiling for each DevTools command; expiry counts as a lost session
    pub command_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            download_dir: PathBuf::from("downloads"),
            viewport_width: 1920,
            viewport_height: 1080,
            debug_dir: None,
            pointer_speed: PointerSpeed::Normal,
            command_timeout: Duration::from_secs(30),
        }
    }
}
