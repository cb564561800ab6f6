use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vahan_harvest::filters::{FilterSet, PromptFile};
use vahan_harvest::run::{self, RunReport};
use vahan_harvest::settings::{Settings, DEFAULT_DASHBOARD_URL};
use vahan_harvest::web::{self, AppState, TaskRegistry};

/// Pause between scheduled runs
const SCHEDULE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "vahan-harvest")]
#[command(about = "Download VAHAN registration reports per state and month")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Dashboard report page
    #[arg(long, global = true, env = "VAHAN_URL", default_value = DEFAULT_DASHBOARD_URL)]
    url: String,

    /// Directory holding the outputs* folders
    #[arg(long, global = true, env = "VAHAN_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Prompt file with the filter values
    #[arg(long, global = true, env = "VAHAN_PROMPT", default_value = "prompt.txt")]
    prompt: PathBuf,

    /// Where the browser saves exports before they are filed
    #[arg(long, global = true, env = "VAHAN_STAGING", default_value = "downloads")]
    staging: PathBuf,

    /// Chrome executable (searched for when absent)
    #[arg(long, global = true, env = "CHROME_PATH")]
    chrome: Option<PathBuf>,

    /// Show the browser window
    #[arg(long, global = true, env = "VAHAN_HEADED")]
    headed: bool,

    /// Write screenshots of failed clicks here
    #[arg(long, global = true, env = "VAHAN_DEBUG_DIR")]
    debug_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "VAHAN_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every configured state and month into a new output folder
    Run,

    /// Run every hour
    Schedule {
        /// Start the first run immediately instead of after an hour
        #[arg(long)]
        now: bool,
    },

    /// Download only what an output folder is missing
    Missing {
        /// Output folder under the base directory (newest when absent)
        #[arg(long)]
        folder: Option<String>,

        /// Print the missing items without opening a browser
        #[arg(long)]
        dry_run: bool,
    },

    /// Report the gaps of an output folder
    Scan {
        #[arg(long)]
        folder: Option<String>,
    },

    /// Serve the web dashboard
    Serve {
        #[arg(long, env = "VAHAN_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            dashboard_url: self.url.clone(),
            base_dir: self.base_dir.clone(),
            prompt_path: self.prompt.clone(),
            staging_dir: self.staging.clone(),
            chrome_path: self.chrome.clone(),
            headless: !self.headed,
            debug_dir: self.debug_dir.clone(),
            ..Default::default()
        }
    }

    /// Global flags to hand to child processes started by the dashboard
    fn child_args(&self) -> Vec<String> {
        let mut args = vec![
            "--url".to_string(),
            self.url.clone(),
            "--base-dir".to_string(),
            self.base_dir.display().to_string(),
            "--prompt".to_string(),
            self.prompt.display().to_string(),
            "--staging".to_string(),
            self.staging.display().to_string(),
        ];
        if let Some(chrome) = &self.chrome {
            args.extend(["--chrome".to_string(), chrome.display().to_string()]);
        }
        if let Some(dir) = &self.debug_dir {
            args.extend(["--debug-dir".to_string(), dir.display().to_string()]);
        }
        if self.headed {
            args.push("--headed".to_string());
        }
        args
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vahan_harvest=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_filters(settings: &Settings) -> anyhow::Result<FilterSet> {
    let prompt = PromptFile::load(&settings.prompt_path)
        .with_context(|| format!("reading {}", settings.prompt_path.display()))?;
    Ok(FilterSet::from_prompt(&prompt))
}

fn print_report(report: &RunReport) {
    println!("Output:      {}", report.output_dir.display());
    println!("Planned:     {}", report.planned);
    println!("Downloaded:  {}", report.downloaded);
    println!("Unavailable: {}", report.unavailable);
    println!("Failed:      {}", report.failed.len());
    for (item, error) in &report.failed {
        println!("  {}: {}", item, error);
    }
}

async fn run_once(settings: &Settings, shutdown: impl Future<Output = ()>) -> anyhow::Result<RunReport> {
    let filters = load_filters(settings)?;
    let report = run::run_full(settings, &filters, shutdown).await?;
    Ok(report)
}

/// Completes on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Print the report; an interrupted run exits non-zero
fn finish(report: &RunReport) -> anyhow::Result<()> {
    print_report(report);
    if report.interrupted {
        anyhow::bail!("Run interrupted before all items were processed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let settings = cli.settings();

    match &cli.command {
        Command::Run => {
            let report = run_once(&settings, shutdown_signal()).await?;
            finish(&report)?;
        }

        Command::Schedule { now } => {
            let mut shutdown = std::pin::pin!(shutdown_signal());
            if !now {
                tracing::info!(minutes = SCHEDULE_INTERVAL.as_secs() / 60, "First run scheduled");
                tokio::select! {
                    _ = tokio::time::sleep(SCHEDULE_INTERVAL) => {}
                    _ = &mut shutdown => return Ok(()),
                }
            }
            loop {
                match run_once(&settings, &mut shutdown).await {
                    Ok(report) if report.interrupted => return finish(&report),
                    Ok(report) => print_report(&report),
                    Err(e) => tracing::error!(error = %e, "Scheduled run failed"),
                }
                tracing::info!(minutes = SCHEDULE_INTERVAL.as_secs() / 60, "Next run scheduled");
                tokio::select! {
                    _ = tokio::time::sleep(SCHEDULE_INTERVAL) => {}
                    _ = &mut shutdown => return Ok(()),
                }
            }
        }

        Command::Missing { folder, dry_run } => {
            let filters = load_filters(&settings)?;
            if *dry_run {
                let plan = run::plan_missing(&settings.base_dir, &filters, folder.as_deref())?;
                println!("{}: {} of {} missing", plan.folder, plan.items.len(), plan.required);
                for item in &plan.items {
                    println!("  {}", item);
                }
            } else {
                let report =
                    run::run_missing(&settings, &filters, folder.as_deref(), shutdown_signal()).await?;
                finish(&report)?;
            }
        }

        Command::Scan { folder } => {
            let filters = load_filters(&settings)?;
            let plan = run::plan_missing(&settings.base_dir, &filters, folder.as_deref())?;
            println!("Folder:   {}", plan.folder);
            println!(
                "Range:    {} to {}{}",
                plan.start,
                plan.end,
                if plan.range_from_folder { "" } else { " (from prompt file)" }
            );
            println!("Required: {}", plan.required);
            println!("Present:  {}", plan.required - plan.items.len());
            println!("Missing:  {}", plan.items.len());

            let mut by_state: Vec<(&str, usize)> = Vec::new();
            for item in &plan.items {
                match by_state.last_mut() {
                    Some((state, count)) if *state == item.state => *count += 1,
                    _ => by_state.push((&item.state, 1)),
                }
            }
            for (state, count) in by_state {
                println!("  {:<45} {}", state, count);
            }
        }

        Command::Serve { bind } => {
            let state = Arc::new(AppState {
                base_dir: settings.base_dir.clone(),
                prompt_path: settings.prompt_path.clone(),
                tasks: TaskRegistry::current_exe(cli.child_args())?,
            });
            web::serve(state, *bind, shutdown_signal()).await?;
        }
    }

    Ok(())
}
