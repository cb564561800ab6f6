//! Background tasks run as child processes of the harvester binary

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};
use crate::scan;

/// Log lines kept per task
const MAX_LOG_LINES: usize = 2000;

/// Time a stopped child gets to close its browser before it is killed
const STOP_GRACE: Duration = Duration::from_secs(10);

/// What a task does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// A full run
    Run,
    /// A missing-only run over one output folder
    Missing { folder: Option<String> },
}

impl TaskKind {
    /// Parse a task name from the URL, validating any folder
    pub fn parse(name: &str, folder: Option<String>) -> Result<Self> {
        match name {
            "run" => Ok(TaskKind::Run),
            "missing" => {
                if let Some(folder) = &folder {
                    if !scan::is_output_folder_name(folder) {
                        return Err(Error::Config(format!("not an output folder: '{}'", folder)));
                    }
                }
                Ok(TaskKind::Missing { folder })
            }
            other => Err(Error::Config(format!("unknown task: '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Run => "run",
            TaskKind::Missing { .. } => "missing",
        }
    }

    /// Subcommand arguments for the child process
    pub fn args(&self) -> Vec<String> {
        match self {
            TaskKind::Run => vec!["run".into()],
            TaskKind::Missing { folder: None } => vec!["missing".into()],
            TaskKind::Missing { folder: Some(f) } => {
                vec!["missing".into(), "--folder".into(), f.clone()]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
}

/// One task's state as the API reports it
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub name: String,
    pub args: Vec<String>,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub log: Vec<String>,
}

type Slot = Arc<Mutex<TaskView>>;

/// Latest instance of one task and the signal that stops it
#[derive(Clone)]
struct Entry {
    view: Slot,
    stop: Arc<Notify>,
}

/// Tracks the latest instance of each task
///
/// Each task name runs at most once at a time. Different tasks may overlap;
/// each child drives its own browser.
#[derive(Clone)]
pub struct TaskRegistry {
    program: PathBuf,
    base_args: Vec<String>,
    tasks: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TaskRegistry {
    /// Children run `program base_args.. task_args..`
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            tasks: Arc::default(),
        }
    }

    /// Registry that re-invokes the running executable
    pub fn current_exe(base_args: Vec<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, base_args))
    }

    /// Start `kind`; fails with [`Error::TaskRunning`] while a previous instance runs
    pub async fn start(&self, kind: &TaskKind) -> Result<TaskView> {
        let mut tasks = self.tasks.lock().await;
        if let Some(entry) = tasks.get(kind.name()) {
            if entry.view.lock().await.status == TaskStatus::Running {
                return Err(Error::TaskRunning(kind.name().to_string()));
            }
        }

        let mut args = self.base_args.clone();
        args.extend(kind.args());

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let view = TaskView {
            name: kind.name().to_string(),
            args,
            status: TaskStatus::Running,
            exit_code: None,
            started_at: now(),
            finished_at: None,
            log: Vec::new(),
        };
        let slot: Slot = Arc::new(Mutex::new(view.clone()));
        let stop = Arc::new(Notify::new());
        tasks.insert(
            kind.name().to_string(),
            Entry {
                view: Arc::clone(&slot),
                stop: Arc::clone(&stop),
            },
        );
        drop(tasks);

        tracing::info!(task = kind.name(), pid = child.id(), "Task started");

        let out = child.stdout.take().map(|s| tokio::spawn(capture(s, Arc::clone(&slot))));
        let err = child.stderr.take().map(|s| tokio::spawn(capture(s, Arc::clone(&slot))));
        let name = kind.name();

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = stop.notified() => None,
            };
            let status = match exited {
                Some(status) => status,
                None => terminate(&mut child, name).await,
            };
            for reader in [out, err].into_iter().flatten() {
                let _ = reader.await;
            }

            let mut view = slot.lock().await;
            view.finished_at = Some(now());
            match status {
                Ok(status) => {
                    view.exit_code = status.code();
                    view.status = if status.success() {
                        TaskStatus::Succeeded
                    } else {
                        TaskStatus::Failed
                    };
                }
                Err(e) => {
                    view.log.push(format!("wait failed: {}", e));
                    view.status = TaskStatus::Failed;
                }
            }
            tracing::info!(task = name, status = ?view.status, code = ?view.exit_code, "Task finished");
        });

        Ok(view)
    }

    /// Ask every running child to stop and wait for them to exit
    ///
    /// Children get SIGTERM so they can close their browser; any still
    /// running after the grace period are killed.
    pub async fn stop_all(&self) {
        let entries: Vec<Entry> = self.tasks.lock().await.values().cloned().collect();
        for entry in &entries {
            if entry.view.lock().await.status == TaskStatus::Running {
                entry.stop.notify_one();
            }
        }

        let deadline = Instant::now() + STOP_GRACE + Duration::from_secs(2);
        for entry in &entries {
            while entry.view.lock().await.status == TaskStatus::Running && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    /// Latest instance of the task called `name`
    pub async fn get(&self, name: &str) -> Option<TaskView> {
        let entry = self.tasks.lock().await.get(name).cloned()?;
        let view = entry.view.lock().await.clone();
        Some(view)
    }

    /// Latest instance of every task, without logs
    pub async fn summary(&self) -> Vec<TaskView> {
        let entries: Vec<Entry> = self.tasks.lock().await.values().cloned().collect();
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut view = entry.view.lock().await.clone();
            view.log.clear();
            views.push(view);
        }
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }
}

/// SIGTERM, then SIGKILL once the grace period runs out
async fn terminate(child: &mut Child, name: &str) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        tracing::info!(task = name, pid, "Stopping task");
        if cfg!(unix) {
            let _ = Command::new("sh")
                .arg("-c")
                .arg(format!("kill -TERM {}", pid))
                .status()
                .await;
        }
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(task = name, "Task ignored SIGTERM, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(stream: R, slot: Slot) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut view = slot.lock().await;
        if view.log.len() >= MAX_LOG_LINES {
            view.log.remove(0);
        }
        view.log.push(line);
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Registry whose children run a shell snippet; task args land in `$@`
    fn shell(script: &str) -> TaskRegistry {
        TaskRegistry::new("sh", vec!["-c".into(), script.into(), "sh".into()])
    }

    async fn wait_done(registry: &TaskRegistry, name: &str) -> TaskView {
        let start = Instant::now();
        loop {
            let view = registry.get(name).await.unwrap();
            if view.status != TaskStatus::Running {
                return view;
            }
            assert!(start.elapsed() < Duration::from_secs(10), "task never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn test_task_kinds() {
        assert_eq!(TaskKind::parse("run", None).unwrap().args(), ["run"]);
        assert_eq!(
            TaskKind::parse("missing", Some("outputs_x".into())).unwrap().args(),
            ["missing", "--folder", "outputs_x"]
        );
        assert!(TaskKind::parse("missing", Some("../etc".into())).is_err());
        assert!(TaskKind::parse("rm", None).is_err());
    }

    #[tokio::test]
    async fn test_output_is_captured() {
        let registry = shell("echo started \"$@\"; echo oops >&2");
        registry.start(&TaskKind::Run).await.unwrap();

        let view = wait_done(&registry, "run").await;
        assert_eq!(view.status, TaskStatus::Succeeded);
        assert_eq!(view.exit_code, Some(0));
        assert!(view.log.contains(&"started run".to_string()));
        assert!(view.log.contains(&"oops".to_string()));
    }

    #[tokio::test]
    async fn test_failed_exit_is_reported() {
        let registry = shell("exit 3");
        registry.start(&TaskKind::Run).await.unwrap();
        let view = wait_done(&registry, "run").await;
        assert_eq!(view.status, TaskStatus::Failed);
        assert_eq!(view.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_same_task_cannot_overlap() {
        let registry = shell("sleep 1");
        registry.start(&TaskKind::Run).await.unwrap();

        let again = registry.start(&TaskKind::Run).await;
        assert!(matches!(again, Err(Error::TaskRunning(name)) if name == "run"));

        // A different task is allowed alongside
        registry
            .start(&TaskKind::Missing { folder: None })
            .await
            .unwrap();
        assert_eq!(registry.summary().await.len(), 2);

        wait_done(&registry, "run").await;
        registry.start(&TaskKind::Run).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_all_sends_sigterm_first() {
        let registry = shell("trap 'echo closing; exit 7' TERM; echo ready; while :; do sleep 0.05; done");
        registry.start(&TaskKind::Run).await.unwrap();

        let start = Instant::now();
        while !registry.get("run").await.unwrap().log.contains(&"ready".to_string()) {
            assert!(start.elapsed() < Duration::from_secs(10), "task never started");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        registry.stop_all().await;
        let view = registry.get("run").await.unwrap();
        assert_eq!(view.status, TaskStatus::Failed);
        assert_eq!(view.exit_code, Some(7));
        assert!(view.log.contains(&"closing".to_string()));
    }
}
