//! Dashboard API handlers

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Html,
    Json,
};
use serde::{Deserialize, Serialize};

use super::archive;
use super::tasks::{TaskKind, TaskView};
use super::AppState;
use crate::error::Error;
use crate::filters::{FilterSet, PromptFile};
use crate::run::{self, MissingPlan};
use crate::scan;

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

fn api_error(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::TaskRunning(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Path of a named output folder, after validating the name
fn output_dir(state: &AppState, folder: &str) -> ApiResult<PathBuf> {
    if !scan::is_output_folder_name(folder) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Not an output folder: '{}'", folder),
        ));
    }
    let dir = state.base_dir.join(folder);
    if !dir.is_dir() {
        return Err((StatusCode::NOT_FOUND, format!("No such folder: '{}'", folder)));
    }
    Ok(dir)
}

fn load_prompt(state: &AppState) -> ApiResult<PromptFile> {
    PromptFile::load(&state.prompt_path).map_err(api_error)
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>vahan-harvest</title></head>
<body>
<h1>vahan-harvest</h1>
<ul>
<li><a href="/api/status">status</a></li>
<li><a href="/api/outputs">output folders</a></li>
<li><a href="/api/filters">filters</a></li>
</ul>
<p>Start a run with <code>POST /api/tasks/run</code>, fill gaps with
<code>POST /api/tasks/missing?folder=NAME</code>.</p>
</body>
</html>
"#;

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// =============================================================================
// Status and tasks
// =============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub base_dir: String,
    pub prompt_path: String,
    pub outputs: Vec<String>,
    pub tasks: Vec<TaskView>,
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let outputs = scan::output_folders(&state.base_dir).map_err(api_error)?;
    Ok(Json(StatusResponse {
        base_dir: state.base_dir.display().to_string(),
        prompt_path: state.prompt_path.display().to_string(),
        outputs,
        tasks: state.tasks.summary().await,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub folder: Option<String>,
}

pub async fn start_task_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    let kind = TaskKind::parse(&name, query.folder).map_err(api_error)?;
    if let TaskKind::Missing { folder: Some(folder) } = &kind {
        output_dir(&state, folder)?;
    }

    let view = state.tasks.start(&kind).await.map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

pub async fn task_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TaskView>> {
    state
        .tasks
        .get(&name)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Task '{}' has not run", name)))
}

// =============================================================================
// Output folders
// =============================================================================

#[derive(Debug, Serialize)]
pub struct OutputFolder {
    pub name: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

pub async fn outputs_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<OutputFolder>>> {
    let folders = scan::output_folders(&state.base_dir)
        .map_err(api_error)?
        .into_iter()
        .map(|name| {
            let range = scan::parse_folder_range(&name);
            OutputFolder {
                start: range.map(|(s, _)| s.to_string()),
                end: range.map(|(_, e)| e.to_string()),
                name,
            }
        })
        .collect();
    Ok(Json(folders))
}

pub async fn missing_handler(
    State(state): State<Arc<AppState>>,
    Path(folder): Path<String>,
) -> ApiResult<Json<MissingPlan>> {
    output_dir(&state, &folder)?;
    let filters = FilterSet::from_prompt(&load_prompt(&state)?);
    run::plan_missing(&state.base_dir, &filters, Some(&folder))
        .map(Json)
        .map_err(api_error)
}

pub async fn archive_handler(
    State(state): State<Arc<AppState>>,
    Path(folder): Path<String>,
) -> ApiResult<([(header::HeaderName, String); 2], Vec<u8>)> {
    let dir = output_dir(&state, &folder)?;
    let bytes = tokio::task::spawn_blocking(move || archive::tar_gz(&dir))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)?;

    tracing::info!(%folder, bytes = bytes.len(), "Archive served");
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.tar.gz\"", folder),
            ),
        ],
        bytes,
    ))
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Serialize)]
pub struct FiltersResponse {
    pub values: BTreeMap<String, Vec<String>>,
    pub start: String,
    pub end: String,
    /// True when the prompt file has no usable range
    pub range_defaulted: bool,
    /// Global filters left at the dashboard's default
    pub unset: Vec<&'static str>,
}

impl FiltersResponse {
    fn from_prompt(prompt: &PromptFile) -> Self {
        let filters = FilterSet::from_prompt(prompt);
        Self {
            values: prompt.to_map(),
            start: filters.start().to_string(),
            end: filters.end().to_string(),
            range_defaulted: filters.range_defaulted,
            unset: filters.unset_globals.iter().map(|role| role.key()).collect(),
        }
    }
}

/// Keys to set; values are comma-separated
#[derive(Debug, Deserialize)]
pub struct FiltersUpdate {
    pub values: BTreeMap<String, String>,
}

pub async fn filters_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<FiltersResponse>> {
    let prompt = load_prompt(&state)?;
    Ok(Json(FiltersResponse::from_prompt(&prompt)))
}

pub async fn update_filters_handler(
    State(state): State<Arc<AppState>>,
    Json(update): Json<FiltersUpdate>,
) -> ApiResult<Json<FiltersResponse>> {
    if let Some(key) = update
        .values
        .keys()
        .find(|k| k.trim().is_empty() || k.contains(':') || k.contains('\n'))
    {
        return Err((StatusCode::BAD_REQUEST, format!("Invalid key: '{}'", key)));
    }

    let mut prompt = load_prompt(&state)?;
    for (key, value) in &update.values {
        let values: Vec<String> = value
            .split(',')
            .map(|v| v.trim().replace('\n', " "))
            .filter(|v| !v.is_empty())
            .collect();
        prompt.set(key, &values);
    }
    prompt.save(&state.prompt_path).map_err(api_error)?;

    tracing::info!(keys = update.values.len(), path = %state.prompt_path.display(), "Filters updated");
    Ok(Json(FiltersResponse::from_prompt(&prompt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::tasks::TaskRegistry;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn state(base: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState {
            base_dir: base.to_path_buf(),
            prompt_path: base.join("prompt.txt"),
            tasks: TaskRegistry::new("sh", vec!["-c".into(), "sleep 1".into(), "sh".into()]),
        })
    }

    #[tokio::test]
    async fn test_folder_names_are_validated() {
        let base = tempfile::tempdir().unwrap();
        let state = state(base.path());

        let err = missing_handler(State(Arc::clone(&state)), Path("../secrets".into()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = archive_handler(State(Arc::clone(&state)), Path("outputs_gone".into()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_outputs_and_missing() {
        let base = tempfile::tempdir().unwrap();
        let folder = "outputs_Maker_Month_Wise_2024JAN_to_2024JAN_20240201_090000";
        let jan = base.path().join(folder).join("Goa(13)/2024/JAN");
        fs::create_dir_all(&jan).unwrap();
        fs::write(jan.join("a.xlsx"), b"PK").unwrap();
        let state = state(base.path());

        let Json(outputs) = outputs_handler(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].start.as_deref(), Some("2024JAN"));

        let Json(plan) = missing_handler(State(state), Path(folder.into())).await.unwrap();
        assert_eq!(plan.required, scan::MASTER_STATES.len());
        assert_eq!(plan.items.len(), plan.required - 1);
    }

    #[tokio::test]
    async fn test_filter_update_keeps_other_lines() {
        let base = tempfile::tempdir().unwrap();
        let state = state(base.path());
        fs::write(&state.prompt_path, "# harvest settings\nY-Axis: Maker\nNotes: keep\n").unwrap();

        let mut values = BTreeMap::new();
        values.insert("y-axis".to_string(), "Fuel".to_string());
        values.insert("State".to_string(), "Goa(13), Kerala(87)".to_string());
        let Json(resp) = update_filters_handler(State(Arc::clone(&state)), Json(FiltersUpdate { values }))
            .await
            .unwrap();

        assert_eq!(resp.values["yaxis"], ["Fuel"]);
        assert_eq!(resp.values["state"], ["Goa(13)", "Kerala(87)"]);
        let text = fs::read_to_string(&state.prompt_path).unwrap();
        assert!(text.starts_with("# harvest settings\nY-Axis: Fuel\nNotes: keep\n"));
        assert_eq!(resp.unset, ["xaxis", "type", "year_type", "year", "rto"]);
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let base = tempfile::tempdir().unwrap();
        let state = state(base.path());

        let (status, _) = start_task_handler(
            State(Arc::clone(&state)),
            Path("run".into()),
            Query(TaskQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let err = start_task_handler(State(Arc::clone(&state)), Path("run".into()), Query(TaskQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);

        let err = start_task_handler(State(state), Path("format".into()), Query(TaskQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
