//! Resume/Gap Scanner
//!
//! Walks an output tree once and reports which (state, year, month) items
//! still lack a completed spreadsheet. Names are compared by their
//! normalized key, so a folder written as `Andaman & Nicobar Island(3)` and a
//! list entry spelled with a curly ampersand or NBSP are the same state.
//!
//! Layouts recognized under one output folder:
//!
//! ```text
//! <state>/<yyyy>/<MON>/*.xlsx     current
//! <state>/<MON>/*.xlsx            legacy, no year segment
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::filters::{FilterSet, Month, YearMonth};
use crate::normalize::normalize;
use crate::role::Role;

/// Every state the dashboard reports on, with its RTO count
pub const MASTER_STATES: [&str; 35] = [
    "Andaman & Nicobar Island(3)",
    "Andhra Pradesh(83)",
    "Arunachal Pradesh(29)",
    "Assam(33)",
    "Bihar(48)",
    "Chhattisgarh(31)",
    "Chandigarh(1)",
    "UT of DNH and DD(3)",
    "Delhi(16)",
    "Goa(13)",
    "Gujarat(37)",
    "Himachal Pradesh(96)",
    "Haryana(98)",
    "Jharkhand(25)",
    "Jammu and Kashmir(21)",
    "Karnataka(68)",
    "Kerala(87)",
    "Ladakh(3)",
    "Lakshadweep(6)",
    "Maharashtra(59)",
    "Meghalaya(15)",
    "Manipur(13)",
    "Madhya Pradesh(53)",
    "Mizoram(10)",
    "Nagaland(9)",
    "Odisha(39)",
    "Punjab(96)",
    "Puducherry(8)",
    "Rajasthan(59)",
    "Sikkim(9)",
    "Tamil Nadu(148)",
    "Tripura(9)",
    "Uttarakhand(21)",
    "Uttar Pradesh(77)",
    "West Bengal(59)",
];

/// Extension of an exported report
pub const REPORT_EXTENSION: &str = "xlsx";

/// One report to download
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkItem {
    pub state: String,
    pub year: i32,
    #[serde(serialize_with = "serialize_month")]
    pub month: Month,
}

fn serialize_month<S: serde::Serializer>(month: &Month, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(month.abbr())
}

impl WorkItem {
    pub fn new(state: impl Into<String>, year: i32, month: Month) -> Self {
        Self {
            state: state.into(),
            year,
            month,
        }
    }

    /// Directory the item's report is filed under
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.state)
            .join(self.year.to_string())
            .join(self.month.abbr())
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.state, self.year, self.month)
    }
}

/// Month folder key; `January`, `jan` and `JAN` all key as `jan`
fn month_key(name: &str) -> String {
    match Month::parse(name) {
        Some(month) => normalize(month.abbr()),
        None => normalize(name),
    }
}

/// A regular `.xlsx` file that is not an Office lock file
pub fn is_completed_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(REPORT_EXTENSION));
    has_extension && !name.starts_with("~$") && path.is_file()
}

fn has_completed_file(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| is_completed_file(&entry.path()))
        })
        .unwrap_or(false)
}

fn subdirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            Some((name, entry.path()))
        })
        .collect()
}

fn parse_year(name: &str) -> Option<i32> {
    if name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Output Path Keys with at least one completed file
#[derive(Debug, Default, Clone)]
pub struct ExistingOutputs {
    dated: HashSet<(String, i32, String)>,
    legacy: HashSet<(String, String)>,
}

impl ExistingOutputs {
    /// Whether the item is satisfied; legacy entries cover every year
    pub fn contains(&self, state: &str, year: i32, month: Month) -> bool {
        let state = normalize(state);
        let month = normalize(month.abbr());
        self.legacy.contains(&(state.clone(), month.clone()))
            || self.dated.contains(&(state, year, month))
    }

    pub fn len(&self) -> usize {
        self.dated.len() + self.legacy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collect every satisfied key under `root`; a missing root is empty
pub fn scan_existing(root: &Path) -> ExistingOutputs {
    let mut found = ExistingOutputs::default();

    for (state_name, state_path) in subdirs(root) {
        let state = normalize(&state_name);
        for (name, path) in subdirs(&state_path) {
            if let Some(year) = parse_year(&name) {
                for (month_name, month_path) in subdirs(&path) {
                    if has_completed_file(&month_path) {
                        tracing::trace!(state = %state_name, year, month = %month_name, "Found report");
                        found.dated.insert((state.clone(), year, month_key(&month_name)));
                    }
                }
            } else if has_completed_file(&path) {
                tracing::trace!(state = %state_name, month = %name, "Found legacy report");
                found.legacy.insert((state.clone(), month_key(&name)));
            }
        }
    }

    found
}

/// Items of `states` × `range` with no completed file under `root`
///
/// State-major order: every month of the first state, then the next state.
pub fn compute_missing<S: AsRef<str>>(
    root: &Path,
    states: &[S],
    range: &[YearMonth],
) -> Vec<WorkItem> {
    let existing = scan_existing(root);
    let missing: Vec<WorkItem> = states
        .iter()
        .flat_map(|state| {
            range.iter().map(move |ym| (state.as_ref(), *ym))
        })
        .filter(|(state, ym)| !existing.contains(state, ym.year, ym.month))
        .map(|(state, ym)| WorkItem::new(state, ym.year, ym.month))
        .collect();

    tracing::info!(
        root = %root.display(),
        existing = existing.len(),
        required = states.len() * range.len(),
        missing = missing.len(),
        "Gap scan complete"
    );
    missing
}

// =============================================================================
// Output folders
// =============================================================================

/// Whether `name` is a plain output folder name (`outputs` or `outputs_*`)
pub fn is_output_folder_name(name: &str) -> bool {
    name.starts_with("outputs")
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
}

/// Names of the output folders directly under `base`, sorted
pub fn output_folders(base: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(base)?
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_output_folder_name(name))
        .collect();
    names.sort();
    Ok(names)
}

/// `outputs_<yaxis>_<xaxis>_<SY><SM>_to_<EY><EM>_<stamp>` for a new run
pub fn run_folder_name(filters: &FilterSet, now: chrono::NaiveDateTime) -> String {
    let part = |value: Option<&str>| match value {
        Some(v) if !v.trim().is_empty() => v.trim().replace(' ', "_"),
        _ => "unknown".to_string(),
    };
    format!(
        "outputs_{}_{}_{}_to_{}_{}",
        part(filters.value(Role::YAxis)),
        part(filters.value(Role::XAxis)),
        filters.start(),
        filters.end(),
        now.format("%Y%m%d_%H%M%S"),
    )
}

/// Range encoded in a run folder name
pub fn parse_folder_range(name: &str) -> Option<(YearMonth, YearMonth)> {
    let re = Regex::new(r"_(\d{4})([A-Z]{3})_to_(\d{4})([A-Z]{3})").ok()?;
    let caps = re.captures(name)?;
    let start = YearMonth::new(caps[1].parse().ok()?, Month::parse(&caps[2])?);
    let end = YearMonth::new(caps[3].parse().ok()?, Month::parse(&caps[4])?);
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{year_month_range, PromptFile};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"PK").unwrap();
    }

    fn q1_2024() -> Vec<YearMonth> {
        year_month_range(
            YearMonth::new(2024, Month::Jan),
            YearMonth::new(2024, Month::Mar),
        )
    }

    #[test]
    fn test_master_list_keys_are_distinct() {
        let keys: HashSet<_> = MASTER_STATES.iter().map(|s| normalize(s)).collect();
        assert_eq!(keys.len(), MASTER_STATES.len());
    }

    #[test]
    fn test_lock_files_and_other_extensions_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Goa(13)/2024/JAN/~$vahan_data.xlsx");
        touch(dir.path(), "Goa(13)/2024/JAN/vahan_data.xlsx.crdownload");
        touch(dir.path(), "Goa(13)/2024/FEB/VAHAN_DATA.XLSX");

        let existing = scan_existing(dir.path());
        assert!(!existing.contains("Goa(13)", 2024, Month::Jan));
        assert!(existing.contains("Goa(13)", 2024, Month::Feb));
    }

    #[test]
    fn test_empty_month_folder_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Goa(13)/2024/JAN")).unwrap();
        let missing = compute_missing(dir.path(), &["Goa(13)"], &q1_2024());
        assert_eq!(missing.len(), 3);
    }

    #[test]
    fn test_state_spelling_variants_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Andaman \u{FF06} Nicobar\u{a0}Island(3)/2024/JAN/a.xlsx");
        let missing = compute_missing(dir.path(), &["Andaman & Nicobar Island(3)"], &q1_2024());
        let months: Vec<_> = missing.iter().map(|w| w.month).collect();
        assert_eq!(months, vec![Month::Feb, Month::Mar]);
    }

    #[test]
    fn test_full_month_names_count_as_their_abbreviation() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Goa(13)/2024/January/a.xlsx");
        assert!(scan_existing(dir.path()).contains("Goa(13)", 2024, Month::Jan));
    }

    #[test]
    fn test_missing_root_means_everything_missing() {
        let missing = compute_missing(Path::new("/nonexistent/outputs"), &["Goa(13)"], &q1_2024());
        assert_eq!(missing.len(), 3);
    }

    #[test]
    fn test_missing_is_state_major() {
        let dir = tempfile::tempdir().unwrap();
        let missing = compute_missing(dir.path(), &["A(1)", "B(2)"], &q1_2024());
        let order: Vec<_> = missing.iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            [
                "A(1)/2024/JAN",
                "A(1)/2024/FEB",
                "A(1)/2024/MAR",
                "B(2)/2024/JAN",
                "B(2)/2024/FEB",
                "B(2)/2024/MAR",
            ]
        );
    }

    #[test]
    fn test_output_folders_are_listed_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("outputs_b")).unwrap();
        fs::create_dir_all(dir.path().join("outputs")).unwrap();
        fs::create_dir_all(dir.path().join("downloads")).unwrap();
        fs::write(dir.path().join("outputs.txt"), b"").unwrap();
        assert_eq!(output_folders(dir.path()).unwrap(), ["outputs", "outputs_b"]);
    }

    #[test]
    fn test_run_folder_name_round_trips_range() {
        let prompt = PromptFile::parse(
            "Y-Axis: Maker\nX-Axis: Month Wise\nStart_Year: 2023\nStart_Month: NOV\nEnd_Year: 2024\nEnd_Month: feb\n",
        );
        let filters = FilterSet::from_prompt(&prompt);
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        let name = run_folder_name(&filters, now);
        assert_eq!(name, "outputs_Maker_Month_Wise_2023NOV_to_2024FEB_20240305_140709");
        assert_eq!(
            parse_folder_range(&name),
            Some((
                YearMonth::new(2023, Month::Nov),
                YearMonth::new(2024, Month::Feb)
            ))
        );
    }

    #[test]
    fn test_folder_without_range() {
        assert_eq!(parse_folder_range("outputs"), None);
        assert_eq!(parse_folder_range("outputs_2024XYZ_to_2024JAN"), None);
    }

    #[test]
    fn test_folder_name_validation() {
        assert!(is_output_folder_name("outputs_Maker"));
        assert!(!is_output_folder_name("../outputs"));
        assert!(!is_output_folder_name("outputs/../etc"));
        assert!(!is_output_folder_name("downloads"));
    }
}
