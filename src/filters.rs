//! Prompt file, filter set and year-month ranges
//!
//! The prompt file is line oriented, `Key: value[, value...]`, with
//! case-insensitive keys. [`PromptFile`] keeps every raw line so a rewrite
//! only touches the keys it sets; unknown keys and free text survive verbatim.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Datelike;

use crate::dropdown::is_sentinel;
use crate::error::{Error, Result};
use crate::role::Role;

// =============================================================================
// Months
// =============================================================================

/// Calendar month, displayed as the dashboard's upper-case abbreviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    /// `JAN` .. `DEC`, also the output folder name
    pub fn abbr(&self) -> &'static str {
        match self {
            Month::Jan => "JAN",
            Month::Feb => "FEB",
            Month::Mar => "MAR",
            Month::Apr => "APR",
            Month::May => "MAY",
            Month::Jun => "JUN",
            Month::Jul => "JUL",
            Month::Aug => "AUG",
            Month::Sep => "SEP",
            Month::Oct => "OCT",
            Month::Nov => "NOV",
            Month::Dec => "DEC",
        }
    }

    fn full_name(&self) -> &'static str {
        match self {
            Month::Jan => "JANUARY",
            Month::Feb => "FEBRUARY",
            Month::Mar => "MARCH",
            Month::Apr => "APRIL",
            Month::May => "MAY",
            Month::Jun => "JUNE",
            Month::Jul => "JULY",
            Month::Aug => "AUGUST",
            Month::Sep => "SEPTEMBER",
            Month::Oct => "OCTOBER",
            Month::Nov => "NOVEMBER",
            Month::Dec => "DECEMBER",
        }
    }

    /// 1-based month number
    pub fn number(&self) -> u32 {
        *self as u32 + 1
    }

    pub fn from_number(n: u32) -> Option<Month> {
        n.checked_sub(1)
            .and_then(|i| Month::ALL.get(i as usize))
            .copied()
    }

    /// Accepts `JAN`, `jan`, `January`, `janu`; at least three letters
    pub fn parse(text: &str) -> Option<Month> {
        let upper = text.trim().to_uppercase();
        if upper.len() < 3 {
            return None;
        }
        Month::ALL
            .into_iter()
            .find(|m| m.full_name().starts_with(&upper))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbr())
    }
}

impl FromStr for Month {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Month::parse(s).ok_or_else(|| Error::Config(format!("not a month: '{}'", s)))
    }
}

/// A calendar month of a specific year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: Month,
}

impl YearMonth {
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    /// The following calendar month
    pub fn succ(&self) -> Self {
        match self.month {
            Month::Dec => Self::new(self.year + 1, Month::Jan),
            m => Self::new(
                self.year,
                Month::from_number(m.number() + 1).unwrap_or(Month::Dec),
            ),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.year, self.month)
    }
}

/// Every month from `start` to `end`, both inclusive; empty when reversed
pub fn year_month_range(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        out.push(current);
        current = current.succ();
    }
    out
}

// =============================================================================
// Prompt file
// =============================================================================

/// Map a raw prompt key to its canonical name
pub fn canonical_key(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    match key.as_str() {
        "y-axis" | "y axis" => "yaxis".into(),
        "x-axis" | "x axis" => "xaxis".into(),
        "year type" | "year-type" => "year_type".into(),
        _ => key,
    }
}

/// Key as written when a rewrite has to append a new line
fn display_key(key: &str) -> &str {
    match key {
        "yaxis" => "Y-Axis",
        "xaxis" => "X-Axis",
        "type" => "Type",
        "state" => "State",
        "rto" => "RTO",
        "year_type" => "Year Type",
        "year" => "Year",
        "month" => "Month",
        "start_year" => "Start_Year",
        "start_month" => "Start_Month",
        "end_year" => "End_Year",
        "end_month" => "End_Month",
        other => other,
    }
}

fn split_line(line: &str) -> Option<(String, Vec<String>)> {
    let (key, values) = line.split_once(':')?;
    let key = canonical_key(key);
    if key.is_empty() {
        return None;
    }
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    Some((key, values))
}

/// The prompt file, line for line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptFile {
    lines: Vec<String>,
}

impl PromptFile {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(String::from).collect(),
        }
    }

    /// Read the file; a missing file yields an empty prompt and a warning
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Prompt file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    /// Values of `key`; a later line for the same key wins
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let key = canonical_key(key);
        self.lines
            .iter()
            .filter_map(|line| split_line(line))
            .filter(|(k, _)| *k == key)
            .map(|(_, values)| values)
            .last()
    }

    /// First value of `key`
    pub fn first(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|values| values.into_iter().next())
    }

    /// Replace the line for `key` in place, or append one
    ///
    /// Further lines for the same key are dropped so the new value is the
    /// one that reads back.
    pub fn set(&mut self, key: &str, values: &[String]) {
        let key = canonical_key(key);
        let mut replaced = false;
        let mut kept = Vec::with_capacity(self.lines.len() + 1);

        for line in self.lines.drain(..) {
            let matches = split_line(&line).is_some_and(|(k, _)| k == key);
            if !matches {
                kept.push(line);
                continue;
            }
            if !replaced {
                // Keep the key spelling the user wrote
                let written = line.split_once(':').map_or("", |(k, _)| k.trim());
                kept.push(format!("{}: {}", written, values.join(", ")));
                replaced = true;
            }
        }

        if !replaced {
            kept.push(format!("{}: {}", display_key(&key), values.join(", ")));
        }
        self.lines = kept;
    }

    /// Every key with its values, for display
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.lines
            .iter()
            .filter_map(|line| split_line(line))
            .collect()
    }
}

// =============================================================================
// Filter set
// =============================================================================

/// Filters and range for one run, read once from the prompt file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    /// Global filters in replay order
    globals: Vec<(String, String)>,
    /// Configured states, sentinel entries removed
    states: Vec<String>,
    start: YearMonth,
    end: YearMonth,
    /// Whether the range fell back to the current calendar year
    pub range_defaulted: bool,
    /// Global filters the prompt file leaves unset; the dashboard's own default stays
    pub unset_globals: Vec<Role>,
}

impl FilterSet {
    pub fn from_prompt(prompt: &PromptFile) -> Self {
        Self::from_prompt_in_year(prompt, chrono::Local::now().year())
    }

    /// Like [`FilterSet::from_prompt`] with `current_year` as the range fallback
    pub fn from_prompt_in_year(prompt: &PromptFile, current_year: i32) -> Self {
        let mut globals = Vec::new();
        let mut unset_globals = Vec::new();
        for role in Role::GLOBALS {
            let Some(first) = prompt.first(role.key()) else {
                tracing::warn!(filter = role.key(), "Filter not configured, leaving the dashboard default");
                unset_globals.push(role);
                continue;
            };
            let values = prompt.get(role.key()).unwrap_or_default();
            if values.len() > 1 {
                tracing::warn!(
                    filter = role.key(),
                    values = ?values,
                    "Multiple values for a global filter, using the first"
                );
            }
            globals.push((role.key().to_string(), first));
        }

        let states = prompt
            .get("state")
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !is_sentinel(s))
            .collect();

        let range = Self::parse_range(prompt);
        let range_defaulted = range.is_none();
        let (start, end) = range.unwrap_or_else(|| {
            tracing::warn!(
                year = current_year,
                "Start/end year and month not set or invalid, using JAN..DEC of the current year"
            );
            (
                YearMonth::new(current_year, Month::Jan),
                YearMonth::new(current_year, Month::Dec),
            )
        });

        Self {
            globals,
            states,
            start,
            end,
            range_defaulted,
            unset_globals,
        }
    }

    fn parse_range(prompt: &PromptFile) -> Option<(YearMonth, YearMonth)> {
        let year = |key: &str| prompt.first(key)?.trim().parse::<i32>().ok();
        let month = |key: &str| Month::parse(&prompt.first(key)?);
        Some((
            YearMonth::new(year("start_year")?, month("start_month")?),
            YearMonth::new(year("end_year")?, month("end_month")?),
        ))
    }

    /// Global filters as (role, value), in replay order
    pub fn globals(&self) -> Vec<(Role, String)> {
        self.globals
            .iter()
            .filter_map(|(key, value)| Role::from_key(key).map(|role| (role, value.clone())))
            .collect()
    }

    /// Configured value of a global filter
    pub fn value(&self, role: Role) -> Option<&str> {
        self.globals
            .iter()
            .find(|(key, _)| key == role.key())
            .map(|(_, value)| value.as_str())
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn start(&self) -> YearMonth {
        self.start
    }

    pub fn end(&self) -> YearMonth {
        self.end
    }

    /// Override the range (used by the missing-only run)
    pub fn with_range(mut self, start: YearMonth, end: YearMonth) -> Self {
        self.start = start;
        self.end = end;
        self.range_defaulted = false;
        self
    }

    pub fn year_months(&self) -> Vec<YearMonth> {
        year_month_range(self.start(), self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROMPT: &str = "\
Y-Axis: Maker
X-Axis: Month Wise
Type: Actual Value
State: All Vahan4 Running States, Goa(13)
Year Type: Calendar Year
Year: 2024
RTO: All Vahan4 Running Office
Start_Year: 2024
Start_Month: JAN
End_Year: 2024
End_Month: MAR
Notes: keep me
";

    #[test]
    fn test_month_parse_variants() {
        assert_eq!(Month::parse("JAN"), Some(Month::Jan));
        assert_eq!(Month::parse(" january "), Some(Month::Jan));
        assert_eq!(Month::parse("Sept"), Some(Month::Sep));
        assert_eq!(Month::parse("Ja"), None);
        assert_eq!(Month::parse("2024"), None);
        assert!("xyz".parse::<Month>().is_err());
    }

    #[test]
    fn test_range_crosses_year_boundary() {
        let range = year_month_range(
            YearMonth::new(2023, Month::Nov),
            YearMonth::new(2024, Month::Feb),
        );
        let names: Vec<_> = range.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["2023NOV", "2023DEC", "2024JAN", "2024FEB"]);
    }

    #[test]
    fn test_reversed_range_is_empty() {
        let range = year_month_range(
            YearMonth::new(2024, Month::Mar),
            YearMonth::new(2024, Month::Jan),
        );
        assert!(range.is_empty());
    }

    #[test]
    fn test_keys_are_case_insensitive_and_aliased() {
        let prompt = PromptFile::parse(PROMPT);
        assert_eq!(prompt.first("yaxis").as_deref(), Some("Maker"));
        assert_eq!(prompt.first("YEAR TYPE").as_deref(), Some("Calendar Year"));
        assert_eq!(prompt.first("year_type").as_deref(), Some("Calendar Year"));
        assert_eq!(prompt.first("notes").as_deref(), Some("keep me"));
    }

    #[test]
    fn test_filter_set_orders_globals_and_drops_sentinel_states() {
        let filters = FilterSet::from_prompt(&PromptFile::parse(PROMPT));
        let roles: Vec<_> = filters.globals().into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, Role::GLOBALS.to_vec());
        assert_eq!(filters.states(), ["Goa(13)"]);
        assert_eq!(filters.value(Role::Rto), Some("All Vahan4 Running Office"));
        assert_eq!(filters.year_months().len(), 3);
        assert!(!filters.range_defaulted);
    }

    #[test]
    fn test_unset_globals_keep_dashboard_default() {
        let filters = FilterSet::from_prompt(&PromptFile::parse("Y-Axis: Maker\nYear: 2024\n"));
        assert_eq!(
            filters.unset_globals,
            [Role::XAxis, Role::Type, Role::YearType, Role::Rto]
        );
        let roles: Vec<_> = filters.globals().into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, [Role::YAxis, Role::Year]);
        assert_eq!(filters.value(Role::Type), None);

        let complete = FilterSet::from_prompt(&PromptFile::parse(PROMPT));
        assert!(complete.unset_globals.is_empty());
    }

    #[test]
    fn test_missing_range_defaults_to_calendar_year() {
        let filters = FilterSet::from_prompt_in_year(&PromptFile::parse("Year: 2024\n"), 2031);
        assert!(filters.range_defaulted);
        assert_eq!(filters.start(), YearMonth::new(2031, Month::Jan));
        assert_eq!(filters.end(), YearMonth::new(2031, Month::Dec));
    }

    #[test]
    fn test_invalid_month_defaults_range() {
        let prompt = PromptFile::parse(
            "Start_Year: 2024\nStart_Month: Smarch\nEnd_Year: 2024\nEnd_Month: MAR\n",
        );
        assert!(FilterSet::from_prompt_in_year(&prompt, 2024).range_defaulted);
    }

    #[test]
    fn test_rewrite_preserves_unknown_lines() {
        let mut prompt = PromptFile::parse(PROMPT);
        prompt.set("year", &["2025".to_string()]);
        prompt.set("End_Month", &["DEC".to_string()]);
        prompt.set("month", &["JAN".to_string(), "FEB".to_string()]);

        let text = prompt.to_text();
        assert!(text.contains("Year: 2025\n"));
        assert!(text.contains("End_Month: DEC\n"));
        assert!(text.contains("Notes: keep me\n"));
        assert!(text.ends_with("Month: JAN, FEB\n"));
        assert_eq!(text.lines().count(), PROMPT.lines().count() + 1);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = PromptFile::load(&dir.path().join("prompt.txt")).unwrap();
        assert_eq!(prompt, PromptFile::default());
    }
}
