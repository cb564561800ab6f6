//! Dropdown Interaction Protocol
//!
//! Opening a framework dropdown is a conversation with the page: wait for any
//! overlay to clear, click the control (climbing the ladder if needed), find
//! the option panel it rendered, read the visible rows, click the matching
//! row. Every step is bounded; a step that runs out of time is an error the
//! caller can skip, never a hang.

use std::time::Instant;

use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::ladder::{self, ClickStrategy};
use crate::locator::Handle;
use crate::page::Page;
use crate::role::Role;
use crate::scripts;
use crate::settings::Timings;

/// Proximity fallback radius for panel discovery, Manhattan distance in px
pub const PANEL_PROXIMITY_PX: u32 = 500;

// =============================================================================
// Text matching
// =============================================================================

/// Collapse whitespace runs (NBSP included) to one space, trim, lowercase
pub fn fold(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bidirectional substring containment, case-insensitive
///
/// `"JAN"` matches `"January 2024"` and `"Goa(13)"` matches `"Goa"`. An empty
/// side never matches.
pub fn option_matches(option: &str, target: &str) -> bool {
    let option = fold(option);
    let target = fold(target);
    if option.is_empty() || target.is_empty() {
        return false;
    }
    option.contains(&target) || target.contains(&option)
}

/// Index of the first option matching `target`, in DOM order
///
/// Ambiguous targets resolve to the earliest row.
pub fn first_match<S: AsRef<str>>(options: &[S], target: &str) -> Option<usize> {
    options
        .iter()
        .position(|option| option_matches(option.as_ref(), target))
}

/// "All Vahan4 Running States" style aggregate entries
pub fn is_sentinel(text: &str) -> bool {
    let folded = fold(text);
    folded.starts_with("all ") && folded.contains("running")
}

/// Selectable states: sentinels and blank rows removed
pub fn state_options(options: Vec<String>) -> Vec<String> {
    options
        .into_iter()
        .filter(|o| !o.trim().is_empty() && !is_sentinel(o))
        .collect()
}

/// Selectable months: the placeholder and bare year rows removed
pub fn month_options(options: Vec<String>) -> Vec<String> {
    options
        .into_iter()
        .filter(|o| {
            let folded = fold(o);
            let bare_year = folded.len() == 4 && folded.bytes().all(|b| b.is_ascii_digit());
            !folded.is_empty() && folded != "select month" && !bare_year
        })
        .collect()
}

/// Panel element ids to try for a control, most specific first
///
/// Derived from the control's `aria-owns` and by substituting suffixes in its
/// own id; duplicates and the id itself are dropped.
pub fn panel_id_candidates(id: Option<&str>, aria_owns: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidate.is_empty() && Some(candidate.as_str()) != id && !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    if let Some(owned) = aria_owns {
        push(owned.to_string());
    }

    if let Some(id) = id {
        if id.contains("_label") {
            push(id.replace("_label", "_items"));
        }
        if id.contains("_input") {
            push(id.replace("_input", "_items"));
        }
        push(format!("{}_items", id));
        if id.contains("label") {
            push(id.replace("label", "items"));
        }
        if id.contains("Var") {
            push(id.replace("Var", "_items"));
        }
        if id.contains("Type") {
            push(id.replace("Type", "_items"));
        }
        if id.contains("_label") {
            push(id.replace("_label", "_panel"));
        }
        push(format!("{}_panel", id));
    }

    out
}

// =============================================================================
// Protocol
// =============================================================================

/// Dropdown and button operations against one page
pub struct Dropdown<'a> {
    page: &'a Page,
    timings: &'a Timings,
}

impl<'a> Dropdown<'a> {
    pub fn new(page: &'a Page, timings: &'a Timings) -> Self {
        Self { page, timings }
    }

    /// Wait for overlay blockers to clear; false when the wait ran out
    ///
    /// Running out is not an error: a stale overlay may never go away, and
    /// the click ladder copes with interception.
    pub async fn wait_for_overlay(&self) -> bool {
        let start = Instant::now();
        let script = scripts::overlay_present();

        loop {
            match self.page.evaluate::<bool>(&script).await {
                Ok(false) => return true,
                Ok(true) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Overlay check failed");
                    return false;
                }
            }

            if start.elapsed() >= self.timings.overlay_timeout {
                tracing::debug!(
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Overlay still present, proceeding"
                );
                return false;
            }

            sleep(self.timings.overlay_poll).await;
        }
    }

    /// Climb the click ladder on the element matched by `selector`
    async fn click(&self, selector: &str, role: Role) -> Result<ClickStrategy> {
        let element = self.page.find(selector).await?;
        if let Err(e) = element.scroll_into_view().await {
            tracing::debug!(%role, error = %e, "Scroll into view failed");
        }

        match ladder::climb(&element, role).await {
            Err(e @ Error::Interaction { .. }) => {
                if let Ok(Some(path)) = self.page.debug_screenshot(role.key()).await {
                    tracing::warn!(%role, path = %path.display(), "Saved screenshot of failed click");
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Press a button-like control
    pub async fn press(&self, handle: &Handle) -> Result<()> {
        self.wait_for_overlay().await;
        let rung = self.click(&handle.click_selector, handle.role).await?;
        tracing::debug!(role = %handle.role, rung = rung.name(), "Pressed");
        Ok(())
    }

    async fn open(&self, handle: &Handle) -> Result<()> {
        self.wait_for_overlay().await;

        let hidden = self
            .page
            .evaluate::<u32>(&scripts::hide_open_panels())
            .await
            .unwrap_or(0);
        if hidden > 0 {
            tracing::debug!(role = %handle.role, hidden, "Closed stray option panels");
        }

        let rung = self.click(&handle.click_selector, handle.role).await?;
        tracing::debug!(role = %handle.role, rung = rung.name(), "Opened dropdown");
        sleep(self.timings.open_delay).await;
        Ok(())
    }

    /// Poll for the opened panel; tags it for [`Self::visible_options`]
    async fn find_panel(&self, handle: &Handle) -> Result<String> {
        let ids = panel_id_candidates(handle.id.as_deref(), handle.aria_owns.as_deref());
        let script = scripts::find_panel(handle.role.key(), &ids, PANEL_PROXIMITY_PX);
        let start = Instant::now();

        loop {
            if let Some(how) = self.page.evaluate::<Option<String>>(&script).await? {
                tracing::debug!(role = %handle.role, found_by = %how, "Option panel visible");
                return Ok(how);
            }

            if start.elapsed() >= self.timings.panel_timeout {
                tracing::warn!(
                    role = %handle.role,
                    id = ?handle.id,
                    candidates = ?ids,
                    "Option panel did not appear"
                );
                return Err(Error::PanelNotFound { role: handle.role });
            }

            sleep(self.timings.panel_poll).await;
        }
    }

    /// Visible, non-empty option rows of the tagged panel
    ///
    /// Rows can render a moment after the panel; an empty list is retried
    /// until the panel wait runs out.
    async fn visible_options(&self, role: Role) -> Result<Vec<String>> {
        let script = scripts::list_panel_options(role.key());
        let start = Instant::now();

        loop {
            let Some(rows) = self.page.evaluate::<Option<Vec<String>>>(&script).await? else {
                return Err(Error::PanelNotFound { role });
            };
            if !rows.is_empty() || start.elapsed() >= self.timings.panel_timeout {
                return Ok(rows);
            }
            sleep(self.timings.panel_poll).await;
        }
    }

    async fn close(&self, role: Role) {
        let visible = self
            .page
            .evaluate::<bool>(&scripts::panel_visible(role.key()))
            .await
            .unwrap_or(false);
        if visible {
            if let Err(e) = self.page.execute(&scripts::hide_open_panels()).await {
                tracing::debug!(%role, error = %e, "Closing option panel failed");
            }
        }
    }

    /// Texts of the visible options, in DOM order; the panel is closed after
    pub async fn list_options(&self, handle: &Handle) -> Result<Vec<String>> {
        if handle.native {
            return self
                .page
                .evaluate::<Option<Vec<String>>>(&scripts::list_native_options(handle.role.key()))
                .await?
                .ok_or(Error::PanelNotFound { role: handle.role });
        }

        self.open(handle).await?;
        let result = match self.find_panel(handle).await {
            Ok(_) => self.visible_options(handle.role).await,
            Err(e) => Err(e),
        };
        self.close(handle.role).await;

        let options = result?;
        tracing::debug!(role = %handle.role, options = ?options, "Listed options");
        Ok(options)
    }

    /// Choose the first option matching `target`; returns the option's text
    pub async fn select(&self, handle: &Handle, target: &str) -> Result<String> {
        let role = handle.role;

        if handle.native {
            let options = self.list_options(handle).await?;
            let Some(index) = first_match(&options, target) else {
                return Err(self.no_match(role, target, options));
            };
            let chosen: bool = self
                .page
                .evaluate(&scripts::choose_native_option(role.key(), index))
                .await?;
            if !chosen {
                return Err(Error::PanelNotFound { role });
            }
            sleep(self.timings.option_settle).await;
            return Ok(options[index].clone());
        }

        self.open(handle).await?;
        if let Err(e) = self.find_panel(handle).await {
            self.close(role).await;
            return Err(e);
        }
        let options = match self.visible_options(role).await {
            Ok(options) => options,
            Err(e) => {
                self.close(role).await;
                return Err(e);
            }
        };

        let Some(index) = first_match(&options, target) else {
            self.close(role).await;
            return Err(self.no_match(role, target, options));
        };

        let chosen = options[index].clone();
        if let Err(e) = self.click(&scripts::option_selector(role.key(), index), role).await {
            self.close(role).await;
            return Err(e);
        }

        tracing::info!(%role, target, chosen = %chosen, "Selected option");
        sleep(self.timings.option_settle).await;
        Ok(chosen)
    }

    fn no_match(&self, role: Role, target: &str, options: Vec<String>) -> Error {
        tracing::warn!(%role, target, options = ?options, "No option matches");
        Error::NoMatchingOption {
            role,
            target: target.to_string(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_month_abbreviation_matches_long_label() {
        assert!(option_matches("January 2024", "JAN"));
        assert!(option_matches("JAN", "January"));
        assert!(!option_matches("February", "JAN"));
    }

    #[test]
    fn test_matching_ignores_case_and_nbsp() {
        assert!(option_matches("Jammu\u{a0}and  Kashmir(21)", "jammu and kashmir"));
        assert!(option_matches("Goa", "Goa(13)"));
    }

    #[test]
    fn test_empty_never_matches() {
        assert!(!option_matches("", "Goa"));
        assert!(!option_matches("Goa", "   "));
    }

    #[test]
    fn test_first_match_is_dom_order() {
        let options = ["Select Month", "Jan 2", "JAN", "FEB"];
        assert_eq!(first_match(&options, "jan"), Some(1));
        assert_eq!(first_match(&options, "MAR"), None);
    }

    #[test]
    fn test_sentinel_excluded_from_states() {
        let options = vec![
            "All Vahan4 Running States (36/36)".to_string(),
            "Goa(13)".to_string(),
            " ".to_string(),
            "Kerala(87)".to_string(),
        ];
        assert_eq!(state_options(options), ["Goa(13)", "Kerala(87)"]);
        assert!(is_sentinel("All Vahan4 Running Office"));
        assert!(!is_sentinel("Allahabad running"));
    }

    #[test]
    fn test_month_placeholders_dropped() {
        let options = vec!["Select Month", "2025", "JAN", "FEB", ""]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(month_options(options), ["JAN", "FEB"]);
    }

    #[test]
    fn test_panel_ids_from_label_id() {
        assert_eq!(
            panel_id_candidates(Some("selectedYear_label"), None),
            [
                "selectedYear_items",
                "selectedYear_label_items",
                "selectedYear_panel",
                "selectedYear_label_panel",
            ]
        );
    }

    #[test]
    fn test_panel_ids_prefer_aria_owns() {
        let ids = panel_id_candidates(Some("yaxisVar"), Some("yaxisVar_panel"));
        assert_eq!(ids[0], "yaxisVar_panel");
        assert!(ids.contains(&"yaxisVar_items".to_string()));
        assert!(ids.contains(&"yaxis_items".to_string()));
        assert_eq!(ids.iter().filter(|i| *i == "yaxisVar_panel").count(), 1);
    }

    #[test]
    fn test_panel_ids_without_identifiers() {
        assert!(panel_id_candidates(None, None).is_empty());
    }
}
