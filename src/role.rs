//! Semantic roles of the dashboard controls and how to find each one
//!
//! A [`TargetDescriptor`] is static data: the visible label of a control plus
//! the ordered list of [`Strategy`] values the locator tries for it. Nothing
//! here touches the page.

use std::fmt;

/// A control on the report form, named by what it does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    YAxis,
    XAxis,
    Type,
    YearType,
    Year,
    Rto,
    State,
    Month,
    Refresh,
    Download,
}

/// How the locator may try to resolve a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Element ids the dashboard has used historically; only a fast path
    KnownIds(&'static [&'static str]),
    /// Container whose option list contains every one of these texts
    Fingerprint(&'static [&'static str]),
    /// Dropdown-shaped control with the label in its parent, grandparent or sibling text
    Structural,
    /// Label-like element carrying the text, then the dropdown in its container
    LabelText,
    /// id/name attribute containing the label squashed to lowercase
    IdentifierPattern,
    /// Any visible element matching one of the selectors, optionally filtered by a
    /// case-insensitive needle found in its text, value, title, aria-label or markup
    Selectors {
        css: &'static [&'static str],
        needle: Option<&'static str>,
    },
}

impl Strategy {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::KnownIds(_) => "known-ids",
            Strategy::Fingerprint(_) => "fingerprint",
            Strategy::Structural => "structural",
            Strategy::LabelText => "label-text",
            Strategy::IdentifierPattern => "identifier",
            Strategy::Selectors { .. } => "selectors",
        }
    }
}

/// Immutable description of one control kind
#[derive(Debug, Clone, Copy)]
pub struct TargetDescriptor {
    pub role: Role,
    /// Label text as shown next to the control
    pub label: &'static str,
    /// Nearby text that rules a candidate out ("Year" must not pick "Year Type")
    pub avoid: &'static [&'static str],
    pub strategies: &'static [Strategy],
}

impl TargetDescriptor {
    const fn new(
        role: Role,
        label: &'static str,
        avoid: &'static [&'static str],
        strategies: &'static [Strategy],
    ) -> Self {
        Self {
            role,
            label,
            avoid,
            strategies,
        }
    }
}

const TYPE_FINGERPRINT: &[&str] = &["Actual Value", "In Thousand", "In Lakh", "In Crore"];

const STATE_FINGERPRINT: &[&str] = &["All Vahan4 Running States"];

impl Role {
    /// Filters applied once per browser session, in replay order
    pub const GLOBALS: [Role; 6] = [
        Role::YAxis,
        Role::XAxis,
        Role::Type,
        Role::YearType,
        Role::Year,
        Role::Rto,
    ];

    /// Canonical filter key as used in the prompt file and logs
    pub fn key(&self) -> &'static str {
        match self {
            Role::YAxis => "yaxis",
            Role::XAxis => "xaxis",
            Role::Type => "type",
            Role::YearType => "year_type",
            Role::Year => "year",
            Role::Rto => "rto",
            Role::State => "state",
            Role::Month => "month",
            Role::Refresh => "refresh",
            Role::Download => "download",
        }
    }

    /// Inverse of [`Role::key`] for the selectable filters
    pub fn from_key(key: &str) -> Option<Role> {
        Role::GLOBALS
            .into_iter()
            .chain([Role::State, Role::Month])
            .find(|role| role.key() == key)
    }

    /// Whether the role is a dropdown (as opposed to a button)
    pub fn is_dropdown(&self) -> bool {
        !matches!(self, Role::Refresh | Role::Download)
    }

    pub fn descriptor(&self) -> TargetDescriptor {
        let role = *self;
        match self {
            Role::YAxis => TargetDescriptor::new(role, "Y-Axis", &[], &Y_AXIS),
            Role::XAxis => TargetDescriptor::new(role, "X-Axis", &[], &X_AXIS),
            Role::Type => {
                TargetDescriptor::new(role, "Type", &["year type", "vehicle type"], &TYPE)
            }
            Role::YearType => TargetDescriptor::new(role, "Year Type", &[], &YEAR_TYPE),
            Role::Year => TargetDescriptor::new(role, "Year", &["year type"], &YEAR),
            Role::Rto => TargetDescriptor::new(role, "RTO", &[], &RTO),
            Role::State => TargetDescriptor::new(role, "State", &[], &STATE),
            Role::Month => TargetDescriptor::new(role, "Month", &[], &MONTH),
            Role::Refresh => TargetDescriptor::new(role, "Refresh", &[], &REFRESH),
            Role::Download => TargetDescriptor::new(role, "Download", &[], &DOWNLOAD),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

static Y_AXIS: [Strategy; 4] = [
    Strategy::KnownIds(&["yaxisVar_label", "yaxisVar"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static X_AXIS: [Strategy; 4] = [
    Strategy::KnownIds(&["xaxisVar_label", "xaxisVar"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static YEAR_TYPE: [Strategy; 4] = [
    Strategy::KnownIds(&["selectedYearType_label", "selectedYearType"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static YEAR: [Strategy; 4] = [
    Strategy::KnownIds(&["selectedYear_label", "selectedYear"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static RTO: [Strategy; 4] = [
    Strategy::KnownIds(&["selectedRto_label", "selectedRto"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static MONTH: [Strategy; 4] = [
    Strategy::KnownIds(&["groupingTable:selectMonth_label", "groupingTable:selectMonth"]),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static TYPE: [Strategy; 4] = [
    Strategy::Fingerprint(TYPE_FINGERPRINT),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static STATE: [Strategy; 4] = [
    Strategy::Fingerprint(STATE_FINGERPRINT),
    Strategy::Structural,
    Strategy::LabelText,
    Strategy::IdentifierPattern,
];

static REFRESH: [Strategy; 4] = [
    Strategy::Selectors {
        css: &["button", "[role='button']"],
        needle: Some("refresh"),
    },
    Strategy::Selectors {
        css: &["input[type='submit']", "input[type='button']", "a"],
        needle: Some("refresh"),
    },
    Strategy::Selectors {
        css: &["[onclick*='efresh']", "[id*='efresh']"],
        needle: None,
    },
    Strategy::Selectors {
        css: &[".ui-button", ".ui-commandbutton", "button.ui-button"],
        needle: Some("refresh"),
    },
];

static DOWNLOAD: [Strategy; 4] = [
    Strategy::Selectors {
        css: &["a[id$=':xls']", "a.ui-commandlink"],
        needle: Some("excel"),
    },
    Strategy::Selectors {
        css: &[
            "img[src*='csv']",
            "img[src*='excel']",
            "img[title*='Excel']",
            "img[alt*='Excel']",
        ],
        needle: None,
    },
    Strategy::Selectors {
        css: &["[title*='Download']", "[aria-label*='Download']"],
        needle: None,
    },
    Strategy::Selectors {
        css: &[
            "[id*='groupingTable'] a",
            "a[onclick*='xls']",
            "a[onclick*='excel']",
            "a[onclick*='download']",
        ],
        needle: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_runs_first_for_state_and_type() {
        for role in [Role::State, Role::Type] {
            let first = role.descriptor().strategies[0];
            assert!(matches!(first, Strategy::Fingerprint(_)), "{role}");
        }
    }

    #[test]
    fn test_every_dropdown_falls_back_to_generic_scans() {
        for role in Role::GLOBALS.into_iter().chain([Role::State, Role::Month]) {
            let names: Vec<_> = role
                .descriptor()
                .strategies
                .iter()
                .map(Strategy::name)
                .collect();
            let tail = &names[names.len() - 3..];
            assert_eq!(tail, ["structural", "label-text", "identifier"], "{role}");
            assert!(role.is_dropdown());
        }
        assert!(!Role::Refresh.is_dropdown());
        assert!(!Role::Download.is_dropdown());
    }

    #[test]
    fn test_keys_round_trip_for_filters() {
        for role in Role::GLOBALS.into_iter().chain([Role::State, Role::Month]) {
            assert_eq!(Role::from_key(role.key()), Some(role));
        }
        assert_eq!(Role::from_key("refresh"), None);
    }

    #[test]
    fn test_year_avoids_year_type() {
        assert!(Role::Year.descriptor().avoid.contains(&"year type"));
    }
}
