//! JavaScript run inside the dashboard page
//!
//! Every locator strategy is one self-contained expression. Parameters are
//! spliced in as JSON literals, so no manual escaping is needed. A script that
//! finds its target tags it with a `data-vh-*` attribute and returns a small
//! JSON summary; finding nothing returns `null`.

use serde_json::json;

use crate::role::{Strategy, TargetDescriptor};

/// Attribute carrying the role of a located control
pub const ROLE_ATTR: &str = "data-vh-role";
/// Attribute carrying the element to click for a located control
pub const CLICK_ATTR: &str = "data-vh-click";
/// Attribute carrying the role of a discovered option panel
pub const PANEL_ATTR: &str = "data-vh-panel";
/// Attribute carrying `<role>:<index>` on enumerated option rows
pub const OPTION_ATTR: &str = "data-vh-option";

/// Overlay blockers that swallow clicks while an AJAX update runs
pub const OVERLAY_SELECTORS: &str = ".ui-blockui, .ui-widget-overlay";

/// Option panel classes used by the component framework
pub const PANEL_SELECTORS: &str =
    ".ui-selectonemenu-items-wrapper, .ui-selectonemenu-panel, .ui-selectonemenu-items";

const DROPDOWN_SELECTORS: &str =
    ".ui-selectonemenu, .ui-selectonemenu-label, .ui-selectonemenu-trigger, select, [role='combobox']";

/// Shared helpers; expects `role` to be in scope
const PRELUDE: &str = r#"
const visible = el => {
  if (!el || !el.isConnected) return false;
  const style = getComputedStyle(el);
  if (style.display === 'none' || style.visibility === 'hidden') return false;
  return el.getClientRects().length > 0;
};
const enabled = el => !el.disabled
  && el.getAttribute('aria-disabled') !== 'true'
  && !el.classList.contains('ui-state-disabled');
const usable = el => visible(el) && enabled(el);
const squash = s => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
const textOf = el => el ? squash(el.innerText || el.textContent) : '';
const outermost = el => {
  let top = el;
  for (let p = el.parentElement; p; p = p.parentElement) {
    if (p.matches('.ui-selectonemenu')) top = p;
  }
  return top;
};
const mark = el => {
  document.querySelectorAll(`[data-vh-role="${role}"]`).forEach(n => n.removeAttribute('data-vh-role'));
  document.querySelectorAll(`[data-vh-click="${role}"]`).forEach(n => n.removeAttribute('data-vh-click'));
  el.setAttribute('data-vh-role', role);
  const click = el.matches('.ui-selectonemenu') ? (el.querySelector('.ui-selectonemenu-label') || el) : el;
  click.setAttribute('data-vh-click', role);
  const owner = el.hasAttribute('aria-owns') ? el : el.querySelector('[aria-owns]');
  return {
    id: el.id || null,
    ariaOwns: owner ? owner.getAttribute('aria-owns') : null,
    tag: el.tagName.toLowerCase(),
    native: el.tagName === 'SELECT',
  };
};
"#;

const KNOWN_IDS_BODY: &str = r#"
for (const id of ids) {
  const el = document.getElementById(id);
  if (!el) continue;
  const target = el.closest('.ui-selectonemenu') ? outermost(el) : el;
  if (usable(target)) { found = target; break; }
}
"#;

const FINGERPRINT_BODY: &str = r#"
const containers = new Set(
  Array.from(document.querySelectorAll(".ui-selectonemenu, [role='combobox']")).map(outermost)
);
for (const c of containers) {
  if (!usable(c)) continue;
  const options = Array.from(c.querySelectorAll('select option')).map(textOf);
  if (c.id) {
    for (const suffix of ['_items', '_panel']) {
      const panel = document.getElementById(c.id + suffix);
      if (panel) panel.querySelectorAll('li').forEach(li => options.push(textOf(li)));
    }
  }
  if (needles.every(n => options.some(o => o.includes(n)))) { found = c; break; }
}
if (!found) {
  for (const l of document.querySelectorAll('.ui-selectonemenu-label')) {
    if (usable(l) && needles.some(n => textOf(l).includes(n))) { found = outermost(l); break; }
  }
}
"#;

const STRUCTURAL_BODY: &str = r#"
const mentions = t => t.includes(label) && !avoid.some(a => t.includes(a));
const around = (el, scope) => {
  if (!scope) return '';
  const own = textOf(el);
  const t = textOf(scope);
  return own ? t.split(own).join(' ') : t;
};
const seen = new Set();
for (const raw of document.querySelectorAll(dropdowns)) {
  const el = raw.closest('.ui-selectonemenu') ? outermost(raw) : raw;
  if (seen.has(el)) continue;
  seen.add(el);
  if (!usable(el)) continue;
  const parent = el.parentElement;
  const nearby = [
    textOf(el.previousElementSibling),
    around(el, parent),
    around(el, parent && parent.parentElement),
  ];
  if (nearby.some(mentions)) { found = el; break; }
}
"#;

const LABEL_TEXT_BODY: &str = r#"
const ownText = el => squash(Array.from(el.childNodes)
  .filter(n => n.nodeType === Node.TEXT_NODE)
  .map(n => n.textContent)
  .join(' '));
const pickIn = scope => {
  if (!scope) return null;
  return Array.from(scope.querySelectorAll(dropdowns))
    .map(el => el.closest('.ui-selectonemenu') ? outermost(el) : el)
    .find(usable) || null;
};
for (const l of document.querySelectorAll('label, span, div, [aria-label], [title]')) {
  if (l.closest('.ui-selectonemenu, .ui-selectonemenu-panel')) continue;
  const attr = squash(l.getAttribute('aria-label') || l.getAttribute('title'));
  const own = ownText(l);
  const hit = attr === label || (own.includes(label) && !avoid.some(a => own.includes(a)));
  if (!hit) continue;
  found = pickIn(l.parentElement) || pickIn(l.parentElement && l.parentElement.parentElement);
  if (found) break;
}
"#;

const IDENTIFIER_BODY: &str = r#"
for (const el of document.querySelectorAll('[id], [name]')) {
  const id = (el.id || '').toLowerCase();
  const name = (el.getAttribute('name') || '').toLowerCase();
  if (!forms.some(f => id.includes(f) || name.includes(f))) continue;
  if (avoidForms.some(f => id.includes(f) || name.includes(f))) continue;
  const target = el.closest('.ui-selectonemenu') ? outermost(el) : el;
  if (!target.matches(dropdowns)) continue;
  if (usable(target)) { found = target; break; }
}
"#;

const SELECTORS_BODY: &str = r#"
for (const css of selectors) {
  let nodes;
  try { nodes = document.querySelectorAll(css); } catch (e) { continue; }
  for (const el of nodes) {
    const target = el.tagName === 'IMG' ? (el.closest('a, button') || el) : el;
    if (!usable(target)) continue;
    if (needle) {
      const hay = [
        textOf(target),
        target.value || '',
        target.getAttribute('title') || '',
        target.getAttribute('aria-label') || '',
        target.outerHTML,
      ].join(' ').toLowerCase();
      if (!hay.includes(needle)) continue;
    }
    found = target;
    break;
  }
  if (found) break;
}
"#;

/// Lowercased label with spaces removed, and with spaces and hyphens removed
pub fn identifier_forms(label: &str) -> Vec<String> {
    let lower = label.to_lowercase();
    let no_space: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
    let no_hyphen: String = no_space.chars().filter(|&c| c != '-').collect();
    let mut forms = vec![no_space];
    if !forms.contains(&no_hyphen) {
        forms.push(no_hyphen);
    }
    forms
}

fn lowercase_all(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

/// Script trying one strategy for one descriptor
pub fn locate(desc: &TargetDescriptor, strategy: &Strategy) -> String {
    let label = desc.label.to_lowercase();
    let avoid = lowercase_all(desc.avoid);
    let avoid_forms: Vec<String> = desc
        .avoid
        .iter()
        .flat_map(|a| identifier_forms(a))
        .collect();

    let (params, body) = match strategy {
        Strategy::KnownIds(ids) => (format!("const ids = {};", json!(ids)), KNOWN_IDS_BODY),
        Strategy::Fingerprint(texts) => (
            format!("const needles = {};", json!(lowercase_all(texts))),
            FINGERPRINT_BODY,
        ),
        Strategy::Structural => (
            format!(
                "const label = {}; const avoid = {}; const dropdowns = {};",
                json!(label),
                json!(avoid),
                json!(DROPDOWN_SELECTORS)
            ),
            STRUCTURAL_BODY,
        ),
        Strategy::LabelText => (
            format!(
                "const label = {}; const avoid = {}; const dropdowns = {};",
                json!(label),
                json!(avoid),
                json!(DROPDOWN_SELECTORS)
            ),
            LABEL_TEXT_BODY,
        ),
        Strategy::IdentifierPattern => (
            format!(
                "const forms = {}; const avoidForms = {}; const dropdowns = {};",
                json!(identifier_forms(desc.label)),
                json!(avoid_forms),
                json!(DROPDOWN_SELECTORS)
            ),
            IDENTIFIER_BODY,
        ),
        Strategy::Selectors { css, needle } => (
            format!(
                "const selectors = {}; const needle = {};",
                json!(css),
                json!(needle.map(str::to_lowercase))
            ),
            SELECTORS_BODY,
        ),
    };

    format!(
        "(() => {{\nconst role = {role};\n{params}\n{PRELUDE}\nlet found = null;\n{body}\nreturn found ? mark(found) : null;\n}})()",
        role = json!(desc.role.key()),
    )
}

/// True while a visible overlay blocker is on the page
pub fn overlay_present() -> String {
    format!(
        "Array.from(document.querySelectorAll({})).some(el => el.getClientRects().length > 0 && getComputedStyle(el).display !== 'none')",
        json!(OVERLAY_SELECTORS)
    )
}

/// Force-hide every open option panel
pub fn hide_open_panels() -> String {
    format!(
        "(() => {{ let n = 0; document.querySelectorAll({}).forEach(el => {{ if (el.getClientRects().length > 0) {{ el.style.display = 'none'; n++; }} }}); return n; }})()",
        json!(".ui-selectonemenu-panel")
    )
}

/// Find the visible option panel for `role`, trying `ids` first
///
/// Returns the name of the rule that matched, or `null`.
pub fn find_panel(role: &str, ids: &[String], proximity_px: u32) -> String {
    format!(
        r#"(() => {{
const role = {role};
const ids = {ids};
const panels = {panels};
{PRELUDE}
document.querySelectorAll(`[data-vh-panel="${{role}}"]`).forEach(n => n.removeAttribute('data-vh-panel'));
const pick = (el, how) => {{ el.setAttribute('data-vh-panel', role); return how; }};
for (const id of ids) {{
  const el = document.getElementById(id);
  if (el && visible(el)) return pick(el, 'id:' + id);
}}
const control = document.querySelector(`[data-vh-role="${{role}}"]`);
if (control) {{
  const r = control.getBoundingClientRect();
  let best = null;
  let bestDistance = Infinity;
  for (const el of document.querySelectorAll(panels)) {{
    if (!visible(el)) continue;
    const p = el.getBoundingClientRect();
    const d = Math.abs(p.left - r.left) + Math.abs(p.top - r.bottom);
    if (d < {proximity_px} && d < bestDistance) {{ best = el; bestDistance = d; }}
  }}
  if (best) return pick(best, 'proximity');
}}
for (const el of document.querySelectorAll(panels + ', ul.ui-selectonemenu-list')) {{
  if (visible(el)) return pick(el, 'class');
}}
return null;
}})()"#,
        role = json!(role),
        ids = json!(ids),
        panels = json!(PANEL_SELECTORS),
    )
}

/// Enumerate visible option rows of the tagged panel, tagging each row
///
/// Returns `null` when the panel is gone or hidden.
pub fn list_panel_options(role: &str) -> String {
    format!(
        r#"(() => {{
const role = {role};
{PRELUDE}
const panel = document.querySelector(`[data-vh-panel="${{role}}"]`);
if (!panel || !visible(panel)) return null;
document.querySelectorAll(`[data-vh-option^="${{role}}:"]`).forEach(n => n.removeAttribute('data-vh-option'));
const rows = Array.from(panel.querySelectorAll('li, .ui-selectonemenu-item'))
  .filter(li => !(li.getAttribute('style') || '').replace(/\s+/g, '').includes('display:none'))
  .filter(li => li.getClientRects().length > 0)
  .map(li => [li, (li.innerText || li.textContent || '').replace(/\s+/g, ' ').trim()])
  .filter(([, text]) => text.length > 0);
return rows.map(([li, text], i) => {{
  li.setAttribute('data-vh-option', role + ':' + i);
  return text;
}});
}})()"#,
        role = json!(role),
    )
}

/// Whether the tagged panel is still showing
pub fn panel_visible(role: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector('[{PANEL_ATTR}=' + {role} + ']'); return !!el && el.getClientRects().length > 0 && getComputedStyle(el).display !== 'none'; }})()",
        role = json!(json!(role).to_string()),
    )
}

/// Options of a native `<select>` tagged for `role`
pub fn list_native_options(role: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector('select[{ROLE_ATTR}=' + {role} + ']'); return el ? Array.from(el.options).map(o => (o.text || '').replace(/\\s+/g, ' ').trim()) : null; }})()",
        role = json!(json!(role).to_string()),
    )
}

/// Choose option `index` of a native `<select>` and fire its change handlers
pub fn choose_native_option(role: &str, index: usize) -> String {
    format!(
        "(() => {{ const el = document.querySelector('select[{ROLE_ATTR}=' + {role} + ']'); if (!el || {index} >= el.options.length) return false; el.selectedIndex = {index}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        role = json!(json!(role).to_string()),
    )
}

/// CSS selector for the tagged control
pub fn role_selector(role: &str) -> String {
    format!("[{ROLE_ATTR}=\"{role}\"]")
}

/// CSS selector for the click target of the tagged control
pub fn click_selector(role: &str) -> String {
    format!("[{CLICK_ATTR}=\"{role}\"]")
}

/// CSS selector for option row `index` enumerated by [`list_panel_options`]
pub fn option_selector(role: &str, index: usize) -> String {
    format!("[{OPTION_ATTR}=\"{role}:{index}\"]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn test_identifier_forms_strip_spaces_and_hyphens() {
        assert_eq!(identifier_forms("Y-Axis"), vec!["y-axis", "yaxis"]);
        assert_eq!(identifier_forms("Year Type"), vec!["yeartype"]);
    }

    #[test]
    fn test_locate_script_embeds_parameters_as_json() {
        let desc = Role::Year.descriptor();
        let js = locate(&desc, &Strategy::Structural);
        assert!(js.contains(r#"const role = "year";"#));
        assert!(js.contains(r#"const label = "year";"#));
        assert!(js.contains(r#"const avoid = ["year type"];"#));
        assert!(js.starts_with("(() => {"));
        assert!(js.ends_with("})()"));
    }

    #[test]
    fn test_fingerprint_needles_are_lowercased() {
        let desc = Role::Type.descriptor();
        let js = locate(&desc, &desc.strategies[0]);
        assert!(js.contains(r#"["actual value","in thousand","in lakh","in crore"]"#));
    }

    #[test]
    fn test_label_quotes_cannot_break_out() {
        let js = list_panel_options("it's");
        assert!(js.contains(r#"const role = "it's";"#));
        let js = panel_visible("a'b");
        assert!(js.contains(r#""\"a'b\"""#));
    }

    #[test]
    fn test_blank_rows_are_dropped_before_tagging() {
        let js = list_panel_options("month");
        let dropped = js.find(".filter(([, text]) => text.length > 0)").unwrap();
        let tagged = js.find("setAttribute('data-vh-option'").unwrap();
        assert!(dropped < tagged);
    }

    #[test]
    fn test_selectors() {
        assert_eq!(role_selector("state"), r#"[data-vh-role="state"]"#);
        assert_eq!(click_selector("state"), r#"[data-vh-click="state"]"#);
        assert_eq!(option_selector("month", 2), r#"[data-vh-option="month:2"]"#);
    }
}
