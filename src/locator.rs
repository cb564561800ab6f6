//! Element Locator
//!
//! Resolves a [`Role`] to a live [`Handle`] by trying the role's strategies in
//! order. Every strategy is one script evaluated in the page; the first one
//! that returns a match wins. A role no strategy resolves is
//! [`Error::NotFound`], which callers log and skip.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::page::Page;
use crate::role::Role;
use crate::scripts;

/// Something that can evaluate a script and return its JSON value
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn eval_json(&self, expression: &str) -> Result<Value>;
}

#[async_trait]
impl Evaluator for Page {
    async fn eval_json(&self, expression: &str) -> Result<Value> {
        self.evaluate::<Value>(expression).await
    }
}

/// A located control, valid until the page reloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub role: Role,
    /// Selector for the tagged control
    pub selector: String,
    /// Selector for the element to click to open or press the control
    pub click_selector: String,
    /// The control's own id, when it has one
    pub id: Option<String>,
    /// Panel id advertised by the control, when it has one
    pub aria_owns: Option<String>,
    /// A native `<select>` rather than a framework dropdown
    pub native: bool,
    /// Name of the strategy that found it
    pub strategy: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Marked {
    id: Option<String>,
    aria_owns: Option<String>,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    native: bool,
}

/// Strategy runner over any [`Evaluator`]
pub struct Locator<'a, E: Evaluator + ?Sized> {
    eval: &'a E,
}

impl<'a, E: Evaluator + ?Sized> Locator<'a, E> {
    pub fn new(eval: &'a E) -> Self {
        Self { eval }
    }

    /// Find the control for `role`
    ///
    /// Script errors only cost the strategy that raised them; a lost session
    /// is returned immediately.
    pub async fn locate(&self, role: Role) -> Result<Handle> {
        let desc = role.descriptor();

        for strategy in desc.strategies {
            let script = scripts::locate(&desc, strategy);
            match self.eval.eval_json(&script).await {
                Ok(Value::Null) => {
                    tracing::debug!(%role, strategy = strategy.name(), "Strategy found nothing");
                }
                Ok(value) => {
                    let marked: Marked = serde_json::from_value(value)?;
                    tracing::debug!(
                        %role,
                        strategy = strategy.name(),
                        id = ?marked.id,
                        tag = %marked.tag,
                        "Located control"
                    );
                    return Ok(Handle {
                        role,
                        selector: scripts::role_selector(role.key()),
                        click_selector: scripts::click_selector(role.key()),
                        id: marked.id.filter(|id| !id.is_empty()),
                        aria_owns: marked.aria_owns.filter(|id| !id.is_empty()),
                        native: marked.native,
                        strategy: strategy.name(),
                    });
                }
                Err(e) if e.is_session_lost() => return Err(e),
                Err(e) => {
                    tracing::warn!(%role, strategy = strategy.name(), error = %e, "Strategy raised");
                }
            }
        }

        tracing::warn!(%role, label = desc.label, "No strategy located the control");
        Err(Error::NotFound { role })
    }
}
