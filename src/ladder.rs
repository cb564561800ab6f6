//! Click-retry ladder
//!
//! A click on a framework widget fails in several ways: an overlay intercepts
//! it, the handler only listens to synthetic events, or only to a full pointer
//! sequence. The ladder tries the cheapest click first and climbs until one
//! lands. It is a plain loop over [`ClickStrategy::LADDER`].

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::page::Element;
use crate::role::Role;

/// Longest markup kept for a diagnostic log line
const MARKUP_LIMIT: usize = 2000;

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    /// Native mouse press/release at the element's center
    Direct,
    /// `HTMLElement.click()` from script
    Scripted,
    /// Simulated pointer travel, hover, then press/release
    Pointer,
}

impl ClickStrategy {
    /// Rungs in the order they are tried
    pub const LADDER: [ClickStrategy; 3] = [
        ClickStrategy::Direct,
        ClickStrategy::Scripted,
        ClickStrategy::Pointer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClickStrategy::Direct => "direct",
            ClickStrategy::Scripted => "scripted",
            ClickStrategy::Pointer => "pointer",
        }
    }
}

/// Anything the ladder can click
#[async_trait]
pub trait Clickable: Send + Sync {
    async fn click_with(&self, strategy: ClickStrategy) -> Result<()>;

    /// Serialized markup for diagnostics; empty when unavailable
    async fn markup(&self) -> String;
}

#[async_trait]
impl Clickable for Element<'_> {
    async fn click_with(&self, strategy: ClickStrategy) -> Result<()> {
        match strategy {
            ClickStrategy::Direct => self.click().await,
            ClickStrategy::Scripted => self.scripted_click().await,
            ClickStrategy::Pointer => self.pointer_click().await,
        }
    }

    async fn markup(&self) -> String {
        self.outer_html()
            .await
            .map(|html| html.chars().take(MARKUP_LIMIT).collect())
            .unwrap_or_default()
    }
}

/// Click `target`, climbing rungs until one succeeds
///
/// Returns the rung that landed. Exhausting the ladder is
/// [`Error::Interaction`] carrying every rung's failure and the markup.
pub async fn climb<C: Clickable + ?Sized>(target: &C, role: Role) -> Result<ClickStrategy> {
    let mut failures = Vec::with_capacity(ClickStrategy::LADDER.len());

    for strategy in ClickStrategy::LADDER {
        match target.click_with(strategy).await {
            Ok(()) => {
                if !failures.is_empty() {
                    tracing::debug!(%role, rung = strategy.name(), "Click landed after fallback");
                }
                return Ok(strategy);
            }
            Err(e) if e.is_session_lost() => return Err(e),
            Err(e) => {
                tracing::debug!(%role, rung = strategy.name(), error = %e, "Click rung failed");
                failures.push(format!("{}: {}", strategy.name(), e));
            }
        }
    }

    let markup = target.markup().await;
    tracing::warn!(%role, failures = ?failures, %markup, "Click ladder exhausted");
    Err(Error::Interaction {
        role,
        reason: failures.join("; "),
        markup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use std::sync::Mutex;

    /// Fails every rung listed in `failing`
    struct Stubborn {
        failing: Vec<ClickStrategy>,
        tried: Mutex<Vec<ClickStrategy>>,
    }

    impl Stubborn {
        fn new(failing: &[ClickStrategy]) -> Self {
            Self {
                failing: failing.to_vec(),
                tried: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl Clickable for Stubborn {
        async fn click_with(&self, strategy: ClickStrategy) -> Result<()> {
            self.tried.lock().unwrap().push(strategy);
            if self.failing.contains(&strategy) {
                Err(Error::not_interactive("#x", "covered by div.ui-blockui"))
            } else {
                Ok(())
            }
        }

        async fn markup(&self) -> String {
            "<div id=\"x\"></div>".into()
        }
    }

    #[tokio::test]
    async fn test_direct_click_ends_ladder() {
        let target = Stubborn::new(&[]);
        let strategy = assert_ok!(climb(&target, Role::State).await);
        assert_eq!(strategy, ClickStrategy::Direct);
        assert_eq!(*target.tried.lock().unwrap(), [ClickStrategy::Direct]);
    }

    #[tokio::test]
    async fn test_ladder_climbs_in_order() {
        let target = Stubborn::new(&[ClickStrategy::Direct, ClickStrategy::Scripted]);
        assert_eq!(climb(&target, Role::State).await.unwrap(), ClickStrategy::Pointer);
        assert_eq!(*target.tried.lock().unwrap(), ClickStrategy::LADDER);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_reports_markup() {
        let target = Stubborn::new(&ClickStrategy::LADDER);
        let err = climb(&target, Role::Refresh).await.unwrap_err();
        match err {
            Error::Interaction {
                role,
                reason,
                markup,
            } => {
                assert_eq!(role, Role::Refresh);
                assert!(reason.starts_with("direct: "));
                assert!(reason.contains("pointer: "));
                assert_eq!(markup, "<div id=\"x\"></div>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct Dead;

    #[async_trait]
    impl Clickable for Dead {
        async fn click_with(&self, _: ClickStrategy) -> Result<()> {
            Err(Error::transport("Response channel closed"))
        }

        async fn markup(&self) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn test_session_loss_is_not_retried() {
        let err = assert_err!(climb(&Dead, Role::Month).await);
        assert!(err.is_session_lost());
    }
}
