//! Page Abstraction
//!
//! High-level API over one attached tab: script evaluation, element lookup,
//! the three click flavours the click ladder climbs through, and waits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cdp::{MouseEvent, MouseEventType, Session};
use crate::error::{Error, Result};
use crate::pointer::Pointer;
use crate::BrowserConfig;

/// A browser tab
pub struct Page {
    session: Session,
    config: Arc<BrowserConfig>,
}

impl Page {
    /// Create a new Page wrapping a CDP session
    pub(crate) fn new(session: Session, config: Arc<BrowserConfig>) -> Self {
        Self { session, config }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Wait until `document.readyState` is "complete"
    pub async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            // readyState is briefly unavailable while a navigation commits
            if let Ok(state) = self.evaluate::<String>("document.readyState").await {
                if state == "complete" {
                    return Ok(());
                }
            }

            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    timeout.as_millis()
                )));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Get page title
    pub async fn title(&self) -> Result<String> {
        let result = self.session.evaluate("document.title").await?;
        Ok(result
            .result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    // =========================================================================
    // JavaScript Evaluation
    // =========================================================================

    /// Evaluate JavaScript and deserialize the result
    ///
    /// Scripts that may find nothing should return `null`, which deserializes
    /// into `None` for `Option<T>` targets.
    pub async fn evaluate<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let result = self.session.evaluate(expression).await?;

        if let Some(exception) = result.exception_details {
            return Err(Error::Script(exception.message()));
        }

        // `null` and `undefined` both arrive without a value
        let value = result.result.value.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Execute JavaScript without expecting a return value
    pub async fn execute(&self, expression: &str) -> Result<()> {
        let result = self.session.evaluate(expression).await?;

        if let Some(exception) = result.exception_details {
            return Err(Error::Script(exception.message()));
        }

        Ok(())
    }

    // =========================================================================
    // Element Finding
    // =========================================================================

    /// Find an element by CSS selector
    pub async fn find(&self, selector: &str) -> Result<Element<'_>> {
        let node_id = self.session.query_selector(selector).await?;

        if node_id == 0 {
            return Err(Error::ElementNotFound(selector.to_string()));
        }

        Ok(Element {
            page: self,
            node_id,
            selector: selector.to_string(),
        })
    }

    // =========================================================================
    // Pointer Input
    // =========================================================================

    /// Press and release the left button at viewport coordinates
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.session
            .dispatch_mouse_event(MouseEvent::left(MouseEventType::MousePressed, x, y))
            .await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.session
            .dispatch_mouse_event(MouseEvent::left(MouseEventType::MouseReleased, x, y))
            .await
    }

    /// Simulated pointer for path-following clicks
    pub fn pointer(&self) -> Pointer<'_> {
        Pointer::new(&self.session).with_speed(self.config.pointer_speed)
    }

    // =========================================================================
    // Debug Helpers
    // =========================================================================

    /// Capture a screenshot as PNG bytes
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.session.capture_screenshot().await
    }

    /// Save a timestamped screenshot into the debug directory, if one is set
    pub async fn debug_screenshot(&self, prefix: &str) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.config.debug_dir else {
            return Ok(None);
        };

        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let path = dir.join(format!("{}_{}.png", prefix, stamp));
        std::fs::write(&path, self.screenshot().await?)?;
        Ok(Some(path))
    }
}

/// An element on the page, valid until the DOM node is replaced
pub struct Element<'a> {
    page: &'a Page,
    node_id: i32,
    selector: String,
}

impl<'a> Element<'a> {
    /// Get the element's center coordinates
    pub async fn center(&self) -> Result<(f64, f64)> {
        let model = self
            .page
            .session
            .get_box_model(self.node_id)
            .await
            .map_err(|e| e.clarify(&self.selector))?;
        model
            .center()
            .ok_or_else(|| Error::not_visible(&self.selector))
    }

    /// Get outer HTML
    pub async fn outer_html(&self) -> Result<String> {
        self.page.session.get_outer_html(self.node_id).await
    }

    /// Run `function_declaration` with `this` bound to the element
    pub async fn call(&self, function_declaration: &str, args: Vec<Value>) -> Result<Value> {
        let object_id = self.page.session.resolve_node(self.node_id).await?;
        let result = self
            .page
            .session
            .call_function_on(&object_id, function_declaration, args)
            .await?;
        if let Some(exception) = result.exception_details {
            return Err(Error::Script(exception.message()));
        }
        Ok(result.result.value.unwrap_or(Value::Null))
    }

    /// Scroll this element to the middle of the viewport
    pub async fn scroll_into_view(&self) -> Result<()> {
        self.call(
            "function() { this.scrollIntoView({ block: 'center', inline: 'nearest' }); }",
            vec![],
        )
        .await?;
        Ok(())
    }

    /// Name of whatever covers the element's center, if it is not the element itself
    async fn obstruction_at(&self, x: f64, y: f64) -> Result<Option<String>> {
        let value = self
            .call(
                r#"function(x, y) {
                    const hit = document.elementFromPoint(x, y);
                    if (!hit || hit === this || this.contains(hit) || hit.contains(this)) return null;
                    const cls = typeof hit.className === 'string' && hit.className.trim()
                        ? '.' + hit.className.trim().split(/\s+/).join('.')
                        : '';
                    return hit.tagName.toLowerCase() + cls;
                }"#,
                vec![Value::from(x), Value::from(y)],
            )
            .await?;
        Ok(value.as_str().map(String::from))
    }

    /// Native mouse click at the element's center
    ///
    /// Fails instead of clicking when another element (an overlay, a stale
    /// panel) covers the target, so the caller can fall back.
    pub async fn click(&self) -> Result<()> {
        let (x, y) = self.center().await?;
        if let Some(cover) = self.obstruction_at(x, y).await? {
            return Err(Error::not_interactive(
                &self.selector,
                format!("covered by {}", cover),
            ));
        }
        self.page.click_at(x, y).await
    }

    /// Programmatic `HTMLElement.click()`; ignores overlays and geometry
    pub async fn scripted_click(&self) -> Result<()> {
        self.call("function() { this.click(); }", vec![]).await?;
        Ok(())
    }

    /// Move a simulated pointer along a curved path and click at the end
    pub async fn pointer_click(&self) -> Result<()> {
        let (x, y) = self.center().await?;
        self.page.pointer().move_and_click(x, y).await
    }
}
