//! Browser connection and per-tab sessions
//!
//! Browser-level commands go through [`Connection`]; everything scoped to a
//! tab goes through the [`Session`] attached to it. Both share one
//! [`Transport`].

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::transport::Transport;
use super::types::*;
use crate::error::{Error, Result};

/// Object group for remote objects the harvester resolves
const OBJECT_GROUP: &str = "vahan-harvest";

pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub async fn version(&self) -> Result<VersionInfo> {
        self.transport.send("Browser.getVersion", &NoParams {}).await
    }

    /// Save every download into `dir` without prompting
    pub async fn set_download_dir(&self, dir: &Path) -> Result<()> {
        let params = SetDownloadBehavior {
            behavior: DownloadBehavior::Allow,
            download_path: dir.display().to_string(),
        };
        self.transport
            .send::<_, Value>("Browser.setDownloadBehavior", &params)
            .await?;
        Ok(())
    }

    /// Open a tab on `url` and attach a flat session to it
    pub async fn open_tab(&self, url: &str) -> Result<Session> {
        let target: CreatedTarget = self
            .transport
            .send("Target.createTarget", &CreateTarget { url })
            .await?;
        let attached: AttachedTarget = self
            .transport
            .send(
                "Target.attachToTarget",
                &AttachToTarget {
                    target_id: &target.target_id,
                    flatten: true,
                },
            )
            .await?;

        tracing::debug!(target = %target.target_id, session = %attached.session_id, "Attached to tab");
        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: attached.session_id,
        })
    }

    /// Ask Chrome to exit, then drop the socket
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.transport.send::<_, Value>("Browser.close", &NoParams {}).await {
            tracing::debug!(error = %e, "Browser.close failed");
        }
        self.transport.close().await
    }
}

/// A CDP session attached to one tab
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
}

impl Session {
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Send a command whose result we do not read
    async fn command<C: Serialize>(&self, method: &str, params: &C) -> Result<()> {
        self.send::<_, Value>(method, params).await?;
        Ok(())
    }

    pub async fn page_enable(&self) -> Result<()> {
        self.command("Page.enable", &NoParams {}).await
    }

    pub async fn navigate(&self, url: &str) -> Result<Navigated> {
        self.send("Page.navigate", &Navigate { url }).await
    }

    /// PNG screenshot of the viewport
    pub async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let shot: Screenshot = self
            .send("Page.captureScreenshot", &CaptureScreenshot { format: "png" })
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| Error::Decode(e.to_string()))
    }

    pub async fn dispatch_mouse_event(&self, event: MouseEvent) -> Result<()> {
        self.command("Input.dispatchMouseEvent", &event).await
    }

    /// Node id of the first match for `selector`, or 0
    pub async fn query_selector(&self, selector: &str) -> Result<i32> {
        let doc: Document = self.send("DOM.getDocument", &GetDocument { depth: 0 }).await?;
        let found: NodeRef = self
            .send(
                "DOM.querySelector",
                &QuerySelector {
                    node_id: doc.root.node_id,
                    selector,
                },
            )
            .await?;
        Ok(found.node_id)
    }

    pub async fn get_box_model(&self, node_id: i32) -> Result<BoxModel> {
        let result: BoxModelResult = self.send("DOM.getBoxModel", &NodeRef { node_id }).await?;
        Ok(result.model)
    }

    pub async fn get_outer_html(&self, node_id: i32) -> Result<String> {
        let result: OuterHtml = self.send("DOM.getOuterHTML", &NodeRef { node_id }).await?;
        Ok(result.outer_html)
    }

    /// Runtime object id for a DOM node
    pub async fn resolve_node(&self, node_id: i32) -> Result<String> {
        let resolved: ResolvedNode = self
            .send(
                "DOM.resolveNode",
                &ResolveNode {
                    node_id,
                    object_group: OBJECT_GROUP,
                },
            )
            .await?;
        resolved
            .object
            .object_id
            .ok_or_else(|| Error::cdp("DOM.resolveNode", -1, "No object_id returned"))
    }

    /// Call `function_declaration` with `this` bound to `object_id`
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<Value>,
    ) -> Result<Evaluated> {
        self.send(
            "Runtime.callFunctionOn",
            &CallFunctionOn {
                function_declaration,
                object_id,
                arguments: arguments.into_iter().map(|value| CallArgument { value }).collect(),
                return_by_value: true,
                await_promise: true,
            },
        )
        .await
    }

    /// Evaluate `expression` in the page and return the result by value
    pub async fn evaluate(&self, expression: &str) -> Result<Evaluated> {
        self.send(
            "Runtime.evaluate",
            &Evaluate {
                expression,
                return_by_value: true,
                await_promise: true,
            },
        )
        .await
    }
}
