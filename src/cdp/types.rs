//! Wire types for the handful of CDP commands the harvester sends
//!
//! Requests carry exactly the parameters we set. Responses model only the
//! fields we read; Chrome's extra fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command with no parameters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NoParams {}

// === Browser ===

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub product: String,
}

/// `Browser.setDownloadBehavior` modes in use
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DownloadBehavior {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDownloadBehavior {
    pub behavior: DownloadBehavior,
    pub download_path: String,
}

// === Target ===

#[derive(Debug, Clone, Serialize)]
pub struct CreateTarget<'a> {
    pub url: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTarget {
    pub target_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTarget<'a> {
    pub target_id: &'a str,
    pub flatten: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedTarget {
    pub session_id: String,
}

// === Page ===

#[derive(Debug, Clone, Serialize)]
pub struct Navigate<'a> {
    pub url: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Navigated {
    #[serde(default)]
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureScreenshot {
    pub format: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Screenshot {
    /// Base64 image data
    pub data: String,
}

// === Input ===

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventType {
    MousePressed,
    MouseReleased,
    MouseMoved,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    None,
    Left,
}

/// `Input.dispatchMouseEvent` parameters
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseEvent {
    pub r#type: MouseEventType,
    pub x: f64,
    pub y: f64,
    pub button: MouseButton,
    pub click_count: u32,
}

impl MouseEvent {
    pub fn moved(x: f64, y: f64) -> Self {
        Self {
            r#type: MouseEventType::MouseMoved,
            x,
            y,
            button: MouseButton::None,
            click_count: 0,
        }
    }

    /// Left-button press or release, depending on `kind`
    pub fn left(kind: MouseEventType, x: f64, y: f64) -> Self {
        Self {
            r#type: kind,
            x,
            y,
            button: MouseButton::Left,
            click_count: 1,
        }
    }
}

// === DOM ===

#[derive(Debug, Clone, Serialize)]
pub struct GetDocument {
    pub depth: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub root: NodeRef,
}

/// Request or response naming one DOM node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub node_id: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySelector<'a> {
    pub node_id: i32,
    pub selector: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxModelResult {
    pub model: BoxModel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoxModel {
    /// Content quad: [x1,y1, x2,y2, x3,y3, x4,y4]
    #[serde(default)]
    pub content: Vec<f64>,
}

impl BoxModel {
    /// Center of the content quad, if Chrome returned one
    pub fn center(&self) -> Option<(f64, f64)> {
        let quad = self.content.get(..8)?;
        let x = quad.iter().step_by(2).sum::<f64>() / 4.0;
        let y = quad.iter().skip(1).step_by(2).sum::<f64>() / 4.0;
        Some((x, y))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuterHtml {
    pub outer_html: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNode<'a> {
    pub node_id: i32,
    pub object_group: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedNode {
    pub object: RemoteObject,
}

// === Runtime ===

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluate<'a> {
    pub expression: &'a str,
    pub return_by_value: bool,
    pub await_promise: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionOn<'a> {
    pub function_declaration: &'a str,
    pub object_id: &'a str,
    pub arguments: Vec<CallArgument>,
    pub return_by_value: bool,
    pub await_promise: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallArgument {
    pub value: Value,
}

/// Result of `Runtime.evaluate` and `Runtime.callFunctionOn`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluated {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub line_number: i32,
    #[serde(default)]
    pub column_number: i32,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Most specific message Chrome gave us
    pub fn message(&self) -> String {
        let detail = self
            .exception
            .as_ref()
            .and_then(|e| e.description.as_deref())
            .unwrap_or(&self.text);
        format!("{} at {}:{}", detail, self.line_number, self.column_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_download_behavior_serializes_camel_case() {
        let cmd = SetDownloadBehavior {
            behavior: DownloadBehavior::Allow,
            download_path: "/tmp/staging".into(),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"behavior": "allow", "downloadPath": "/tmp/staging"})
        );
    }

    #[test]
    fn test_mouse_events_serialize_for_input_domain() {
        assert_eq!(
            serde_json::to_value(MouseEvent::moved(1.0, 2.0)).unwrap(),
            json!({"type": "mouseMoved", "x": 1.0, "y": 2.0, "button": "none", "clickCount": 0})
        );
        let press = serde_json::to_value(MouseEvent::left(MouseEventType::MousePressed, 3.0, 4.0)).unwrap();
        assert_eq!(press["button"], "left");
        assert_eq!(press["clickCount"], 1);
    }

    #[test]
    fn test_null_result_has_no_value() {
        let evaluated: Evaluated =
            serde_json::from_value(json!({"result": {"type": "object", "subtype": "null", "value": null}})).unwrap();
        assert!(evaluated.result.value.is_none() || evaluated.result.value == Some(Value::Null));
        assert!(evaluated.exception_details.is_none());
    }

    #[test]
    fn test_box_model_center() {
        let model = BoxModel {
            content: vec![0.0, 0.0, 10.0, 0.0, 10.0, 20.0, 0.0, 20.0],
        };
        assert_eq!(model.center(), Some((5.0, 10.0)));
        assert_eq!(BoxModel::default().center(), None);
    }
}
