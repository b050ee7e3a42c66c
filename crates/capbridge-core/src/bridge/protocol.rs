//! Bridge protocol message handling

use crate::error::{BridgeError, Error, Result};
use crate::types::{
    error_codes, methods, JsonRpcRequest, JsonRpcResponse, OpenFileDialogResult, SelectedPath,
    UpdateParams, UpdatePayload, WatchParams, WatchTarget,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Parsed bridge message
#[derive(Debug, Clone)]
pub enum BridgeMessage {
    /// Reply to a request we sent
    Response(JsonRpcResponse),
    /// Client asks the host to run the file dialog
    OpenFileDialog { id: serde_json::Value },
    /// Client registers interest in a target
    Watch(WatchTarget),
    /// Host pushes a change notification
    Update(UpdatePayload),
    /// Request with a method outside the capability surface
    UnknownRequest(JsonRpcRequest),
    /// Notification with a method outside the capability surface
    UnknownNotification(JsonRpcRequest),
}

/// Protocol handler for bridge messages
#[derive(Debug)]
pub struct ProtocolHandler {
    request_id: AtomicU64,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            request_id: AtomicU64::new(1),
        }
    }

    /// Generate next request ID
    pub fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create a request for an arbitrary surface method
    pub fn create_request(&self, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id(), method, params)
    }

    /// Create api/openFileDialog request
    pub fn create_open_file_dialog_request(&self) -> JsonRpcRequest {
        self.create_request(methods::OPEN_FILE_DIALOG, None)
    }

    /// Create api/watch notification
    pub fn create_watch_notification(&self, target: &WatchTarget) -> JsonRpcRequest {
        JsonRpcRequest::notification(
            methods::WATCH,
            Some(serde_json::json!({ "target": target.as_str() })),
        )
    }

    /// Create api/update notification
    pub fn create_update_notification(&self, payload: &UpdatePayload) -> JsonRpcRequest {
        JsonRpcRequest::notification(
            methods::UPDATE,
            Some(serde_json::json!({ "payload": payload.to_base64() })),
        )
    }

    /// Create the reply to api/openFileDialog
    pub fn create_dialog_response(
        &self,
        id: serde_json::Value,
        path: Option<&str>,
    ) -> JsonRpcResponse {
        JsonRpcResponse::success(id, serde_json::json!({ "path": path }))
    }

    /// Create error response
    pub fn create_error_response(
        &self,
        id: serde_json::Value,
        code: i32,
        message: &str,
    ) -> JsonRpcResponse {
        JsonRpcResponse::failure(id, code, message)
    }

    /// Parse the reply to api/openFileDialog. An absent or empty path is a
    /// cancellation, not an error.
    pub fn parse_dialog_response(&self, response: &JsonRpcResponse) -> Result<Option<SelectedPath>> {
        if let Some(error) = &response.error {
            return Err(Error::Bridge(BridgeError::HostRejected {
                code: error.code,
                message: error.message.clone(),
            }));
        }

        let result = response.result.clone().ok_or_else(|| {
            Error::Bridge(BridgeError::InvalidMessage(
                "Dialog response missing result".to_string(),
            ))
        })?;

        // A bare string or null result is accepted as well as {path}.
        let path = match result {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => serde_json::from_value::<OpenFileDialogResult>(other)?.path,
        };

        Ok(path.filter(|p| !p.is_empty()).map(SelectedPath::new))
    }

    /// Parse a raw JSON message into a [`BridgeMessage`]
    pub fn parse_message(&self, value: &serde_json::Value) -> Result<BridgeMessage> {
        if value.get("method").is_some() {
            let request: JsonRpcRequest = serde_json::from_value(value.clone())?;
            let params = request.params.clone().unwrap_or(serde_json::Value::Null);

            return match request.method.as_str() {
                methods::OPEN_FILE_DIALOG => match request.id.clone() {
                    Some(id) => Ok(BridgeMessage::OpenFileDialog { id }),
                    None => {
                        warn!("openFileDialog sent without an id; nobody can receive the result");
                        Ok(BridgeMessage::UnknownNotification(request))
                    }
                },
                methods::WATCH => {
                    let p: WatchParams = serde_json::from_value(params).map_err(|e| {
                        Error::Bridge(BridgeError::InvalidMessage(format!(
                            "Invalid watch params: {}",
                            e
                        )))
                    })?;
                    Ok(BridgeMessage::Watch(WatchTarget::new(p.target)))
                }
                methods::UPDATE => {
                    let p: UpdateParams = serde_json::from_value(params).map_err(|e| {
                        Error::Bridge(BridgeError::InvalidMessage(format!(
                            "Invalid update params: {}",
                            e
                        )))
                    })?;
                    Ok(BridgeMessage::Update(UpdatePayload::from_base64(&p.payload)?))
                }
                _ if request.is_notification() => Ok(BridgeMessage::UnknownNotification(request)),
                _ => Ok(BridgeMessage::UnknownRequest(request)),
            };
        }

        if value.get("result").is_some() || value.get("error").is_some() {
            let response: JsonRpcResponse = serde_json::from_value(value.clone())?;
            return Ok(BridgeMessage::Response(response));
        }

        Err(Error::Bridge(BridgeError::InvalidMessage(format!(
            "Not a JSON-RPC message: {}",
            value
        ))))
    }

    /// Error response for a request outside the surface
    pub fn create_method_not_found(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        self.create_error_response(
            request.id.clone().unwrap_or(serde_json::Value::Null),
            error_codes::METHOD_NOT_FOUND,
            &format!("Unsupported method: {}", request.method),
        )
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
