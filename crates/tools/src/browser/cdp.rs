//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Communicates with a Chrome/Chromium page target via its debugging
//! WebSocket endpoint. Only the commands the page driver needs are wrapped.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use super::driver::DriverError;

/// A CDP WebSocket client that sends commands and correlates responses.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a page target's CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, DriverError> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            DriverError::Unavailable(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches command responses; events are ignored
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            command_timeout,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response's `result`.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| DriverError::Unavailable(format!("Failed to send CDP command: {}", e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(DriverError::Protocol(format!("{} failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(DriverError::Unavailable("CDP response channel closed".into())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(DriverError::Unavailable(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "DOM", "Accessibility").
    pub async fn enable_domain(&self, domain: &str) -> Result<(), DriverError> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value, DriverError> {
        let result = self.send_command("Page.navigate", json!({"url": url})).await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(DriverError::Unavailable(format!(
                "Navigation to {} failed: {}",
                url, error_text
            )));
        }
        Ok(result)
    }

    pub async fn reload(&self) -> Result<(), DriverError> {
        self.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    /// Evaluate JavaScript in the page context, returning the value by copy.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, DriverError> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(DriverError::Protocol(format!("script threw: {}", details)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Remote object id for a DOM node, or `None` if the node is gone.
    pub async fn resolve_node(&self, backend_node_id: i64) -> Result<Option<String>, DriverError> {
        let result = self
            .send_command("DOM.resolveNode", json!({"backendNodeId": backend_node_id}))
            .await?;
        Ok(result
            .get("object")
            .and_then(|o| o.get("objectId"))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Call `declaration` with `this` bound to a remote object, returning the value by copy.
    pub async fn call_function_on(&self, object_id: &str, declaration: &str) -> Result<Value, DriverError> {
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(DriverError::Protocol(format!("script threw: {}", details)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Get the full accessibility tree via CDP.
    pub async fn get_accessibility_tree(&self) -> Result<Value, DriverError> {
        self.send_command("Accessibility.getFullAXTree", json!({}))
            .await
    }

    /// AX node(s) for one DOM node, without relatives.
    pub async fn get_partial_ax_tree(&self, backend_node_id: i64) -> Result<Value, DriverError> {
        self.send_command(
            "Accessibility.getPartialAXTree",
            json!({"backendNodeId": backend_node_id, "fetchRelatives": false}),
        )
        .await
    }

    /// Query AX nodes under `node_id` by role and (exact) accessible name.
    pub async fn query_ax_tree(
        &self,
        node_id: i64,
        role: &str,
        accessible_name: Option<&str>,
    ) -> Result<Vec<Value>, DriverError> {
        let mut params = json!({"nodeId": node_id, "role": role});
        if let Some(name) = accessible_name {
            params["accessibleName"] = json!(name);
        }
        let result = self.send_command("Accessibility.queryAXTree", params).await?;
        Ok(result
            .get("nodes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Node id of the document root.
    pub async fn document_node_id(&self) -> Result<i64, DriverError> {
        let result = self
            .send_command("DOM.getDocument", json!({"depth": 0}))
            .await?;
        result
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DriverError::Protocol("DOM.getDocument returned no root".into()))
    }

    /// First match of a CSS selector, or `None`.
    pub async fn query_selector(&self, node_id: i64, selector: &str) -> Result<Option<i64>, DriverError> {
        let result = self
            .send_command(
                "DOM.querySelector",
                json!({
                    "nodeId": node_id,
                    "selector": selector,
                }),
            )
            .await?;
        Ok(result
            .get("nodeId")
            .and_then(|v| v.as_i64())
            .filter(|id| *id != 0))
    }

    /// Backend node id for a DOM node id.
    pub async fn backend_node_id(&self, node_id: i64) -> Result<i64, DriverError> {
        let result = self
            .send_command("DOM.describeNode", json!({"nodeId": node_id}))
            .await?;
        result
            .get("node")
            .and_then(|n| n.get("backendNodeId"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DriverError::Protocol("DOM.describeNode returned no backendNodeId".into()))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// Wait for Chrome's CDP endpoint to become available.
/// Polls /json/version until it responds, up to `timeout`.
pub async fn wait_for_cdp_ready(endpoint: &str, timeout: Duration) -> Result<String, DriverError> {
    let start = std::time::Instant::now();
    let url = format!("{}/json/version", endpoint);

    loop {
        if start.elapsed() > timeout {
            return Err(DriverError::Unavailable(format!(
                "Chrome CDP not ready after {}s at {}",
                timeout.as_secs(),
                endpoint
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first "page" target listed at /json/list.
/// Retries a few times since the page target may not appear immediately.
pub async fn get_page_ws_url(endpoint: &str) -> Result<String, DriverError> {
    let url = format!("{}/json/list", endpoint);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(DriverError::Unavailable("No page target found after retries".into()))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_ws_url_skips_non_pages() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://sw"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/B"}),
        ];
        assert_eq!(
            first_page_ws_url(&targets).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A")
        );
        assert_eq!(first_page_ws_url(&[]), None);
    }
}
