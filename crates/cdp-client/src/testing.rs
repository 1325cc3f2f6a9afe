//! In-process fake worker for tests.
//!
//! Serves a minimal devtools websocket (the `Target.*`, `Page.*`, `Runtime.*`,
//! `DOM.*` and `Accessibility.*` methods the orchestration core issues) plus a
//! `/json/version` endpoint, so downstream crates can exercise the full
//! discovery → connect → command path without a browser binary.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// PNG signature followed by a token IHDR header; enough for callers that
/// assert on the magic bytes.
const FAKE_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
];

pub struct FakeWorker {
    http_port: u16,
    ws_port: u16,
    state: Arc<FakeState>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct FakeState {
    counter: AtomicU64,
    attach_calls: AtomicUsize,
    silent: AtomicBool,
    emit_event: AtomicBool,
    http_status: AtomicU16,
    omit_ws_url: AtomicBool,
    malformed_body: AtomicBool,
    targets: Mutex<HashSet<String>>,
    attachments: Mutex<HashSet<String>>,
    contexts: Mutex<Vec<String>>,
    disposed: Mutex<Vec<String>>,
}

impl FakeWorker {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState {
            http_status: AtomicU16::new(200),
            ..FakeState::default()
        });
        let shutdown = CancellationToken::new();

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws");
        let ws_port = ws_listener.local_addr().expect("ws addr").port();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
        let http_port = http_listener.local_addr().expect("http addr").port();

        let ws_state = Arc::clone(&state);
        let ws_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ws_shutdown.cancelled() => break,
                    accepted = ws_listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_ws(stream, Arc::clone(&ws_state)));
                    }
                }
            }
        });

        let http_state = Arc::clone(&state);
        let http_shutdown = shutdown.clone();
        let ws_url = format!("ws://127.0.0.1:{ws_port}/devtools/browser/fake");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = http_shutdown.cancelled() => break,
                    accepted = http_listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_version(stream, Arc::clone(&http_state), ws_url.clone()));
                    }
                }
            }
        });

        Self {
            http_port,
            ws_port,
            state,
            shutdown,
        }
    }

    /// The fake's debug port: what a registry would dial for discovery.
    pub fn port(&self) -> u16 {
        self.http_port
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/devtools/browser/fake", self.ws_port)
    }

    pub fn attach_count(&self) -> usize {
        self.state.attach_calls.load(Ordering::SeqCst)
    }

    pub fn created_contexts(&self) -> Vec<String> {
        self.state.contexts.lock().clone()
    }

    pub fn disposed_contexts(&self) -> Vec<String> {
        self.state.disposed.lock().clone()
    }

    pub fn live_targets(&self) -> usize {
        self.state.targets.lock().len()
    }

    /// Forget all targets and attachments, as a restarted browser would.
    pub fn clear_targets(&self) {
        self.state.targets.lock().clear();
        self.state.attachments.lock().clear();
    }

    /// When silent, the websocket swallows commands without responding.
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// When set, an unsolicited event frame precedes every response.
    pub fn set_emit_event(&self, emit: bool) {
        self.state.emit_event.store(emit, Ordering::SeqCst);
    }

    pub fn set_http_status(&self, status: u16) {
        self.state.http_status.store(status, Ordering::SeqCst);
    }

    pub fn set_omit_ws_url(&self, omit: bool) {
        self.state.omit_ws_url.store(omit, Ordering::SeqCst);
    }

    pub fn set_malformed_body(&self, malformed: bool) {
        self.state.malformed_body.store(malformed, Ordering::SeqCst);
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_ws(stream: TcpStream, state: Arc<FakeState>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (sink, mut source) = ws.split();
    let sink = Arc::new(tokio::sync::Mutex::new(sink));

    while let Some(Ok(message)) = source.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if state.silent.load(Ordering::SeqCst) {
            continue;
        }

        if state.emit_event.load(Ordering::SeqCst) {
            let event = json!({ "method": "Fake.tick", "params": {} }).to_string();
            let _ = sink.lock().await.send(Message::Text(event)).await;
        }

        let id = frame.get("id").and_then(Value::as_u64).unwrap_or(0);
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        let session = frame
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);

        if method == "test.slow" {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let response =
                    json!({ "id": id, "result": { "method": "test.slow" } }).to_string();
                let _ = sink.lock().await.send(Message::Text(response)).await;
            });
            continue;
        }

        let body = respond(&state, &method, &params, session.as_deref());
        let response = match body {
            Ok(result) => json!({ "id": id, "result": result }),
            Err((code, message)) => {
                json!({ "id": id, "error": { "code": code, "message": message } })
            }
        };
        let _ = sink
            .lock()
            .await
            .send(Message::Text(response.to_string()))
            .await;
    }
}

fn respond(
    state: &FakeState,
    method: &str,
    params: &Value,
    session: Option<&str>,
) -> Result<Value, (i64, String)> {
    if let Some(session) = session {
        if !state.attachments.lock().contains(session) {
            return Err((-32001, format!("Session with given id not found: {session}")));
        }
    }

    match method {
        "Target.createBrowserContext" => {
            let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let ctx = format!("ctx-{n}");
            state.contexts.lock().push(ctx.clone());
            Ok(json!({ "browserContextId": ctx }))
        }
        "Target.disposeBrowserContext" => {
            let ctx = params
                .get("browserContextId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            state.disposed.lock().push(ctx);
            Ok(json!({}))
        }
        "Target.createTarget" => {
            let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let target = format!("target-{n}");
            state.targets.lock().insert(target.clone());
            Ok(json!({ "targetId": target }))
        }
        "Target.attachToTarget" => {
            let target = params
                .get("targetId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !state.targets.lock().contains(target) {
                return Err((-32602, format!("No target with given id found: {target}")));
            }
            state.attach_calls.fetch_add(1, Ordering::SeqCst);
            let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let label = format!("attach-{n}");
            state.attachments.lock().insert(label.clone());
            Ok(json!({ "sessionId": label }))
        }
        "Target.closeTarget" => {
            let target = params
                .get("targetId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !state.targets.lock().remove(target) {
                return Err((-32602, format!("No target with given id found: {target}")));
            }
            Ok(json!({ "success": true }))
        }
        "Page.captureScreenshot" => Ok(json!({ "data": STANDARD.encode(FAKE_PNG) })),
        "Runtime.evaluate" => {
            let expression = params
                .get("expression")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if expression.contains("throw") {
                return Ok(json!({
                    "result": { "type": "object", "subtype": "error" },
                    "exceptionDetails": {
                        "text": "Uncaught",
                        "exception": { "description": "Error: boom" }
                    }
                }));
            }
            let value = match expression {
                "document.title" => json!("Example Domain"),
                "1 + 2" => json!(3),
                other => json!(other),
            };
            Ok(json!({ "result": { "type": "string", "value": value } }))
        }
        "DOM.getDocument" => Ok(json!({ "root": { "nodeId": 1 } })),
        "DOM.getOuterHTML" => Ok(json!({
            "outerHTML": "<html><head><title>Example Domain</title></head><body>Example</body></html>"
        })),
        "Accessibility.getFullAXTree" => Ok(fake_ax_tree()),
        "test.echo" => Ok(json!({ "method": method, "params": params })),
        _ => Ok(json!({})),
    }
}

fn fake_ax_tree() -> Value {
    json!({
        "nodes": [
            {
                "nodeId": "1",
                "ignored": false,
                "role": { "type": "role", "value": "RootWebArea" },
                "name": { "type": "computedString", "value": "Example Domain" },
                "childIds": ["2", "3", "4"]
            },
            {
                "nodeId": "2",
                "ignored": false,
                "role": { "type": "role", "value": "heading" },
                "name": { "type": "computedString", "value": "Example Domain" },
                "properties": [
                    { "name": "level", "value": { "type": "integer", "value": 1 } }
                ],
                "childIds": []
            },
            {
                "nodeId": "3",
                "ignored": true,
                "role": { "type": "role", "value": "generic" },
                "childIds": []
            },
            {
                "nodeId": "4",
                "ignored": false,
                "role": { "type": "role", "value": "link" },
                "name": { "type": "computedString", "value": "More information" },
                "properties": [
                    { "name": "focusable", "value": { "type": "booleanOrUndefined", "value": true } }
                ],
                "childIds": []
            }
        ]
    })
}

async fn serve_version(mut stream: TcpStream, state: Arc<FakeState>, ws_url: String) {
    // Drain the request head before replying.
    let mut buf = [0u8; 1024];
    let mut head = Vec::new();
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => return,
        }
    }

    let status = state.http_status.load(Ordering::SeqCst);
    let body = if state.malformed_body.load(Ordering::SeqCst) {
        "not json".to_string()
    } else if state.omit_ws_url.load(Ordering::SeqCst) {
        json!({ "Browser": "FakeChrome/1.0" }).to_string()
    } else {
        json!({
            "Browser": "FakeChrome/1.0",
            "Protocol-Version": "1.3",
            "webSocketDebuggerUrl": ws_url,
        })
        .to_string()
    };

    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
