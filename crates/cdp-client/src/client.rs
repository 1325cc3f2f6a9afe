use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CdpError;
use crate::protocol::{CommandFrame, IncomingFrame, ResponseFrame};

/// Deadline for browser-scoped commands.
const BROWSER_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for target-scoped commands, which may include navigation and DOM
/// work on the browser side.
const TARGET_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Multiplexed devtools-protocol client bound to one browser process.
///
/// Exactly one background task reads the channel; writers are serialized on
/// the sink. Callers may issue commands concurrently from any task, and each
/// response is routed back to its caller by id correlation.
pub struct CdpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for CdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpClient").finish_non_exhaustive()
    }
}

struct ClientInner {
    writer: tokio::sync::Mutex<WsSink>,
    calls: Mutex<CallTable>,
    // Serializes Target.attachToTarget so a target is attached at most once
    // even when target-scoped calls race on a cold cache.
    attach_gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    browser_timeout: Duration,
    target_timeout: Duration,
}

/// Guarded by one mutex: the id counter, the pending-call map, and the
/// target attachment cache. The websocket write happens outside this lock.
struct CallTable {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<ResponseFrame>>,
    attachments: HashMap<String, String>,
}

impl CdpClient {
    /// Opens the websocket channel and starts the background reader.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        Self::connect_with_timeouts(ws_url, BROWSER_COMMAND_TIMEOUT, TARGET_COMMAND_TIMEOUT).await
    }

    pub async fn connect_with_timeouts(
        ws_url: &str,
        browser_timeout: Duration,
        target_timeout: Duration,
    ) -> Result<Self, CdpError> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|err| CdpError::Transport(err.to_string()))?;
        let (sink, source) = stream.split();

        let inner = Arc::new(ClientInner {
            writer: tokio::sync::Mutex::new(sink),
            calls: Mutex::new(CallTable {
                next_id: 0,
                pending: HashMap::new(),
                attachments: HashMap::new(),
            }),
            attach_gate: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            browser_timeout,
            target_timeout,
        });

        tokio::spawn(read_loop(Arc::clone(&inner), source));
        debug!(target: "cdp-client", url = %ws_url, "devtools channel connected");

        Ok(Self { inner })
    }

    /// Issues a browser-scoped command and waits for its correlated response.
    ///
    /// Pass `Value::Null` to omit params from the outbound frame.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        let deadline = self.inner.browser_timeout;
        self.inner.issue(method, params, None, deadline).await
    }

    /// Issues a page-scoped command, attaching to the target first if no
    /// attachment is cached.
    pub async fn send_to_target(
        &self,
        target_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        let session = self.attachment_for(target_id).await?;
        let deadline = self.inner.target_timeout;
        self.inner
            .issue(method, params, Some(&session), deadline)
            .await
    }

    /// Creates a new isolated browser context and returns its handle.
    pub async fn create_browser_context(&self) -> Result<String, CdpError> {
        let result = self
            .send("Target.createBrowserContext", Value::Null)
            .await?;
        required_str(&result, "browserContextId", "Target.createBrowserContext")
    }

    pub async fn dispose_browser_context(&self, context_id: &str) -> Result<(), CdpError> {
        self.send(
            "Target.disposeBrowserContext",
            json!({ "browserContextId": context_id }),
        )
        .await
        .map(|_| ())
    }

    /// Creates a new page inside `context_id` and returns the target id.
    pub async fn create_target(&self, url: &str, context_id: &str) -> Result<String, CdpError> {
        let result = self
            .send(
                "Target.createTarget",
                json!({ "url": url, "browserContextId": context_id }),
            )
            .await?;
        required_str(&result, "targetId", "Target.createTarget")
    }

    /// Closes a target and drops any cached attachment for it.
    pub async fn close_target(&self, target_id: &str) -> Result<(), CdpError> {
        let result = self
            .send("Target.closeTarget", json!({ "targetId": target_id }))
            .await;
        self.inner.calls.lock().attachments.remove(target_id);
        result.map(|_| ())
    }

    /// Shuts the client down: cancels the reader, closes the socket, and
    /// fails every in-flight call with [`CdpError::Closed`]. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target: "cdp-client", "closing devtools channel");
        self.inner.shutdown.cancel();
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(err) = writer.close().await {
                debug!(target: "cdp-client", %err, "websocket close handshake failed");
            }
        }
        self.inner.abort_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn attachment_for(&self, target_id: &str) -> Result<String, CdpError> {
        if let Some(label) = self.inner.calls.lock().attachments.get(target_id).cloned() {
            return Ok(label);
        }

        let _gate = self.inner.attach_gate.lock().await;
        // A racing caller may have attached while we queued on the gate.
        if let Some(label) = self.inner.calls.lock().attachments.get(target_id).cloned() {
            return Ok(label);
        }

        let deadline = self.inner.browser_timeout;
        let result = self
            .inner
            .issue(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
                deadline,
            )
            .await?;
        let label = required_str(&result, "sessionId", "Target.attachToTarget")?;

        self.inner
            .calls
            .lock()
            .attachments
            .insert(target_id.to_string(), label.clone());
        debug!(target: "cdp-client", target_id, session = %label, "attached to target");
        Ok(label)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.lock().pending.len()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn cached_attachments(&self) -> usize {
        self.inner.calls.lock().attachments.len()
    }
}

impl ClientInner {
    /// Registers a pending call, writes the frame, and waits for whichever
    /// comes first: the correlated response, the deadline, or shutdown. The
    /// pending entry is removed on every exit path.
    async fn issue(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        deadline: Duration,
    ) -> Result<Value, CdpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CdpError::Closed);
        }

        let (id, rx) = {
            let mut calls = self.calls.lock();
            calls.next_id += 1;
            let id = calls.next_id;
            let (tx, rx) = oneshot::channel();
            calls.pending.insert(id, tx);
            (id, rx)
        };

        let frame = CommandFrame {
            id,
            method,
            params: if params.is_null() { None } else { Some(params) },
            session_id,
        };
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                self.forget(id);
                return Err(CdpError::Malformed(err.to_string()));
            }
        };

        debug!(target: "cdp-client", method, id, session = ?session_id, "sending command");
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.send(Message::Text(payload)).await {
                self.forget(id);
                return Err(CdpError::Transport(err.to_string()));
            }
        }

        tokio::select! {
            response = rx => match response {
                Ok(resp) => match resp.error {
                    Some(err) => Err(CdpError::Protocol { code: err.code, message: err.message }),
                    None => Ok(resp.result.unwrap_or(Value::Null)),
                },
                // Sender dropped without a response: the client shut down.
                Err(_) => Err(CdpError::Closed),
            },
            _ = tokio::time::sleep(deadline) => {
                self.forget(id);
                Err(CdpError::Timeout(deadline))
            }
            _ = self.shutdown.cancelled() => {
                self.forget(id);
                Err(CdpError::Closed)
            }
        }
    }

    /// Routes one inbound frame: responses to their pending call, events to
    /// the debug log.
    fn dispatch(&self, raw: &str) {
        match serde_json::from_str::<IncomingFrame>(raw) {
            Ok(IncomingFrame::Response(resp)) => {
                let entry = self.calls.lock().pending.remove(&resp.id);
                match entry {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => {
                        debug!(target: "cdp-client", id = resp.id, "response without pending call")
                    }
                }
            }
            Ok(IncomingFrame::Event(event)) => {
                debug!(target: "cdp-client", method = %event.method, "ignoring unsolicited event");
            }
            Err(err) => warn!(target: "cdp-client", %err, "dropping unparseable frame"),
        }
    }

    fn forget(&self, id: u64) {
        self.calls.lock().pending.remove(&id);
    }

    /// Drops every pending sender; waiting callers observe `Closed`.
    fn abort_pending(&self) {
        let mut calls = self.calls.lock();
        calls.attachments.clear();
        calls.pending.clear();
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut source: WsSource) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => {
                    if !inner.shutdown.is_cancelled() {
                        warn!(target: "cdp-client", "devtools channel closed by peer");
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    if !inner.shutdown.is_cancelled() {
                        warn!(target: "cdp-client", %err, "devtools channel read failed");
                    }
                    break;
                }
            }
        }
    }
    // Nothing further can be delivered; fail in-flight calls promptly
    // instead of letting them ride out their deadlines.
    inner.abort_pending();
    debug!(target: "cdp-client", "reader stopped");
}

fn required_str(payload: &Value, field: &str, method: &str) -> Result<String, CdpError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CdpError::Malformed(format!("{method} response missing {field}")))
}
