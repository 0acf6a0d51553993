//! JSON-RPC 2.0 client over a child process's stdio.
//!
//! Blocking framed reads happen on a dedicated reader thread which resolves
//! pending request futures by id; a second thread drains stderr into debug
//! logs. Writes are serialized by a mutex and pushed off the async thread.

use std::collections::HashMap;
use std::io::BufReader;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use cerise_domain::error::{Error, Result};

use crate::framing;
use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest};

/// Default wait for a single request's response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period for child exit and thread joins during close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// JSON-RPC client speaking LSP-framed messages to a subprocess.
pub struct JsonRpcStdioClient {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    stderr_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl JsonRpcStdioClient {
    /// Spawn `command args...` with piped stdio and start the reader threads.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("failed to capture child stdout".into()))?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader_name = name.to_string();
        let reader_thread = std::thread::Builder::new()
            .name(format!("{name}-read"))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    match framing::read_message(&mut reader) {
                        Ok(Some(message)) => handle_message(&reader_pending, message),
                        Ok(None) => {
                            if !reader_closed.load(Ordering::SeqCst) {
                                tracing::debug!(client = %reader_name, "MCP server closed stdout");
                            }
                            fail_all(
                                &reader_pending,
                                || Error::Transport("MCP server process exited".into()),
                            );
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(client = %reader_name, error = %e, "JSON-RPC reader failed");
                            fail_all(&reader_pending, || {
                                Error::Transport("JSON-RPC reader failed".into())
                            });
                            return;
                        }
                    }
                }
            })
            .map_err(|e| Error::Transport(format!("failed to start reader thread: {e}")))?;

        let stderr_thread = stderr.map(|stderr| {
            let stderr_name = name.to_string();
            std::thread::Builder::new()
                .name(format!("{name}-stderr"))
                .spawn(move || {
                    use std::io::BufRead;
                    let reader = BufReader::new(stderr);
                    for line in reader.lines() {
                        match line {
                            Ok(text) if !text.trim().is_empty() => {
                                tracing::debug!(client = %stderr_name, "stderr: {}", text.trim());
                            }
                            Ok(_) => {}
                            Err(_) => return,
                        }
                    }
                })
        });
        let stderr_thread = match stderr_thread {
            Some(Ok(handle)) => Some(handle),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to start stderr drain thread");
                None
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            child: Mutex::new(Some(child)),
            stdin: Arc::new(Mutex::new(Some(stdin))),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_thread: Mutex::new(Some(reader_thread)),
            stderr_thread: Mutex::new(stderr_thread),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and await its matching response.
    ///
    /// Remote errors surface as [`Error::External`]; a missing response
    /// within the timeout surfaces as [`Error::Timeout`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Cancelled("JSON-RPC client closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        tracing::debug!(client = %self.name, id, method, "sending MCP request");
        if let Err(e) = self.write_payload(serde_json::to_value(&request)?).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled("JSON-RPC client closed".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout(format!("no response to '{method}'")))
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Cancelled("JSON-RPC client closed".into()));
        }
        let notification = JsonRpcNotification::new(method, params);
        tracing::debug!(client = %self.name, method, "sending MCP notification");
        self.write_payload(serde_json::to_value(&notification)?).await
    }

    async fn write_payload(&self, payload: Value) -> Result<()> {
        let stdin = Arc::clone(&self.stdin);
        tokio::task::spawn_blocking(move || {
            let mut guard = stdin.lock();
            let Some(writer) = guard.as_mut() else {
                return Err(Error::Cancelled("JSON-RPC client closed".into()));
            };
            framing::write_message(writer, &payload)
        })
        .await
        .map_err(|e| Error::Transport(format!("write task failed: {e}")))?
    }

    /// Close the client: reject all pending requests, terminate the child,
    /// and join the reader threads with a short timeout.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        fail_all(&self.pending, || {
            Error::Cancelled("JSON-RPC client closed".into())
        });

        // Dropping stdin signals well-behaved servers to exit.
        self.stdin.lock().take();

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = tokio::time::timeout(
                CLOSE_TIMEOUT,
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = child.kill() {
                        tracing::debug!(error = %e, "child already exited");
                    }
                    let _ = child.wait();
                }),
            )
            .await;
        }

        for slot in [&self.reader_thread, &self.stderr_thread] {
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                let _ = tokio::time::timeout(
                    CLOSE_TIMEOUT,
                    tokio::task::spawn_blocking(move || {
                        let _ = handle.join();
                    }),
                )
                .await;
            }
        }
        tracing::debug!(client = %self.name, "JSON-RPC client closed");
    }
}

fn handle_message(pending: &PendingMap, message: Value) {
    // Notifications from the server are ignored.
    let Some(id) = message.get("id").and_then(Value::as_u64) else {
        return;
    };
    let Some(sender) = pending.lock().remove(&id) else {
        tracing::debug!(id, "response for unknown request id");
        return;
    };

    let outcome = match message.get("error") {
        Some(err) if !err.is_null() => {
            let parsed: JsonRpcError = serde_json::from_value(err.clone()).unwrap_or(JsonRpcError {
                code: -32000,
                message: err.to_string(),
                data: None,
            });
            Err(parsed.into())
        }
        _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = sender.send(outcome);
}

fn fail_all(pending: &PendingMap, make_error: impl Fn() -> Error) {
    let senders: Vec<_> = pending.lock().drain().map(|(_, sender)| sender).collect();
    for sender in senders {
        let _ = sender.send(Err(make_error()));
    }
}
