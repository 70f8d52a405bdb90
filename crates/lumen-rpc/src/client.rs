//! Async JSON-RPC client over a Unix socket.
//!
//! Responses are matched to requests by id. Anything else the peer sends
//! (requests and notifications) is queued for [`RpcClient::recv`]. When the
//! peer goes away, pending requests fail with [`Error::ConnectionClosed`] and
//! `recv` returns `None`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Message, Notification, Request, RequestId, Response};
use crate::transport::JsonRpcCodec;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `$XDG_RUNTIME_DIR`, or the temp dir when unset
#[must_use]
pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(|_| std::env::temp_dir(), PathBuf::from)
}

/// Control socket served by `lumen-daemon`
#[must_use]
pub fn control_socket_path() -> PathBuf {
    runtime_dir().join("lumen.sock")
}

/// Socket a `socket`-handler plugin is told to listen on
#[must_use]
pub fn plugin_socket_path(plugin_id: &str) -> PathBuf {
    runtime_dir().join(format!("lumen-plugin-{plugin_id}.sock"))
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Response>>>>>;
type FramedSink = SplitSink<Framed<UnixStream, JsonRpcCodec>, Message>;

pub struct RpcClient {
    sink: Arc<Mutex<FramedSink>>,
    incoming_rx: mpsc::Receiver<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Connect to a socket path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the socket connection fails.
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        debug!("Connected to {}", path.display());
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        let (sink, mut stream) = Framed::new(stream, JsonRpcCodec::new()).split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Response(resp)) => {
                        if let Some(tx) = reader_pending.lock().await.remove(&resp.id) {
                            let _ = tx.send(Ok(resp));
                        } else {
                            trace!("Dropping response for unknown id {}", resp.id);
                        }
                    }
                    Ok(msg) => {
                        if incoming_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
        });

        Self {
            sink: Arc::new(Mutex::new(sink)),
            incoming_rx,
            pending,
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            reader,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and decode its result.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails, the peer answers with an error, the
    /// connection closes, the timeout elapses, or the result does not decode.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T> {
        let value = self.request_value(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request and return its raw result.
    ///
    /// # Errors
    ///
    /// Same as [`RpcClient::request`], minus decoding.
    pub async fn request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = Request::new(method, params, id.clone());
        if let Err(e) = self.sink.lock().await.send(Message::Request(request)).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(error.into());
        }
        response.result.ok_or(Error::UnexpectedResponse)
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` if the frame cannot be written.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notification = Notification::new(method, params);
        self.sink
            .lock()
            .await
            .send(Message::Notification(notification))
            .await?;
        Ok(())
    }

    /// Next request or notification from the peer. `None` once disconnected.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming_rx.recv().await
    }
}

impl Drop for RpcClient {
    /// The reader task owns the read half; stopping it closes the socket
    fn drop(&mut self) {
        self.reader.abort();
    }
}
