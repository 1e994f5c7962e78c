//! Framed I/O, the handshake, and the multiplexing [`Connection`].
//!
//! A connection owns one negotiated stream. Outgoing requests get an id from a
//! per-connection counter and park a oneshot sender in the pending map; the
//! reader task completes it when the matching response arrives. Any number of
//! requests may be outstanding and responses may arrive in any order.

use crate::message::*;
use crate::transport::AsyncStream;
use ferron_types::error::{ErrorKind, FerronError, RemoteError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Protocol negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("Response timeout {0}ms exceeded")]
    Timeout(u64),
}

impl From<WireError> for FerronError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ConnectionClosed => FerronError::PeerGone("connection closed".into()),
            WireError::Timeout(ms) => FerronError::Timeout(ms),
            WireError::Json(e) => FerronError::Serialization(e.to_string()),
            other => FerronError::Connection(other.to_string()),
        }
    }
}

/// Write one frame (4-byte length + JSON).
pub async fn write_frame<W, T>(writer: &mut W, body: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let bytes = encode_frame(body)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, rejecting bodies larger than `max_size`.
pub async fn read_frame<R, T>(reader: &mut R, max_size: u32) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let body = read_body(reader, max_size).await?;
    Ok(decode_frame(&body)?)
}

async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, max_size: u32) -> Result<Vec<u8>, WireError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write a framed message.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &WireMessage,
) -> Result<(), WireError> {
    write_frame(writer, msg).await
}

/// Read a framed message.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: u32,
) -> Result<WireMessage, WireError> {
    let body = read_body(reader, max_size).await?;
    Ok(decode_message(&body)?)
}

fn check_version(remote: &Hello) -> Result<(), WireError> {
    if remote.protocol_version != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: remote.protocol_version,
        });
    }
    Ok(())
}

/// Dialer side of the handshake: send our hello, return the listener's.
pub async fn handshake_outbound<S>(
    stream: &mut S,
    local: Hello,
    max_size: u32,
) -> Result<Hello, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = WireMessage {
        id: 0,
        kind: WireMessageKind::Request(WireRequest::Handshake(local)),
    };
    write_message(stream, &handshake).await?;

    let response = read_message(stream, max_size).await?;
    match response.kind {
        WireMessageKind::Response(WireResponse::HandshakeAck(remote)) => {
            check_version(&remote)?;
            Ok(remote)
        }
        WireMessageKind::Response(WireResponse::Error { error }) => Err(
            WireError::HandshakeFailed(format!("remote refused: {}", error.message)),
        ),
        _ => Err(WireError::HandshakeFailed(
            "Unexpected response to handshake".to_string(),
        )),
    }
}

/// Listener side of the handshake: wait for the dialer's hello, answer with ours.
pub async fn handshake_inbound<S>(
    stream: &mut S,
    local: Hello,
    max_size: u32,
) -> Result<Hello, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = read_message(stream, max_size).await?;
    let remote = match msg.kind {
        WireMessageKind::Request(WireRequest::Handshake(remote)) => remote,
        _ => {
            return Err(WireError::HandshakeFailed(
                "Expected handshake as first message".to_string(),
            ));
        }
    };

    if let Err(e) = check_version(&remote) {
        let refusal = WireMessage {
            id: msg.id,
            kind: WireMessageKind::Response(WireResponse::Error {
                error: RemoteError {
                    kind: ErrorKind::Internal,
                    message: e.to_string(),
                    def_id: None,
                },
            }),
        };
        // The dialer learns the reason if it is still listening.
        let _ = write_message(stream, &refusal).await;
        return Err(e);
    }

    let ack = WireMessage {
        id: msg.id,
        kind: WireMessageKind::Response(WireResponse::HandshakeAck(local)),
    };
    write_message(stream, &ack).await?;
    Ok(remote)
}

/// Traffic delivered to the owner of a connection.
#[derive(Debug)]
pub enum Inbound {
    /// A request to be answered with [`Connection::respond`].
    Request { id: u64, request: WireRequest },
    Notification(WireNotification),
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

type PendingSender = oneshot::Sender<Result<WireResponse, WireError>>;

/// One established, multiplexed peer connection.
pub struct Connection {
    peer_id: String,
    max_size: u32,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingSender>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Take ownership of a handshaken stream and start its reader and writer
    /// tasks. Inbound requests and notifications arrive on the returned
    /// receiver, which ends when the connection closes.
    pub fn spawn<S: AsyncStream>(
        stream: S,
        peer_id: impl Into<String>,
        max_size: u32,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            peer_id: peer_id.into(),
            max_size,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound: out_tx,
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let writer_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                match out {
                    Outbound::Frame(bytes) => {
                        let written = async {
                            writer.write_all(&bytes).await?;
                            writer.flush().await
                        }
                        .await;
                        if let Err(e) = written {
                            debug!(peer = %writer_conn.peer_id, error = %e, "Write failed");
                            writer_conn.fail_all();
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        let reader_conn = Arc::clone(&conn);
        let handle = tokio::spawn(async move {
            loop {
                let body = match read_body(&mut reader, reader_conn.max_size).await {
                    Ok(b) => b,
                    Err(WireError::ConnectionClosed) => break,
                    Err(e) => {
                        debug!(peer = %reader_conn.peer_id, error = %e, "Connection ended");
                        break;
                    }
                };
                let msg = match decode_message(&body) {
                    Ok(m) => m,
                    Err(e) => {
                        if reader_conn.reject_malformed(&body, e) {
                            continue;
                        }
                        break;
                    }
                };
                match msg.kind {
                    WireMessageKind::Response(response) => {
                        let waiter = reader_conn.pending_lock().remove(&msg.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Ok(response));
                            }
                            None => warn!(
                                peer = %reader_conn.peer_id,
                                id = msg.id,
                                "Dropping response with no pending request"
                            ),
                        }
                    }
                    WireMessageKind::Request(request) => {
                        if in_tx.send(Inbound::Request { id: msg.id, request }).is_err() {
                            break;
                        }
                    }
                    WireMessageKind::Notification(n) => {
                        if in_tx.send(Inbound::Notification(n)).is_err() {
                            break;
                        }
                    }
                }
            }
            reader_conn.fail_all();
            let _ = reader_conn.outbound.send(Outbound::Close);
        });
        *conn.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        (conn, in_rx)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }

    /// Send a request and wait up to `timeout` for its response.
    pub async fn request(
        &self,
        request: WireRequest,
        timeout: Duration,
    ) -> Result<WireResponse, WireError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_lock().insert(id, tx);
        // `fail_all` flips `closed` before draining, so a request inserted
        // concurrently with teardown is caught here.
        if self.is_closed() {
            self.pending_lock().remove(&id);
            return Err(WireError::ConnectionClosed);
        }

        let msg = WireMessage {
            id,
            kind: WireMessageKind::Request(request),
        };
        if let Err(e) = self.send(&msg) {
            self.pending_lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WireError::ConnectionClosed),
            Err(_) => {
                self.pending_lock().remove(&id);
                Err(WireError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Answer the inbound request `id`.
    pub fn respond(&self, id: u64, response: WireResponse) -> Result<(), WireError> {
        self.send(&WireMessage {
            id,
            kind: WireMessageKind::Response(response),
        })
    }

    /// Send a one-way notification.
    pub fn notify(&self, notification: WireNotification) -> Result<(), WireError> {
        self.send(&WireMessage {
            id: 0,
            kind: WireMessageKind::Notification(notification),
        })
    }

    /// Flush queued frames, shut the stream down, and fail everything pending.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.drain_pending();
        let _ = self.outbound.send(Outbound::Close);
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
    }

    fn send(&self, msg: &WireMessage) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        let bytes = encode_message(msg)?;
        let size = (bytes.len() - 4) as u32;
        if size > self.max_size {
            return Err(WireError::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.outbound
            .send(Outbound::Frame(bytes))
            .map_err(|_| WireError::ConnectionClosed)
    }

    /// Fail the single exchange a malformed frame belongs to. Returns false
    /// when the frame is too broken to attribute, which ends the connection.
    fn reject_malformed(&self, body: &[u8], err: serde_json::Error) -> bool {
        let header = match decode_header(body) {
            Ok(h) => h,
            Err(_) => {
                warn!(peer = %self.peer_id, error = %err, "Unreadable frame");
                return false;
            }
        };
        warn!(
            peer = %self.peer_id,
            id = header.id,
            kind = %header.kind,
            error = %err,
            "Malformed frame"
        );
        match header.kind.as_str() {
            "response" => {
                if let Some(tx) = self.pending_lock().remove(&header.id) {
                    let _ = tx.send(Err(WireError::Json(err)));
                }
            }
            "request" => {
                let refusal = WireResponse::Error {
                    error: RemoteError {
                        kind: ErrorKind::Serialization,
                        message: format!("malformed request: {err}"),
                        def_id: None,
                    },
                };
                if let Err(e) = self.respond(header.id, refusal) {
                    debug!(peer = %self.peer_id, error = %e, "Could not refuse request");
                }
            }
            _ => {}
        }
        true
    }

    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.drain_pending();
    }

    fn drain_pending(&self) {
        let drained: Vec<PendingSender> = self.pending_lock().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(WireError::ConnectionClosed));
        }
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingSender>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish()
    }
}
