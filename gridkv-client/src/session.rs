//! A single multiplexed session to one cluster node.
//!
//! A session owns the socket, performs the handshake, and correlates
//! concurrent requests with responses by request id. Reads run on a
//! dedicated pump task; writes are serialized through a mutex over the write
//! half. Requests may complete out of submission order.
//!
//! The session reports events upward through [`SessionObserver`] rather than
//! holding a reference to its owner: topology-change notifications are
//! raised *before* the response that carried them is delivered, and a dying
//! socket raises `on_session_closed` exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

use gridkv_core::error::{GridError, Result};
use gridkv_core::protocol::constants::{
    FEATURE_PARTITION_AWARENESS, FLAG_TOPOLOGY_CHANGED, STATUS_AUTH_FAILED, STATUS_SUCCESS,
};
use gridkv_core::protocol::frame;
use gridkv_core::protocol::handshake::{
    HandshakeRequest, HandshakeResponse, ProtocolVersion, SUPPORTED_VERSIONS, VERSION_1_7_0,
};
use gridkv_core::{AffinityTopologyVersion, BinaryReader, BinaryWriter};

use crate::config::ClientConfig;

/// Unique identifier for a session within a client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Callbacks a session raises into its owner.
///
/// Implementations must be cheap and non-blocking; both callbacks run on the
/// session's read pump.
pub trait SessionObserver: Send + Sync {
    /// A response frame carried a new affinity topology version. Raised
    /// before that frame's response body is delivered to its caller.
    fn on_topology_changed(&self, version: AffinityTopologyVersion);

    /// The session's socket died. Not raised on an explicit [`NodeSession::close`].
    fn on_session_closed(&self, id: SessionId);
}

trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;
type PendingSlot = oneshot::Sender<Result<Bytes>>;

struct Negotiated {
    node_id: Option<Uuid>,
    version: ProtocolVersion,
    partition_aware: bool,
}

/// One connection to one cluster node, multiplexing concurrent requests.
pub struct NodeSession {
    id: SessionId,
    endpoint: String,
    node_id: Option<Uuid>,
    protocol_version: ProtocolVersion,
    partition_aware: bool,
    next_request_id: AtomicI64,
    /// `None` once the session is closed; new requests then fail fast.
    pending: Mutex<Option<HashMap<i64, PendingSlot>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    closed: AtomicBool,
    observer: Arc<dyn SessionObserver>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("node_id", &self.node_id)
            .field("protocol_version", &self.protocol_version)
            .field("partition_aware", &self.partition_aware)
            .finish()
    }
}

impl NodeSession {
    /// Opens a session: TCP/TLS connect, handshake, read pump.
    ///
    /// Fails with `ConnectionFailed` if the socket will not open or the
    /// handshake does not complete within the configured timeout,
    /// `HandshakeFailed` if negotiation is rejected, and `AuthFailed` on bad
    /// credentials.
    pub async fn open(
        endpoint: &str,
        config: &ClientConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<Self>> {
        let mut stream = connect_transport(endpoint, config).await?;

        let negotiated = timeout(
            config.handshake_timeout(),
            negotiate(&mut stream, endpoint, config),
        )
        .await
        .map_err(|_| {
            GridError::ConnectionFailed(format!(
                "handshake with {} timed out after {:?}",
                endpoint,
                config.handshake_timeout()
            ))
        })??;

        let (read_half, write_half) = tokio::io::split(stream);

        let session = Arc::new(Self {
            id: SessionId::next(),
            endpoint: endpoint.to_string(),
            node_id: negotiated.node_id,
            protocol_version: negotiated.version,
            partition_aware: negotiated.partition_aware,
            next_request_id: AtomicI64::new(1),
            pending: Mutex::new(Some(HashMap::new())),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            closed: AtomicBool::new(false),
            observer,
            pump: Mutex::new(None),
        });

        let handle = tokio::spawn(read_pump(Arc::clone(&session), read_half));
        *session.pump.lock().expect("pump slot poisoned") = Some(handle);

        tracing::debug!(
            id = %session.id,
            endpoint = %session.endpoint,
            node_id = ?session.node_id,
            version = %session.protocol_version,
            partition_aware = session.partition_aware,
            "session established"
        );

        Ok(session)
    }

    /// Returns the session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the endpoint this session is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the node id reported during the handshake, if any.
    ///
    /// A session without a node id is the legacy session and is excluded
    /// from affinity routing.
    pub fn node_id(&self) -> Option<Uuid> {
        self.node_id
    }

    /// Returns the negotiated protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Returns `true` if partition awareness was granted on this session.
    pub fn partition_aware(&self) -> bool {
        self.partition_aware
    }

    /// Sends one request and yields until its response arrives.
    ///
    /// `write_payload` fills the request body; `read_payload` consumes the
    /// response body after a zero status. A non-zero status fails with
    /// `Operation`; socket death while the request is outstanding fails with
    /// `LostConnection`.
    pub async fn send_request<T, W, R>(
        &self,
        op_code: i16,
        write_payload: W,
        read_payload: R,
    ) -> Result<T>
    where
        W: FnOnce(&mut BinaryWriter) -> Result<()>,
        R: FnOnce(&mut BinaryReader) -> Result<T>,
    {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        let mut payload = BinaryWriter::new();
        write_payload(&mut payload)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending table poisoned");
            match pending.as_mut() {
                Some(slots) => {
                    slots.insert(request_id, tx);
                }
                None => {
                    return Err(GridError::LostConnection(format!(
                        "session to {} is closed",
                        self.endpoint
                    )))
                }
            }
        }

        let mut framed = BytesMut::new();
        frame::write_request(&mut framed, op_code, request_id, payload.as_slice());

        {
            let mut writer = self.writer.lock().await;
            let write_result = match writer.as_mut() {
                Some(w) => w.write_all(&framed).await,
                None => {
                    drop(writer);
                    self.take_slot(request_id);
                    return Err(GridError::LostConnection(format!(
                        "session to {} is closed",
                        self.endpoint
                    )));
                }
            };
            if let Err(e) = write_result {
                drop(writer);
                self.take_slot(request_id);
                return Err(GridError::LostConnection(format!(
                    "write to {} failed: {}",
                    self.endpoint, e
                )));
            }
        }

        tracing::trace!(
            id = %self.id,
            op_code,
            request_id,
            "request written"
        );

        let body = rx.await.map_err(|_| {
            GridError::LostConnection(format!("session to {} closed", self.endpoint))
        })??;

        let mut r = BinaryReader::new(body);
        let status = r.read_i32()?;
        if status != STATUS_SUCCESS {
            let message = r
                .read_string()
                .unwrap_or_else(|_| "unknown server error".to_string());
            return Err(GridError::Operation {
                code: status,
                message,
            });
        }
        read_payload(&mut r)
    }

    /// Closes the session: stops the pump, fails every pending request with
    /// `LostConnection`, and shuts the socket down.
    ///
    /// Idempotent; an explicit close does not raise `on_session_closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.pump.lock().expect("pump slot poisoned").take() {
            handle.abort();
        }
        self.fail_pending("session closed");

        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }

        tracing::debug!(id = %self.id, endpoint = %self.endpoint, "session closed");
    }

    fn take_slot(&self, request_id: i64) -> Option<PendingSlot> {
        self.pending
            .lock()
            .expect("pending table poisoned")
            .as_mut()
            .and_then(|slots| slots.remove(&request_id))
    }

    fn fail_pending(&self, reason: &str) {
        let slots = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .take();
        if let Some(slots) = slots {
            for (_, tx) in slots {
                let _ = tx.send(Err(GridError::LostConnection(format!(
                    "{} ({})",
                    reason, self.endpoint
                ))));
            }
        }
    }

    /// Handles one de-framed response: correlates it by request id, raising
    /// any piggybacked topology notification first.
    fn dispatch_response(&self, payload: Bytes) -> Result<()> {
        let mut r = BinaryReader::new(payload);
        let request_id = r.read_i64()?;

        if self.partition_aware {
            let flags = r.read_i16()?;
            if flags & FLAG_TOPOLOGY_CHANGED != 0 {
                let version = AffinityTopologyVersion::new(r.read_i64()?, r.read_i32()?);
                self.observer.on_topology_changed(version);
            }
        }

        match self.take_slot(request_id) {
            Some(tx) => {
                let _ = tx.send(Ok(r.into_remaining()));
            }
            None => {
                tracing::debug!(
                    id = %self.id,
                    request_id,
                    "response for unknown request id dropped"
                );
            }
        }
        Ok(())
    }
}

async fn read_pump(session: Arc<NodeSession>, mut read_half: ReadHalf<BoxedStream>) {
    let mut buf = BytesMut::with_capacity(8192);
    let reason = loop {
        while let Some(payload) = frame::read_frame(&mut buf) {
            if let Err(e) = session.dispatch_response(payload.freeze()) {
                tracing::warn!(
                    id = %session.id,
                    error = %e,
                    "malformed response frame dropped"
                );
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => break "connection closed by peer".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read failed: {}", e),
        }
    };

    tracing::debug!(id = %session.id, endpoint = %session.endpoint, reason = %reason, "read pump stopped");
    session.fail_pending(&reason);

    if !session.closed.swap(true, Ordering::SeqCst) {
        session.observer.on_session_closed(session.id);
    }
}

async fn connect_transport(endpoint: &str, config: &ClientConfig) -> Result<BoxedStream> {
    let stream = TcpStream::connect(endpoint).await.map_err(|e| {
        GridError::ConnectionFailed(format!("failed to connect to {}: {}", endpoint, e))
    })?;
    stream.set_nodelay(true).map_err(|e| {
        GridError::ConnectionFailed(format!("failed to set TCP_NODELAY on {}: {}", endpoint, e))
    })?;

    if config.use_tls() {
        #[cfg(feature = "tls")]
        {
            let tls_stream = tls::wrap(stream, endpoint, config.tls()).await?;
            return Ok(Box::new(tls_stream));
        }
        #[cfg(not(feature = "tls"))]
        {
            return Err(GridError::IllegalArgument(
                "TLS requested but the client was built without the 'tls' feature".to_string(),
            ));
        }
    }

    Ok(Box::new(stream))
}

async fn negotiate(
    stream: &mut BoxedStream,
    endpoint: &str,
    config: &ClientConfig,
) -> Result<Negotiated> {
    let mut version = VERSION_1_7_0;
    let mut retried = false;

    loop {
        let requested_features =
            if config.partition_awareness() && version.supports_partition_awareness() {
                FEATURE_PARTITION_AWARENESS
            } else {
                0
            };

        let request = HandshakeRequest {
            version,
            features: requested_features,
            username: config.username().map(str::to_string),
            password: config.password().map(str::to_string),
        };
        stream.write_all(&request.encode()).await.map_err(|e| {
            GridError::ConnectionFailed(format!("handshake write to {} failed: {}", endpoint, e))
        })?;

        let payload = read_one_frame(stream, endpoint).await?;
        match HandshakeResponse::decode(payload, version)? {
            HandshakeResponse::Accepted { features, node_id } => {
                return Ok(Negotiated {
                    node_id,
                    version,
                    partition_aware: requested_features & features & FEATURE_PARTITION_AWARENESS
                        != 0,
                });
            }
            HandshakeResponse::Rejected {
                server_version,
                message,
                code,
            } => {
                if code == STATUS_AUTH_FAILED {
                    return Err(GridError::AuthFailed(message));
                }
                if !retried
                    && server_version < version
                    && SUPPORTED_VERSIONS.contains(&server_version)
                {
                    tracing::debug!(
                        endpoint,
                        proposed = %version,
                        server = %server_version,
                        "retrying handshake at the server's protocol version"
                    );
                    version = server_version;
                    retried = true;
                    continue;
                }
                return Err(GridError::HandshakeFailed(format!(
                    "server at {} rejected protocol {}: {}",
                    endpoint, version, message
                )));
            }
        }
    }
}

async fn read_one_frame(stream: &mut BoxedStream, endpoint: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    loop {
        if let Some(payload) = frame::read_frame(&mut buf) {
            return Ok(payload.freeze());
        }
        let n = stream.read_buf(&mut buf).await.map_err(|e| {
            GridError::ConnectionFailed(format!("handshake read from {} failed: {}", endpoint, e))
        })?;
        if n == 0 {
            return Err(GridError::ConnectionFailed(format!(
                "{} closed the connection during the handshake",
                endpoint
            )));
        }
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig as RustlsConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    use gridkv_core::error::{GridError, Result};

    use crate::config::TlsConfig;

    pub(super) async fn wrap(
        stream: TcpStream,
        endpoint: &str,
        tls: &TlsConfig,
    ) -> Result<TlsStream<TcpStream>> {
        let ca_path = tls.ca_cert().ok_or_else(|| {
            GridError::IllegalArgument(
                "TLS requires a CA certificate path in the TLS configuration".to_string(),
            )
        })?;

        let pem = std::fs::read(ca_path).map_err(|e| {
            GridError::ConnectionFailed(format!(
                "failed to read CA certificates from {}: {}",
                ca_path.display(),
                e
            ))
        })?;

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                GridError::ConnectionFailed(format!("invalid CA certificate: {}", e))
            })?;
            roots.add(cert).map_err(|e| {
                GridError::ConnectionFailed(format!("rejected CA certificate: {}", e))
            })?;
        }

        let config = RustlsConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let host = tls
            .sni_override()
            .map(str::to_string)
            .or_else(|| endpoint.rsplit_once(':').map(|(h, _)| h.to_string()))
            .unwrap_or_else(|| endpoint.to_string());
        let server_name = ServerName::try_from(host.clone()).map_err(|e| {
            GridError::ConnectionFailed(format!("invalid TLS server name '{}': {}", host, e))
        })?;

        connector
            .connect(server_name, stream)
            .await
            .map_err(|e| GridError::ConnectionFailed(format!("TLS handshake failed: {}", e)))
    }
}
