//! # Connection
//!
//! One TCP connection to a peer device, seen two ways:
//!
//! - **Secure session controller**: configure identity and trust, then start
//!   the client or server handshake. Progress is published as a
//!   [`ChannelState`] on a watch channel.
//! - **Byte stream**: `Connection` implements `AsyncRead`/`AsyncWrite`. Before
//!   the handshake bytes pass through in plaintext; afterwards they are
//!   transparently encrypted and decrypted. A
//!   [`LineReader`](crate::core::line_reader::LineReader) layered on top only
//!   ever sees plaintext.
//!
//! Closing is terminal. A failed handshake drops the socket, so the peer
//! observes a disconnect.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use rustls::Certificate;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio_rustls::TlsStream;
use tokio_util::codec::{Encoder, Framed};
use tracing::{debug, info, instrument, warn};

use crate::config::{LinkConfig, TlsConfig};
use crate::core::codec::LineCodec;
use crate::error::{constants, is_disconnect, ProtocolError, Result};
use crate::identity::{Identity, PeerIdentity};
use crate::transport::tls::{PreparedHandshake, Role, SessionSettings, TlsVersion, TrustMode};
use crate::transport::trust_store::AcceptedIssuerSet;
use crate::utils::metrics::{global_metrics, Timer};

/// Lifecycle of a connection's secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Open, plaintext, handshake not started
    Idle,
    /// Handshake in progress
    Handshaking,
    /// Handshake succeeded; traffic is encrypted
    Established,
    /// Handshake failed; the connection has been terminated
    Failed,
    /// Closed locally or by the peer
    Closed,
}

impl ChannelState {
    /// Whether the state is terminal
    pub fn is_closed(self) -> bool {
        matches!(self, ChannelState::Failed | ChannelState::Closed)
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// Moves the channel to `Closed` if a handshake future is dropped before it
/// finishes.
struct HandshakeGuard {
    state: Arc<watch::Sender<ChannelState>>,
    armed: bool,
}

impl HandshakeGuard {
    fn arm(state: Arc<watch::Sender<ChannelState>>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Handshake cancelled; closing connection");
            self.state.send_replace(ChannelState::Closed);
            global_metrics().connection_closed();
        }
    }
}

/// A connection to one peer device.
pub struct Connection {
    transport: Option<Transport>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    settings: SessionSettings,
    peer: Option<PeerIdentity>,
    state: Arc<watch::Sender<ChannelState>>,
}

impl Connection {
    /// Wrap an already connected TCP stream. The connection starts `Idle`.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to disable Nagle's algorithm");
        }
        let (state, _) = watch::channel(ChannelState::Idle);
        global_metrics().connection_established();
        Ok(Self {
            transport: Some(Transport::Plain(stream)),
            peer_addr,
            local_addr,
            settings: SessionSettings::default(),
            peer: None,
            state: Arc::new(state),
        })
    }

    /// Open a plaintext connection to a peer
    #[instrument]
    pub async fn connect<A: ToSocketAddrs + fmt::Debug>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let connection = Self::from_tcp(stream)?;
        debug!(peer = %connection.peer_addr, "Connected");
        Ok(connection)
    }

    /// Open a plaintext connection and apply the link's TLS settings to it
    pub async fn connect_with_config<A: ToSocketAddrs + fmt::Debug>(
        addr: A,
        config: &LinkConfig,
    ) -> Result<Self> {
        config.validate_strict()?;
        let mut connection = Self::connect(addr).await?;
        connection.apply_tls_config(&config.tls);
        Ok(connection)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current channel state
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribe to channel state changes.
    ///
    /// Each peer end publishes its own transitions; no ordering between the two
    /// ends is implied.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Whether the socket is still open
    pub fn is_open(&self) -> bool {
        self.transport.is_some() && !self.state().is_closed()
    }

    /// Whether the handshake completed and traffic is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.state() == ChannelState::Established
            && matches!(self.transport, Some(Transport::Tls(_)))
    }

    /// The peer's identity as seen during the handshake.
    ///
    /// `None` before a handshake, or after an opportunistic handshake where the
    /// peer sent no certificate.
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// The session settings that the next handshake will use
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Set the identity presented to the peer
    pub fn set_local_identity(&mut self, identity: Arc<Identity>) {
        self.settings.identity = Some(identity);
    }

    /// The certificate presented to the peer, if an identity is set
    pub fn local_certificate(&self) -> Option<&Certificate> {
        self.settings.identity.as_ref().map(|i| i.certificate())
    }

    pub fn set_trust_mode(&mut self, mode: TrustMode) {
        self.settings.trust_mode = mode;
    }

    /// Set the name the peer's certificate must carry in strict mode
    pub fn set_peer_verify_name(&mut self, name: impl Into<String>) {
        self.settings.peer_verify_name = Some(name.into());
    }

    pub fn set_tls_version(&mut self, version: TlsVersion) {
        self.settings.tls_version = version;
    }

    /// Take negotiation settings from a [`TlsConfig`]
    pub fn apply_tls_config(&mut self, config: &TlsConfig) {
        self.settings.tls_version = config.versions;
    }

    /// Trust a peer certificate. Returns `false` if it was already trusted.
    pub fn add_accepted_issuer(&mut self, certificate: Certificate) -> bool {
        self.settings.accepted_issuers.insert(certificate)
    }

    pub fn accepted_issuers_mut(&mut self) -> &mut AcceptedIssuerSet {
        &mut self.settings.accepted_issuers
    }

    /// Run the client side of the TLS handshake.
    ///
    /// Completes once the server has confirmed the session, so a rejection by
    /// either end fails both. The peer must start its server handshake for
    /// this to make progress.
    #[instrument(skip(self), fields(peer = %self.peer_addr))]
    pub async fn start_client_encryption(&mut self) -> Result<()> {
        self.start_encryption(Role::Client).await
    }

    /// Run the server side of the TLS handshake.
    #[instrument(skip(self), fields(peer = %self.peer_addr))]
    pub async fn start_server_encryption(&mut self) -> Result<()> {
        self.start_encryption(Role::Server).await
    }

    async fn start_encryption(&mut self, role: Role) -> Result<()> {
        match self.state() {
            ChannelState::Idle => {}
            ChannelState::Established => {
                return Err(ProtocolError::InvalidState(constants::ERR_ALREADY_ENCRYPTED))
            }
            ChannelState::Failed | ChannelState::Closed => {
                return Err(ProtocolError::ConnectionClosed)
            }
            ChannelState::Handshaking => {
                return Err(ProtocolError::InvalidState(constants::ERR_NOT_IDLE))
            }
        }

        let handshake = PreparedHandshake::prepare(role, &self.settings)?;

        let stream = match self.transport.take() {
            Some(Transport::Plain(stream)) => stream,
            Some(other) => {
                self.transport = Some(other);
                return Err(ProtocolError::InvalidState(constants::ERR_ALREADY_ENCRYPTED));
            }
            None => return Err(ProtocolError::ConnectionClosed),
        };

        debug!(?role, trust_mode = ?self.settings.trust_mode, "Starting TLS handshake");
        self.state.send_replace(ChannelState::Handshaking);
        global_metrics().handshake_attempt();

        let guard = HandshakeGuard::arm(self.state.clone());
        let outcome = {
            let _timer = Timer::start("tls_handshake");
            handshake.run(stream, self.peer_addr).await
        };
        guard.disarm();

        match outcome {
            Ok((tls_stream, peer)) => {
                self.transport = Some(Transport::Tls(Box::new(tls_stream)));
                info!(
                    ?role,
                    peer_name = ?peer.as_ref().and_then(|p| p.name()),
                    "Secure channel established"
                );
                self.peer = peer;
                self.state.send_replace(ChannelState::Established);
                global_metrics().handshake_success();
                Ok(())
            }
            Err(e) => {
                self.peer = None;
                self.state.send_replace(ChannelState::Failed);
                global_metrics().handshake_failed();
                global_metrics().connection_closed();
                Err(e)
            }
        }
    }

    /// Write one frame followed by the delimiter, and flush.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(frame.len() + 1);
        LineCodec::new().encode(frame, &mut buf)?;
        self.write_all(&buf).await.map_err(ProtocolError::from_io)?;
        self.flush().await.map_err(ProtocolError::from_io)?;
        global_metrics().frame_sent(buf.len() as u64);
        Ok(())
    }

    /// Wrap the connection in a framed sink/stream of lines
    pub fn into_framed(self) -> Framed<Self, LineCodec> {
        Framed::new(self, LineCodec::new())
    }

    /// Shut the connection down. Idempotent.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.shutdown().await {
                debug!(error = %e, "Shutdown on close failed");
            }
        }
        self.mark_closed();
    }

    /// Drop the socket and publish the terminal state.
    fn mark_closed(&mut self) {
        if self.transport.take().is_some() {
            global_metrics().connection_closed();
            if self.state() != ChannelState::Failed {
                self.state.send_replace(ChannelState::Closed);
            }
            debug!(peer = %self.peer_addr, "Connection closed");
        }
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, constants::ERR_CONNECTION_CLOSED)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("encrypted", &self.is_encrypted())
            .field("peer", &self.peer.as_ref().and_then(|p| p.name()))
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(transport) = this.transport.as_mut() else {
            return Poll::Ready(Err(Self::closed_error()));
        };

        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        match Pin::new(transport).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if wanted && buf.filled().len() == before {
                    debug!(peer = %this.peer_addr, "Peer closed the connection");
                    this.mark_closed();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                if !is_disconnect(&e) {
                    warn!(peer = %this.peer_addr, error = %e, "Read failed");
                    global_metrics().connection_error();
                }
                this.mark_closed();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(transport) = this.transport.as_mut() else {
            return Poll::Ready(Err(Self::closed_error()));
        };
        match Pin::new(transport).poll_write(cx, buf) {
            Poll::Ready(Err(e)) => {
                this.mark_closed();
                Poll::Ready(Err(e))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(transport) = this.transport.as_mut() else {
            return Poll::Ready(Err(Self::closed_error()));
        };
        match Pin::new(transport).poll_flush(cx) {
            Poll::Ready(Err(e)) => {
                this.mark_closed();
                Poll::Ready(Err(e))
            }
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(transport) = this.transport.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(transport).poll_shutdown(cx) {
            Poll::Ready(result) => {
                this.mark_closed();
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
