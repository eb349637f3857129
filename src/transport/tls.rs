//! # TLS Session Layer
//!
//! This file is part of the peer link transport.
//!
//! It defines how one side of a connection negotiates TLS with its peer:
//! which identity it presents, how strictly it checks the peer, and which
//! protocol versions it speaks.
//!
//! Both sides present a self-signed device certificate, so every handshake is
//! mutual. The record layer (cipher negotiation, key exchange, signatures) is
//! delegated entirely to rustls; this module only decides whom to trust.
//!
//! ## Responsibilities
//! - Hold per-side session settings (identity, trust mode, peer name, issuers)
//! - Build rustls client and server configurations from those settings
//! - Run the client or server handshake over a raw TCP stream
//! - Report the peer's certificate once the session is up
//!
//! ## Session confirmation
//! Under TLS 1.3 the client finishes its handshake before the server has
//! judged the client certificate. To keep both ends in agreement, the server
//! sends one confirmation byte as its first application record, and the client
//! reports success only after reading it. A server-side rejection therefore
//! reaches the client as an alert or disconnect and fails its handshake too.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::{ClientConfig, ServerConfig, ServerName, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::{debug, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::identity::{Identity, PeerIdentity};
use crate::transport::trust_store::AcceptedIssuerSet;
use crate::transport::verifier::PeerVerifier;

/// First plaintext byte a server sends once it has accepted the client
pub(crate) const SESSION_CONFIRMATION: u8 = 0x06;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
    /// Both TLS 1.2 and 1.3
    #[default]
    All,
}

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
        static TLS13: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
        static ALL: &[&SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        match self {
            TlsVersion::Tls12 => TLS12,
            TlsVersion::Tls13 => TLS13,
            TlsVersion::All => ALL,
        }
    }
}

/// How one side treats the certificate its peer presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustMode {
    /// The peer certificate must be in the accepted issuer set and name the
    /// expected peer. Anything else fails the handshake.
    #[default]
    Strict,
    /// The peer certificate is requested and recorded but never fails the
    /// handshake. Used for first-contact pairing.
    Opportunistic,
}

/// Which end of the handshake a side plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Settings for one side of a secure session, fixed when the handshake starts.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub(crate) identity: Option<Arc<Identity>>,
    pub(crate) trust_mode: TrustMode,
    pub(crate) peer_verify_name: Option<String>,
    pub(crate) accepted_issuers: AcceptedIssuerSet,
    pub(crate) tls_version: TlsVersion,
}

impl SessionSettings {
    pub fn identity(&self) -> Option<&Arc<Identity>> {
        self.identity.as_ref()
    }

    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    pub fn peer_verify_name(&self) -> Option<&str> {
        self.peer_verify_name.as_deref()
    }

    pub fn accepted_issuers(&self) -> &AcceptedIssuerSet {
        &self.accepted_issuers
    }

    pub fn tls_version(&self) -> TlsVersion {
        self.tls_version
    }

    fn verifier(&self) -> Arc<PeerVerifier> {
        Arc::new(PeerVerifier::new(
            self.trust_mode,
            self.peer_verify_name.clone(),
            self.accepted_issuers.clone(),
        ))
    }

    /// Check that a handshake may start with these settings
    fn require_identity(&self) -> Result<&Arc<Identity>> {
        let identity = self
            .identity
            .as_ref()
            .ok_or(ProtocolError::InvalidState(constants::ERR_NO_IDENTITY))?;
        if self.trust_mode == TrustMode::Strict && self.peer_verify_name.is_none() {
            return Err(ProtocolError::InvalidState(constants::ERR_NO_PEER_NAME));
        }
        Ok(identity)
    }

    /// Build the rustls client configuration
    pub(crate) fn load_client_config(&self) -> Result<ClientConfig> {
        let identity = self.require_identity()?;

        ClientConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(self.tls_version.protocol_versions())
            .map_err(|e| ProtocolError::TlsError(format!("Unsupported TLS versions: {e}")))?
            .with_custom_certificate_verifier(self.verifier())
            .with_client_auth_cert(
                vec![identity.certificate().clone()],
                identity.private_key().clone(),
            )
            .map_err(|e| ProtocolError::TlsError(format!("Failed to set client certificate: {e}")))
    }

    /// Build the rustls server configuration
    pub(crate) fn load_server_config(&self) -> Result<ServerConfig> {
        let identity = self.require_identity()?;

        ServerConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(self.tls_version.protocol_versions())
            .map_err(|e| ProtocolError::TlsError(format!("Unsupported TLS versions: {e}")))?
            .with_client_cert_verifier(self.verifier())
            .with_single_cert(
                vec![identity.certificate().clone()],
                identity.private_key().clone(),
            )
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }
}

/// A handshake whose configuration has been built but which has not touched
/// the socket yet.
pub(crate) enum PreparedHandshake {
    Client(TlsConnector),
    Server(TlsAcceptor),
}

impl PreparedHandshake {
    /// Build the configuration for `role`. Fails without side effects if the
    /// settings are incomplete.
    pub(crate) fn prepare(role: Role, settings: &SessionSettings) -> Result<Self> {
        Ok(match role {
            Role::Client => {
                PreparedHandshake::Client(TlsConnector::from(Arc::new(settings.load_client_config()?)))
            }
            Role::Server => {
                PreparedHandshake::Server(TlsAcceptor::from(Arc::new(settings.load_server_config()?)))
            }
        })
    }

    /// Run the handshake to completion on `stream`.
    ///
    /// The stream is consumed: on failure it is dropped, which closes the
    /// socket and shows the peer a disconnect.
    pub(crate) async fn run(
        self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(TlsStream<TcpStream>, Option<PeerIdentity>)> {
        match self {
            PreparedHandshake::Client(connector) => {
                // Peers are identified by certificate, not DNS name; the
                // verifier ignores this value and no SNI is sent for an IP.
                let server_name = ServerName::IpAddress(peer.ip());
                let mut tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(handshake_failure)?;

                let mut confirmation = [0u8; 1];
                tls_stream
                    .read_exact(&mut confirmation)
                    .await
                    .map_err(handshake_failure)?;
                if confirmation[0] != SESSION_CONFIRMATION {
                    warn!(byte = confirmation[0], "Unexpected session confirmation");
                    return Err(ProtocolError::HandshakeFailure(
                        "Server did not confirm the session".into(),
                    ));
                }

                let peer_identity = first_certificate(tls_stream.get_ref().1.peer_certificates());
                debug!(has_peer_certificate = peer_identity.is_some(), "Client handshake complete");
                Ok((TlsStream::from(tls_stream), peer_identity))
            }
            PreparedHandshake::Server(acceptor) => {
                let mut tls_stream = acceptor.accept(stream).await.map_err(handshake_failure)?;
                tls_stream
                    .write_all(&[SESSION_CONFIRMATION])
                    .await
                    .map_err(handshake_failure)?;
                tls_stream.flush().await.map_err(handshake_failure)?;
                let peer_identity = first_certificate(tls_stream.get_ref().1.peer_certificates());
                debug!(has_peer_certificate = peer_identity.is_some(), "Server handshake complete");
                Ok((TlsStream::from(tls_stream), peer_identity))
            }
        }
    }
}

fn first_certificate(certificates: Option<&[rustls::Certificate]>) -> Option<PeerIdentity> {
    certificates
        .and_then(|chain| chain.first())
        .map(|cert| PeerIdentity::from_certificate(cert.clone()))
}

fn handshake_failure(err: std::io::Error) -> ProtocolError {
    warn!(error = %err, "TLS handshake failed");
    ProtocolError::HandshakeFailure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(name: &str) -> SessionSettings {
        SessionSettings {
            identity: Some(Arc::new(Identity::generate(name).unwrap())),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn test_defaults_are_strict_and_all_versions() {
        let settings = SessionSettings::default();
        assert_eq!(settings.trust_mode(), TrustMode::Strict);
        assert_eq!(settings.tls_version(), TlsVersion::All);
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let settings = SessionSettings::default();
        assert!(matches!(
            settings.load_server_config(),
            Err(ProtocolError::InvalidState(constants::ERR_NO_IDENTITY))
        ));
    }

    #[test]
    fn test_strict_without_peer_name_is_rejected() {
        let settings = settings_for("Test Server");
        assert!(matches!(
            settings.load_client_config(),
            Err(ProtocolError::InvalidState(constants::ERR_NO_PEER_NAME))
        ));
    }

    #[test]
    fn test_configs_build_for_each_version() {
        for version in [TlsVersion::Tls12, TlsVersion::Tls13, TlsVersion::All] {
            let mut settings = settings_for("Test Server");
            settings.trust_mode = TrustMode::Opportunistic;
            settings.tls_version = version;
            assert!(settings.load_client_config().is_ok(), "{version:?}");
            assert!(settings.load_server_config().is_ok(), "{version:?}");
        }
    }

    #[test]
    fn test_tls_version_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            versions: TlsVersion,
        }
        let parsed: Wrapper = toml::from_str("versions = \"tls13\"").unwrap();
        assert_eq!(parsed.versions, TlsVersion::Tls13);
    }
}
