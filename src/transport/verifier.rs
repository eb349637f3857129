//! Peer certificate verification for both handshake roles.
//!
//! Device certificates are self-signed, so chain building against a CA store
//! does not apply. Instead:
//!
//! - [`TrustMode::Strict`]: the presented certificate must be pinned in the
//!   accepted issuer set, be inside its validity window, and carry the
//!   expected peer name as its common name.
//! - [`TrustMode::Opportunistic`]: any certificate is accepted. The handshake
//!   signature is still checked, so the peer proves possession of the key.

use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::server::{ClientCertVerified, ClientCertVerifier};
use rustls::{Certificate, CertificateError, DistinguishedName, Error as TlsError, ServerName};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::identity::{CertificateDetails, Fingerprint};
use crate::transport::tls::TrustMode;
use crate::transport::trust_store::AcceptedIssuerSet;

/// Verifier installed on one side of a connection
#[derive(Debug)]
pub(crate) struct PeerVerifier {
    mode: TrustMode,
    expected_name: Option<String>,
    issuers: AcceptedIssuerSet,
}

impl PeerVerifier {
    pub(crate) fn new(
        mode: TrustMode,
        expected_name: Option<String>,
        issuers: AcceptedIssuerSet,
    ) -> Self {
        Self {
            mode,
            expected_name,
            issuers,
        }
    }

    fn verify_peer(&self, end_entity: &Certificate, now: SystemTime) -> Result<(), TlsError> {
        let fingerprint = Fingerprint::of(end_entity);

        if self.mode == TrustMode::Opportunistic {
            debug!(%fingerprint, "Peer certificate accepted without verification");
            return Ok(());
        }

        if !self.issuers.contains(&fingerprint) {
            warn!(%fingerprint, "Peer certificate is not in the accepted issuer set");
            return Err(TlsError::InvalidCertificate(CertificateError::UnknownIssuer));
        }

        let details = CertificateDetails::parse(&end_entity.0)
            .map_err(|_| TlsError::InvalidCertificate(CertificateError::BadEncoding))?;

        let now = OffsetDateTime::from(now);
        if now < details.not_before {
            warn!(%fingerprint, "Peer certificate is not valid yet");
            return Err(TlsError::InvalidCertificate(CertificateError::NotValidYet));
        }
        if !details.is_valid_at(now) {
            warn!(%fingerprint, "Peer certificate has expired");
            return Err(TlsError::InvalidCertificate(CertificateError::Expired));
        }

        let presented = details.common_name.as_deref();
        if presented.is_none() || presented != self.expected_name.as_deref() {
            warn!(
                %fingerprint,
                presented = ?presented,
                expected = ?self.expected_name,
                "Peer name mismatch"
            );
            return Err(TlsError::InvalidCertificate(
                CertificateError::NotValidForName,
            ));
        }

        debug!(%fingerprint, peer = ?presented, "Peer certificate verified");
        Ok(())
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        self.verify_peer(end_entity, now)?;
        Ok(ServerCertVerified::assertion())
    }
}

impl ClientCertVerifier for PeerVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mode == TrustMode::Strict
    }

    fn client_auth_root_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        now: SystemTime,
    ) -> Result<ClientCertVerified, TlsError> {
        self.verify_peer(end_entity, now)?;
        Ok(ClientCertVerified::assertion())
    }
}
