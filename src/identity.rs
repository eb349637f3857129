//! # Device Identity
//!
//! Self-issued device identities and the peer identity observed after a
//! handshake.
//!
//! Every device owns one [`Identity`]: a private key and a self-signed
//! certificate whose common name is the human-readable device name. There is
//! no shared certificate authority; trust is established by exchanging
//! certificates out of band and pinning them in an
//! [`AcceptedIssuerSet`](crate::transport::trust_store::AcceptedIssuerSet).
//!
//! Persisting identities is left to the caller. [`Identity::certificate_pem`],
//! [`Identity::private_key_pem`] and [`Identity::from_pem`] provide the
//! round trip.

use std::fmt;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use rustls::{Certificate, PrivateKey};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use x509_parser::parse_x509_certificate;
use zeroize::Zeroize;

use crate::config::IdentityConfig;
use crate::error::{constants, ProtocolError, Result};

/// SHA-256 fingerprint of a DER-encoded certificate
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a certificate
    pub fn of(cert: &Certificate) -> Self {
        Self::of_der(&cert.0)
    }

    /// Fingerprint of raw DER bytes
    pub fn of_der(der: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(der);
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Fields read back out of a certificate
#[derive(Debug, Clone)]
pub(crate) struct CertificateDetails {
    pub(crate) common_name: Option<String>,
    pub(crate) not_before: OffsetDateTime,
    pub(crate) not_after: OffsetDateTime,
}

impl CertificateDetails {
    pub(crate) fn parse(der: &[u8]) -> Result<Self> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| ProtocolError::IdentityError(format!("Failed to parse certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_owned);

        let validity = cert.validity();
        Ok(Self {
            common_name,
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
        })
    }

    pub(crate) fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// A device's own key pair and self-signed certificate.
pub struct Identity {
    name: String,
    certificate: Certificate,
    private_key: PrivateKey,
    certificate_pem: String,
    private_key_pem: String,
    fingerprint: Fingerprint,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl Identity {
    /// Generate a fresh identity for `device_name` with default settings
    /// (ten year validity).
    pub fn generate(device_name: &str) -> Result<Self> {
        Self::generate_with(&IdentityConfig::default(), device_name)
    }

    /// Generate a fresh identity for `device_name`.
    ///
    /// The certificate's common name is the device name; organization and
    /// organizational unit come from `config`. Validity starts now and lasts
    /// `config.validity_days`.
    #[instrument(skip(config))]
    pub fn generate_with(config: &IdentityConfig, device_name: &str) -> Result<Self> {
        if device_name.trim().is_empty() {
            return Err(ProtocolError::IdentityError(
                constants::ERR_EMPTY_DEVICE_NAME.into(),
            ));
        }

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(identity_error)?;

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, device_name);
        subject.push(DnType::OrganizationName, config.organization.as_str());
        if !config.organizational_unit.is_empty() {
            subject.push(
                DnType::OrganizationalUnitName,
                config.organizational_unit.as_str(),
            );
        }
        params.distinguished_name = subject;

        let mut serial = rand::random::<u64>().to_be_bytes();
        serial[0] &= 0x7f;
        params.serial_number = Some(SerialNumber::from(serial.to_vec()));

        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + time::Duration::days(i64::from(config.validity_days));
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(identity_error)?;
        let cert = params.self_signed(&key_pair).map_err(identity_error)?;

        let certificate = Certificate(cert.der().to_vec());
        let fingerprint = Fingerprint::of(&certificate);
        debug!(%fingerprint, "Generated self-signed identity");

        Ok(Self {
            name: device_name.to_owned(),
            certificate,
            private_key: PrivateKey(key_pair.serialize_der()),
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
            fingerprint,
            not_before,
            not_after,
        })
    }

    /// Rebuild an identity from a PEM certificate and a PEM PKCS8 private key.
    ///
    /// The device name is read from the certificate's common name.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let cert_der = certs(&mut certificate_pem.as_bytes())
            .map_err(|_| ProtocolError::IdentityError("Failed to parse certificate".into()))?
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::IdentityError(constants::ERR_NO_CERTIFICATE.into()))?;

        let key_der = pkcs8_private_keys(&mut private_key_pem.as_bytes())
            .map_err(|_| ProtocolError::IdentityError("Failed to parse private key".into()))?
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::IdentityError(constants::ERR_NO_PRIVATE_KEY.into()))?;

        let details = CertificateDetails::parse(&cert_der)?;
        let name = details
            .common_name
            .ok_or_else(|| ProtocolError::IdentityError(constants::ERR_NO_COMMON_NAME.into()))?;

        let certificate = Certificate(cert_der);
        Ok(Self {
            name,
            fingerprint: Fingerprint::of(&certificate),
            certificate,
            private_key: PrivateKey(key_der),
            certificate_pem: certificate_pem.to_owned(),
            private_key_pem: private_key_pem.to_owned(),
            not_before: details.not_before,
            not_after: details.not_after,
        })
    }

    /// Device name carried as the certificate's common name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DER certificate, as handed to peers for pinning
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// PEM-encoded certificate
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// PEM-encoded PKCS8 private key
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// SHA-256 fingerprint of the certificate
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Start of the validity window
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub(crate) fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.private_key.0.zeroize();
        self.private_key_pem.zeroize();
    }
}

/// What a connection learned about its peer during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerIdentity {
    certificate: Certificate,
    fingerprint: Fingerprint,
    name: Option<String>,
    not_before: Option<OffsetDateTime>,
    not_after: Option<OffsetDateTime>,
}

impl PeerIdentity {
    /// Inspect a peer certificate.
    ///
    /// Parsing is lenient: an unreadable certificate still yields an identity
    /// with a fingerprint but no name.
    pub fn from_certificate(certificate: Certificate) -> Self {
        let details = CertificateDetails::parse(&certificate.0).ok();
        Self {
            fingerprint: Fingerprint::of(&certificate),
            name: details.as_ref().and_then(|d| d.common_name.clone()),
            not_before: details.as_ref().map(|d| d.not_before),
            not_after: details.map(|d| d.not_after),
            certificate,
        }
    }

    /// The peer's DER certificate
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// SHA-256 fingerprint of the peer's certificate
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Device name declared by the peer, if its certificate carries one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Start of the peer certificate's validity window
    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.not_before
    }

    /// End of the peer certificate's validity window
    pub fn not_after(&self) -> Option<OffsetDateTime> {
        self.not_after
    }
}

fn identity_error(err: rcgen::Error) -> ProtocolError {
    ProtocolError::IdentityError(format!("Certificate generation error: {err}"))
}
