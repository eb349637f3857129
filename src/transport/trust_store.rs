//! Accepted issuer set.
//!
//! The certificates one side of a connection accepts as proof of the peer's
//! identity. Device certificates are self-issued, so an accepted "issuer" is
//! simply the peer's own certificate, pinned by fingerprint.

use std::collections::HashMap;

use rustls::Certificate;

use crate::identity::Fingerprint;

/// Certificates trusted by one side of a connection, keyed by fingerprint.
#[derive(Debug, Clone, Default)]
pub struct AcceptedIssuerSet {
    certificates: HashMap<Fingerprint, Certificate>,
}

impl AcceptedIssuerSet {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. Returns `false` if it was already present.
    pub fn insert(&mut self, certificate: Certificate) -> bool {
        let fingerprint = Fingerprint::of(&certificate);
        self.certificates.insert(fingerprint, certificate).is_none()
    }

    /// Remove a certificate by fingerprint
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Certificate> {
        self.certificates.remove(fingerprint)
    }

    /// Whether a certificate with this fingerprint is accepted
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.certificates.contains_key(fingerprint)
    }

    /// Whether this exact certificate is accepted
    pub fn contains_certificate(&self, certificate: &Certificate) -> bool {
        self.contains(&Fingerprint::of(certificate))
    }

    /// Look up a certificate by fingerprint
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Certificate> {
        self.certificates.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn clear(&mut self) {
        self.certificates.clear();
    }

    /// Iterate over the accepted certificates in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &Certificate)> {
        self.certificates.iter()
    }
}

impl Extend<Certificate> for AcceptedIssuerSet {
    fn extend<I: IntoIterator<Item = Certificate>>(&mut self, iter: I) {
        for certificate in iter {
            self.insert(certificate);
        }
    }
}

impl FromIterator<Certificate> for AcceptedIssuerSet {
    fn from_iter<I: IntoIterator<Item = Certificate>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
