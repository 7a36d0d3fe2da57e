//! Dual-generation apk signing: per-entry digest metadata written as
//! ordinary archive entries (v1) and a whole-file signing block spliced in
//! front of the central directory (v2). One key and certificate chain feeds
//! both schemes.

pub(crate) mod v1;
pub(crate) mod v2;

use crate::error::Error;
use crate::payload;
use crate::Result;
use rasn_pkix::Certificate;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::{PaddingScheme, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest as _, Sha256};
use std::path::Path;

/// Key material loaded once per run and shared read-only across inputs.
#[derive(Clone, Debug)]
pub struct SigningIdentity {
    key: RsaPrivateKey,
    pubkey: RsaPublicKey,
    certificates: Vec<Certificate>,
}

impl SigningIdentity {
    /// Loads certificate(s) and private key from concatenated PEM blocks.
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let blocks = pem::parse_many(pem_text)
            .map_err(|e| Error::SigningFailure(format!("unreadable keystore: {e}")))?;
        let key = blocks
            .iter()
            .find(|b| b.tag == "PRIVATE KEY")
            .ok_or_else(|| Error::SigningFailure("no private key in keystore".into()))?;
        let key = RsaPrivateKey::from_pkcs8_der(&key.contents)
            .map_err(|e| Error::SigningFailure(format!("bad private key: {e}")))?;
        let certificates = blocks
            .iter()
            .filter(|b| b.tag == "CERTIFICATE")
            .map(|b| {
                rasn::der::decode::<Certificate>(&b.contents)
                    .map_err(|e| Error::SigningFailure(format!("bad certificate: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if certificates.is_empty() {
            return Err(Error::SigningFailure("no certificate in keystore".into()));
        }
        let pubkey = RsaPublicKey::from(&key);
        Ok(Self {
            key,
            pubkey,
            certificates,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    /// The debug identity bundled with the tool.
    pub fn bundled() -> Result<Self> {
        let pem = payload::default_signing_pem()?;
        let pem = std::str::from_utf8(pem)
            .map_err(|e| Error::SigningFailure(format!("bundled keystore is not utf-8: {e}")))?;
        Self::from_pem(pem)
    }

    pub(crate) fn leaf_certificate(&self) -> &Certificate {
        &self.certificates[0]
    }

    pub(crate) fn leaf_certificate_der(&self) -> Result<Vec<u8>> {
        rasn::der::encode(self.leaf_certificate())
            .map_err(|e| Error::SigningFailure(format!("certificate encode: {e}")))
    }

    pub(crate) fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self
            .pubkey
            .to_public_key_der()
            .map_err(|e| Error::SigningFailure(format!("public key encode: {e}")))?
            .as_ref()
            .to_vec())
    }

    /// Rsa pkcs#1 v1.5 signature over the sha-256 of `bytes`.
    pub(crate) fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(bytes);
        let padding = PaddingScheme::new_pkcs1v15_sign::<sha2::Sha256>();
        self.key
            .sign(padding, &digest)
            .map_err(|e| Error::SigningFailure(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SigningConfig {
    /// Selects the digest algorithm. Sha-256 needs platform 18+; this tool
    /// does not sign for anything older.
    pub min_sdk_version: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            min_sdk_version: 28,
        }
    }
}

/// Finalize-time hook producing both signature generations.
#[derive(Debug)]
pub struct ApkSigner {
    identity: SigningIdentity,
    #[allow(dead_code)]
    config: SigningConfig,
}

impl ApkSigner {
    /// Fails with [`Error::SigningFailure`] when the private key and the
    /// leaf certificate's public key do not correspond, or the requested
    /// platform is too old for the supported digest algorithm.
    pub fn new(identity: SigningIdentity, config: SigningConfig) -> Result<Self> {
        if config.min_sdk_version < 18 {
            return Err(Error::SigningFailure(format!(
                "min sdk {} is below sha-256 digest support",
                config.min_sdk_version
            )));
        }
        let cert_spki = rasn::der::encode(
            &identity.leaf_certificate().tbs_certificate.subject_public_key_info,
        )
        .map_err(|e| Error::SigningFailure(format!("certificate public key encode: {e}")))?;
        if cert_spki != identity.public_key_der()? {
            return Err(Error::SigningFailure(
                "private key does not match the leaf certificate".into(),
            ));
        }
        Ok(Self { identity, config })
    }

    /// Builds the v1 signature entries from the per-entry content digests,
    /// in layout order.
    pub(crate) fn v1_signature_entries(
        &self,
        digests: &[(String, [u8; 32])],
    ) -> Result<Vec<(String, Vec<u8>)>> {
        v1::signature_entries(&self.identity, digests)
    }

    /// Builds the complete v2 signing block for the given whole-file root
    /// digest.
    pub(crate) fn signing_block(&self, digest: [u8; 32]) -> Result<Vec<u8>> {
        v2::signing_block(&self.identity, digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_load_the_bundled_identity() {
        let identity = SigningIdentity::bundled().unwrap();
        assert_eq!(identity.certificates.len(), 1);
    }

    #[test]
    fn should_accept_a_matching_key_and_certificate() {
        let identity = SigningIdentity::bundled().unwrap();
        assert!(ApkSigner::new(identity, SigningConfig::default()).is_ok());
    }

    #[test]
    fn should_reject_platforms_older_than_sha256_support() {
        let identity = SigningIdentity::bundled().unwrap();
        let config = SigningConfig {
            min_sdk_version: 17,
        };
        match ApkSigner::new(identity, config) {
            Err(Error::SigningFailure(_)) => {}
            other => panic!("expected SigningFailure, got {other:?}"),
        }
    }

    #[test]
    fn should_reject_keystores_without_a_key() {
        let cert_only = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        match SigningIdentity::from_pem(cert_only) {
            Err(Error::SigningFailure(msg)) => assert!(msg.contains("no private key")),
            other => panic!("expected SigningFailure, got {other:?}"),
        }
    }
}
