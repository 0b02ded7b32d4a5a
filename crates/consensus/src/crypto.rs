//! RSA-SHA1 signing and verification
//!
//! The protocol fixes the scheme to SHA-1 digests under RSA-2048 with
//! PKCS#1 v1.5 padding, giving the 256-byte signature blocks the wire
//! format is built around. Private keys arrive as PEM (PKCS#8 or PKCS#1);
//! peer public keys are extracted from X.509 certificates.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use sha1::Sha1;
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::error::{Error, Result};
use crate::types::{GeneralId, SignatureRecord, SIG_LEN};

/// Produces this general's signature blocks.
///
/// When verification is disabled the private key may be absent; signing
/// then emits all-zero blocks so the wire format stays uniform.
pub struct Signer {
    id: GeneralId,
    key: Option<SigningKey<Sha1>>,
}

impl Signer {
    /// Load `host_<id>_key.pem` from `keys_dir`.
    ///
    /// A missing or unreadable key is fatal unless `crypto_off` is set.
    pub fn load(keys_dir: &Path, id: GeneralId, crypto_off: bool) -> Result<Self> {
        let path = keys_dir.join(format!("host_{id}_key.pem"));
        match fs::read_to_string(&path) {
            Ok(pem) => {
                let key = RsaPrivateKey::from_pkcs8_pem(&pem)
                    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
                    .map_err(|e| Error::KeyUnavailable {
                        id,
                        reason: e.to_string(),
                    })?;
                Ok(Self::from_key(id, key))
            }
            Err(e) if crypto_off => {
                tracing::warn!(
                    "private key {} unavailable ({}); signing with empty blocks",
                    path.display(),
                    e
                );
                Ok(Self { id, key: None })
            }
            Err(e) => Err(Error::KeyUnavailable {
                id,
                reason: e.to_string(),
            }),
        }
    }

    pub fn from_key(id: GeneralId, key: RsaPrivateKey) -> Self {
        Self {
            id,
            key: Some(SigningKey::new(key)),
        }
    }

    pub fn id(&self) -> GeneralId {
        self.id
    }

    /// Sign `data`, producing one chain entry.
    pub fn sign(&self, data: &[u8]) -> Result<SignatureRecord> {
        let mut bytes = [0u8; SIG_LEN];
        if let Some(key) = &self.key {
            let sig = key
                .try_sign(data)
                .map_err(|e| Error::SigningFailed(e.to_string()))?;
            let raw = sig.to_bytes();
            if raw.len() != SIG_LEN {
                return Err(Error::SigningFailed(format!(
                    "signature is {} bytes, expected {} (key must be RSA-2048)",
                    raw.len(),
                    SIG_LEN
                )));
            }
            bytes.copy_from_slice(&raw);
        }
        Ok(SignatureRecord {
            signer: self.id,
            bytes,
        })
    }
}

/// Verifying keys for every peer, extracted from their certificates.
pub struct KeyStore {
    keys: HashMap<GeneralId, VerifyingKey<Sha1>>,
    crypto_off: bool,
}

impl KeyStore {
    /// Load `host_<j>_cert.pem` for every peer `j` other than `my_id`.
    ///
    /// With `crypto_off` nothing is read and every check passes.
    pub fn load(
        keys_dir: &Path,
        my_id: GeneralId,
        num_generals: u32,
        crypto_off: bool,
    ) -> Result<Self> {
        let mut keys = HashMap::new();
        if !crypto_off {
            for id in 1..=num_generals {
                if id == my_id {
                    continue;
                }
                let path = keys_dir.join(format!("host_{id}_cert.pem"));
                let unavailable = |reason: String| Error::CertUnavailable { id, reason };
                let pem = fs::read_to_string(&path).map_err(|e| unavailable(e.to_string()))?;
                let cert = Certificate::from_pem(pem.as_bytes())
                    .map_err(|e| unavailable(e.to_string()))?;
                let spki = cert
                    .tbs_certificate
                    .subject_public_key_info
                    .to_der()
                    .map_err(|e| unavailable(e.to_string()))?;
                let public = RsaPublicKey::from_public_key_der(&spki)
                    .map_err(|e| unavailable(e.to_string()))?;
                keys.insert(id, VerifyingKey::new(public));
            }
        }
        Ok(Self { keys, crypto_off })
    }

    /// Build from already-extracted public keys.
    pub fn from_keys(keys: HashMap<GeneralId, RsaPublicKey>, crypto_off: bool) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(id, key)| (id, VerifyingKey::new(key)))
                .collect(),
            crypto_off,
        }
    }

    /// A store that accepts every signature.
    pub fn disabled() -> Self {
        Self {
            keys: HashMap::new(),
            crypto_off: true,
        }
    }

    /// Check `sig` as `signer`'s signature over `data`.
    pub fn verify(&self, signer: GeneralId, data: &[u8], sig: &[u8; SIG_LEN]) -> bool {
        if self.crypto_off {
            return true;
        }
        let Some(key) = self.keys.get(&signer) else {
            return false;
        };
        let Ok(sig) = Signature::try_from(&sig[..]) else {
            return false;
        };
        key.verify(data, &sig).is_ok()
    }
}
