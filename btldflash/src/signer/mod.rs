//! Image digest and signature.
//!
//! Every data byte sent to the device (filler included) is hashed with
//! SHA-256 in transmission order. At the end of the stream the digest is
//! signed with deterministic ECDSA (RFC 6979), so the same image and key
//! always produce the same signature. The bootloader verifies it before
//! accepting the image.
//!
//! The curve is taken from the key file. The bootloader verifies with
//! secp160r1 and a 40-byte signature; secp256k1 keys are also accepted and
//! produce a 64-byte signature.

pub mod secp160r1;

use crate::error::{Error, Result};
use log::debug;
use sec1::der::Decode;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Length of the image digest.
pub const DIGEST_LEN: usize = 32;

/// PEM label of a SEC1 private key.
const PEM_TAG: &str = "EC PRIVATE KEY";

/// Object identifier of the secp256k1 curve.
const SECP256K1_OID: &str = "1.3.132.0.10";

/// Curves a signing key can be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// secp160r1, verified by the bootloader.
    Secp160r1,
    /// secp256k1.
    Secp256k1,
}

impl Curve {
    /// Look up a curve by its object identifier.
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            secp160r1::OID => Some(Self::Secp160r1),
            SECP256K1_OID => Some(Self::Secp256k1),
            _ => None,
        }
    }

    /// Length of a signature on this curve.
    pub fn signature_len(self) -> usize {
        match self {
            Self::Secp160r1 => secp160r1::SIGNATURE_LEN,
            Self::Secp256k1 => 64,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp160r1 => write!(f, "secp160r1"),
            Self::Secp256k1 => write!(f, "secp256k1"),
        }
    }
}

enum KeyInner {
    Secp160r1(secp160r1::SecretKey),
    Secp256k1 {
        secp: secp256k1::Secp256k1<secp256k1::All>,
        key: secp256k1::SecretKey,
    },
}

/// Private key used to sign images.
pub struct SigningKey {
    inner: KeyInner,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("curve", &self.curve())
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Create a key from raw secret bytes.
    pub fn from_slice(curve: Curve, secret: &[u8]) -> Result<Self> {
        let inner = match curve {
            Curve::Secp160r1 => KeyInner::Secp160r1(secp160r1::SecretKey::from_slice(secret)?),
            Curve::Secp256k1 => KeyInner::Secp256k1 {
                secp: secp256k1::Secp256k1::new(),
                key: secp256k1::SecretKey::from_slice(secret)
                    .map_err(|e| Error::Key(format!("invalid secret key: {e}")))?,
            },
        };
        Ok(Self { inner })
    }

    /// Parse a PEM encoded SEC1 private key. The curve must be named in the key.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Result<Self> {
        let pem = pem::parse(pem).map_err(|e| Error::Key(format!("failed to parse PEM: {e}")))?;
        if pem.tag() != PEM_TAG {
            return Err(Error::Key(format!(
                "expected a PEM block labelled \"{PEM_TAG}\", got \"{}\"",
                pem.tag()
            )));
        }

        let ec_key = sec1::EcPrivateKey::from_der(pem.contents())
            .map_err(|e| Error::Key(format!("invalid SEC1 key: {e}")))?;

        let oid = ec_key
            .parameters
            .and_then(|p| p.named_curve())
            .ok_or_else(|| Error::Key("key does not name its curve".to_string()))?
            .to_string();
        let curve = Curve::from_oid(&oid).ok_or_else(|| {
            Error::Key(format!(
                "unsupported curve {oid}, expected secp160r1 or secp256k1"
            ))
        })?;
        debug!("Signing key curve: {curve}");

        Self::from_slice(curve, ec_key.private_key)
    }

    /// Read and parse a PEM key file.
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading signing key from {}", path.display());
        let pem = std::fs::read(path)?;
        Self::from_pem(pem)
    }

    /// Curve of this key.
    pub fn curve(&self) -> Curve {
        match self.inner {
            KeyInner::Secp160r1(_) => Curve::Secp160r1,
            KeyInner::Secp256k1 { .. } => Curve::Secp256k1,
        }
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self) -> Vec<u8> {
        match &self.inner {
            KeyInner::Secp160r1(key) => key.public_key(),
            KeyInner::Secp256k1 { secp, key } => key.public_key(secp).serialize().to_vec(),
        }
    }

    /// Sign a digest. The result is [`Curve::signature_len`] bytes long.
    pub fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> Vec<u8> {
        match &self.inner {
            KeyInner::Secp160r1(key) => key.sign_digest(digest),
            KeyInner::Secp256k1 { secp, key } => secp
                .sign_ecdsa(&secp256k1::Message::from_digest(*digest), key)
                .serialize_compact()
                .to_vec(),
        }
    }

    /// Check a signature produced by [`SigningKey::sign_digest`].
    #[cfg(test)]
    pub(crate) fn verify(&self, digest: &[u8; DIGEST_LEN], signature: &[u8]) -> bool {
        match &self.inner {
            KeyInner::Secp160r1(key) => key.verify(digest, signature),
            KeyInner::Secp256k1 { secp, key } => {
                let Ok(sig) = secp256k1::ecdsa::Signature::from_compact(signature) else {
                    return false;
                };
                secp.verify_ecdsa(
                    &secp256k1::Message::from_digest(*digest),
                    &sig,
                    &key.public_key(secp),
                )
                .is_ok()
            },
        }
    }
}

/// Digest and signature of a completed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSignature {
    /// SHA-256 over the transmitted image bytes.
    pub digest: [u8; DIGEST_LEN],
    /// ECDSA signature over `digest`, in the curve's fixed-width `r || s` form.
    pub signature: Vec<u8>,
}

impl ImageSignature {
    /// Digest as lowercase hex.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Signature as lowercase hex.
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }
}

/// Streaming digest over the transmitted image.
#[derive(Debug, Clone, Default)]
pub struct ImageSigner {
    hasher: Sha256,
    bytes: u64,
}

impl ImageSigner {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold bytes into the digest. Must be called in transmission order.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes folded in so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finish the digest and sign it.
    pub fn finalize(self, key: &SigningKey) -> ImageSignature {
        let digest: [u8; DIGEST_LEN] = self.hasher.finalize().into();
        let signature = key.sign_digest(&digest);
        ImageSignature { digest, signature }
    }
}
