//! ECDSA over secp160r1, the curve the bootloader verifies with.
//!
//! The device stores a 40-byte signature: `r` and `s` as 20-byte big-endian
//! integers. The group order is 161 bits wide, so a candidate signature with
//! an `r` or `s` that does not fit in 20 bytes is discarded and the next
//! RFC 6979 nonce is tried. Nonces are derived with HMAC-SHA256, so signing
//! is deterministic.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha2::Sha256;
use std::sync::OnceLock;

/// Object identifier of the curve.
pub const OID: &str = "1.3.132.0.8";

/// Length of the `r || s` signature the device stores.
pub const SIGNATURE_LEN: usize = 40;

/// Length of one signature component and of a field element.
const COMPONENT_LEN: usize = 20;

/// Length of a scalar (the order is 161 bits).
const SCALAR_LEN: usize = 21;

const P: [u8; 20] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF,
];
const A: [u8; 20] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFC,
];
const N: [u8; 21] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0xF4, 0xC8, 0xF9, 0x27, 0xAE, 0xD3, 0xCA, 0x75, 0x22,
    0x57,
];
const GX: [u8; 20] = [
    0x4A, 0x96, 0xB5, 0x68, 0x8E, 0xF5, 0x73, 0x28, 0x46, 0x64,
    0x69, 0x89, 0x68, 0xC3, 0x8B, 0xB9, 0x13, 0xCB, 0xFC, 0x82,
];
const GY: [u8; 20] = [
    0x23, 0xA6, 0x28, 0x55, 0x31, 0x68, 0x94, 0x7D, 0x59, 0xDC,
    0xC9, 0x12, 0x04, 0x23, 0x51, 0x37, 0x7A, 0xC5, 0xFB, 0x32,
];

type HmacSha256 = Hmac<Sha256>;

/// Affine point. The point at infinity is represented as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Point {
    x: BigUint,
    y: BigUint,
}

struct Curve {
    p: BigUint,
    a: BigUint,
    n: BigUint,
    g: Point,
}

fn curve() -> &'static Curve {
    static CURVE: OnceLock<Curve> = OnceLock::new();
    CURVE.get_or_init(|| Curve {
        p: BigUint::from_bytes_be(&P),
        a: BigUint::from_bytes_be(&A),
        n: BigUint::from_bytes_be(&N),
        g: Point {
            x: BigUint::from_bytes_be(&GX),
            y: BigUint::from_bytes_be(&GY),
        },
    })
}

fn is_zero(v: &BigUint) -> bool {
    v.bits() == 0
}

/// Multiplicative inverse modulo a prime.
fn inverse(v: &BigUint, modulus: &BigUint) -> BigUint {
    v.modpow(&(modulus - 2u32), modulus)
}

impl Curve {
    fn sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + &self.p - b) % &self.p
    }

    fn add(&self, lhs: Option<&Point>, rhs: Option<&Point>) -> Option<Point> {
        let (l, r) = match (lhs, rhs) {
            (None, other) | (other, None) => return other.cloned(),
            (Some(l), Some(r)) => (l, r),
        };

        let slope = if l.x == r.x {
            if is_zero(&((&l.y + &r.y) % &self.p)) {
                return None;
            }
            let num = (&l.x * &l.x * 3u32 + &self.a) % &self.p;
            num * inverse(&((&l.y * 2u32) % &self.p), &self.p) % &self.p
        } else {
            self.sub(&r.y, &l.y) * inverse(&self.sub(&r.x, &l.x), &self.p) % &self.p
        };

        let x = self.sub(&self.sub(&(&slope * &slope % &self.p), &l.x), &r.x);
        let y = self.sub(&(slope * self.sub(&l.x, &x) % &self.p), &l.y);
        Some(Point { x, y })
    }

    fn mul(&self, k: &BigUint, point: &Point) -> Option<Point> {
        let mut acc: Option<Point> = None;
        for i in (0..k.bits()).rev() {
            acc = self.add(acc.as_ref(), acc.as_ref());
            if k.bit(i) {
                acc = self.add(acc.as_ref(), Some(point));
            }
        }
        acc
    }

    /// Leftmost `qlen` bits of `bytes` as an integer.
    fn bits2int(&self, bytes: &[u8]) -> BigUint {
        let v = BigUint::from_bytes_be(bytes);
        let blen = bytes.len() as u64 * 8;
        let qlen = self.n.bits();
        if blen > qlen { v >> (blen - qlen) } else { v }
    }
}

/// Big-endian encoding left-padded to `len` bytes.
fn to_fixed(v: &BigUint, len: usize) -> Vec<u8> {
    let bytes = v.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes[bytes.len().saturating_sub(len)..]);
    out
}

#[allow(clippy::unwrap_used)] // HMAC accepts keys of any length
fn hmac(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// secp160r1 private key.
#[derive(Clone)]
pub struct SecretKey {
    d: BigUint,
}

impl SecretKey {
    /// Parse a big-endian private scalar.
    pub fn from_slice(secret: &[u8]) -> Result<Self> {
        if secret.len() > SCALAR_LEN {
            return Err(Error::Key(format!(
                "secp160r1 secret is {} bytes, expected at most {SCALAR_LEN}",
                secret.len()
            )));
        }
        let d = BigUint::from_bytes_be(secret);
        if is_zero(&d) || d >= curve().n {
            return Err(Error::Key("secp160r1 secret out of range".to_string()));
        }
        Ok(Self { d })
    }

    /// Compressed SEC1 public key (21 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        let c = curve();
        let mut out = Vec::with_capacity(1 + COMPONENT_LEN);
        match c.mul(&self.d, &c.g) {
            Some(q) => {
                out.push(if q.y.bit(0) { 0x03 } else { 0x02 });
                out.extend_from_slice(&to_fixed(&q.x, COMPONENT_LEN));
            },
            None => out.push(0x00),
        }
        out
    }

    /// Deterministic signature over a SHA-256 digest.
    #[allow(clippy::many_single_char_names)]
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Vec<u8> {
        let c = curve();
        let e = c.bits2int(digest) % &c.n;
        let x = to_fixed(&self.d, SCALAR_LEN);
        let h = to_fixed(&e, SCALAR_LEN);

        let mut k = [0u8; 32];
        let mut v = [1u8; 32];
        k = hmac(&k, &[&v, &[0x00], &x, &h]);
        v = hmac(&k, &[&v]);
        k = hmac(&k, &[&v, &[0x01], &x, &h]);
        v = hmac(&k, &[&v]);

        loop {
            v = hmac(&k, &[&v]);
            let nonce = c.bits2int(&v);
            if let Some(signature) = self.sign_with_nonce(&nonce, &e) {
                return signature;
            }
            k = hmac(&k, &[&v, &[0x00]]);
            v = hmac(&k, &[&v]);
        }
    }

    fn sign_with_nonce(&self, nonce: &BigUint, e: &BigUint) -> Option<Vec<u8>> {
        let c = curve();
        if is_zero(nonce) || *nonce >= c.n {
            return None;
        }
        let r = c.mul(nonce, &c.g)?.x % &c.n;
        if is_zero(&r) {
            return None;
        }
        let s = inverse(nonce, &c.n) * (e + &r * &self.d) % &c.n;
        if is_zero(&s) {
            return None;
        }

        let limit = (COMPONENT_LEN * 8) as u64;
        if r.bits() > limit || s.bits() > limit {
            return None;
        }

        let mut out = to_fixed(&r, COMPONENT_LEN);
        out.extend_from_slice(&to_fixed(&s, COMPONENT_LEN));
        Some(out)
    }

    /// Check a signature the way the bootloader does.
    #[cfg(test)]
    pub(crate) fn verify(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        let c = curve();
        if signature.len() != SIGNATURE_LEN {
            return false;
        }
        let r = BigUint::from_bytes_be(&signature[..COMPONENT_LEN]);
        let s = BigUint::from_bytes_be(&signature[COMPONENT_LEN..]);
        if is_zero(&r) || is_zero(&s) || r >= c.n || s >= c.n {
            return false;
        }
        let Some(q) = c.mul(&self.d, &c.g) else {
            return false;
        };
        let e = c.bits2int(digest) % &c.n;
        let w = inverse(&s, &c.n);
        let u1 = e * &w % &c.n;
        let u2 = &r * &w % &c.n;
        let sum = c.add(c.mul(&u1, &c.g).as_ref(), c.mul(&u2, &q).as_ref());
        sum.is_some_and(|p| p.x % &c.n == r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest;

    /// Private scalar of the `openssl ecparam -name secp160r1 -genkey` test key.
    const SECRET: &str = "00ee53005efc6fadeb3dbaf82c105e2df25df091ba";

    /// Public point of the same key, as printed by `openssl ec -text`.
    const PUBLIC_X: &str = "23c67f0c7c9e51100a1f02d0b94c84dc5b33a462";
    const PUBLIC_Y: &str = "7c6168515c966610395f61479bdbcf5176f0e49a";

    /// Signature over sha256("firmware"), accepted by `openssl dgst -verify`.
    const FIRMWARE_SIGNATURE: &str = "7d737fae6780cef45399db1673858962eded28a5\
                                      f854d741ab084e869ce1b67099cc532f96c5e6d2";

    const B: [u8; 20] = [
        0x1C, 0x97, 0xBE, 0xFC, 0x54, 0xBD, 0x7A, 0x8B, 0x65, 0xAC,
        0xF8, 0x9F, 0x81, 0xD4, 0xD4, 0xAD, 0xC5, 0x65, 0xFA, 0x45,
    ];

    fn key() -> SecretKey {
        SecretKey::from_slice(&hex::decode(SECRET).unwrap()).unwrap()
    }

    fn on_curve(pt: &Point) -> bool {
        let c = curve();
        let b = BigUint::from_bytes_be(&B);
        let lhs = &pt.y * &pt.y % &c.p;
        let rhs = (&pt.x * &pt.x * &pt.x + &c.a * &pt.x + b) % &c.p;
        lhs == rhs
    }

    #[test]
    fn test_generator_on_curve() {
        assert!(on_curve(&curve().g));
        assert_eq!(curve().n.bits(), 161);
    }

    #[test]
    fn test_order_times_generator_is_infinity() {
        let c = curve();
        assert!(c.mul(&c.n, &c.g).is_none());
        let doubled = c.add(Some(&c.g), Some(&c.g)).unwrap();
        assert!(on_curve(&doubled));
        assert_eq!(c.mul(&BigUint::from(2u32), &c.g), Some(doubled));
    }

    #[test]
    fn test_public_key_matches_openssl() {
        let c = curve();
        let q = c.mul(&key().d, &c.g).unwrap();
        assert_eq!(hex::encode(to_fixed(&q.x, COMPONENT_LEN)), PUBLIC_X);
        assert_eq!(hex::encode(to_fixed(&q.y, COMPONENT_LEN)), PUBLIC_Y);

        let compressed = key().public_key();
        assert_eq!(compressed.len(), 21);
        assert_eq!(compressed[0], 0x02);
        assert_eq!(hex::encode(&compressed[1..]), PUBLIC_X);
    }

    #[test]
    fn test_known_signature() {
        let digest: [u8; 32] = Sha256::digest(b"firmware").into();
        let sig = key().sign_digest(&digest);
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert_eq!(hex::encode(&sig), FIRMWARE_SIGNATURE);
        assert!(key().verify(&digest, &sig));
    }

    #[test]
    fn test_signatures_fit_device_slot() {
        let key = key();
        for i in 0u32..16 {
            let digest: [u8; 32] = Sha256::digest(i.to_be_bytes()).into();
            let sig = key.sign_digest(&digest);
            assert_eq!(sig.len(), SIGNATURE_LEN);
            assert!(key.verify(&digest, &sig));
        }
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let digest: [u8; 32] = Sha256::digest(b"firmware").into();
        let mut sig = key().sign_digest(&digest);
        sig[5] ^= 0x01;
        assert!(!key().verify(&digest, &sig));

        let other: [u8; 32] = Sha256::digest(b"firmwarf").into();
        let sig = key().sign_digest(&digest);
        assert!(!key().verify(&other, &sig));
    }

    #[test]
    fn test_secret_range() {
        assert!(SecretKey::from_slice(&[0u8; 21]).is_err());
        assert!(SecretKey::from_slice(&N).is_err());
        assert!(SecretKey::from_slice(&[1u8; 22]).is_err());
        assert!(SecretKey::from_slice(&[0x01]).is_ok());
    }
}
