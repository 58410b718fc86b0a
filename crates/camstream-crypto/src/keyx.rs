use rand::{CryptoRng, RngCore};
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::cipher::{SessionCipher, KEY_LEN};
use crate::error::{CryptoError, Result};

/// Modulus size of the per-connection key pair.
pub const RSA_BITS: usize = 512;

/// Public exponent of the per-connection key pair.
pub const RSA_EXPONENT: u32 = 65537;

/// Offset of the key bytes inside the unwrapped buffer.
const KEY_OFFSET: usize = 8;

/// Client side of the key exchange.
///
/// A fresh RSA-512 pair is generated per connection. The public half goes to
/// the device as PKCS#1 DER; the device answers with the AES key encrypted
/// as a raw RSA block (no OAEP, no PKCS#1 v1.5 padding).
pub struct KeyExchange {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl KeyExchange {
    /// Generate a new key pair from the thread-local RNG.
    pub fn generate() -> Result<Self> {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let private = RsaPrivateKey::new_with_exp(rng, RSA_BITS, &BigUint::from(RSA_EXPONENT))
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_der = RsaPublicKey::from(&private)
            .to_pkcs1_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .as_bytes()
            .to_vec();
        debug!(bits = RSA_BITS, der_len = public_der.len(), "generated key pair");
        Ok(Self {
            private,
            public_der,
        })
    }

    /// PKCS#1 DER encoding of the public key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Payload of the outbound key-exchange frame:
    /// `[0 u32 LE][der_len u32 LE][0 u32 LE][DER bytes]`.
    pub fn public_key_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(12 + self.public_der.len());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&(self.public_der.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&self.public_der);
        payload
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        self.private.size()
    }

    /// Recover the session cipher from the device's wrapped key.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SessionCipher> {
        let block = self.raw_decrypt(wrapped)?;
        SessionCipher::from_slice(parse_wrapped_key(&block)?)
    }

    fn raw_decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        let c = BigUint::from_bytes_be(wrapped);
        let n = self.private.n();
        if &c >= n {
            return Err(CryptoError::WrappedKeyOutOfRange);
        }
        let m = c.modpow(self.private.d(), n);
        Ok(left_pad(&m.to_bytes_be(), self.modulus_len()))
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("bits", &RSA_BITS)
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// Extract the AES key from an unwrapped RSA block.
///
/// Layout: `[zero u32][key_len u32 LE][key bytes at offset 8]`, anything
/// after the key is ignored.
pub fn parse_wrapped_key(block: &[u8]) -> Result<&[u8]> {
    let header = block
        .get(..KEY_OFFSET)
        .ok_or(CryptoError::KeyTooShort {
            declared: 0,
            available: block.len().saturating_sub(KEY_OFFSET),
        })?;
    if header[..4] != [0, 0, 0, 0] {
        return Err(CryptoError::BadKeyPadding);
    }
    let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let available = block.len() - KEY_OFFSET;
    if declared > available {
        return Err(CryptoError::KeyTooShort {
            declared,
            available,
        });
    }
    Ok(&block[KEY_OFFSET..KEY_OFFSET + declared])
}

/// Device side of the exchange: wrap `key` for the holder of `public_der`.
///
/// Builds the `[0][len][key]` block, left-aligned in a modulus-sized buffer,
/// and raises it to the public exponent.
pub fn wrap_session_key(public_der: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let size = public_key(public_der)?.size();
    if KEY_OFFSET + key.len() > size {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    let mut block = vec![0u8; size];
    block[4..8].copy_from_slice(&(key.len() as u32).to_le_bytes());
    block[KEY_OFFSET..KEY_OFFSET + key.len()].copy_from_slice(key);
    encrypt_raw(public_der, &block)
}

/// Raw RSA (`m^e mod n`, no padding) of an arbitrary block, big-endian and
/// left-padded to the modulus length.
pub fn encrypt_raw(public_der: &[u8], block: &[u8]) -> Result<Vec<u8>> {
    let public = public_key(public_der)?;
    let m = BigUint::from_bytes_be(block);
    if &m >= public.n() {
        return Err(CryptoError::WrappedKeyOutOfRange);
    }
    let c = m.modpow(public.e(), public.n());
    Ok(left_pad(&c.to_bytes_be(), public.size()))
}

fn public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    if bytes.len() >= width {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(bytes);
    out
}

const _: () = assert!(KEY_OFFSET + KEY_LEN <= RSA_BITS / 8);
