use std::ops::Range;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{CryptoError, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Bytes transformed at the start of every stride by the partial variant.
pub const PARTIAL_WINDOW: usize = 128;

/// Distance between the starts of consecutive partial windows.
pub const PARTIAL_STRIDE: usize = 4096;

const ZERO_IV: [u8; BLOCK_LEN] = [0; BLOCK_LEN];

/// Byte ranges touched by the partial variant for a payload of `len` bytes.
///
/// Each range is an independent 128-byte CBC run. Payloads of 128 bytes or
/// less have no windows; callers use the full variant for those instead.
pub fn partial_windows(len: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(PARTIAL_STRIDE)
        .take_while(move |offset| len - offset > PARTIAL_WINDOW)
        .map(|offset| offset..offset + PARTIAL_WINDOW)
}

/// Session payload cipher: AES-128-CBC, all-zero IV, no padding scheme.
///
/// The "all" variant zero-pads plaintext to the block size and the padding
/// is never stripped. The "some" variant leaves most of a large payload in
/// the clear and transforms only [`partial_windows`].
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; KEY_LEN],
}

impl SessionCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build a cipher from a key slice, which must be exactly 16 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self::new(key))
    }

    /// Encrypt the whole payload, zero-padding it to a multiple of 16.
    pub fn encrypt_all(&self, plaintext: &[u8]) -> Vec<u8> {
        let padded = plaintext.len().div_ceil(BLOCK_LEN) * BLOCK_LEN;
        let mut buf = Vec::with_capacity(padded);
        buf.extend_from_slice(plaintext);
        buf.resize(padded, 0);
        self.encrypt_blocks(&mut buf);
        buf
    }

    /// Decrypt the whole payload. Trailing zero padding is left in place.
    pub fn decrypt_all(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::UnalignedCiphertext(ciphertext.len()));
        }
        let mut buf = ciphertext.to_vec();
        self.decrypt_blocks(&mut buf);
        Ok(buf)
    }

    /// Partial encryption for bulk payloads. Output length equals input
    /// length unless the payload is short enough for [`encrypt_all`].
    ///
    /// [`encrypt_all`]: SessionCipher::encrypt_all
    pub fn encrypt_some(&self, plaintext: &[u8]) -> Vec<u8> {
        if plaintext.len() <= PARTIAL_WINDOW {
            return self.encrypt_all(plaintext);
        }
        let mut buf = plaintext.to_vec();
        for window in partial_windows(buf.len()) {
            self.encrypt_blocks(&mut buf[window]);
        }
        buf
    }

    /// Inverse of [`encrypt_some`](SessionCipher::encrypt_some).
    pub fn decrypt_some(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() <= PARTIAL_WINDOW {
            return self.decrypt_all(ciphertext);
        }
        let mut buf = ciphertext.to_vec();
        for window in partial_windows(buf.len()) {
            self.decrypt_blocks(&mut buf[window]);
        }
        Ok(buf)
    }

    // Every caller hands in a whole number of blocks.
    fn encrypt_blocks(&self, buf: &mut [u8]) {
        let mut enc = Aes128CbcEnc::new((&self.key).into(), (&ZERO_IV).into());
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    fn decrypt_blocks(&self, buf: &mut [u8]) {
        let mut dec = Aes128CbcDec::new((&self.key).into(), (&ZERO_IV).into());
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}
