/// Errors produced by the cipher and key-exchange primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The unwrapped key buffer did not start with the zero padding field.
    #[error("wrapped key has bad padding")]
    BadKeyPadding,

    /// The unwrapped key buffer declared more key bytes than it holds.
    #[error("wrapped key too short (declared {declared} bytes, {available} available)")]
    KeyTooShort { declared: usize, available: usize },

    /// The symmetric key is not 16 bytes long.
    #[error("invalid key length ({0} bytes, expected 16)")]
    InvalidKeyLength(usize),

    /// Ciphertext handed to a full decrypt is not a whole number of blocks.
    #[error("ciphertext length {0} is not a multiple of 16")]
    UnalignedCiphertext(usize),

    /// The wrapped key is numerically not below the RSA modulus.
    #[error("wrapped key is out of range for the RSA modulus")]
    WrappedKeyOutOfRange,

    /// RSA key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A public key could not be encoded or decoded.
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
