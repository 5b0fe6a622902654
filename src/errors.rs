//! Errors specific to hypertree signatures

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
/// Enum of error associated with hypertree signatures
pub enum Error {
    /// The combination of heights, Winternitz parameters and retain parameters cannot
    /// be used to build a key.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// The top layer has no leaf left; no more signatures can be produced with this key.
    #[error("key exhausted: no leaf left in the top layer")]
    KeyExhausted,
    /// The one-time key of the current leaf already produced a signature, and the key
    /// was not updated since.
    #[error("private key already used for the current leaf")]
    PrivateKeyAlreadyUsed,
    /// An amortized computation was consumed before it was finished. This is a bug in
    /// the schedule, not a data error; the key must not be used any further.
    #[error("scheduling invariant violated: {0} consumed unfinished")]
    SchedulingInvariantViolation(&'static str),
    /// Error occurs when the size of the signature is not the expected.
    #[error("invalid signature size: {0}")]
    InvalidSignatureSize(usize),
    /// Error occurs when the size of the public key is not the expected.
    #[error("invalid public key size: {0}")]
    InvalidPublicKeySize(usize),
    /// Error occurs when a seed is empty.
    #[error("invalid seed size: {0}")]
    InvalidSeedSize(usize),
    /// The recomputed root does not match the public key, or the signature is malformed.
    #[error("signature verification failed")]
    VerificationFailed,
}
