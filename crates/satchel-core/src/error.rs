//! Error types for keys, addresses, transactions and chain data providers.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58 character: {0}")] InvalidCharacter(char),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid encoding: {0}")] InvalidEncoding(String),
    #[error("invalid payload length: {0}")] InvalidLength(usize),
    #[error("unsupported version byte: {0:#04x}")] UnsupportedVersion(u8),
    #[error("address is for {found}, expected {expected}")] NetworkMismatch { expected: String, found: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("seed must be 16 to 64 bytes, got {0}")] InvalidSeedLength(usize),
    #[error("invalid secret key")] InvalidSecretKey,
    #[error("invalid public key")] InvalidPublicKey,
    #[error("child {0} yields an invalid key")] InvalidChild(u32),
    #[error("cannot derive hardened child {0} from a public key")] HardenedFromPublic(u32),
    #[error("child index out of range: {0}")] IndexOutOfRange(u32),
    #[error("maximum derivation depth exceeded")] DepthExceeded,
    #[error("invalid derivation path: {0}")] InvalidPath(String),
    #[error("invalid extended key encoding: {0}")] InvalidEncoding(String),
    #[error("unknown extended key version: {0}")] UnknownVersion(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unexpected end of data")] Truncated,
    #[error("{0} trailing bytes after transaction")] TrailingBytes(usize),
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("value overflow")] ValueOverflow,
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid txid: {0}")] InvalidTxid(String),
    #[error("signature verification failed on input {0}")] InvalidSignature(usize),
}

/// Failure talking to a blockchain data provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out")] Timeout,
    #[error("provider unreachable: {0}")] Unreachable(String),
    #[error("HTTP {status}: {body}")] Http { status: u16, body: String },
    #[error("malformed response: {0}")] Decode(String),
    #[error("transaction rejected: {0}")] Rejected(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, rate limiting and server errors are
    /// transient. Client errors, rejections and malformed bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Unreachable(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Rejected(_) => false,
        }
    }
}
