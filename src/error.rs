//! Error types for signature-file verification.

use thiserror::Error;

/// Errors that can occur while verifying a signature file.
///
/// Every variant is fatal for the signature file being processed.  An unsupported
/// `Signature-Version` is not an error: such files are skipped.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// I/O error while reading the signature-file stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The signature block bytes could not be decoded as DER.
    #[error("malformed signature block: {0}")]
    Der(#[from] der::Error),

    /// OpenSSL rejected a certificate or key.
    #[error("crypto error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    /// The signature block decoded, but its structure is not usable.
    #[error("malformed signature block: {0}")]
    MalformedContainer(String),

    /// No signer record validated its signature over the signature-file bytes.
    #[error("cannot verify signature block file {name}")]
    NoVerifyingSigner {
        /// Uppercased signature block name, without extension.
        name: String,
    },

    /// The signature block is detached and no signature file was supplied.
    #[error("no signature file supplied for detached signature block {name}")]
    MissingSignatureFile {
        /// Uppercased signature block name, without extension.
        name: String,
    },

    /// The signature file is larger than the configured limit.
    #[error("signature file exceeds limit: {len} bytes > {limit} bytes")]
    SignatureFileTooLarge {
        /// Number of bytes seen so far.
        len: u64,
        /// Configured limit.
        limit: u64,
    },

    /// A manifest or signature-file line is not a `name: value` header.
    #[error("invalid header field: {line:?}")]
    InvalidHeader {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// A signature-file entry names a section that is not in the manifest.
    #[error("no manifest section for signature file entry {entry}")]
    MissingManifestSection {
        /// The entry name as written in the signature file.
        entry: String,
    },

    /// A `*-Digest-Manifest-Main-Attributes` value did not match.
    #[error("Invalid signature file digest for Manifest main attributes")]
    MainAttributesDigestMismatch,

    /// A per-entry `*-Digest` value matched under neither canonicalization.
    #[error("invalid {algorithm} signature file digest for {entry}")]
    SectionDigestMismatch {
        /// Canonical algorithm name.
        algorithm: &'static str,
        /// The entry name as written in the signature file.
        entry: String,
    },

    /// The signer's timestamp token could not be parsed or verified.
    #[error("invalid signature timestamp token: {0}")]
    Timestamp(String),
}

/// Result type for verification operations.
pub type Result<T> = std::result::Result<T, VerifyError>;
