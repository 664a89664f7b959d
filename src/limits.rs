//! Tunables for signature-file verification.

/// Resource limits applied while verifying a signature file.
///
/// # Example
///
/// ```
/// use jarsig::Limits;
///
/// let limits = Limits {
///     chunk_size: 64 * 1024,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Size of the chunks in which the signature file is streamed through the signer
    /// verifiers and the attribute parser.  A value of zero is treated as one.
    ///
    /// Default: 4096 bytes.
    pub chunk_size: usize,

    /// Largest signature file that will be processed.  Larger files fail with
    /// [`VerifyError::SignatureFileTooLarge`].
    ///
    /// Default: 16 MiB.
    ///
    /// [`VerifyError::SignatureFileTooLarge`]: crate::VerifyError::SignatureFileTooLarge
    pub max_signature_file_len: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            max_signature_file_len: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

impl Limits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No size limit on signature files.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_signature_file_len: u64::MAX,
            ..Self::default()
        }
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
