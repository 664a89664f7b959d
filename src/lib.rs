pub mod archive;
pub mod cache;
pub mod digest;
pub mod digester;
pub mod error;
pub mod limits;
pub mod manifest;
pub mod pkcs7;
pub mod sfparser;
pub mod signer;
pub mod verifier;


pub use cache::{SignerCache, SignerSet};
pub use digester::ManifestDigester;
pub use error::{Result, VerifyError};
pub use limits::Limits;
pub use signer::{CertPath, CodeSigner, Timestamp};
pub use verifier::{FileContribution, SignatureFileVerifier};

/// Path of the manifest inside an archive.  It is covered by every valid signature.
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const BLOCK_SUFFIXES: [&str; 3] = [".DSA", ".RSA", ".EC"];
const SIGNATURE_FILE_SUFFIX: &str = ".SF";

fn has_suffix(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Whether `name` is a signature block file (`.DSA`, `.RSA` or `.EC`).
///
/// Extensions are matched case-insensitively.
pub fn is_block(name: &str) -> bool {
    BLOCK_SUFFIXES.iter().any(|suffix| has_suffix(name, suffix))
}

/// Whether `name` is a signature block or a signature file (`.SF`).
pub fn is_block_or_sf(name: &str) -> bool {
    is_block(name) || has_suffix(name, SIGNATURE_FILE_SUFFIX)
}
