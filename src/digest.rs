//! Digest algorithms and helpers shared by the manifest and signature-file code.
//!
//! Algorithm names follow the `<ALG>-Digest` attribute naming of manifests and
//! signature files (`SHA-256-Digest`, `SHA1-Digest-Manifest`, ...).  Names that don't
//! map to a supported algorithm are not an error: callers skip the attribute.

use core::fmt;

use base64::{
    alphabet,
    engine::{
        general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig,
    },
    Engine,
};
use der::oid::ObjectIdentifier;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Signature files in the wild are inconsistent about trailing `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const OID_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const OID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const OID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

/// A supported message digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Look up an algorithm by the name used in attribute keys.
    ///
    /// Matching is case-insensitive and accepts both the hyphenated and the compact
    /// spelling (`SHA-256`, `SHA256`).  Returns `None` for anything else, including
    /// algorithms such as MD5 that are recognized by other verifiers but not here.
    pub fn from_name(name: &str) -> Option<Self> {
        let compact: String = name
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match compact.as_str() {
            "SHA" | "SHA1" => Some(Self::Sha1),
            "SHA224" => Some(Self::Sha224),
            "SHA256" => Some(Self::Sha256),
            "SHA384" => Some(Self::Sha384),
            "SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Look up an algorithm by its ASN.1 object identifier.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            (OID_SHA1, Self::Sha1),
            (OID_SHA224, Self::Sha224),
            (OID_SHA256, Self::Sha256),
            (OID_SHA384, Self::Sha384),
            (OID_SHA512, Self::Sha512),
        ]
        .into_iter()
        .find_map(|(known, alg)| (known == *oid).then_some(alg))
    }

    /// The canonical name, as used in error messages and by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Start a streaming digest computation.
    pub fn hasher(&self) -> Hasher {
        match self {
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Digest a single buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-progress digest computation.
#[derive(Debug, Clone)]
pub enum Hasher {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Split an attribute key of the form `<ALG><suffix>` into its algorithm name.
///
/// The suffix is compared case-insensitively.  Returns the (original-case) prefix.
pub fn strip_digest_suffix<'k>(key: &'k str, suffix: &str) -> Option<&'k str> {
    if key.len() <= suffix.len() || !key.is_char_boundary(key.len() - suffix.len()) {
        return None;
    }
    let (prefix, tail) = key.split_at(key.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix).then_some(prefix)
}

/// Decode an expected digest value as recorded in a manifest or signature file.
///
/// Embedded whitespace is ignored and padding is optional.
pub fn decode_expected(value: &str) -> Option<Vec<u8>> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    LENIENT_BASE64.decode(cleaned).ok()
}

/// Encode a digest the way manifests and signature files record it.
pub fn encode_digest(digest: &[u8]) -> String {
    STANDARD.encode(digest)
}

/// Compare two digests without early exit on the first differing byte.
pub fn digests_equal(computed: &[u8], expected: &[u8]) -> bool {
    computed.len() == expected.len() && bool::from(computed.ct_eq(expected))
}

/// Lowercase hex, for debug output.
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}
