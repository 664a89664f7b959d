#![allow(dead_code)]

use jarsig::{
    digest::{encode_digest, DigestAlgorithm},
    ManifestDigester,
};

#[path = "../../src/test.rs"]
mod fixtures;

pub use fixtures::*;

pub const SHA256: DigestAlgorithm = DigestAlgorithm::Sha256;

/// A manifest with one section per entry name.
pub fn manifest(names: &[&str]) -> Vec<u8> {
    let mut out = String::from("Manifest-Version: 1.0\r\nCreated-By: jarsig tests\r\n\r\n");
    for name in names {
        let content_digest = encode_digest(&SHA256.digest(name.as_bytes()));
        out.push_str(&format!(
            "Name: {name}\r\nSHA-256-Digest: {content_digest}\r\n\r\n"
        ));
    }
    out.into_bytes()
}

/// The digest a signature file records for a manifest section.
pub fn section_digest(md: &ManifestDigester, name: &str) -> String {
    encode_digest(&md.digest(md.get(name).unwrap(), SHA256))
}

/// The same, as computed by tools that drop the blank line after each section.
pub fn legacy_section_digest(md: &ManifestDigester, name: &str) -> String {
    encode_digest(&md.digest_workaround(md.get(name).unwrap(), SHA256))
}

pub fn manifest_digest(md: &ManifestDigester) -> String {
    encode_digest(&md.manifest_digest(SHA256))
}

/// Assemble a signature file from main-attribute lines and `(name, digest)` sections.
pub fn signature_file(main: &[&str], sections: &[(&str, String)]) -> Vec<u8> {
    let mut out = String::new();
    for line in main {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    for (name, digest) in sections {
        out.push_str(&format!("Name: {name}\r\nSHA-256-Digest: {digest}\r\n\r\n"));
    }
    out.into_bytes()
}

/// Every section of `names` digested in its normal form.
pub fn signature_file_for(md: &ManifestDigester, names: &[&str]) -> Vec<u8> {
    let sections: Vec<_> = names
        .iter()
        .map(|name| (*name, section_digest(md, name)))
        .collect();
    signature_file(&["Signature-Version: 1.0"], &sections)
}
