//! Byte-exact digest index over a manifest.
//!
//! Signature files record digests over the *raw bytes* of manifest sections, so the
//! index never re-serializes anything: it records where each section starts and ends
//! in the original buffer.  Every section has two forms:
//!
//!  - the full form, which includes the blank line terminating the section;
//!  - the legacy form, which stops after the last header line.  Some old signing tools
//!    computed section digests this way.

use std::collections::HashMap;

use log::trace;

use crate::{
    digest::DigestAlgorithm,
    manifest::{find_section, NAME_ATTR},
};

/// Key under which the main-attributes section is indexed.
pub const MAIN_ATTRIBUTES: &str = "Manifest-Main-Attributes";

/// Location of one manifest section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestEntry {
    offset: usize,
    length: usize,
    length_with_blank_line: usize,
}

impl DigestEntry {
    /// The section bytes including the terminating blank line.
    pub fn full<'a>(&self, manifest: &'a [u8]) -> &'a [u8] {
        &manifest[self.offset..self.offset + self.length_with_blank_line]
    }

    /// The section bytes without the terminating blank line.
    pub fn legacy<'a>(&self, manifest: &'a [u8]) -> &'a [u8] {
        &manifest[self.offset..self.offset + self.length]
    }
}

/// A precomputed index of manifest sections, keyed by entry name.
#[derive(Debug, Clone)]
pub struct ManifestDigester {
    raw: Vec<u8>,
    main: Option<DigestEntry>,
    entries: HashMap<String, DigestEntry>,
    /// Entry names in manifest order.
    names: Vec<String>,
}

impl ManifestDigester {
    /// Index the given manifest bytes.
    ///
    /// Sections whose first line isn't a `Name:` header are not indexed.  A manifest
    /// that doesn't contain a single complete line has no main-attributes section.
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let mut entries = HashMap::new();
        let mut names = vec![];

        let Some(pos) = find_section(&raw, 0, true) else {
            return Self {
                raw,
                main: None,
                entries,
                names,
            };
        };
        let main = Some(DigestEntry {
            offset: 0,
            length: pos.end_of_section,
            length_with_blank_line: pos.start_of_next,
        });

        let mut start = pos.start_of_next;
        while let Some(pos) = find_section(&raw, start, true) {
            if let Some(name) = section_name(&raw, start, pos.end_of_section) {
                trace!("manifest section {name:?} @{start}");
                let entry = DigestEntry {
                    offset: start,
                    length: pos.end_of_section - start,
                    length_with_blank_line: pos.start_of_next - start,
                };
                if entries.insert(name.clone(), entry).is_none() {
                    names.push(name);
                }
            }
            start = pos.start_of_next;
        }

        Self {
            raw,
            main,
            entries,
            names,
        }
    }

    /// The manifest bytes this index was built over.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Digest of the complete manifest.
    pub fn manifest_digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.raw)
    }

    /// Look up a section.  [`MAIN_ATTRIBUTES`] names the main-attributes section.
    pub fn get(&self, name: &str) -> Option<&DigestEntry> {
        if name == MAIN_ATTRIBUTES {
            self.main.as_ref()
        } else {
            self.entries.get(name)
        }
    }

    /// Digest of the main-attributes section (full form), if there is one.
    pub fn main_attributes_digest(&self, algorithm: DigestAlgorithm) -> Option<Vec<u8>> {
        self.main.map(|entry| self.digest(&entry, algorithm))
    }

    /// Digest of a section in its full form.
    pub fn digest(&self, entry: &DigestEntry, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(entry.full(&self.raw))
    }

    /// Digest of a section in its legacy form.
    pub fn digest_workaround(&self, entry: &DigestEntry, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(entry.legacy(&self.raw))
    }

    /// Names of all per-entry sections, in manifest order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Extract the value of a leading `Name:` header, joining continuation lines.
fn section_name(raw: &[u8], start: usize, end: usize) -> Option<String> {
    let section = &raw[start..end];
    let prefix_len = NAME_ATTR.len() + 2;
    if section.len() <= prefix_len
        || !section[..NAME_ATTR.len()].eq_ignore_ascii_case(NAME_ATTR.as_bytes())
        || &section[NAME_ATTR.len()..prefix_len] != b": "
    {
        return None;
    }

    let mut name = vec![];
    let mut lines = crate::manifest::lines(&section[prefix_len..]);
    name.extend_from_slice(lines.next()?);
    for line in lines {
        match line.strip_prefix(b" ") {
            Some(continuation) => name.extend_from_slice(continuation),
            None => break,
        }
    }

    String::from_utf8(name).ok()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const MANIFEST: &[u8] = b"Manifest-Version: 1.0\r\nCreated-By: test\r\n\r\n\
Name: a.txt\r\nSHA-256-Digest: AAAA\r\n\r\n\
Name: dir/with/a/rather/long/name/that/needs/to/wrap/over/more/than/one/li\r\n ne.txt\r\nSHA-256-Digest: BBBB\r\n\r\n";

    #[test]
    fn test_sections() {
        let md = ManifestDigester::new(MANIFEST);
        let names: Vec<&str> = md.entry_names().collect();
        assert_eq!(
            names,
            vec![
                "a.txt",
                "dir/with/a/rather/long/name/that/needs/to/wrap/over/more/than/one/line.txt"
            ]
        );

        let main = md.get(MAIN_ATTRIBUTES).unwrap();
        assert_eq!(
            main.full(md.raw()),
            b"Manifest-Version: 1.0\r\nCreated-By: test\r\n\r\n"
        );
        assert_eq!(
            main.legacy(md.raw()),
            b"Manifest-Version: 1.0\r\nCreated-By: test\r\n"
        );

        let a = md.get("a.txt").unwrap();
        assert_eq!(a.full(md.raw()), b"Name: a.txt\r\nSHA-256-Digest: AAAA\r\n\r\n");
        assert_eq!(a.legacy(md.raw()), b"Name: a.txt\r\nSHA-256-Digest: AAAA\r\n");
        assert!(md.get("b.txt").is_none());
    }

    #[test]
    fn test_digests() {
        let md = ManifestDigester::new(MANIFEST);
        let alg = DigestAlgorithm::Sha256;
        assert_eq!(md.manifest_digest(alg), alg.digest(MANIFEST));

        let a = *md.get("a.txt").unwrap();
        assert_eq!(
            md.digest(&a, alg),
            alg.digest(b"Name: a.txt\r\nSHA-256-Digest: AAAA\r\n\r\n")
        );
        assert_eq!(
            md.digest_workaround(&a, alg),
            alg.digest(b"Name: a.txt\r\nSHA-256-Digest: AAAA\r\n")
        );
        // repeated computation is stable
        assert_eq!(md.digest(&a, alg), md.digest(&a, alg));
        assert_eq!(
            md.main_attributes_digest(alg),
            Some(alg.digest(b"Manifest-Version: 1.0\r\nCreated-By: test\r\n\r\n"))
        );
    }

    #[test]
    fn test_last_section_without_blank_line() {
        let md = ManifestDigester::new(&b"Manifest-Version: 1.0\n\nName: x\nSHA1-Digest: A\n"[..]);
        let x = md.get("x").unwrap();
        assert_eq!(x.full(md.raw()), b"Name: x\nSHA1-Digest: A\n");
        assert_eq!(x.legacy(md.raw()), b"Name: x\nSHA1-Digest: A\n");
    }

    #[test]
    fn test_empty_manifest() {
        let md = ManifestDigester::new(Vec::new());
        assert!(md.is_empty());
        assert!(md.get(MAIN_ATTRIBUTES).is_none());
        assert_eq!(md.main_attributes_digest(DigestAlgorithm::Sha1), None);
    }

    #[test]
    fn test_unnamed_sections_are_skipped() {
        let md = ManifestDigester::new(
            &b"Manifest-Version: 1.0\n\nFoo: bar\n\nname: lower\nA: b\n\n"[..],
        );
        let names: Vec<&str> = md.entry_names().collect();
        assert_eq!(names, vec!["lower"]);
        assert_eq!(md.len(), 1);
    }
}
