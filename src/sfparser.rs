//! Incremental parser for signature files.
//!
//! Signature files use manifest syntax.  The parser is fed the file in arbitrary
//! chunks; complete sections are parsed as soon as their terminating blank line has
//! arrived, and the bytes they occupied are released.  The main attributes therefore
//! become available long before the end of a large signature file, which lets the
//! verifier decide early whether the per-entry sections are needed at all.

use std::collections::HashMap;

use crate::{
    error::Result,
    manifest::{find_section, Attributes, NAME_ATTR},
};

#[derive(Debug, Default)]
pub struct SignatureFileParser {
    /// Bytes not yet assigned to a complete section.
    pending: Vec<u8>,
    /// Length of `pending` at the last unsuccessful search for a section end.
    scanned: usize,
    main: Option<Attributes>,
    entries: Vec<(String, Attributes)>,
    index: HashMap<String, usize>,
    finished: bool,
}

impl SignatureFileParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the signature file.
    ///
    /// An empty chunk marks the end of the stream, the same as [`finish`].
    ///
    /// [`finish`]: SignatureFileParser::finish
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return self.finish();
        }
        debug_assert!(!self.finished, "update() after finish()");
        self.pending.extend_from_slice(data);
        self.parse_pending(false)
    }

    /// Mark the end of the stream and parse whatever remains.
    ///
    /// After this call the main attributes are always available, although they may be
    /// empty.  Calling it more than once has no further effect.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.parse_pending(true)?;

        // a final header line without a newline still counts
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.add_section(&rest)?;
        }
        self.main.get_or_insert_with(Attributes::new);
        Ok(())
    }

    /// Whether the bytes since the last search may end a section.
    ///
    /// A section ends at a blank line, which needs two adjacent line terminators
    /// other than `\r\n`, or a terminator at the very start of the section.  The
    /// last two scanned bytes are looked at again since a deferred `\r` may be
    /// completed by the new data.
    fn may_end_section(&self) -> bool {
        let from = self.scanned.saturating_sub(2);
        matches!(self.pending.first(), Some(b'\r' | b'\n'))
            || self.pending[from..]
                .windows(2)
                .any(|pair| matches!(pair, [b'\n', b'\n' | b'\r'] | [b'\r', b'\r']))
    }

    fn parse_pending(&mut self, at_eof: bool) -> Result<()> {
        if !at_eof && !self.may_end_section() {
            self.scanned = self.pending.len();
            return Ok(());
        }

        let mut start = 0;
        while let Some(pos) = find_section(&self.pending, start, at_eof) {
            let section = self.pending[start..pos.end_of_section].to_vec();
            self.add_section(&section)?;
            start = pos.start_of_next;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        Ok(())
    }

    fn add_section(&mut self, section: &[u8]) -> Result<()> {
        let attrs = Attributes::parse(section)?;

        if self.main.is_none() {
            self.main = Some(attrs);
            return Ok(());
        }
        if attrs.is_empty() {
            return Ok(());
        }

        let Some(name) = attrs.get(NAME_ATTR).map(str::to_owned) else {
            log::debug!("signature file section without a Name header, ignoring");
            return Ok(());
        };

        match self.index.get(&name) {
            // repeated sections for the same name accumulate
            Some(&idx) => {
                let existing = &mut self.entries[idx].1;
                for (key, value) in attrs.iter() {
                    existing.insert(key.to_owned(), value.to_owned());
                }
            }
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, attrs));
            }
        }
        Ok(())
    }

    /// The main attributes, or `None` if the first section is still incomplete.
    pub fn main_attributes(&self) -> Option<&Attributes> {
        self.main.as_ref()
    }

    /// Per-entry sections parsed so far, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Attributes)> {
        self.entries.iter().map(|(name, attrs)| (name.as_str(), attrs))
    }

    pub fn get(&self, name: &str) -> Option<&Attributes> {
        self.index.get(name).map(|&idx| &self.entries[idx].1)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const SF: &[u8] = b"Signature-Version: 1.0\r\n\
SHA-256-Digest-Manifest: xyz=\r\n\
Created-By: test\r\n\
\r\n\
Name: a.txt\r\n\
SHA-256-Digest: AAAA\r\n\
\r\n\
Name: b.txt\r\n\
SHA-256-Digest: BBBB\r\n\
\r\n";

    fn names(parser: &SignatureFileParser) -> Vec<&str> {
        parser.entries().map(|(name, _)| name).collect()
    }

    #[test]
    fn test_whole_file() {
        let mut parser = SignatureFileParser::new();
        parser.update(SF).unwrap();
        parser.finish().unwrap();

        let main = parser.main_attributes().unwrap();
        assert_eq!(main.get("Signature-Version"), Some("1.0"));
        assert_eq!(names(&parser), vec!["a.txt", "b.txt"]);
        assert_eq!(
            parser.get("b.txt").unwrap().get("SHA-256-Digest"),
            Some("BBBB")
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut parser = SignatureFileParser::new();
        let main_len = SF.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;

        for (i, byte) in SF.iter().enumerate() {
            parser.update(std::slice::from_ref(byte)).unwrap();
            // main attributes appear exactly when their blank line is complete
            assert_eq!(parser.main_attributes().is_some(), i + 1 >= main_len, "at {i}");
        }
        parser.update(&[]).unwrap();
        assert!(parser.is_finished());
        assert_eq!(names(&parser), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_main_only_available_at_finish() {
        let mut parser = SignatureFileParser::new();
        parser.update(b"Signature-Version: 1.0\n").unwrap();
        assert!(parser.main_attributes().is_none());
        parser.finish().unwrap();
        assert_eq!(
            parser.main_attributes().unwrap().get("Signature-Version"),
            Some("1.0")
        );
        assert_eq!(parser.entries().count(), 0);
    }

    #[test]
    fn test_unterminated_last_line() {
        let mut parser = SignatureFileParser::new();
        parser
            .update(b"Signature-Version: 1.0\n\nName: x\nSHA1-Digest: QQ==")
            .unwrap();
        parser.finish().unwrap();
        assert_eq!(parser.get("x").unwrap().get("SHA1-Digest"), Some("QQ=="));
    }

    #[test]
    fn test_repeated_sections_accumulate() {
        let mut parser = SignatureFileParser::new();
        parser
            .update(b"Signature-Version: 1.0\n\nName: x\nSHA1-Digest: A\n\nName: x\nSHA-256-Digest: B\n\n")
            .unwrap();
        parser.finish().unwrap();
        assert_eq!(names(&parser), vec!["x"]);
        let x = parser.get("x").unwrap();
        assert_eq!(x.get("SHA1-Digest"), Some("A"));
        assert_eq!(x.get("SHA-256-Digest"), Some("B"));
    }

    #[test]
    fn test_many_main_headers_streamed() {
        let count = 100_000;
        let mut sf = String::from("Signature-Version: 1.0\n");
        for i in 0..count {
            sf.push_str(&format!("X-{i}: v\n"));
        }
        sf.push_str("\nName: a\nSHA1-Digest: A\n\n");

        let mut parser = SignatureFileParser::new();
        for chunk in sf.as_bytes().chunks(4096) {
            parser.update(chunk).unwrap();
        }
        parser.finish().unwrap();
        assert_eq!(parser.main_attributes().unwrap().len(), count + 1);
        assert_eq!(names(&parser), vec!["a"]);
    }

    #[test]
    fn test_blank_line_split_across_chunks() {
        for split in [b"A: 1\r\n\r".len(), b"A: 1\r\n".len(), b"A: 1\r".len()] {
            let data = b"A: 1\r\n\r\nName: x\r\nB: 2\r\n\r\n";
            let mut parser = SignatureFileParser::new();
            parser.update(&data[..split]).unwrap();
            parser.update(&data[split..]).unwrap();
            assert_eq!(parser.main_attributes().unwrap().get("A"), Some("1"), "{split}");
            assert_eq!(names(&parser), vec!["x"], "{split}");
        }
    }

    #[test]
    fn test_empty_stream() {
        let mut parser = SignatureFileParser::new();
        parser.finish().unwrap();
        assert!(parser.main_attributes().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_header() {
        let mut parser = SignatureFileParser::new();
        assert!(parser.update(b"this is not a header\n\n").is_err());
    }
}
