//! Manifest syntax: sections of `name: value` headers separated by blank lines.
//!
//! The same syntax is used by `META-INF/MANIFEST.MF` and by signature files.  A line
//! starting with a single space continues the value of the previous header.  Lines may
//! end in `\r\n`, `\n` or `\r`.

use std::collections::HashMap;

use crate::error::{Result, VerifyError};

/// The header that names a per-entry section.
pub const NAME_ATTR: &str = "Name";

/// An ordered set of headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    headers: Vec<(String, String)>,
    /// ASCII-lowercased name to position in `headers`.
    index: HashMap<String, usize>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the headers of one section.
    ///
    /// Blank lines are ignored, so a section may be passed with or without its terminating
    /// blank line.
    pub fn parse(section: &[u8]) -> Result<Self> {
        let mut attrs = Self::new();
        let mut current: Option<usize> = None;

        for line in lines(section) {
            if line.is_empty() {
                continue;
            }
            if let Some(continuation) = line.strip_prefix(b" ") {
                let Some(idx) = current else {
                    return Err(invalid_header(line));
                };
                let continuation = decode_utf8(continuation, line)?;
                attrs.headers[idx].1.push_str(&continuation);
                continue;
            }

            let Some(colon) = line.windows(2).position(|w| w == b": ") else {
                return Err(invalid_header(line));
            };
            let (key, value) = (&line[..colon], &line[colon + 2..]);
            if key.is_empty() {
                return Err(invalid_header(line));
            }
            let (key, value) = (decode_utf8(key, line)?, decode_utf8(value, line)?);
            current = Some(attrs.insert_at(key, value));
        }

        Ok(attrs)
    }

    /// Look up a header value by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&idx| self.headers[idx].1.as_str())
    }

    /// Add a header.  A later header with the same name replaces the earlier value but
    /// keeps its position.
    pub fn insert(&mut self, name: String, value: String) {
        self.insert_at(name, value);
    }

    /// Insert and return the position the header ended up at.
    fn insert_at(&mut self, name: String, value: String) -> usize {
        let key = name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&idx) => {
                self.headers[idx].1 = value;
                idx
            }
            None => {
                let idx = self.headers.len();
                self.index.insert(key, idx);
                self.headers.push((name, value));
                idx
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn invalid_header(line: &[u8]) -> VerifyError {
    VerifyError::InvalidHeader {
        line: String::from_utf8_lossy(line).into_owned(),
    }
}

fn decode_utf8(bytes: &[u8], line: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid_header(line))
}

/// Iterate over the lines of `data`, without their terminators.
pub(crate) fn lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.iter().position(|b| *b == b'\r' || *b == b'\n') {
            Some(idx) => {
                let line = &rest[..idx];
                let skip = match &rest[idx..] {
                    [b'\r', b'\n', ..] => 2,
                    _ => 1,
                };
                rest = &rest[idx + skip..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = &[];
                Some(line)
            }
        }
    })
}

/// The location of one section within a manifest-formatted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionPos {
    /// Index of the last byte of the first line (excluding its terminator), if the
    /// first line has any content.
    pub end_of_first_line: Option<usize>,
    /// Index one past the terminator of the last non-blank line.
    pub end_of_section: usize,
    /// Index one past the terminating blank line; where the next section starts.
    pub start_of_next: usize,
}

/// Find the section starting at `offset`.
///
/// A section ends at a blank line.  When `at_eof` is true, a section also ends with the
/// last line terminator in the buffer; trailing bytes after it that aren't terminated
/// by a newline are not part of any section.  When `at_eof` is false, only a blank line
/// ends a section and `None` means more data is needed.
pub(crate) fn find_section(bytes: &[u8], offset: usize, at_eof: bool) -> Option<SectionPos> {
    let len = bytes.len();
    let mut i = offset;
    let mut last_line_end = offset;
    let mut all_blank = true;
    let mut end_of_first_line = None;
    let mut first_line_seen = false;

    while i < len {
        match bytes[i] {
            b'\r' | b'\n' => {
                if bytes[i] == b'\r' {
                    match bytes.get(i + 1) {
                        Some(b'\n') => i += 1,
                        Some(_) => {}
                        // a lone '\r' at the end of a partial buffer may be half of "\r\n"
                        None if !at_eof => return None,
                        None => {}
                    }
                }
                if !first_line_seen {
                    first_line_seen = true;
                    if !all_blank {
                        end_of_first_line = Some(line_content_end(bytes, i));
                    }
                }
                let at_last_byte = i == len - 1;
                if all_blank || (at_eof && at_last_byte) {
                    let end_of_section = if all_blank { last_line_end } else { i + 1 };
                    return Some(SectionPos {
                        end_of_first_line,
                        end_of_section,
                        start_of_next: i + 1,
                    });
                }
                last_line_end = i + 1;
                all_blank = true;
            }
            _ => all_blank = false,
        }
        i += 1;
    }

    None
}

/// Given the index of a line terminator's last byte, return the index of the last
/// content byte before the terminator.
fn line_content_end(bytes: &[u8], terminator_end: usize) -> usize {
    let mut end = terminator_end;
    while end > 0 && matches!(bytes[end], b'\r' | b'\n') {
        end -= 1;
    }
    end
}
