//! Incremental markup reader
//!
//! Turns the raw byte stream from the compiler into complete markup units.
//! Bytes arrive in arbitrary chunks; `next` yields one item at a time and
//! reports "not yet" while a unit is still incomplete. Text outside any
//! escape block is ordinary process output and is surfaced as its own item
//! so the embedder can echo it.

use thiserror::Error;

use super::{ESC, MarkupKind, MarkupNode, MarkupTree, SEPARATOR};

/// Framing faults. One bad token never poisons the reader; it resyncs past
/// the offending bytes and keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("stray escape byte 0x{byte:02x} outside a markup block")]
    StrayEscape { byte: u8 },

    #[error("mismatched close tag '{found}' inside '{open}' block")]
    MismatchedClose { open: char, found: char },
}

/// One item extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadItem {
    /// Raw process output that was not part of any markup unit.
    Output(String),
    /// One complete markup unit.
    Unit(MarkupTree),
}

#[derive(Debug, Default)]
pub struct MarkupReader {
    buf: Vec<u8>,
}

enum Step<T> {
    Done(T),
    Incomplete,
}

impl MarkupReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next item, or `Ok(None)` if the buffered bytes do not yet
    /// contain one.
    pub fn next(&mut self) -> Result<Option<ReadItem>, MarkupError> {
        // Leading text up to the first escape is process output.
        let esc_at = self.buf.iter().position(|&b| b == ESC);
        match esc_at {
            Some(0) => {}
            Some(i) => {
                let more_follows = true;
                return Ok(self.take_output(i, more_follows).map(ReadItem::Output));
            }
            None => {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let len = self.buf.len();
                return Ok(self.take_output(len, false).map(ReadItem::Output));
            }
        }

        if self.buf.len() < 2 {
            return Ok(None);
        }

        let tag = self.buf[1];
        if tag.is_ascii_uppercase() {
            let mut pos = 0;
            match parse_unit(&self.buf, &mut pos) {
                Ok(Step::Done(tree)) => {
                    self.buf.drain(..pos);
                    Ok(Some(ReadItem::Unit(tree)))
                }
                Ok(Step::Incomplete) => Ok(None),
                Err(err) => {
                    // Resync past the offending bytes.
                    self.buf.drain(..pos.max(2));
                    Err(err)
                }
            }
        } else {
            self.buf.drain(..2);
            Err(MarkupError::StrayEscape { byte: tag })
        }
    }

    /// Lift `upto` bytes out of the buffer as output text. Holds back a
    /// truncated trailing UTF-8 sequence when more bytes may still arrive.
    fn take_output(&mut self, upto: usize, more_follows: bool) -> Option<String> {
        let (text, consumed) = match std::str::from_utf8(&self.buf[..upto]) {
            Ok(s) => (s.to_string(), upto),
            Err(e) if e.error_len().is_none() && !more_follows => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    return None;
                }
                (
                    String::from_utf8_lossy(&self.buf[..valid]).into_owned(),
                    valid,
                )
            }
            Err(_) => (String::from_utf8_lossy(&self.buf[..upto]).into_owned(), upto),
        };
        self.buf.drain(..consumed);
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Parse one unit starting at `buf[*pos] == ESC`, `buf[*pos + 1]` uppercase.
/// Advances `pos` past everything consumed; on error, `pos` covers the bytes
/// the caller must discard to resync.
fn parse_unit(buf: &[u8], pos: &mut usize) -> Result<Step<MarkupTree>, MarkupError> {
    let open = buf[*pos + 1] as char;
    *pos += 2;

    let mut children: Vec<MarkupNode> = Vec::new();
    let mut text: Vec<u8> = Vec::new();
    let mut after_separator = false;

    loop {
        let rel = match buf[*pos..].iter().position(|&b| b == ESC) {
            Some(i) => i,
            None => return Ok(Step::Incomplete),
        };
        text.extend_from_slice(&buf[*pos..*pos + rel]);
        *pos += rel;

        if *pos + 1 >= buf.len() {
            return Ok(Step::Incomplete);
        }
        let token = buf[*pos + 1];

        if token == SEPARATOR {
            children.push(text_node(std::mem::take(&mut text)));
            after_separator = true;
            *pos += 2;
        } else if token.is_ascii_uppercase() {
            if !text.is_empty() {
                children.push(text_node(std::mem::take(&mut text)));
            }
            match parse_unit(buf, pos)? {
                Step::Done(nested) => children.push(MarkupNode::Node(nested)),
                Step::Incomplete => return Ok(Step::Incomplete),
            }
            after_separator = false;
        } else if token.is_ascii_lowercase() {
            let close = token as char;
            *pos += 2;
            if close != open.to_ascii_lowercase() {
                return Err(MarkupError::MismatchedClose { open, found: close });
            }
            if !text.is_empty() || after_separator {
                children.push(text_node(text));
            }
            return Ok(Step::Done(MarkupTree::new(
                MarkupKind::from_tag(open),
                children,
            )));
        } else {
            *pos += 2;
            return Err(MarkupError::StrayEscape { byte: token });
        }
    }
}

fn text_node(bytes: Vec<u8>) -> MarkupNode {
    MarkupNode::Text(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame fields into one unit, e.g. `unit('O', &["1", "p1", "5", "8"])`.
    fn unit(tag: char, fields: &[&str]) -> Vec<u8> {
        let mut out = vec![ESC, tag as u8];
        for (i, f) in fields.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&[ESC, SEPARATOR]);
            }
            out.extend_from_slice(f.as_bytes());
        }
        out.extend_from_slice(&[ESC, tag.to_ascii_lowercase() as u8]);
        out
    }

    fn texts(tree: &MarkupTree) -> Vec<&str> {
        tree.children
            .iter()
            .filter_map(MarkupNode::as_text)
            .collect()
    }

    #[test]
    fn test_single_unit() {
        let mut reader = MarkupReader::new();
        reader.push(&unit('O', &["1", "p1", "5", "8"]));

        let item = reader.next().unwrap().unwrap();
        let ReadItem::Unit(tree) = item else {
            panic!("expected unit")
        };
        assert_eq!(tree.kind, MarkupKind::Properties);
        assert_eq!(texts(&tree), vec!["1", "p1", "5", "8"]);
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_incomplete_unit_waits_for_more_bytes() {
        let bytes = unit('T', &["2", "p1", "0", "3", "int"]);
        let (head, tail) = bytes.split_at(7);

        let mut reader = MarkupReader::new();
        reader.push(head);
        assert_eq!(reader.next().unwrap(), None);

        reader.push(tail);
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(tree.kind, MarkupKind::TypeInfo);
        assert_eq!(texts(&tree), vec!["2", "p1", "0", "3", "int"]);
    }

    #[test]
    fn test_output_before_unit() {
        let mut reader = MarkupReader::new();
        reader.push(b"Poly/ML 5.9 Release\n");
        reader.push(&unit('O', &["1", "p1", "5", "8"]));

        assert_eq!(
            reader.next().unwrap(),
            Some(ReadItem::Output("Poly/ML 5.9 Release\n".into()))
        );
        assert!(matches!(reader.next().unwrap(), Some(ReadItem::Unit(_))));
    }

    #[test]
    fn test_nested_error_blocks() {
        let mut bytes = vec![ESC, b'R'];
        bytes.extend_from_slice(b"1");
        bytes.extend_from_slice(&[ESC, SEPARATOR]);
        bytes.extend_from_slice(b"p77");
        bytes.extend_from_slice(&[ESC, SEPARATOR]);
        bytes.extend_from_slice(b"S");
        bytes.extend_from_slice(&unit('E', &["E", "10", "20", "type mismatch"]));
        bytes.extend_from_slice(&unit('E', &["W", "30", "34", "unused value"]));
        bytes.extend_from_slice(&[ESC, b'r']);

        let mut reader = MarkupReader::new();
        reader.push(&bytes);
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(tree.kind, MarkupKind::Compile);
        assert_eq!(texts(&tree), vec!["1", "p77", "S"]);

        let errors: Vec<_> = tree.nodes().collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, MarkupKind::Error);
        assert_eq!(texts(errors[0]), vec!["E", "10", "20", "type mismatch"]);
    }

    #[test]
    fn test_trailing_empty_field_is_kept() {
        let mut bytes = vec![ESC, b'T'];
        bytes.extend_from_slice(b"1");
        bytes.extend_from_slice(&[ESC, SEPARATOR]);
        bytes.extend_from_slice(&[ESC, b't']);

        let mut reader = MarkupReader::new();
        reader.push(&bytes);
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(texts(&tree), vec!["1", ""]);
    }

    #[test]
    fn test_mismatched_close_resyncs() {
        let mut reader = MarkupReader::new();
        reader.push(&[ESC, b'O']);
        reader.push(b"1");
        reader.push(&[ESC, b't']); // closes 'T', not 'O'
        reader.push(&unit('O', &["2", "p1", "5", "8"]));

        assert_eq!(
            reader.next().unwrap_err(),
            MarkupError::MismatchedClose {
                open: 'O',
                found: 't'
            }
        );
        // the next valid unit still comes through
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(texts(&tree), vec!["2", "p1", "5", "8"]);
    }

    #[test]
    fn test_stray_escape_reported() {
        let mut reader = MarkupReader::new();
        reader.push(&[ESC, b'?']);
        assert_eq!(
            reader.next().unwrap_err(),
            MarkupError::StrayEscape { byte: b'?' }
        );
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let mut reader = MarkupReader::new();
        reader.push(&unit('Q', &["1", "2"]));
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(tree.kind, MarkupKind::Unknown('Q'));
    }

    #[test]
    fn test_multibyte_text_survives_split() {
        let bytes = unit('T', &["1", "p1", "0", "3", "'a \u{2192} int"]);
        // split in the middle of the arrow's three-byte sequence
        let mid = bytes.iter().position(|&b| b == 0xE2).unwrap() + 1;
        let mut reader = MarkupReader::new();
        reader.push(&bytes[..mid]);
        assert_eq!(reader.next().unwrap(), None);
        reader.push(&bytes[mid..]);
        let ReadItem::Unit(tree) = reader.next().unwrap().unwrap() else {
            panic!("expected unit")
        };
        assert_eq!(texts(&tree)[4], "'a \u{2192} int");
    }
}
