//! Outbound command encoding
//!
//! Commands to the compiler use the same escape framing as its responses:
//! open tag, fields separated by `ESC ,`, lowercase close tag. The request
//! id is always the first field so the eventual response can be correlated.

use crate::markup::{ESC, MarkupKind, SEPARATOR};
use crate::models::{RequestId, Span};

/// Tree-navigation direction for a move command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    FirstChild,
    Next,
    Previous,
    Parent,
}

impl MoveDirection {
    pub fn kind(self) -> MarkupKind {
        match self {
            Self::FirstChild => MarkupKind::MoveFirstChild,
            Self::Next => MarkupKind::MoveNext,
            Self::Previous => MarkupKind::MovePrevious,
            Self::Parent => MarkupKind::MoveParent,
        }
    }
}

/// Which location a location query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRequest {
    Declared,
    WhereOpened,
    ParentStructure,
}

impl LocationRequest {
    pub fn kind(self) -> MarkupKind {
        match self {
            Self::Declared => MarkupKind::LocDeclared,
            Self::WhereOpened => MarkupKind::LocWhereOpened,
            Self::ParentStructure => MarkupKind::LocParentStructure,
        }
    }
}

fn frame(kind: MarkupKind, fields: &[&str]) -> Vec<u8> {
    let mut out = vec![ESC, kind.tag() as u8];
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(ESC);
            out.push(SEPARATOR);
        }
        out.extend_from_slice(field.as_bytes());
    }
    out.push(ESC);
    out.push(kind.close_tag() as u8);
    out
}

/// Compile request: id, file name, start offset, source length, source text.
pub fn encode_compile(id: RequestId, file: &str, source: &str) -> Vec<u8> {
    frame(
        MarkupKind::Compile,
        &[
            &id.to_string(),
            file,
            "0",
            &source.len().to_string(),
            source,
        ],
    )
}

/// Properties of the tree node covering a span.
pub fn encode_properties(id: RequestId, parse_id: &str, span: Span) -> Vec<u8> {
    query(MarkupKind::Properties, id, parse_id, span)
}

/// Type of the value at a span.
pub fn encode_type_query(id: RequestId, parse_id: &str, span: Span) -> Vec<u8> {
    query(MarkupKind::TypeInfo, id, parse_id, span)
}

pub fn encode_location(req: LocationRequest, id: RequestId, parse_id: &str, span: Span) -> Vec<u8> {
    query(req.kind(), id, parse_id, span)
}

pub fn encode_move(direction: MoveDirection, id: RequestId, parse_id: &str, span: Span) -> Vec<u8> {
    query(direction.kind(), id, parse_id, span)
}

fn query(kind: MarkupKind, id: RequestId, parse_id: &str, span: Span) -> Vec<u8> {
    frame(
        kind,
        &[
            &id.to_string(),
            parse_id,
            &span.start.to_string(),
            &span.end.to_string(),
        ],
    )
}
