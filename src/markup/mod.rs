//! Markup protocol representation
//!
//! The compiler's IDE mode frames every message as an escape-tagged block:
//! `ESC K` opens a block of kind `K` (an uppercase letter), `ESC ,` separates
//! fields, and `ESC k` (the lowercase of the open tag) closes it. Blocks
//! nest; leaves are plain text. Parsing performs no semantic validation —
//! only the dispatcher knows, per kind, how many children to expect and how
//! to read them.

pub mod parser;

pub use parser::{MarkupError, MarkupReader, ReadItem};

use serde::{Deserialize, Serialize};

/// Escape byte framing every protocol token.
pub const ESC: u8 = 0x1b;

/// Field separator, written as `ESC ,`.
pub const SEPARATOR: u8 = b',';

/// Discriminant tag of a markup unit.
///
/// The set of kinds the dispatcher understands is closed; tags outside it
/// are carried through as `Unknown` and rejected at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkupKind {
    /// `R` — compile result: request id, parse id, status, error blocks.
    Compile,
    /// `O` — properties of the tree node at a position.
    Properties,
    /// `T` — type of the value at a position.
    TypeInfo,
    /// `I` — location where the identifier was declared.
    LocDeclared,
    /// `J` — location where the enclosing structure was opened.
    LocWhereOpened,
    /// `V` — location of the parent structure.
    LocParentStructure,
    /// `C` — navigation: moved to first child.
    MoveFirstChild,
    /// `N` — navigation: moved to next sibling.
    MoveNext,
    /// `P` — navigation: moved to previous sibling.
    MovePrevious,
    /// `U` — navigation: moved to parent.
    MoveParent,
    /// `E` — error block nested inside a compile result.
    Error,
    /// Any other uppercase tag; passed through for the dispatcher to reject.
    Unknown(char),
}

impl MarkupKind {
    pub fn from_tag(tag: char) -> Self {
        match tag {
            'R' => Self::Compile,
            'O' => Self::Properties,
            'T' => Self::TypeInfo,
            'I' => Self::LocDeclared,
            'J' => Self::LocWhereOpened,
            'V' => Self::LocParentStructure,
            'C' => Self::MoveFirstChild,
            'N' => Self::MoveNext,
            'P' => Self::MovePrevious,
            'U' => Self::MoveParent,
            'E' => Self::Error,
            other => Self::Unknown(other),
        }
    }

    pub fn tag(&self) -> char {
        match self {
            Self::Compile => 'R',
            Self::Properties => 'O',
            Self::TypeInfo => 'T',
            Self::LocDeclared => 'I',
            Self::LocWhereOpened => 'J',
            Self::LocParentStructure => 'V',
            Self::MoveFirstChild => 'C',
            Self::MoveNext => 'N',
            Self::MovePrevious => 'P',
            Self::MoveParent => 'U',
            Self::Error => 'E',
            Self::Unknown(c) => *c,
        }
    }

    pub fn close_tag(&self) -> char {
        self.tag().to_ascii_lowercase()
    }
}

/// One child of a markup tree: either leaf text or a nested block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkupNode {
    Text(String),
    Node(MarkupTree),
}

impl MarkupNode {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&MarkupTree> {
        match self {
            Self::Text(_) => None,
            Self::Node(t) => Some(t),
        }
    }
}

/// One self-describing message received from the compiler: a kind tag plus
/// ordered children. Created per incoming unit, consumed by the dispatcher,
/// then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupTree {
    pub kind: MarkupKind,
    pub children: Vec<MarkupNode>,
}

impl MarkupTree {
    pub fn new(kind: MarkupKind, children: Vec<MarkupNode>) -> Self {
        Self { kind, children }
    }

    /// Nested block children, in order.
    pub fn nodes(&self) -> impl Iterator<Item = &MarkupTree> {
        self.children.iter().filter_map(MarkupNode::as_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for tag in ['R', 'O', 'T', 'I', 'J', 'V', 'C', 'N', 'P', 'U', 'E'] {
            let kind = MarkupKind::from_tag(tag);
            assert_eq!(kind.tag(), tag);
            assert_eq!(kind.close_tag(), tag.to_ascii_lowercase());
            assert!(!matches!(kind, MarkupKind::Unknown(_)));
        }
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let kind = MarkupKind::from_tag('Q');
        assert_eq!(kind, MarkupKind::Unknown('Q'));
        assert_eq!(kind.tag(), 'Q');
    }

    #[test]
    fn test_node_accessors() {
        let tree = MarkupTree::new(
            MarkupKind::Compile,
            vec![
                MarkupNode::Text("1".into()),
                MarkupNode::Node(MarkupTree::new(MarkupKind::Error, vec![])),
            ],
        );
        assert_eq!(tree.children[0].as_text(), Some("1"));
        assert!(tree.children[0].as_node().is_none());
        assert_eq!(tree.nodes().count(), 1);
    }
}
