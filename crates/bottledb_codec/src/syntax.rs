//! Capsule syntax tree.

use crate::error::{CodecError, CodecResult};

/// The payload of a capsule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Unescaped text: primitive text, an entity id, an enum variant or a
    /// blob name.
    Text(String),
    /// A sequence of nested capsules. An empty sequence is written `{}`.
    Nodes(Vec<Capsule>),
}

/// One node of the capsule grammar: `{head:payload}`.
///
/// The head is a type index, one of the reserved tags (`list`, `map`,
/// `file`, `img`) or a field name. The syntax tree does not know which; that
/// is decided by the object codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule {
    /// Text before the first `:`.
    pub head: String,
    /// Everything after it.
    pub body: Body,
}

/// Returns true if `head` can be written as a capsule head.
///
/// Heads are non-empty and contain none of `{`, `}`, `:`, `\`.
#[must_use]
pub fn is_valid_head(head: &str) -> bool {
    !head.is_empty() && !head.contains(['{', '}', ':', '\\'])
}

impl Capsule {
    /// Creates a text capsule.
    pub fn text(head: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            body: Body::Text(text.into()),
        }
    }

    /// Creates a node-sequence capsule.
    pub fn nodes(head: impl Into<String>, nodes: Vec<Capsule>) -> Self {
        Self {
            head: head.into(),
            body: Body::Nodes(nodes),
        }
    }

    /// Creates a text capsule after checking the head.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidHead`] if the head cannot be written.
    pub fn try_text(head: impl Into<String>, text: impl Into<String>) -> CodecResult<Self> {
        let head = head.into();
        if !is_valid_head(&head) {
            return Err(CodecError::invalid_head(head));
        }
        Ok(Self::text(head, text))
    }

    /// Returns the text payload, if this is a text capsule.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            Body::Nodes(_) => None,
        }
    }

    /// Returns the nested capsules, if this is a node-sequence capsule.
    #[must_use]
    pub fn as_nodes(&self) -> Option<&[Capsule]> {
        match &self.body {
            Body::Nodes(nodes) => Some(nodes),
            Body::Text(_) => None,
        }
    }

    /// Returns the first child whose head equals `name`.
    ///
    /// Used to read a single field out of an entity capsule without decoding
    /// the rest of it.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Capsule> {
        self.as_nodes()?.iter().find(|c| c.head == name)
    }

    /// Visits this capsule and every descendant, parents first.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a Capsule)) {
        let mut pending = vec![self];
        while let Some(capsule) = pending.pop() {
            visit(capsule);
            if let Body::Nodes(nodes) = &capsule.body {
                pending.extend(nodes.iter().rev());
            }
        }
    }

    /// Returns true if any capsule in this tree is `{head:text}`.
    #[must_use]
    pub fn contains_text_node(&self, head: &str, text: &str) -> bool {
        let mut found = false;
        self.walk(|c| {
            if !found && c.head == head && c.as_text() == Some(text) {
                found = true;
            }
        });
        found
    }
}
