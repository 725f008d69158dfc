//! Capsule writer.

use crate::syntax::{Body, Capsule};
use std::borrow::Cow;
use std::fmt;

/// Escapes `\`, `{` and `}` in a text payload.
///
/// Returns the input unchanged when nothing needs escaping.
#[must_use]
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['\\', '{', '}']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        if matches!(c, '\\' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    Cow::Owned(out)
}

fn write_to(capsule: &Capsule, out: &mut impl fmt::Write) -> fmt::Result {
    out.write_char('{')?;
    out.write_str(&capsule.head)?;
    out.write_char(':')?;
    match &capsule.body {
        Body::Text(text) => out.write_str(&escape(text))?,
        Body::Nodes(nodes) if nodes.is_empty() => out.write_str("{}")?,
        Body::Nodes(nodes) => {
            for node in nodes {
                write_to(node, out)?;
            }
        }
    }
    out.write_char('}')
}

impl fmt::Display for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_to(self, f)
    }
}

impl Capsule {
    /// Renders the capsule as text.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_to(self, &mut out);
        out
    }
}
