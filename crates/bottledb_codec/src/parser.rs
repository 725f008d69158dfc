//! Capsule parser.
//!
//! Capsules nest arbitrarily, so the parser matches braces with an explicit
//! stack of open node sequences instead of recursing. Each open sequence
//! keeps its head and the children parsed so far; a closing `}` pops it and
//! hands the finished capsule to its parent.

use crate::error::{CodecError, CodecResult};
use crate::syntax::Capsule;

/// Maximum nesting depth accepted by the parser.
///
/// Stored records are written by the engine and never come close; the limit
/// only bounds memory on corrupt input.
pub const MAX_DEPTH: usize = 512;

/// Parses exactly one capsule spanning the whole input.
///
/// # Errors
///
/// Returns an error if the input is not a single well-formed capsule.
///
/// # Example
///
/// ```
/// use bottledb_codec::parse;
///
/// let capsule = parse("{list:{3:a}{3:b\\}}}").unwrap();
/// assert_eq!(capsule.head, "list");
/// let items = capsule.as_nodes().unwrap();
/// assert_eq!(items[1].as_text(), Some("b}"));
/// ```
pub fn parse(input: &str) -> CodecResult<Capsule> {
    let (capsule, end) = parse_prefix(input)?;
    if end != input.len() {
        return Err(CodecError::TrailingInput { offset: end });
    }
    Ok(capsule)
}

/// Parses one capsule at the start of `input`.
///
/// Returns the capsule and the byte offset just past its closing brace.
///
/// # Errors
///
/// Returns an error if the input does not start with a well-formed capsule.
pub fn parse_prefix(input: &str) -> CodecResult<(Capsule, usize)> {
    Parser { input, pos: 0 }.run()
}

/// Splits a concatenation of capsules into its members.
///
/// # Errors
///
/// Returns an error if any member is malformed.
pub fn parse_sequence(input: &str) -> CodecResult<Vec<Capsule>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let (capsule, used) = parse_prefix(&input[offset..]).map_err(|e| shift(e, offset))?;
        out.push(capsule);
        offset += used;
    }
    Ok(out)
}

fn shift(error: CodecError, by: usize) -> CodecError {
    match error {
        CodecError::UnexpectedEof { offset } => CodecError::UnexpectedEof {
            offset: offset + by,
        },
        CodecError::Unexpected {
            offset,
            found,
            expected,
        } => CodecError::Unexpected {
            offset: offset + by,
            found,
            expected,
        },
        CodecError::TrailingInput { offset } => CodecError::TrailingInput {
            offset: offset + by,
        },
        other => other,
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn char_at(&self, offset: usize) -> char {
        self.input
            .get(offset..)
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn eof(&self) -> CodecError {
        CodecError::UnexpectedEof { offset: self.pos }
    }

    fn unexpected(&self, expected: &'static str) -> CodecError {
        CodecError::unexpected(self.pos, self.char_at(self.pos), expected)
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> CodecResult<()> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected(expected)),
            None => Err(self.eof()),
        }
    }

    /// Reads a head and consumes the `:` that ends it.
    fn head(&mut self) -> CodecResult<String> {
        let start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.eof()),
                Some(b':') => break,
                Some(b'{' | b'}' | b'\\') => return Err(self.unexpected("':'")),
                Some(_) => self.pos += 1,
            }
        }
        if start == self.pos {
            return Err(self.unexpected("a head"));
        }
        let head = self.input[start..self.pos].to_string();
        self.pos += 1;
        Ok(head)
    }

    /// Reads text up to, not including, the closing `}`.
    fn text(&mut self) -> CodecResult<String> {
        let mut out = String::new();
        let mut run = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.eof()),
                Some(b'}') => {
                    out.push_str(&self.input[run..self.pos]);
                    return Ok(out);
                }
                Some(b'{') => return Err(self.unexpected("'}'")),
                Some(b'\\') => {
                    out.push_str(&self.input[run..self.pos]);
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'\\' | b'{' | b'}')) => {
                            out.push(char::from(c));
                            self.pos += 1;
                            run = self.pos;
                        }
                        Some(_) => return Err(self.unexpected("an escaped '\\', '{' or '}'")),
                        None => return Err(self.eof()),
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn run(mut self) -> CodecResult<(Capsule, usize)> {
        let mut open: Vec<(String, Vec<Capsule>)> = Vec::new();

        loop {
            self.expect(b'{', "'{'")?;
            let head = self.head()?;

            let mut done = if self.peek() == Some(b'{') {
                if self.input.as_bytes()[self.pos..].starts_with(b"{}") {
                    self.pos += 2;
                    self.expect(b'}', "'}'")?;
                    Capsule::nodes(head, Vec::new())
                } else {
                    if open.len() >= MAX_DEPTH {
                        return Err(CodecError::TooDeep { limit: MAX_DEPTH });
                    }
                    open.push((head, Vec::new()));
                    continue;
                }
            } else {
                let text = self.text()?;
                self.pos += 1;
                Capsule::text(head, text)
            };

            // Hand finished capsules up until one parent still has siblings
            // to read.
            loop {
                let Some((_, children)) = open.last_mut() else {
                    return Ok((done, self.pos));
                };
                children.push(done);
                match self.peek() {
                    Some(b'}') => {
                        self.pos += 1;
                        let (head, nodes) = open.pop().unwrap_or_default();
                        done = Capsule::nodes(head, nodes);
                    }
                    Some(b'{') => break,
                    Some(_) => return Err(self.unexpected("'{' or '}'")),
                    None => return Err(self.eof()),
                }
            }
        }
    }
}
