//! Newick reading and writing.
//!
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree (',' subtree)* ')' label | label
//! label    = name? (':' length)?
//! ```
//!
//! Bracketed comments (`[&R]`, `[&lnP=...]`) are skipped.

use crate::error::{ChainError, Result};

/// Node produced by the parser, before it is turned into a time tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    pub name: Option<String>,
    pub length: Option<f64>,
    pub children: Vec<usize>,
}

/// Parses a Newick string into a flat node list. The last node is the root.
pub fn parse(input: &str) -> Result<Vec<ParsedNode>> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    parser.skip_ignored();
    parser.parse_subtree()?;
    parser.skip_ignored();
    if parser.peek() != Some(b';') {
        return Err(parser.error("expected ';' at end of tree"));
    }
    Ok(parser.nodes)
}

/// Formats a branch length with the shortest representation that reads back
/// to the same value.
pub fn format_length(length: f64) -> String {
    let s = format!("{}", length);
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Wraps a label in single quotes when it would not read back bare.
/// Embedded quotes are doubled.
pub fn quote_label(label: &str) -> String {
    let needs_quotes = label.is_empty()
        || label
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '\'' | ':' | ';' | ','));
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<ParsedNode>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, msg: &str) -> ChainError {
        ChainError::Parse(format!("newick, byte {}: {}", self.pos, msg))
    }

    fn skip_ignored(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b']' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn parse_subtree(&mut self) -> Result<usize> {
        let mut children = Vec::new();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                self.skip_ignored();
                children.push(self.parse_subtree()?);
                self.skip_ignored();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
        self.skip_ignored();
        let name = self.parse_name()?;
        self.skip_ignored();
        let length = if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_ignored();
            Some(self.parse_length()?)
        } else {
            None
        };
        if name.is_none() && children.is_empty() {
            return Err(self.error("unnamed tip"));
        }
        self.nodes.push(ParsedNode {
            name,
            length,
            children,
        });
        Ok(self.nodes.len() - 1)
    }

    fn parse_name(&mut self) -> Result<Option<String>> {
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            let mut bytes = Vec::new();
            loop {
                match self.peek() {
                    Some(b'\'') if self.input.get(self.pos + 1) == Some(&b'\'') => {
                        bytes.push(b'\'');
                        self.pos += 2;
                    }
                    Some(b'\'') => {
                        self.pos += 1;
                        break;
                    }
                    Some(c) => {
                        bytes.push(c);
                        self.pos += 1;
                    }
                    None => return Err(self.error("unterminated quoted label")),
                }
            }
            return Ok(Some(String::from_utf8_lossy(&bytes).to_string()));
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'(' | b')' | b',' | b':' | b';' | b'[') || c.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos > start {
            Ok(Some(String::from_utf8_lossy(&self.input[start..self.pos]).to_string()))
        } else {
            Ok(None)
        }
    }

    fn parse_length(&mut self) -> Result<f64> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("branch length is not UTF-8"))?;
        text.parse::<f64>()
            .map_err(|_| self.error(&format!("bad branch length '{}'", text)))
    }
}
