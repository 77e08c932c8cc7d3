//! Directive grammar embedded in transcript text
//!
//! ```text
//! directive := '[' ws* "ACTION" ws* ':' ws* KIND ws* ':' ARG ']'
//! KIND      := [A-Z0-9_]+
//! ARG       := any characters except ']' (trimmed, non-empty)
//! ```

use std::fmt;
use std::str::CharIndices;

/// Keyword that opens a directive
const KEYWORD: &str = "ACTION";

/// Longest unterminated tail carried between fragments
const MAX_CARRY: usize = 512;

/// Kind of a parsed directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// `GEN_IMAGE`: generate an image from the argument
    GenerateImage,
    /// Any kind this build does not act on
    Other(String),
}

impl ActionKind {
    pub fn from_token(token: &str) -> Self {
        match token {
            "GEN_IMAGE" => Self::GenerateImage,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::GenerateImage => "GEN_IMAGE",
            Self::Other(kind) => kind,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `(kind, argument)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDirective {
    pub kind: ActionKind,
    pub argument: String,
}

/// Scan `text` for directives, left to right
pub fn scan(text: &str) -> Directives<'_> {
    Directives {
        text,
        pos: 0,
        matched_end: 0,
    }
}

/// Lazy iterator over the directives of one piece of text
pub struct Directives<'a> {
    text: &'a str,
    pos: usize,
    matched_end: usize,
}

impl<'a> Directives<'a> {
    /// Byte offset just past the last directive yielded so far
    pub fn matched_end(&self) -> usize {
        self.matched_end
    }
}

impl<'a> Iterator for Directives<'a> {
    type Item = ActionDirective;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(offset) = self.text[self.pos..].find('[') {
            let open = self.pos + offset;
            match parse_at(self.text, open) {
                Some((directive, end)) => {
                    self.pos = end;
                    self.matched_end = end;
                    return Some(directive);
                }
                None => self.pos = open + 1,
            }
        }
        self.pos = self.text.len();
        None
    }
}

struct Cursor<'a> {
    text: &'a str,
    chars: std::iter::Peekable<CharIndices<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, start: usize) -> Self {
        Self {
            text,
            chars: text[start..].char_indices().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, want: char) -> Option<()> {
        self.chars.next_if(|&(_, c)| c == want).map(|_| ())
    }

    fn keyword(&mut self, word: &str) -> Option<()> {
        for want in word.chars() {
            self.expect(want)?;
        }
        Some(())
    }

    fn kind(&mut self) -> Option<String> {
        let mut kind = String::new();
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
        {
            kind.push(c);
        }
        (!kind.is_empty()).then_some(kind)
    }

    /// Everything up to the closing bracket; returns (argument, offset past `]`)
    fn argument(&mut self, base: usize) -> Option<(&'a str, usize)> {
        let start = self.chars.peek().map(|&(i, _)| i)?;
        for (i, c) in self.chars.by_ref() {
            if c == ']' {
                let arg = &self.text[base + start..base + i];
                return Some((arg, base + i + 1));
            }
        }
        None
    }
}

/// Try to parse a directive whose '[' sits at byte `open`
fn parse_at(text: &str, open: usize) -> Option<(ActionDirective, usize)> {
    let mut cursor = Cursor::new(text, open);
    cursor.expect('[')?;
    cursor.skip_ws();
    cursor.keyword(KEYWORD)?;
    cursor.skip_ws();
    cursor.expect(':')?;
    cursor.skip_ws();
    let kind = cursor.kind()?;
    cursor.skip_ws();
    cursor.expect(':')?;
    let (argument, end) = cursor.argument(open)?;

    let argument = argument.trim();
    if argument.is_empty() {
        return None;
    }

    Some((
        ActionDirective {
            kind: ActionKind::from_token(&kind),
            argument: argument.to_string(),
        },
        end,
    ))
}

/// True if `tail` could still grow into a directive
fn could_be_directive(tail: &str) -> bool {
    let rest = tail[1..].trim_start();
    if rest.len() < KEYWORD.len() {
        return KEYWORD.starts_with(rest);
    }
    rest.starts_with(KEYWORD) && !tail.contains(']')
}

/// Incremental scanner for streamed transcript fragments
///
/// Each fragment is scanned as soon as it arrives. A directive whose closing
/// bracket has not arrived yet is carried over and completed by a later
/// fragment.
#[derive(Debug, Default)]
pub struct DirectiveScanner {
    carry: String,
}

impl DirectiveScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the directives completed by it
    pub fn feed(&mut self, fragment: &str) -> Vec<ActionDirective> {
        let mut buffer = std::mem::take(&mut self.carry);
        buffer.push_str(fragment);

        let mut directives = scan(&buffer);
        let found: Vec<ActionDirective> = directives.by_ref().collect();
        let consumed = directives.matched_end();

        let rest = &buffer[consumed..];
        let candidate = rest
            .match_indices('[')
            .map(|(open, _)| &rest[open..])
            .find(|tail| could_be_directive(tail));
        if let Some(tail) = candidate {
            if tail.len() <= MAX_CARRY {
                self.carry = tail.to_string();
            }
        }

        found
    }

    /// Drop any partial directive (turn boundary)
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    pub fn pending(&self) -> &str {
        &self.carry
    }
}
