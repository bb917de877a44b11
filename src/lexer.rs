//! Line lexer for assembly source.

const COMMENT_CHAR: char = ';';
const LABEL_SUFFIX: char = ':';

/// A single source line, split into its significant pieces.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Line<'a> {
    /// Blank or comment-only line.
    Empty,
    /// `name:` declaration. `trailing` is whatever followed the colon.
    Label {
        name: &'a str,
        trailing: Option<&'a str>,
    },
    /// Mnemonic with an optional operand token.
    Instruction {
        mnemonic: &'a str,
        operand: Option<&'a str>,
        trailing: Option<&'a str>,
    },
}

pub struct Lexer<'a> {
    line: &'a str,
    cursor: usize,
}

impl<'a> Lexer<'a> {
    /// Prepare a lexer over one line. The comment, if any, is dropped here.
    pub fn new(line: &'a str) -> Self {
        let line = match line.find(COMMENT_CHAR) {
            Some(pos) => &line[..pos],
            None => line,
        };
        Lexer {
            line: line.trim(),
            cursor: 0,
        }
    }

    /// Classify the line.
    pub fn lex(mut self) -> Line<'a> {
        if self.line.is_empty() {
            return Line::Empty;
        }

        if let Some(name) = self.read_label() {
            return Line::Label {
                name,
                trailing: self.read_word(),
            };
        }

        match self.read_word() {
            Some(mnemonic) => Line::Instruction {
                mnemonic,
                operand: self.read_word(),
                trailing: self.read_word(),
            },
            None => Line::Empty,
        }
    }

    /// Read `word:` at the cursor. Leaves the cursor untouched on a miss.
    fn read_label(&mut self) -> Option<&'a str> {
        let rest = &self.line[self.cursor..];
        let end = rest
            .char_indices()
            .find(|&(_, ch)| !is_word_char(ch))
            .map(|(pos, _)| pos)
            .unwrap_or(rest.len());

        if end == 0 || !rest[end..].starts_with(LABEL_SUFFIX) {
            return None;
        }

        self.cursor += end + LABEL_SUFFIX.len_utf8();
        Some(&rest[..end])
    }

    /// Read the next whitespace separated word.
    fn read_word(&mut self) -> Option<&'a str> {
        self.trim();
        let rest = &self.line[self.cursor..];
        if rest.is_empty() {
            return None;
        }

        let end = rest
            .char_indices()
            .find(|&(_, ch)| ch.is_whitespace())
            .map(|(pos, _)| pos)
            .unwrap_or(rest.len());

        self.cursor += end;
        Some(&rest[..end])
    }

    /// Skip whitespace at the cursor
    fn trim(&mut self) {
        let rest = &self.line[self.cursor..];
        self.cursor += rest.len() - rest.trim_start().len();
    }
}

/// Split source text into lines. `\n`, `\r\n` and a lone `\r` all end a line.
pub fn source_lines(source: &str) -> impl Iterator<Item = &str> {
    let mut rest = source;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(|ch| ch == '\n' || ch == '\r') {
            Some(pos) => {
                let line = &rest[..pos];
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[pos + skip..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

/// Shorthand for `Lexer::new(line).lex()`.
pub fn lex_line(line: &str) -> Line<'_> {
    Lexer::new(line).lex()
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
