//! Bytecode representation and the two-pass assembler that produces it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::AsmError;
use crate::lexer::{lex_line, source_lines, Line};
use crate::token::Op;

/// A resolved instruction. Jump and call operands are absolute program indices.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub operand: Option<i64>,
}

impl Instruction {
    pub const fn new(op: Op, operand: Option<i64>) -> Self {
        Instruction { op, operand }
    }

    pub const fn bare(op: Op) -> Self {
        Instruction { op, operand: None }
    }

    pub const fn with_operand(op: Op, operand: i64) -> Self {
        Instruction {
            op,
            operand: Some(operand),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Some(operand) => write!(f, "{} {}", self.op, operand),
            None => write!(f, "{}", self.op),
        }
    }
}

/// Immutable, fully resolved instruction sequence.
///
/// Cloning is cheap; clones share the same instructions.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Program {
    instructions: Arc<[Instruction]>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Program {
            instructions: instructions.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new(Vec::new())
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Program::new(instructions)
    }
}

impl<'p> IntoIterator for &'p Program {
    type Item = &'p Instruction;
    type IntoIter = std::slice::Iter<'p, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One instruction per line, prefixed with its address.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (addr, instruction) in self.iter().enumerate() {
            writeln!(f, "{:04}  {}", addr, instruction)?;
        }
        Ok(())
    }
}

/// Operand as written in the source, before label resolution.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RawOperand<'a> {
    Value(i64),
    Label(&'a str),
}

/// Instruction from the collection pass.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RawInstruction<'a> {
    pub op: Op,
    pub operand: Option<RawOperand<'a>>,
    /// 1-based source line, kept for diagnostics.
    pub line: usize,
}

/// Result of parsing a single significant line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParsedLine<'a> {
    Label(&'a str),
    Instruction(RawInstruction<'a>),
}

/// Parse one source line. Blank and comment-only lines yield `None`.
///
/// * `line` the raw text of the line
/// * `line_no` its 1-based position, used in errors
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<ParsedLine<'_>>, AsmError> {
    match lex_line(line) {
        Line::Empty => Ok(None),
        Line::Label { trailing: Some(token), .. } => Err(AsmError::TrailingToken {
            token: token.to_string(),
            line: line_no,
        }),
        Line::Label { name, trailing: None } => Ok(Some(ParsedLine::Label(name))),
        Line::Instruction {
            mnemonic,
            operand,
            trailing,
        } => {
            let op = Op::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownInstruction {
                token: mnemonic.to_string(),
                line: line_no,
            })?;

            if let Some(token) = trailing {
                return Err(AsmError::TrailingToken {
                    token: token.to_string(),
                    line: line_no,
                });
            }

            let operand = operand
                .map(|token| parse_operand(token, line_no))
                .transpose()?;

            Ok(Some(ParsedLine::Instruction(RawInstruction {
                op,
                operand,
                line: line_no,
            })))
        }
    }
}

/// Alphabetic tokens are label references, anything else must be a decimal integer.
fn parse_operand(token: &str, line_no: usize) -> Result<RawOperand<'_>, AsmError> {
    if token.chars().all(char::is_alphabetic) {
        return Ok(RawOperand::Label(token));
    }

    token
        .parse::<i64>()
        .map(RawOperand::Value)
        .map_err(|_| AsmError::InvalidOperand {
            token: token.to_string(),
            line: line_no,
        })
}

/// Two-pass assembler.
///
/// The label table lives only as long as the parser; [`Parser::parse`] consumes it.
pub struct Parser<'a> {
    source: &'a str,
    labels: HashMap<&'a str, usize>,
    instructions: Vec<RawInstruction<'a>>,
}

impl<'a> Parser<'a> {
    /// * `source` program to parse
    pub fn new(source: &'a str) -> Self {
        Parser {
            source,
            labels: HashMap::new(),
            instructions: Vec::new(),
        }
    }

    /// Parse `source` and generate a `Program`
    pub fn parse(mut self) -> Result<Program, AsmError> {
        self.collect()?;
        self.resolve()
    }

    /// First pass: bind every label to the index of the next instruction and
    /// gather the unresolved instructions.
    fn collect(&mut self) -> Result<(), AsmError> {
        for (index, line) in source_lines(self.source).enumerate() {
            let line_no = index + 1;
            match parse_line(line, line_no)? {
                Some(ParsedLine::Label(name)) => {
                    if self.labels.contains_key(name) {
                        return Err(AsmError::DuplicateLabel {
                            name: name.to_string(),
                            line: line_no,
                        });
                    }
                    self.labels.insert(name, self.instructions.len());
                }
                Some(ParsedLine::Instruction(raw)) => self.instructions.push(raw),
                None => {}
            }
        }
        Ok(())
    }

    /// Second pass: replace label references with their addresses.
    fn resolve(self) -> Result<Program, AsmError> {
        let labels = self.labels;
        let instructions = self
            .instructions
            .into_iter()
            .map(|raw| {
                let operand = match raw.operand {
                    None => None,
                    Some(RawOperand::Value(value)) => Some(value),
                    Some(RawOperand::Label(name)) => match labels.get(name) {
                        Some(&addr) => Some(addr as i64),
                        None => {
                            return Err(AsmError::UndefinedLabel {
                                name: name.to_string(),
                                line: raw.line,
                            })
                        }
                    },
                };
                Ok(Instruction::new(raw.op, operand))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Program::new(instructions))
    }
}

/// Compile source text into a `Program`.
pub fn compile(source: &str) -> Result<Program, AsmError> {
    Parser::new(source).parse()
}
