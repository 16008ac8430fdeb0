use std::fmt;

use duck_common::{
    instruction::{OFFSET_MAX, OFFSET_MIN},
    BytecodeFile, BytecodeFileHeader, CondFlag, Instruction, InstructionError, OpCode,
    ParseCondFlagError, Word, PC_REGISTER, ZERO_REGISTER,
};
use indexmap::IndexMap;
use thiserror::Error;

pub mod disassembler;
pub mod source;

use source::{LineBody, SourceLine, SymbolicOp};

pub const DEFAULT_ERROR_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum AssemblerError {
    #[error("Syntax error: {0}")]
    SyntaxError(String),
    #[error(transparent)]
    UnknownPredicate(#[from] ParseCondFlagError),
    #[error("Invalid register: {0}")]
    InvalidRegister(String),
    #[error("Offset {0} does not fit in the offset field")]
    OffsetOutOfRange(String),
    #[error("Invalid data value: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Instruction(#[from] InstructionError),
    #[error("Duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("Unknown symbol: {0}")]
    UndefinedSymbol(String),
    #[error("{symbol} is {offset} words away, too far for a relative reference")]
    SymbolOutOfRange { symbol: String, offset: i64 },
    #[error("Too many errors ({count}), the limit is {limit}")]
    TooManyErrors { count: usize, limit: usize },
    #[error("Assembly failed with {0} error(s)")]
    Rejected(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Give up once more errors than this were reported. `None` never gives up.
    pub error_limit: Option<usize>,
    pub verbose: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            error_limit: Some(DEFAULT_ERROR_LIMIT),
            verbose: false,
        }
    }
}

/// An error tied to the source line (1-based) that caused it.
#[derive(Debug)]
pub struct Diagnostic {
    pub line: usize,
    pub text: String,
    pub error: AssemblerError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.error, self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedItem {
    Instruction(Instruction),
    Data(Word),
    Comment,
}

/// A source line after symbol resolution. Displays as fully resolved
/// assembly that assembles to the same word again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub address: Word,
    pub label: Option<String>,
    pub item: ResolvedItem,
    pub comment: Option<String>,
}

impl ResolvedLine {
    pub fn word(&self) -> Option<Word> {
        match &self.item {
            ResolvedItem::Instruction(instr) => Some(instr.encode()),
            ResolvedItem::Data(value) => Some(*value),
            ResolvedItem::Comment => None,
        }
    }
}

impl fmt::Display for ResolvedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(label) = &self.label {
            parts.push(format!("{label}:"));
        }
        match &self.item {
            ResolvedItem::Instruction(instr) => parts.push(instr.to_string()),
            ResolvedItem::Data(value) => parts.push(format!("DATA {value}")),
            ResolvedItem::Comment => {}
        }
        if let Some(comment) = &self.comment {
            parts.push(comment.clone());
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub lines: Vec<ResolvedLine>,
    pub symbols: IndexMap<String, Word>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Assembly {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The resolved program, one line per kept source line.
    pub fn to_text(&self) -> String {
        self.lines
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The words to load at address 0. Lines with errors emit no word, so
    /// an assembly with diagnostics has no valid image and is rejected.
    pub fn words(&self) -> Result<Vec<Word>, AssemblerError> {
        if !self.is_ok() {
            return Err(AssemblerError::Rejected(self.diagnostics.len()));
        }
        Ok(self.lines.iter().filter_map(ResolvedLine::word).collect())
    }

    pub fn to_bytecode_file(&self, entrypoint: Word) -> Result<BytecodeFile, AssemblerError> {
        Ok(BytecodeFile {
            header: BytecodeFileHeader {
                labels: self.symbols.clone(),
                entrypoint,
            },
            data: self.words()?,
        })
    }
}

struct ParsedLine<'a> {
    number: usize,
    text: &'a str,
    line: SourceLine,
}

/// Two pass assembler. The first pass classifies lines and assigns label
/// addresses, the second resolves symbolic references relative to the
/// address of the referencing instruction.
#[derive(Debug, Default)]
pub struct Assembler {
    config: AssemblerConfig,
    symbols: IndexMap<String, Word>,
    diagnostics: Vec<Diagnostic>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AssemblerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Assembles `program`, collecting per-line errors as diagnostics.
    /// Only exceeding the error limit aborts.
    pub fn assemble(&mut self, program: &str) -> Result<Assembly, AssemblerError> {
        self.symbols.clear();
        self.diagnostics.clear();

        let parsed = self.first_pass(program)?;
        let lines = self.second_pass(parsed)?;

        Ok(Assembly {
            lines,
            symbols: std::mem::take(&mut self.symbols),
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    /// Like [`Assembler::assemble`] but any diagnostic fails the whole
    /// program. The entrypoint is address 0.
    pub fn assemble_program(&mut self, program: &str) -> Result<BytecodeFile, AssemblerError> {
        self.assemble(program)?.to_bytecode_file(0)
    }

    fn report(&mut self, number: usize, text: &str, error: AssemblerError) -> Result<(), AssemblerError> {
        tracing::warn!("line {number}: {error}: {}", text.trim());
        self.diagnostics.push(Diagnostic {
            line: number,
            text: text.trim().to_string(),
            error,
        });

        match self.config.error_limit {
            Some(limit) if self.diagnostics.len() > limit => Err(AssemblerError::TooManyErrors {
                count: self.diagnostics.len(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn first_pass<'a>(&mut self, program: &'a str) -> Result<Vec<ParsedLine<'a>>, AssemblerError> {
        let mut parsed = Vec::new();
        let mut address: Word = 0;

        for (index, text) in program.lines().enumerate() {
            let number = index + 1;
            let mut line = match source::parse_line(text) {
                Ok(line) => line,
                Err(error) => {
                    self.report(number, text, error)?;
                    continue;
                }
            };

            if let Some(label) = line.label.take() {
                if self.symbols.contains_key(&label) {
                    self.report(number, text, AssemblerError::DuplicateLabel(label))?;
                } else {
                    self.symbols.insert(label.clone(), address);
                    line.label = Some(label);
                }
            }

            if self.config.verbose {
                tracing::info!("{number:>4} @{address:<4} {:?} {}", line.body.kind(), text.trim());
            }

            if line.body.occupies_word() {
                address += 1;
            }
            parsed.push(ParsedLine { number, text, line });
        }

        Ok(parsed)
    }

    fn second_pass(&mut self, parsed: Vec<ParsedLine<'_>>) -> Result<Vec<ResolvedLine>, AssemblerError> {
        let mut lines = Vec::with_capacity(parsed.len());
        let mut address: Word = 0;

        for ParsedLine { number, text, line } in parsed {
            let SourceLine {
                label,
                body,
                comment,
            } = line;
            let occupies_word = body.occupies_word();

            let item = match body {
                LineBody::Full(instr) => Some(ResolvedItem::Instruction(instr)),
                LineBody::Data(value) => Some(ResolvedItem::Data(value)),
                LineBody::Comment => Some(ResolvedItem::Comment),
                LineBody::Symbolic { op, cond, symbol } => {
                    match self.resolve(address, op, cond, &symbol) {
                        Ok(instr) => Some(ResolvedItem::Instruction(instr)),
                        Err(error) => {
                            self.report(number, text, error)?;
                            None
                        }
                    }
                }
            };

            if let Some(item) = item {
                lines.push(ResolvedLine {
                    address,
                    label,
                    item,
                    comment,
                });
            }
            if occupies_word {
                address += 1;
            }
        }

        Ok(lines)
    }

    /// Builds the PC-relative instruction for a symbolic reference. The
    /// program counter holds `address` while the instruction executes.
    fn resolve(
        &self,
        address: Word,
        op: SymbolicOp,
        cond: CondFlag,
        symbol: &str,
    ) -> Result<Instruction, AssemblerError> {
        let destination = *self
            .symbols
            .get(symbol)
            .ok_or_else(|| AssemblerError::UndefinedSymbol(symbol.to_string()))?;

        let offset = i64::from(destination) - i64::from(address);
        let in_range = i32::try_from(offset)
            .ok()
            .filter(|offset| (OFFSET_MIN..=OFFSET_MAX).contains(offset));
        let Some(offset) = in_range else {
            return Err(AssemblerError::SymbolOutOfRange {
                symbol: symbol.to_string(),
                offset,
            });
        };

        let (op, target) = match op {
            SymbolicOp::Load { target } => (OpCode::Load, target),
            SymbolicOp::Store { target } => (OpCode::Store, target),
            SymbolicOp::Jump => (OpCode::Add, PC_REGISTER),
        };
        Ok(Instruction::new(
            op,
            cond,
            target,
            ZERO_REGISTER,
            PC_REGISTER,
            offset,
        )?)
    }
}
