//! Classification of single source lines.
//!
//! Every line may start with `label:` and end with a `#` or `;` comment.
//! What remains is tried against a fixed list of classifiers, in order:
//! fully specified instruction, `DATA` declaration, empty (comment or label
//! only), symbolic `LOAD`/`STORE`/`JUMP`. The first classifier that
//! recognizes the shape of the line decides its kind, even if a field
//! inside it turns out to be invalid.

use duck_common::{
    instruction::{OFFSET_MAX, OFFSET_MIN},
    CondFlag, Instruction, OpCode, Word, REGISTER_COUNT,
};

use crate::AssemblerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Full,
    Data,
    Comment,
    Symbolic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolicOp {
    Load { target: u8 },
    Store { target: u8 },
    Jump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineBody {
    Full(Instruction),
    Data(Word),
    Comment,
    Symbolic {
        op: SymbolicOp,
        cond: CondFlag,
        symbol: String,
    },
}

impl LineBody {
    pub fn kind(&self) -> LineKind {
        match self {
            LineBody::Full(_) => LineKind::Full,
            LineBody::Data(_) => LineKind::Data,
            LineBody::Comment => LineKind::Comment,
            LineBody::Symbolic { .. } => LineKind::Symbolic,
        }
    }

    /// Whether the line becomes a word of object code.
    pub fn occupies_word(&self) -> bool {
        !matches!(self, LineBody::Comment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub label: Option<String>,
    pub body: LineBody,
    pub comment: Option<String>,
}

/// `None` means the line does not have this shape at all.
type Classifier = fn(&str) -> Option<Result<LineBody, AssemblerError>>;

const CLASSIFIERS: [(LineKind, Classifier); 4] = [
    (LineKind::Full, classify_full),
    (LineKind::Data, classify_data),
    (LineKind::Comment, classify_comment),
    (LineKind::Symbolic, classify_symbolic),
];

pub fn parse_line(line: &str) -> Result<SourceLine, AssemblerError> {
    let (code, comment) = split_comment(line);
    let (label, body) = split_label(code);
    let body = body.trim();

    for (kind, classify) in CLASSIFIERS {
        if let Some(result) = classify(body) {
            tracing::trace!("{kind:?}: {line:?}");
            return Ok(SourceLine {
                label: label.map(str::to_string),
                body: result?,
                comment: comment.map(str::to_string),
            });
        }
    }

    Err(AssemblerError::SyntaxError(line.trim().to_string()))
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn split_comment(line: &str) -> (&str, Option<&str>) {
    match line.find(&['#', ';'][..]) {
        Some(start) => (&line[..start], Some(line[start..].trim_end())),
        None => (line, None),
    }
}

fn split_label(code: &str) -> (Option<&str>, &str) {
    let code = code.trim_start();
    match code.split_once(':') {
        Some((label, rest)) if is_identifier(label) => (Some(label), rest),
        _ => (None, code),
    }
}

/// Splits `OP[/PRED] operands` and drops whitespace between operands.
fn split_mnemonic(body: &str) -> (&str, Option<&str>, String) {
    let (mnemonic, operands) = match body.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic, rest),
        None => (body, ""),
    };
    let operands = operands.split_whitespace().collect::<String>();

    match mnemonic.split_once('/') {
        Some((opcode, predicate)) => (opcode, Some(predicate), operands),
        None => (mnemonic, None, operands),
    }
}

fn parse_predicate(predicate: Option<&str>) -> Result<CondFlag, AssemblerError> {
    match predicate {
        Some(predicate) => Ok(predicate.parse()?),
        None => Ok(CondFlag::ALWAYS),
    }
}

/// The digits of something shaped like `r<digits>`.
fn register_shape(operand: &str) -> Option<&str> {
    operand
        .strip_prefix('r')
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn register_number(digits: &str) -> Result<u8, AssemblerError> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|n| *n < REGISTER_COUNT)
        .map(|n| n as u8)
        .ok_or_else(|| AssemblerError::InvalidRegister(format!("r{digits}")))
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn classify_full(body: &str) -> Option<Result<LineBody, AssemblerError>> {
    let (opcode, predicate, operands) = split_mnemonic(body);
    let op = opcode.parse::<OpCode>().ok()?;

    let (registers, offset) = match operands.split_once('[') {
        Some((registers, rest)) => (registers, Some(rest.strip_suffix(']')?)),
        None => (operands.as_str(), None),
    };
    let registers = registers
        .split(',')
        .map(register_shape)
        .collect::<Option<Vec<_>>>()?;
    let [target, src1, src2] = registers[..] else {
        return None;
    };
    if !offset.map_or(true, is_decimal) {
        return None;
    }

    Some((|| -> Result<LineBody, AssemblerError> {
        let cond = parse_predicate(predicate)?;
        let offset = match offset {
            Some(offset) => offset
                .parse::<i32>()
                .map_err(|_| AssemblerError::OffsetOutOfRange(offset.to_string()))?,
            None => 0,
        };
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&offset) {
            return Err(AssemblerError::OffsetOutOfRange(offset.to_string()));
        }

        let instruction = Instruction::new(
            op,
            cond,
            register_number(target)?,
            register_number(src1)?,
            register_number(src2)?,
            offset,
        )?;
        Ok(LineBody::Full(instruction))
    })())
}

fn classify_data(body: &str) -> Option<Result<LineBody, AssemblerError>> {
    let (opcode, predicate, value) = split_mnemonic(body);
    if opcode != "DATA" || predicate.is_some() {
        return None;
    }

    if value.is_empty() {
        return Some(Ok(LineBody::Data(0)));
    }

    let invalid = || AssemblerError::InvalidData(value.clone());
    if let Some(hex) = value.strip_prefix("0x") {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        return Some(Word::from_str_radix(hex, 16).map(LineBody::Data).map_err(|_| invalid()));
    }
    if !is_decimal(&value) {
        return None;
    }

    let parsed = match value.strip_prefix('-') {
        Some(_) => value.parse::<i32>().map(|v| v as Word),
        None => value.parse::<Word>(),
    };
    Some(parsed.map(LineBody::Data).map_err(|_| invalid()))
}

fn classify_comment(body: &str) -> Option<Result<LineBody, AssemblerError>> {
    body.is_empty().then_some(Ok(LineBody::Comment))
}

fn classify_symbolic(body: &str) -> Option<Result<LineBody, AssemblerError>> {
    let (opcode, predicate, operands) = split_mnemonic(body);
    let parts = operands.split(',').collect::<Vec<_>>();

    let (target, symbol) = match (opcode, &parts[..]) {
        ("JUMP", [symbol]) => (None, *symbol),
        ("LOAD" | "STORE", [target, symbol]) => (Some(register_shape(target)?), *symbol),
        _ => return None,
    };
    if !is_identifier(symbol) {
        return None;
    }

    Some((|| -> Result<LineBody, AssemblerError> {
        let op = match (opcode, target) {
            ("LOAD", Some(target)) => SymbolicOp::Load {
                target: register_number(target)?,
            },
            ("STORE", Some(target)) => SymbolicOp::Store {
                target: register_number(target)?,
            },
            _ => SymbolicOp::Jump,
        };
        Ok(LineBody::Symbolic {
            op,
            cond: parse_predicate(predicate)?,
            symbol: symbol.to_string(),
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(line: &str) -> LineBody {
        parse_line(line).unwrap().body
    }

    fn full(op: OpCode, cond: CondFlag, regs: [u8; 3], offset: i32) -> LineBody {
        LineBody::Full(Instruction::new(op, cond, regs[0], regs[1], regs[2], offset).unwrap())
    }

    #[test]
    fn test_full_instruction() {
        assert_eq!(
            body("ADD r1,r2,r3"),
            full(OpCode::Add, CondFlag::ALWAYS, [1, 2, 3], 0)
        );
        assert_eq!(
            body("  SUB/ZP r4,r0,r15[-12]"),
            full(OpCode::Sub, CondFlag::Z | CondFlag::P, [4, 0, 15], -12)
        );
        assert_eq!(
            body("HALT r0,r0,r0"),
            full(OpCode::Halt, CondFlag::ALWAYS, [0, 0, 0], 0)
        );
        assert_eq!(
            body("LOAD r1, r0, r15[3]"),
            full(OpCode::Load, CondFlag::ALWAYS, [1, 0, 15], 3)
        );
    }

    #[test]
    fn test_label_and_comment() {
        let line = parse_line("loop: MUL/M r1,r1,r2[1]  # square it; twice").unwrap();
        assert_eq!(line.label.as_deref(), Some("loop"));
        assert_eq!(line.comment.as_deref(), Some("# square it; twice"));
        assert_eq!(line.body.kind(), LineKind::Full);

        let line = parse_line("ADD r1,r2,r3 ; trailing").unwrap();
        assert_eq!(line.label, None);
        assert_eq!(line.comment.as_deref(), Some("; trailing"));
    }

    #[test]
    fn test_data() {
        assert_eq!(body("x: DATA 5"), LineBody::Data(5));
        assert_eq!(body("DATA 0x2a"), LineBody::Data(42));
        assert_eq!(body("DATA 0xFFFFFFFF"), LineBody::Data(Word::MAX));
        assert_eq!(body("DATA"), LineBody::Data(0));
        assert_eq!(body("DATA -1 # minus one"), LineBody::Data(Word::MAX));
        assert!(matches!(
            parse_line("DATA 4294967296"),
            Err(AssemblerError::InvalidData(_))
        ));
        assert!(matches!(
            parse_line("DATA 0x1FFFFFFFF"),
            Err(AssemblerError::InvalidData(_))
        ));
        assert!(matches!(
            parse_line("DATA five"),
            Err(AssemblerError::SyntaxError(_))
        ));
    }

    #[test]
    fn test_comment_only() {
        for line in ["", "   ", "# just a comment", "; semicolon", "end:", "end: # bye"] {
            assert_eq!(body(line), LineBody::Comment, "{line:?}");
        }
        let line = parse_line("end: # bye").unwrap();
        assert_eq!(line.label.as_deref(), Some("end"));
        assert_eq!(line.comment.as_deref(), Some("# bye"));
    }

    #[test]
    fn test_symbolic() {
        assert_eq!(
            body("JUMP loop"),
            LineBody::Symbolic {
                op: SymbolicOp::Jump,
                cond: CondFlag::ALWAYS,
                symbol: "loop".to_string()
            }
        );
        assert_eq!(
            body("again: JUMP/MZ top # back"),
            LineBody::Symbolic {
                op: SymbolicOp::Jump,
                cond: CondFlag::M | CondFlag::Z,
                symbol: "top".to_string()
            }
        );
        assert_eq!(
            body("STORE/P r3,total"),
            LineBody::Symbolic {
                op: SymbolicOp::Store { target: 3 },
                cond: CondFlag::P,
                symbol: "total".to_string()
            }
        );
    }

    #[test]
    fn test_syntax_errors() {
        for line in [
            "BOGUS r1,r2,r3",
            "add r1,r2,r3",
            "ADD r1,r2",
            "ADD r1,r2,x",
            "ADD r1,r2,r3[x]",
            "ADD r1,r2,r3[4",
            "LOAD x",
            "JUMP r1,loop",
            "JUMP 12",
            "1abc: ADD r1,r2,r3",
            "DATA5",
        ] {
            assert!(
                matches!(parse_line(line), Err(AssemblerError::SyntaxError(_))),
                "{line:?}"
            );
        }
    }

    #[test]
    fn test_invalid_fields() {
        assert!(matches!(
            parse_line("ADD r16,r0,r0"),
            Err(AssemblerError::InvalidRegister(r)) if r == "r16"
        ));
        assert!(matches!(
            parse_line("ADD r1,r0,r0[512]"),
            Err(AssemblerError::OffsetOutOfRange(_))
        ));
        assert!(matches!(
            parse_line("ADD/Q r1,r0,r0"),
            Err(AssemblerError::UnknownPredicate(_))
        ));
        assert!(matches!(
            parse_line("LOAD r99,x"),
            Err(AssemblerError::InvalidRegister(_))
        ));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("loop_2"));
        assert!(is_identifier("X"));
        assert!(!is_identifier("_x"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
