use std::{
    fmt,
    ops::{BitAnd, BitOr},
    str::FromStr,
};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use strum::{Display, EnumIter, EnumString};

use crate::{
    bitfield::BitField, register::REGISTER_COUNT, DecodeError, InstructionError,
    ParseCondFlagError, Word,
};

//
// Instruction word layout, high bits first:
//
//   31..26  25..22  21..18  17..14  13..10  9..0
//   opcode  cond    target  src1    src2    offset (signed)
//
pub const OPCODE_FIELD: BitField = BitField::new(26, 31);
pub const COND_FIELD: BitField = BitField::new(22, 25);
pub const TARGET_FIELD: BitField = BitField::new(18, 21);
pub const SRC1_FIELD: BitField = BitField::new(14, 17);
pub const SRC2_FIELD: BitField = BitField::new(10, 13);
pub const OFFSET_FIELD: BitField = BitField::new(0, 9);

pub const OFFSET_MIN: i32 = -(1 << (OFFSET_FIELD.width() - 1));
pub const OFFSET_MAX: i32 = (1 << (OFFSET_FIELD.width() - 1)) - 1;

#[derive(
    Debug,
    Display,
    EnumString,
    EnumIter,
    PartialEq,
    Eq,
    Hash,
    Copy,
    Clone,
    FromPrimitive,
    ToPrimitive,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u32)]
pub enum OpCode {
    Halt = 0,
    Load = 1,
    Store = 2,
    Add = 3,
    Sub = 4,
    Mul = 5,
    Div = 6,
}

/// Condition code bits. The CPU keeps the flags of the last ALU result,
/// and an instruction executes only if its mask shares a bit with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondFlag(u8);

impl CondFlag {
    pub const NEVER: Self = Self(0);
    /// Minus
    pub const M: Self = Self(1);
    /// Zero
    pub const Z: Self = Self(2);
    /// Positive
    pub const P: Self = Self(4);
    /// Overflow or arithmetic exception
    pub const V: Self = Self(8);
    pub const ALWAYS: Self = Self(1 | 2 | 4 | 8);

    const LETTERS: [(char, CondFlag); 4] = [
        ('M', Self::M),
        ('Z', Self::Z),
        ('P', Self::P),
        ('V', Self::V),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Keeps only the four defined bits.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALWAYS.0)
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `M`, `Z` or `P` depending on the sign of `value`.
    pub const fn from_sign(value: i32) -> Self {
        if value < 0 {
            Self::M
        } else if value == 0 {
            Self::Z
        } else {
            Self::P
        }
    }
}

impl BitOr for CondFlag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for CondFlag {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for CondFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NEVER => f.write_str("NEVER"),
            Self::ALWAYS => f.write_str("ALWAYS"),
            flags => {
                for (letter, bit) in Self::LETTERS {
                    if flags.contains(bit) {
                        write!(f, "{letter}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for CondFlag {
    type Err = ParseCondFlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALWAYS" => return Ok(Self::ALWAYS),
            "NEVER" => return Ok(Self::NEVER),
            "" => return Err(ParseCondFlagError(s.to_string())),
            _ => {}
        }

        s.chars().try_fold(Self::NEVER, |flags, c| {
            Self::LETTERS
                .iter()
                .find(|(letter, _)| *letter == c)
                .map(|(_, bit)| flags | *bit)
                .ok_or_else(|| ParseCondFlagError(s.to_string()))
        })
    }
}

/// A decoded instruction. Fields are checked on construction, so every
/// value can be encoded without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    op: OpCode,
    cond: CondFlag,
    reg_target: u8,
    reg_src1: u8,
    reg_src2: u8,
    offset: i16,
}

impl Instruction {
    pub fn new(
        op: OpCode,
        cond: CondFlag,
        reg_target: u8,
        reg_src1: u8,
        reg_src2: u8,
        offset: i32,
    ) -> Result<Self, InstructionError> {
        for reg in [reg_target, reg_src1, reg_src2] {
            if usize::from(reg) >= REGISTER_COUNT {
                return Err(InstructionError::InvalidRegister(u32::from(reg)));
            }
        }
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&offset) {
            return Err(InstructionError::OffsetOutOfRange(offset));
        }

        Ok(Self {
            op,
            cond,
            reg_target,
            reg_src1,
            reg_src2,
            offset: offset as i16,
        })
    }

    pub fn op(&self) -> OpCode {
        self.op
    }

    pub fn cond(&self) -> CondFlag {
        self.cond
    }

    pub fn reg_target(&self) -> u8 {
        self.reg_target
    }

    pub fn reg_src1(&self) -> u8 {
        self.reg_src1
    }

    pub fn reg_src2(&self) -> u8 {
        self.reg_src2
    }

    pub fn offset(&self) -> i32 {
        i32::from(self.offset)
    }

    pub fn encode(&self) -> Word {
        let word = OPCODE_FIELD.insert(self.op as Word, 0);
        let word = COND_FIELD.insert(Word::from(self.cond.bits()), word);
        let word = TARGET_FIELD.insert(Word::from(self.reg_target), word);
        let word = SRC1_FIELD.insert(Word::from(self.reg_src1), word);
        let word = SRC2_FIELD.insert(Word::from(self.reg_src2), word);
        OFFSET_FIELD.insert(self.offset() as Word, word)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if self.cond != CondFlag::ALWAYS {
            write!(f, "/{}", self.cond)?;
        }
        write!(
            f,
            " r{},r{},r{}[{}]",
            self.reg_target, self.reg_src1, self.reg_src2, self.offset
        )
    }
}

pub fn encode(instruction: &Instruction) -> Word {
    instruction.encode()
}

pub fn decode(word: Word) -> Result<Instruction, DecodeError> {
    let opcode = OPCODE_FIELD.extract(word);
    let op = OpCode::from_u32(opcode).ok_or(DecodeError::InvalidOpcode { opcode, word })?;

    Ok(Instruction {
        op,
        cond: CondFlag::from_bits_truncate(COND_FIELD.extract(word) as u8),
        reg_target: TARGET_FIELD.extract(word) as u8,
        reg_src1: SRC1_FIELD.extract(word) as u8,
        reg_src2: SRC2_FIELD.extract(word) as u8,
        offset: OFFSET_FIELD.extract_signed(word) as i16,
    })
}
