use num_traits::FromPrimitive;

use crate::{
    instruction::{CondFlag, OpCode},
    ExecutionError, Word,
};

/// Arithmetic unit. Operands are words read as two's complement, results
/// wrap to 32 bits and `V` marks signed overflow.
#[derive(Debug, Default, Clone, Copy)]
pub struct Alu;

impl Alu {
    pub fn exec(&self, op: OpCode, a: Word, b: Word) -> (Word, CondFlag) {
        let (a, b) = (a as i32, b as i32);

        let (result, overflow) = match op {
            OpCode::Add => a.overflowing_add(b),
            OpCode::Sub => a.overflowing_sub(b),
            OpCode::Mul => a.overflowing_mul(b),
            OpCode::Div => match floor_div(a, b) {
                Some(quotient) => quotient,
                None => return (0, CondFlag::V),
            },
            // effective address
            OpCode::Load | OpCode::Store => (a.wrapping_add(b), false),
            OpCode::Halt => (0, false),
        };

        let flags = if overflow {
            CondFlag::from_sign(result) | CondFlag::V
        } else {
            CondFlag::from_sign(result)
        };
        (result as Word, flags)
    }

    /// Same as [`Alu::exec`] for an opcode that has not been decoded yet.
    pub fn exec_opcode(
        &self,
        opcode: u32,
        a: Word,
        b: Word,
    ) -> Result<(Word, CondFlag), ExecutionError> {
        let op = OpCode::from_u32(opcode).ok_or(ExecutionError::InvalidOpcode(opcode))?;
        Ok(self.exec(op, a, b))
    }
}

/// Division rounding toward negative infinity. `None` on division by zero.
fn floor_div(a: i32, b: i32) -> Option<(i32, bool)> {
    if b == 0 {
        return None;
    }

    let (quotient, overflow) = a.overflowing_div(b);
    if !overflow && a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Some((quotient - 1, false))
    } else {
        Some((quotient, overflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neg(value: i32) -> Word {
        value as Word
    }

    #[test]
    fn test_add() {
        let alu = Alu;
        assert_eq!(alu.exec(OpCode::Add, 5, 10), (15, CondFlag::P));
        assert_eq!(alu.exec(OpCode::Add, 5, neg(-5)), (0, CondFlag::Z));
        assert_eq!(alu.exec(OpCode::Add, 5, neg(-6)), (neg(-1), CondFlag::M));
    }

    #[test]
    fn test_add_overflow() {
        let (result, flags) = Alu.exec(OpCode::Add, i32::MAX as Word, 1);
        assert_eq!(result, 0x8000_0000);
        assert_eq!(flags, CondFlag::M | CondFlag::V);
    }

    #[test]
    fn test_sub_and_mul() {
        assert_eq!(Alu.exec(OpCode::Sub, 3, 10), (neg(-7), CondFlag::M));
        assert_eq!(Alu.exec(OpCode::Mul, 6, 7), (42, CondFlag::P));
        assert_eq!(Alu.exec(OpCode::Mul, neg(-6), 7), (neg(-42), CondFlag::M));

        let (_, flags) = Alu.exec(OpCode::Mul, 0x1_0000, 0x1_0000);
        assert!(flags.contains(CondFlag::V));
    }

    #[test]
    fn test_div_rounds_down() {
        assert_eq!(Alu.exec(OpCode::Div, 42, 6), (7, CondFlag::P));
        assert_eq!(Alu.exec(OpCode::Div, 7, 2), (3, CondFlag::P));
        assert_eq!(Alu.exec(OpCode::Div, neg(-7), 2), (neg(-4), CondFlag::M));
        assert_eq!(Alu.exec(OpCode::Div, 7, neg(-2)), (neg(-4), CondFlag::M));
        assert_eq!(Alu.exec(OpCode::Div, neg(-8), neg(-2)), (4, CondFlag::P));
    }

    #[test]
    fn test_div_exceptions() {
        assert_eq!(Alu.exec(OpCode::Div, 42, 0), (0, CondFlag::V));

        let (result, flags) = Alu.exec(OpCode::Div, i32::MIN as Word, neg(-1));
        assert_eq!(result, i32::MIN as Word);
        assert!(flags.contains(CondFlag::V));
    }

    #[test]
    fn test_effective_address() {
        assert_eq!(Alu.exec(OpCode::Load, 10, neg(-1)), (9, CondFlag::P));
        assert_eq!(Alu.exec(OpCode::Store, 0, 0), (0, CondFlag::Z));
    }

    #[test]
    fn test_halt() {
        assert_eq!(Alu.exec(OpCode::Halt, 12, 34), (0, CondFlag::Z));
    }

    #[test]
    fn test_exec_opcode() {
        assert_eq!(
            Alu.exec_opcode(OpCode::Add as u32, 1, 2).unwrap(),
            (3, CondFlag::P)
        );
        assert!(matches!(
            Alu.exec_opcode(0x2A, 1, 2),
            Err(ExecutionError::InvalidOpcode(0x2A))
        ));
    }
}
