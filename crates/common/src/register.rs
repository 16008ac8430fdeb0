use crate::Word;

pub const REGISTER_COUNT: usize = 16;
pub const ZERO_REGISTER: u8 = 0;
pub const PC_REGISTER: u8 = 15;

/// A single register. The zero variant reads as 0 and drops writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    General(Word),
    Zero,
}

impl Register {
    pub fn get(&self) -> Word {
        match self {
            Register::General(value) => *value,
            Register::Zero => 0,
        }
    }

    pub fn put(&mut self, value: Word) {
        match self {
            Register::General(current) => *current = value,
            Register::Zero => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    registers: [Register; REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        let mut registers = [Register::General(0); REGISTER_COUNT];
        registers[usize::from(ZERO_REGISTER)] = Register::Zero;
        Self { registers }
    }

    /// Panics if `index` is not a register number. Decoded instructions
    /// only ever carry valid ones.
    pub fn get(&self, index: u8) -> Word {
        self.registers[usize::from(index)].get()
    }

    pub fn put(&mut self, index: u8, value: Word) {
        self.registers[usize::from(index)].put(value);
    }

    pub fn pc(&self) -> Word {
        self.get(PC_REGISTER)
    }

    pub fn set_pc(&mut self, address: Word) {
        self.put(PC_REGISTER, address);
    }

    pub fn values(&self) -> [Word; REGISTER_COUNT] {
        self.registers.map(|register| register.get())
    }
}
