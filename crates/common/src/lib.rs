use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod alu;
pub mod bitfield;
pub mod cpu;
pub mod instruction;
pub mod memory;
pub mod register;

pub use alu::Alu;
pub use bitfield::{sign_extend, BitField};
pub use cpu::{CpuConfig, CpuStep, DuckCpu, ListenerId, StepGate};
pub use instruction::{decode, encode, CondFlag, Instruction, OpCode};
pub use memory::{Memory, MemoryMappedDevice};
pub use register::{Register, RegisterFile, PC_REGISTER, REGISTER_COUNT, ZERO_REGISTER};

/// The machine's unit of storage and computation.
pub type Word = u32;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Trying to access invalid memory location (@{:#02x}/@{})", .0, .0)]
    InvalidMemoryLocation(Word),
    #[error("Invalid Opcode: {0}")]
    InvalidOpcode(u32),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Device failure at @{address}: {message}")]
    Device { address: Word, message: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid opcode {opcode} in word {word:#010x}")]
    InvalidOpcode { opcode: u32, word: Word },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InstructionError {
    #[error("Invalid register: r{0}")]
    InvalidRegister(u32),
    #[error("Offset {0} does not fit in the 10 bit offset field")]
    OffsetOutOfRange(i32),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown predicate: {0}")]
pub struct ParseCondFlagError(pub String);

#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error("Raw image length {0} is not a multiple of 4 bytes")]
    TruncatedImage(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub steps: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Run,
    RunFor(usize),
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BytecodeFileHeader {
    pub labels: IndexMap<String, Word>,
    pub entrypoint: Word,
}

/// An assembled program: words to load at address 0 plus the labels and
/// entrypoint it was assembled with.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BytecodeFile {
    pub header: BytecodeFileHeader,
    pub data: Vec<Word>,
}

impl BytecodeFile {
    #[must_use]
    pub fn new(data: Vec<Word>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self, FileError> {
        let reader = BufReader::new(File::open(p.as_ref())?);
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn save<P: AsRef<Path>>(&self, p: P) -> Result<(), FileError> {
        let writer = BufWriter::new(File::create(p.as_ref())?);
        Ok(bincode::serialize_into(writer, self)?)
    }

    /// Reads a headerless image of little endian words.
    pub fn load_raw<P: AsRef<Path>>(p: P) -> Result<Self, FileError> {
        let mut bytes = Vec::new();
        BufReader::new(File::open(p.as_ref())?).read_to_end(&mut bytes)?;
        if bytes.len() % 4 != 0 {
            return Err(FileError::TruncatedImage(bytes.len()));
        }

        Ok(Self::new(
            bytes.chunks_exact(4).map(LittleEndian::read_u32).collect(),
        ))
    }

    /// Writes the words as a headerless little endian image.
    pub fn save_raw<P: AsRef<Path>>(&self, p: P) -> Result<(), FileError> {
        let mut writer = BufWriter::new(File::create(p.as_ref())?);
        for &value in &self.data {
            writer.write_u32::<LittleEndian>(value)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl From<Vec<Word>> for BytecodeFile {
    fn from(value: Vec<Word>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("duck-common-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_bytecode_file_roundtrip() {
        let mut file = BytecodeFile::new(vec![0x03C0_0000, 5, 0xFFFF_FFFF]);
        file.header.entrypoint = 1;
        file.header.labels.insert("start".to_string(), 1);
        file.header.labels.insert("x".to_string(), 0);

        let path = temp_path("object");
        file.save(&path).unwrap();
        let loaded = BytecodeFile::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, file);
        assert_eq!(
            loaded.header.labels.keys().collect::<Vec<_>>(),
            vec!["start", "x"]
        );
    }

    #[test]
    fn test_raw_image() {
        let file = BytecodeFile::from(vec![1, 0x0102_0304]);
        let path = temp_path("raw");
        file.save_raw(&path).unwrap();

        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![1, 0, 0, 0, 4, 3, 2, 1]
        );
        let loaded = BytecodeFile::load_raw(&path).unwrap();
        assert_eq!(loaded.data, file.data);

        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(
            BytecodeFile::load_raw(&path),
            Err(FileError::TruncatedImage(3))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ExecutionError::InvalidMemoryLocation(16).to_string(),
            "Trying to access invalid memory location (@0x10/@16)"
        );
        assert_eq!(
            ExecutionError::from(DecodeError::InvalidOpcode {
                opcode: 9,
                word: 0x2400_0000
            })
            .to_string(),
            "Invalid opcode 9 in word 0x24000000"
        );
    }
}
