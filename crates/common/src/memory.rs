use std::ops::Range;

use crate::{ExecutionError, Word};

/// A device that answers reads and writes for a mapped address range.
/// Accesses go straight to the device every time.
pub trait MemoryMappedDevice: std::fmt::Debug {
    fn read(&mut self, address: Word) -> Result<Word, ExecutionError>;
    fn write(&mut self, address: Word, value: Word) -> Result<(), ExecutionError>;
}

#[derive(Debug)]
struct MappedRange {
    range: Range<Word>,
    device: Box<dyn MemoryMappedDevice>,
}

/// Flat word-addressed storage with optional memory mapped devices.
#[derive(Debug)]
pub struct Memory {
    cells: Vec<Word>,
    mapped: Vec<MappedRange>,
}

impl Memory {
    pub fn new(size: u32) -> Self {
        Self {
            cells: vec![0; size as usize],
            mapped: Vec::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.cells.len() as u32
    }

    /// Hands `range` over to `device`. When ranges overlap the earlier
    /// mapping wins.
    pub fn map(&mut self, range: Range<Word>, device: Box<dyn MemoryMappedDevice>) {
        tracing::debug!("mapping device {device:?} at {range:?}");
        self.mapped.push(MappedRange { range, device });
    }

    pub fn is_mapped(&self, address: Word) -> bool {
        self.mapped.iter().any(|m| m.range.contains(&address))
    }

    fn device_for(&mut self, address: Word) -> Option<&mut Box<dyn MemoryMappedDevice>> {
        self.mapped
            .iter_mut()
            .find(|m| m.range.contains(&address))
            .map(|m| &mut m.device)
    }

    pub fn get(&mut self, address: Word) -> Result<Word, ExecutionError> {
        if let Some(device) = self.device_for(address) {
            return device.read(address);
        }
        self.cells
            .get(address as usize)
            .copied()
            .ok_or(ExecutionError::InvalidMemoryLocation(address))
    }

    pub fn put(&mut self, address: Word, value: Word) -> Result<(), ExecutionError> {
        if let Some(device) = self.device_for(address) {
            return device.write(address, value);
        }
        let cell = self
            .cells
            .get_mut(address as usize)
            .ok_or(ExecutionError::InvalidMemoryLocation(address))?;
        *cell = value;
        Ok(())
    }

    /// Reads plain storage without touching devices.
    pub fn peek(&self, address: Word) -> Option<Word> {
        self.cells.get(address as usize).copied()
    }

    /// Copies `words` into plain storage starting at `address`.
    pub fn load(&mut self, address: Word, words: &[Word]) -> Result<(), ExecutionError> {
        let start = address as usize;
        let end = start + words.len();
        if end > self.cells.len() {
            return Err(ExecutionError::InvalidMemoryLocation(
                address.max(self.size()),
            ));
        }
        self.cells[start..end].copy_from_slice(words);
        Ok(())
    }

    pub fn cells(&self) -> &[Word] {
        &self.cells
    }
}
