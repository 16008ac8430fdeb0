use std::{collections::BTreeMap, fmt, ops::Range};

use crate::{
    alu::Alu,
    instruction::{decode, CondFlag, Instruction, OpCode},
    memory::{Memory, MemoryMappedDevice},
    register::RegisterFile,
    CpuStats, ExecutionError, RunMode, Word,
};

pub const DEFAULT_MEMORY_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy)]
pub struct CpuConfig {
    pub memory_size: u32,
    pub verbose: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            verbose: false,
        }
    }
}

/// Emitted once per fetch, before the instruction runs, including
/// instructions that end up skipped by their predicate.
pub struct CpuStep<'a> {
    pub cpu: &'a DuckCpu,
    pub pc_addr: Word,
    pub word: Word,
    pub instr: Instruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

type Listener = Box<dyn FnMut(&CpuStep<'_>)>;

/// Decides whether a single-stepped run continues after step `step`.
pub trait StepGate {
    fn resume(&mut self, step: usize) -> bool;
}

impl<F: FnMut(usize) -> bool> StepGate for F {
    fn resume(&mut self, step: usize) -> bool {
        self(step)
    }
}

pub struct DuckCpu {
    memory: Memory,
    registers: RegisterFile,
    alu: Alu,
    condition: CondFlag,
    halted: bool,
    stats: CpuStats,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: usize,
    verbose: bool,
}

impl fmt::Debug for DuckCpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckCpu")
            .field("registers", &self.registers)
            .field("condition", &self.condition)
            .field("halted", &self.halted)
            .field("stats", &self.stats)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl DuckCpu {
    pub fn new(config: CpuConfig) -> Self {
        Self {
            memory: Memory::new(config.memory_size),
            registers: RegisterFile::new(),
            alu: Alu,
            condition: CondFlag::ALWAYS,
            halted: false,
            stats: CpuStats::default(),
            listeners: Vec::new(),
            next_listener: 0,
            verbose: config.verbose,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Points the PC at `entrypoint` and clears the halted flag.
    pub fn set_entrypoint(&mut self, entrypoint: Word) {
        self.registers.set_pc(entrypoint);
        self.halted = false;
    }

    pub fn load_memory(&mut self, address: Word, words: &[Word]) -> Result<(), ExecutionError> {
        self.memory.load(address, words)
    }

    pub fn map_device(&mut self, range: Range<Word>, device: Box<dyn MemoryMappedDevice>) {
        self.memory.map(range, device);
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn condition(&self) -> CondFlag {
        self.condition
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn stats(&self) -> CpuStats {
        self.stats
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&CpuStep<'_>) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(other, _)| *other != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, pc_addr: Word, word: Word, instr: Instruction) {
        if self.listeners.is_empty() {
            return;
        }

        let mut listeners = std::mem::take(&mut self.listeners);
        let event = CpuStep {
            cpu: self,
            pc_addr,
            word,
            instr,
        };
        for (_, listener) in listeners.iter_mut() {
            listener(&event);
        }
        self.listeners = listeners;
    }

    /// Runs one fetch/decode/execute cycle. Does nothing once halted.
    pub fn step(&mut self) -> Result<(), ExecutionError> {
        if self.halted {
            return Ok(());
        }

        let pc_addr = self.registers.pc();
        let word = self.memory.get(pc_addr)?;
        let instr = decode(word)?;

        self.notify(pc_addr, word, instr);
        self.stats.steps += 1;

        if !self.condition.intersects(instr.cond()) {
            self.registers.set_pc(pc_addr.wrapping_add(1));
            self.stats.skipped += 1;
            if self.verbose {
                tracing::debug!("{pc_addr:#05x}: {instr} skipped on {}", self.condition);
            }
            return Ok(());
        }

        // Operands are read before the PC moves on, so r15 holds the
        // address of this instruction. PC-relative offsets use that base.
        let src1 = self.registers.get(instr.reg_src1());
        let src2 = self
            .registers
            .get(instr.reg_src2())
            .wrapping_add(instr.offset() as Word);

        self.registers.set_pc(pc_addr.wrapping_add(1));

        let (result, condition) = self.alu.exec(instr.op(), src1, src2);
        self.condition = condition;

        let target = instr.reg_target();
        match instr.op() {
            OpCode::Load => {
                let value = self.memory.get(result)?;
                self.registers.put(target, value);
            }
            OpCode::Store => {
                self.memory.put(result, self.registers.get(target))?;
            }
            OpCode::Halt => {
                self.halted = true;
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                self.registers.put(target, result);
            }
        }

        if self.verbose {
            if self.halted {
                tracing::info!("{pc_addr:#05x}: HALT after {} steps", self.stats.steps);
            } else {
                tracing::info!(
                    "{pc_addr:#05x}: {instr} => {} ({condition})",
                    result as i32
                );
            }
        }

        Ok(())
    }

    pub fn execute(&mut self, run_mode: RunMode) -> Result<CpuStats, ExecutionError> {
        match run_mode {
            RunMode::Run => {
                while !self.halted {
                    self.step()?;
                }
            }
            RunMode::RunFor(steps) => {
                for _ in 0..steps {
                    if self.halted {
                        break;
                    }
                    self.step()?;
                }
            }
        }
        Ok(self.stats)
    }

    /// Runs from `entrypoint` until a HALT executes.
    pub fn run(&mut self, entrypoint: Word) -> Result<CpuStats, ExecutionError> {
        self.set_entrypoint(entrypoint);
        self.execute(RunMode::Run)
    }

    /// Like [`DuckCpu::run`], but hands control to `gate` after every step.
    pub fn run_single_step(
        &mut self,
        entrypoint: Word,
        gate: &mut dyn StepGate,
    ) -> Result<CpuStats, ExecutionError> {
        self.set_entrypoint(entrypoint);

        let mut step_count = 1;
        while !self.halted {
            self.step()?;
            if !gate.resume(step_count) {
                break;
            }
            step_count += 1;
        }
        Ok(self.stats)
    }

    pub fn print_state(&self) {
        println!();
        println!("========== CPU STATE ===========");
        println!();
        println!("PC: {}", self.registers.pc());
        println!("Condition: {}", self.condition);
        println!("Halted: {}", self.halted);
        println!(
            "Registers: {:#?}",
            self.registers
                .values()
                .iter()
                .enumerate()
                .map(|(i, value)| (format!("r{i}"), *value as i32))
                .collect::<BTreeMap<_, _>>()
        );
        println!(
            "Memory (non-zero): {:#?}",
            self.memory
                .cells()
                .iter()
                .enumerate()
                .filter(|(_, value)| **value != 0)
                .collect::<BTreeMap<_, _>>()
        );
    }
}
