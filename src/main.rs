use std::{io, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{ConsoleIo, CONSOLE_RANGE};
use duck_assembler::{Assembler, AssemblerConfig};
use duck_common::{cpu::DEFAULT_MEMORY_SIZE, BytecodeFile, CpuConfig, CpuStep, DuckCpu, RunMode};
use tracing::Level;

mod console;

#[derive(Parser)]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print every fetched instruction
    #[arg(short, long, global = true)]
    trace: bool,
    #[arg(short, long, global = true)]
    show_cpu_state: bool,
    #[arg(short, long, global = true, default_value_t = DEFAULT_MEMORY_SIZE)]
    memory_size: u32,
    /// Stop after this many steps even without a HALT
    #[arg(long, global = true)]
    max_steps: Option<usize>,
    /// Wait for enter after every step. Reads the same stdin as the console
    #[arg(long, global = true)]
    single_step: bool,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Run an object file
    Run { path: PathBuf },
    /// Run a headerless little endian image from address 0
    RunRaw { path: PathBuf },
    /// Assemble and run a source file
    RunAsm { path: PathBuf },
}

fn run(
    file: &BytecodeFile,
    memory_size: u32,
    verbose: bool,
    trace: bool,
    show_cpu_state: bool,
    max_steps: Option<usize>,
    single_step: bool,
) -> anyhow::Result<()> {
    let mut cpu = DuckCpu::new(CpuConfig {
        memory_size,
        verbose,
    });
    let input = console::stdin_input();
    cpu.map_device(
        CONSOLE_RANGE,
        Box::new(ConsoleIo::new(input.clone(), io::stdout())),
    );
    cpu.load_memory(0, &file.data)
        .context("program does not fit in memory")?;

    if trace {
        cpu.subscribe(|step: &CpuStep<'_>| {
            eprintln!("{:>4}: {:#010x}  {}", step.pc_addr, step.word, step.instr);
        });
    }

    let entrypoint = file.header.entrypoint;
    let result = if single_step {
        let mut gate = console::step_prompt(input, io::stderr(), max_steps);
        cpu.run_single_step(entrypoint, &mut gate)
    } else if let Some(steps) = max_steps {
        cpu.set_entrypoint(entrypoint);
        cpu.execute(RunMode::RunFor(steps))
    } else {
        cpu.run(entrypoint)
    };

    println!();
    println!("========== RESULT/STATS ===========");
    println!();

    println!("{:#?}", result);
    if result.is_ok() && !cpu.halted() {
        println!("Stopped before reaching HALT");
    }

    if show_cpu_state {
        cpu.print_state();
    }

    result?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let Args {
        verbose,
        trace,
        show_cpu_state,
        memory_size,
        max_steps,
        single_step,
        action,
    } = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let file = match action {
        Action::Run { path } => BytecodeFile::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        Action::RunRaw { path } => BytecodeFile::load_raw(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        Action::RunAsm { path } => {
            let program = std::fs::read_to_string(&path)?;
            let mut assembler = Assembler::with_config(AssemblerConfig {
                verbose,
                ..Default::default()
            });
            assembler.assemble_program(&program)?
        }
    };

    run(
        &file,
        memory_size,
        verbose,
        trace,
        show_cpu_state,
        max_steps,
        single_step,
    )
}
