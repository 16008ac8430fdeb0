use clap::Parser;
use duck_assembler::{
    disassembler::disassemble_program, Assembler, AssemblerConfig, DEFAULT_ERROR_LIMIT,
};
use duck_common::{BytecodeFile, Word};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    #[clap(long, short)]
    disassemble: bool,
    /// Write the resolved assembly text instead of object code
    #[clap(long, short)]
    text: bool,
    /// Read or write a headerless little endian image
    #[clap(long, short)]
    raw: bool,
    /// Entrypoint address or label
    #[clap(long, short)]
    entrypoint: Option<String>,
    #[clap(long, default_value_t = DEFAULT_ERROR_LIMIT)]
    error_limit: usize,
    #[clap(long)]
    no_error_limit: bool,
    #[clap(long, short)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args {
        input,
        output,
        disassemble,
        text,
        raw,
        entrypoint,
        error_limit,
        no_error_limit,
        verbose,
    } = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        .init();

    if disassemble {
        let program = if raw {
            BytecodeFile::load_raw(&input)?
        } else {
            BytecodeFile::load(&input)?
        };
        let mut code = disassemble_program(&program).join("\n");
        code.push('\n');
        std::fs::write(&output, code)
            .map_err(|e| format!("Failed to write output file '{}': {e}", output.display()))?;
        return Ok(());
    }

    let program = std::fs::read_to_string(&input)?;
    let mut assembler = Assembler::with_config(AssemblerConfig {
        error_limit: (!no_error_limit).then_some(error_limit),
        verbose,
    });
    let assembly = assembler.assemble(&program)?;
    if !assembly.is_ok() {
        return Err(format!(
            "{} error(s) in '{}', nothing written",
            assembly.diagnostics.len(),
            input.display()
        )
        .into());
    }

    if text {
        let mut code = assembly.to_text();
        code.push('\n');
        std::fs::write(&output, code)?;
        return Ok(());
    }

    let entrypoint: Word = match entrypoint {
        None => 0,
        Some(e) => match e.parse() {
            Ok(address) => address,
            Err(_) => *assembly
                .symbols
                .get(&e)
                .ok_or_else(|| format!("Unknown entrypoint label: {e}"))?,
        },
    };

    let code = assembly.to_bytecode_file(entrypoint)?;
    if raw {
        code.save_raw(output)?;
    } else {
        code.save(output)?;
    }

    Ok(())
}
