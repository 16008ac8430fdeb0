use std::collections::{BTreeMap, BTreeSet};

use duck_common::{decode, BytecodeFile, Instruction, OpCode, Word, PC_REGISTER, ZERO_REGISTER};

/// Where a `rX,r0,r15[offset]` instruction at `address` points to.
fn relative_target(address: usize, instr: &Instruction) -> Option<Word> {
    let relative = instr.reg_src1() == ZERO_REGISTER && instr.reg_src2() == PC_REGISTER;
    let addressing = match instr.op() {
        OpCode::Load | OpCode::Store => true,
        OpCode::Add => instr.reg_target() == PC_REGISTER,
        _ => false,
    };
    if !(relative && addressing) {
        return None;
    }
    Word::try_from(address as i64 + i64::from(instr.offset())).ok()
}

fn gather_targets(code: &[Word]) -> BTreeSet<Word> {
    code.iter()
        .enumerate()
        .filter_map(|(address, &word)| {
            let instr = decode(word).ok()?;
            relative_target(address, &instr)
        })
        .filter(|&target| (target as usize) < code.len())
        .collect()
}

/// Turns object code back into assembly that reassembles to the same words.
/// Every header label is kept, including aliases and labels past the last
/// word. Other in-program targets of PC-relative instructions get an
/// `L<address>` label.
pub fn disassemble_program(file: &BytecodeFile) -> Vec<String> {
    let code = &file.data;

    let mut names: BTreeMap<Word, Vec<String>> = BTreeMap::new();
    for (label, &address) in &file.header.labels {
        names.entry(address).or_default().push(label.clone());
    }
    for target in gather_targets(code) {
        names
            .entry(target)
            .or_insert_with(|| vec![format!("L{target}")]);
    }

    let mut lines = Vec::new();
    for (address, &word) in code.iter().enumerate() {
        for name in names.get(&(address as Word)).into_iter().flatten() {
            lines.push(format!("{name}:"));
        }

        let Ok(instr) = decode(word) else {
            lines.push(format!("    DATA {word}"));
            continue;
        };

        match relative_target(address, &instr) {
            Some(target) => {
                let target = match names.get(&target).and_then(|names| names.first()) {
                    Some(name) => name.clone(),
                    None => format!("@{target}"),
                };
                lines.push(format!("    {instr}  # -> {target}"));
            }
            None => lines.push(format!("    {instr}")),
        }
    }

    let end = code.len() as Word;
    for (&address, trailing) in names.range(end..) {
        for name in trailing {
            if address == end {
                lines.push(format!("{name}:"));
            } else {
                // a bare label would land on `end`, not on `address`
                tracing::warn!("label {name} at @{address} is past the end of the program");
                lines.push(format!("# {name} = @{address}"));
            }
        }
    }

    lines
}
