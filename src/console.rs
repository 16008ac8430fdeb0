use std::{
    cell::RefCell,
    fmt,
    io::{self, BufRead, StdinLock, Write},
    ops::Range,
    rc::Rc,
};

use duck_common::{ExecutionError, MemoryMappedDevice, Word};

/// Reading this address reads one integer from the console.
pub const CONSOLE_IN: Word = 510;
/// Writing this address prints the value as a signed integer.
pub const CONSOLE_OUT: Word = 511;
pub const CONSOLE_RANGE: Range<Word> = CONSOLE_IN..CONSOLE_OUT + 1;

/// One reader for everything that consumes console lines. Stdin can only
/// be locked once, so the device and the step prompt share this.
pub type SharedInput<R> = Rc<RefCell<R>>;

pub fn stdin_input() -> SharedInput<StdinLock<'static>> {
    Rc::new(RefCell::new(io::stdin().lock()))
}

/// Line based integer console.
pub struct ConsoleIo<R, W> {
    input: SharedInput<R>,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleIo<R, W> {
    pub fn new(input: SharedInput<R>, output: W) -> Self {
        Self { input, output }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

/// Gate for single-stepping: prompts on `output` and waits for a line on
/// `input`. End of input or `max_steps` taken steps stop the run.
pub fn step_prompt<R: BufRead, W: Write>(
    input: SharedInput<R>,
    mut output: W,
    max_steps: Option<usize>,
) -> impl FnMut(usize) -> bool {
    move |step| {
        if max_steps.is_some_and(|max| step >= max) {
            return false;
        }
        if write!(output, "[step {step}] press enter to continue ")
            .and_then(|_| output.flush())
            .is_err()
        {
            return false;
        }

        let mut line = String::new();
        matches!(input.borrow_mut().read_line(&mut line), Ok(read) if read > 0)
    }
}

impl<R, W> fmt::Debug for ConsoleIo<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleIo").finish_non_exhaustive()
    }
}

fn device_error(address: Word, message: impl Into<String>) -> ExecutionError {
    ExecutionError::Device {
        address,
        message: message.into(),
    }
}

impl<R: BufRead, W: Write> MemoryMappedDevice for ConsoleIo<R, W> {
    fn read(&mut self, address: Word) -> Result<Word, ExecutionError> {
        if address != CONSOLE_IN {
            return Err(device_error(address, "console output can't be read"));
        }

        let mut input = self.input.borrow_mut();
        let mut line = String::new();
        loop {
            line.clear();
            let read = input
                .read_line(&mut line)
                .map_err(|e| device_error(address, e.to_string()))?;
            if read == 0 {
                return Err(device_error(address, "end of input"));
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        let text = line.trim();
        text.parse::<i32>()
            .map(|value| value as Word)
            .or_else(|_| text.parse::<Word>())
            .map_err(|_| device_error(address, format!("expected an integer, got {text:?}")))
    }

    fn write(&mut self, address: Word, value: Word) -> Result<(), ExecutionError> {
        if address != CONSOLE_OUT {
            return Err(device_error(address, "console input can't be written"));
        }

        writeln!(self.output, "{}", value as i32)
            .and_then(|_| self.output.flush())
            .map_err(|e| device_error(address, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use duck_common::{CondFlag, CpuConfig, DuckCpu, Instruction, OpCode};

    use super::*;

    fn shared(input: &str) -> SharedInput<Cursor<Vec<u8>>> {
        Rc::new(RefCell::new(Cursor::new(input.as_bytes().to_vec())))
    }

    fn console(input: &str) -> ConsoleIo<Cursor<Vec<u8>>, Vec<u8>> {
        ConsoleIo::new(shared(input), Vec::new())
    }

    fn word(op: OpCode, target: u8, src1: u8, src2: u8, offset: i32) -> Word {
        Instruction::new(op, CondFlag::ALWAYS, target, src1, src2, offset)
            .unwrap()
            .encode()
    }

    fn cpu_with_console(program: &[Word], input: &SharedInput<Cursor<Vec<u8>>>) -> DuckCpu {
        let mut cpu = DuckCpu::new(CpuConfig::default());
        cpu.map_device(CONSOLE_RANGE, Box::new(ConsoleIo::new(input.clone(), io::sink())));
        cpu.load_memory(0, program).unwrap();
        cpu
    }

    #[test]
    fn test_read_integers() {
        let mut io = console("42\n\n  -7 \n4294967295\n");
        assert_eq!(io.read(CONSOLE_IN).unwrap(), 42);
        assert_eq!(io.read(CONSOLE_IN).unwrap(), -7i32 as Word);
        assert_eq!(io.read(CONSOLE_IN).unwrap(), Word::MAX);
        assert!(matches!(
            io.read(CONSOLE_IN),
            Err(ExecutionError::Device { address: CONSOLE_IN, .. })
        ));
    }

    #[test]
    fn test_read_garbage() {
        let mut io = console("duck\n");
        let err = io.read(CONSOLE_IN).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Device failure at @510: expected an integer, got \"duck\""
        );
    }

    #[test]
    fn test_write_signed() {
        let mut io = console("");
        io.write(CONSOLE_OUT, 12).unwrap();
        io.write(CONSOLE_OUT, -3i32 as Word).unwrap();
        assert_eq!(String::from_utf8(io.into_output()).unwrap(), "12\n-3\n");
    }

    #[test]
    fn test_wrong_direction() {
        let mut io = console("1\n");
        assert!(io.read(CONSOLE_OUT).is_err());
        assert!(io.write(CONSOLE_IN, 1).is_err());
    }

    #[test]
    fn test_step_prompt_shares_input_with_console() {
        let program = [
            word(OpCode::Load, 1, 0, 0, CONSOLE_IN as i32),
            word(OpCode::Add, 2, 1, 1, 0),
            word(OpCode::Halt, 0, 0, 0, 0),
        ];
        let input = shared("7\n\n\n");
        let mut cpu = cpu_with_console(&program, &input);

        let mut prompts = Vec::new();
        let mut gate = step_prompt(input.clone(), &mut prompts, None);
        let stats = cpu.run_single_step(0, &mut gate).unwrap();
        drop(gate);

        assert!(cpu.halted());
        assert_eq!(stats.steps, 3);
        assert_eq!(cpu.registers().get(1), 7);
        assert_eq!(cpu.registers().get(2), 14);
        assert_eq!(
            String::from_utf8(prompts).unwrap(),
            "[step 1] press enter to continue \
             [step 2] press enter to continue \
             [step 3] press enter to continue "
        );
    }

    #[test]
    fn test_step_prompt_stops_at_max_steps() {
        // ADD r15,r0,r15[0] jumps to itself forever
        let program = [word(OpCode::Add, 15, 0, 15, 0)];
        let input = shared(&"\n".repeat(10));
        let mut cpu = cpu_with_console(&program, &input);

        let mut gate = step_prompt(input, io::sink(), Some(4));
        let stats = cpu.run_single_step(0, &mut gate).unwrap();

        assert!(!cpu.halted());
        assert_eq!(stats.steps, 4);
    }

    #[test]
    fn test_step_prompt_stops_at_end_of_input() {
        let program = [word(OpCode::Add, 15, 0, 15, 0)];
        let input = shared("\n");
        let mut cpu = cpu_with_console(&program, &input);

        let mut gate = step_prompt(input, io::sink(), None);
        let stats = cpu.run_single_step(0, &mut gate).unwrap();

        assert_eq!(stats.steps, 2);
    }
}
