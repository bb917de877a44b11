//! Virtual machine that runs the bytecode

use crate::bytecode::{Instruction, Program};
use crate::error::Fault;
use crate::sink::{Sink, StdoutSink};
use crate::token::Op;

pub const DEFAULT_MEMORY_SIZE: usize = 1024;

/// Construction-time settings of a [`Vm`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct VmConfig {
    /// Number of memory cells.
    pub memory_size: usize,
    /// Keep memory contents across `load` calls instead of zero-filling.
    pub persist_memory: bool,
    /// Maximum instructions executed per load. `None` means unbounded.
    pub step_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            memory_size: DEFAULT_MEMORY_SIZE,
            persist_memory: false,
            step_limit: None,
        }
    }
}

impl VmConfig {
    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.memory_size = memory_size;
        self
    }

    pub fn with_persist_memory(mut self, persist_memory: bool) -> Self {
        self.persist_memory = persist_memory;
        self
    }

    pub fn with_step_limit(mut self, step_limit: Option<u64>) -> Self {
        self.step_limit = step_limit;
        self
    }
}

/// Why the machine stopped without a fault.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HaltReason {
    /// `HALT` was executed.
    Instruction,
    /// The instruction pointer ran past the last instruction.
    EndOfProgram,
}

/// Lifecycle of the machine between two loads.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VmState {
    Ready,
    Running,
    Halted(HaltReason),
    Faulted(Fault),
}

impl VmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmState::Halted(_) | VmState::Faulted(_))
    }
}

/// What a successful step asks the run loop to do.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Halt(HaltReason),
}

/// Terminal result of [`Vm::run`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Halted {
        reason: HaltReason,
        steps: u64,
    },
    Faulted {
        fault: Fault,
        /// Index of the instruction that faulted.
        ip: usize,
        steps: u64,
    },
}

impl Outcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, Outcome::Halted { .. })
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Outcome::Faulted { fault, .. } => Some(fault),
            Outcome::Halted { .. } => None,
        }
    }

    pub fn steps(&self) -> u64 {
        match self {
            Outcome::Halted { steps, .. } | Outcome::Faulted { steps, .. } => *steps,
        }
    }
}

/// Virtual machine representation
pub struct Vm<S = StdoutSink> {
    config: VmConfig,
    program: Program,
    ip: usize, // next instruction to fetch
    current_ip: usize, // instruction being (or last) executed
    steps: u64, // instructions executed since load
    state: VmState,

    stack: Vec<i64>, // operand stack
    call_stack: Vec<usize>, // return addresses
    memory: Vec<i64>,
    sink: S,
}

impl Vm<StdoutSink> {
    /// Machine with the default configuration printing to stdout.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm::with_output(config, StdoutSink::stdout())
    }
}

impl Default for Vm<StdoutSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sink> Vm<S> {
    pub fn with_output(config: VmConfig, sink: S) -> Self {
        Vm {
            config,
            program: Program::default(),
            ip: 0,
            current_ip: 0,
            steps: 0,
            state: VmState::Ready,
            stack: Vec::new(),
            call_stack: Vec::new(),
            memory: vec![0; config.memory_size],
            sink,
        }
    }

    /// Swap the output sink, keeping all other state.
    pub fn with_sink<T: Sink>(self, sink: T) -> Vm<T> {
        Vm {
            config: self.config,
            program: self.program,
            ip: self.ip,
            current_ip: self.current_ip,
            steps: self.steps,
            state: self.state,
            stack: self.stack,
            call_stack: self.call_stack,
            memory: self.memory,
            sink,
        }
    }

    /// Load a program and reset the execution state.
    ///
    /// Memory is zero-filled unless [`VmConfig::persist_memory`] is set.
    pub fn load(&mut self, program: Program) {
        self.program = program;
        self.ip = 0;
        self.current_ip = 0;
        self.steps = 0;
        self.state = VmState::Ready;
        self.stack.clear();
        self.call_stack.clear();
        if !self.config.persist_memory {
            self.clear_memory();
        }
    }

    pub fn clear_memory(&mut self) {
        self.memory.fill(0);
    }

    /// Run until the machine halts or faults.
    pub fn run(&mut self) -> Outcome {
        loop {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt(reason)) => {
                    return Outcome::Halted {
                        reason,
                        steps: self.steps,
                    }
                }
                Err(fault) => {
                    crate::error!("runtime fault at {:04}: {}", self.current_ip, fault);
                    return Outcome::Faulted {
                        fault,
                        ip: self.current_ip,
                        steps: self.steps,
                    };
                }
            }
        }
    }

    /// Execute one instruction.
    ///
    /// Once halted or faulted, the recorded result is returned again without executing anything.
    pub fn step(&mut self) -> Result<Flow, Fault> {
        match &self.state {
            VmState::Halted(reason) => return Ok(Flow::Halt(*reason)),
            VmState::Faulted(fault) => return Err(fault.clone()),
            VmState::Ready | VmState::Running => {}
        }

        match self.next_instruction() {
            Ok(Flow::Continue) => {
                self.state = VmState::Running;
                Ok(Flow::Continue)
            }
            Ok(Flow::Halt(reason)) => {
                self.state = VmState::Halted(reason);
                Ok(Flow::Halt(reason))
            }
            Err(fault) => {
                self.state = VmState::Faulted(fault.clone());
                Err(fault)
            }
        }
    }

    fn next_instruction(&mut self) -> Result<Flow, Fault> {
        let Some(&Instruction { op, operand }) = self.program.get(self.ip) else {
            return Ok(Flow::Halt(HaltReason::EndOfProgram));
        };

        self.current_ip = self.ip;
        if let Some(limit) = self.config.step_limit {
            if self.steps >= limit {
                return Err(Fault::StepLimitExceeded(limit));
            }
        }

        // Branch targets are absolute, so advance before dispatch.
        self.ip += 1;
        self.steps += 1;

        match op {
            Op::Push => {
                let value = operand.ok_or(Fault::MissingOperand(op))?;
                self.stack.push(value);
            }
            Op::Pop => {
                self.pop_stack()?;
            }
            Op::Add => self.ins_arith(op, i64::checked_add)?,
            Op::Sub => self.ins_arith(op, i64::checked_sub)?,
            Op::Mul => self.ins_arith(op, i64::checked_mul)?,
            Op::Div => self.ins_div()?,
            Op::Store => self.ins_store()?,
            Op::Load => self.ins_load()?,
            Op::Jmp => {
                let target = operand.ok_or(Fault::MissingOperand(op))?;
                self.ins_jmp(target)?;
            }
            Op::Jz => self.ins_jump_if(op, operand, |value| value == 0)?,
            Op::Jnz => self.ins_jump_if(op, operand, |value| value != 0)?,
            Op::Call => {
                let target = operand.ok_or(Fault::MissingOperand(op))?;
                self.ins_call(target)?;
            }
            Op::Ret => {
                self.ip = self.call_stack.pop().ok_or(Fault::CallStackUnderflow)?;
            }
            Op::Print => {
                let value = self.pop_stack()?;
                self.sink
                    .emit(value)
                    .map_err(|err| Fault::Output(err.to_string()))?;
            }
            Op::Halt => return Ok(Flow::Halt(HaltReason::Instruction)),
        }

        Ok(Flow::Continue)
    }

    /// Pop b, pop a, push `f(a, b)`.
    fn ins_arith(&mut self, op: Op, f: fn(i64, i64) -> Option<i64>) -> Result<(), Fault> {
        let (a, b) = self.pop_pair()?;
        let result = f(a, b).ok_or(Fault::ArithmeticOverflow(op))?;
        self.stack.push(result);
        Ok(())
    }

    /// Division rounding toward negative infinity.
    ///
    /// A zero divisor faults with the dividend still on the stack.
    fn ins_div(&mut self) -> Result<(), Fault> {
        if self.stack.len() < 2 {
            return Err(Fault::StackUnderflow);
        }
        let b = self.pop_stack()?;
        if b == 0 {
            return Err(Fault::DivisionByZero);
        }
        let a = self.pop_stack()?;
        let result = floor_div(a, b).ok_or(Fault::ArithmeticOverflow(Op::Div))?;
        self.stack.push(result);
        Ok(())
    }

    /// Pop value, pop address, write memory.
    fn ins_store(&mut self) -> Result<(), Fault> {
        let (address, value) = self.pop_pair()?;
        let cell = self.cell(address)?;
        self.memory[cell] = value;
        Ok(())
    }

    /// Pop address, push the memory cell.
    fn ins_load(&mut self) -> Result<(), Fault> {
        let address = self.pop_stack()?;
        let cell = self.cell(address)?;
        self.stack.push(self.memory[cell]);
        Ok(())
    }

    fn ins_jmp(&mut self, target: i64) -> Result<(), Fault> {
        self.ip = jump_target(target)?;
        Ok(())
    }

    /// Pop a value and jump if `cond` holds for it.
    fn ins_jump_if(
        &mut self,
        op: Op,
        operand: Option<i64>,
        cond: fn(i64) -> bool,
    ) -> Result<(), Fault> {
        let target = operand.ok_or(Fault::MissingOperand(op))?;
        if cond(self.pop_stack()?) {
            self.ins_jmp(target)?;
        }
        Ok(())
    }

    /// Push the return address (already advanced) and jump.
    fn ins_call(&mut self, target: i64) -> Result<(), Fault> {
        let target = jump_target(target)?;
        self.call_stack.push(self.ip);
        self.ip = target;
        Ok(())
    }

    fn cell(&self, address: i64) -> Result<usize, Fault> {
        usize::try_from(address)
            .ok()
            .filter(|&cell| cell < self.memory.len())
            .ok_or(Fault::MemoryOutOfBounds(address))
    }

    fn pop_stack(&mut self) -> Result<i64, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    /// Pop the top two values as `(a, b)` where `b` was on top.
    fn pop_pair(&mut self) -> Result<(i64, i64), Fault> {
        if self.stack.len() < 2 {
            return Err(Fault::StackUnderflow);
        }
        let b = self.pop_stack()?;
        let a = self.pop_stack()?;
        Ok((a, b))
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn state(&self) -> &VmState {
        &self.state
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Operand stack, bottom first.
    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    pub fn call_stack(&self) -> &[usize] {
        &self.call_stack
    }

    pub fn memory(&self) -> &[i64] {
        &self.memory
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

fn jump_target(target: i64) -> Result<usize, Fault> {
    usize::try_from(target).map_err(|_| Fault::InvalidJumpTarget(target))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile;

    fn vm_with(program: &str, config: VmConfig) -> Vm<Vec<i64>> {
        let mut vm = Vm::with_output(config, Vec::new());
        vm.load(compile(program).unwrap());
        vm
    }

    fn run(program: &str) -> (Outcome, Vm<Vec<i64>>) {
        let mut vm = vm_with(program, VmConfig::default());
        let outcome = vm.run();
        (outcome, vm)
    }

    fn fault_of(program: &str) -> Fault {
        let (outcome, _) = run(program);
        outcome.fault().cloned().expect("program should fault")
    }

    #[test]
    fn arithmetic() {
        let (outcome, vm) = run("PUSH 6\nPUSH 4\nADD\nPUSH 3\nSUB\nPUSH -2\nMUL\nPRINT\nHALT");
        assert!(outcome.is_halted());
        assert_eq!(vm.sink(), &vec![-14]);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn floor_division() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(-7, -2), Some(3));
        assert_eq!(floor_div(-8, 2), Some(-4));
        assert_eq!(floor_div(i64::MIN, -1), None);
    }

    #[test]
    fn pop_discards_top() {
        let (_, vm) = run("PUSH 1\nPUSH 2\nPOP\nHALT");
        assert_eq!(vm.stack(), &[1]);
    }

    #[test]
    fn store_and_load() {
        let (outcome, vm) = run("PUSH 10\nPUSH 42\nSTORE\nPUSH 10\nLOAD\nPRINT\nHALT");
        assert!(outcome.is_halted());
        assert_eq!(vm.memory()[10], 42);
        assert_eq!(vm.sink(), &vec![42]);
    }

    #[test]
    fn memory_bounds() {
        assert_eq!(
            fault_of("PUSH 1024\nPUSH 0\nSTORE\nHALT"),
            Fault::MemoryOutOfBounds(1024)
        );
        assert_eq!(fault_of("PUSH -1\nLOAD\nHALT"), Fault::MemoryOutOfBounds(-1));

        let mut vm = vm_with(
            "PUSH 3\nPUSH 1\nSTORE\nHALT",
            VmConfig::default().with_memory_size(4),
        );
        assert!(vm.run().is_halted());
        assert_eq!(vm.memory(), &[0, 0, 0, 1]);
    }

    #[test]
    fn conditional_jumps() {
        let (_, vm) = run("PUSH 0\nJZ yes\nPUSH 1\nPRINT\nyes:\nPUSH 5\nJNZ out\nPUSH 2\nPRINT\nout:\nHALT");
        assert!(vm.sink().is_empty());

        let (_, vm) = run("PUSH 3\nJZ skip\nPUSH 1\nPRINT\nskip:\nPUSH 0\nJNZ end\nPUSH 2\nPRINT\nend:");
        assert_eq!(vm.sink(), &vec![1, 2]);
    }

    #[test]
    fn countdown_loop() {
        let program = "
            PUSH 0      ; counter lives in cell 0
            PUSH 3
            STORE
            loop:
            PUSH 0
            LOAD
            PRINT
            PUSH 0
            PUSH 0
            LOAD
            PUSH 1
            SUB
            STORE
            PUSH 0
            LOAD
            JNZ loop
            HALT
        ";
        let (outcome, vm) = run(program);
        assert!(outcome.is_halted());
        assert_eq!(vm.sink(), &vec![3, 2, 1]);
        assert_eq!(vm.memory()[0], 0);
    }

    #[test]
    fn call_and_return() {
        let (outcome, vm) = run("CALL sub\nHALT\nsub:\nPUSH 9\nPRINT\nRET");
        assert_eq!(
            outcome,
            Outcome::Halted {
                reason: HaltReason::Instruction,
                steps: 5
            }
        );
        assert_eq!(vm.sink(), &vec![9]);
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn call_pushes_advanced_ip() {
        let mut vm = vm_with("PUSH 1\nCALL sub\nHALT\nsub:\nHALT", VmConfig::default());
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.call_stack(), &[2]);
        assert_eq!(vm.ip(), 3);
    }

    #[test]
    fn faults() {
        assert_eq!(fault_of("ADD\nHALT"), Fault::StackUnderflow);
        assert_eq!(fault_of("PUSH 1\nMUL"), Fault::StackUnderflow);
        assert_eq!(fault_of("POP"), Fault::StackUnderflow);
        assert_eq!(fault_of("PRINT"), Fault::StackUnderflow);
        assert_eq!(fault_of("JZ 0"), Fault::StackUnderflow);
        assert_eq!(fault_of("PUSH 1\nPUSH 0\nDIV\nHALT"), Fault::DivisionByZero);
        assert_eq!(fault_of("RET"), Fault::CallStackUnderflow);
        assert_eq!(fault_of("PUSH"), Fault::MissingOperand(Op::Push));
        assert_eq!(fault_of("JMP"), Fault::MissingOperand(Op::Jmp));
        assert_eq!(fault_of("PUSH 0\nJZ"), Fault::MissingOperand(Op::Jz));
        assert_eq!(fault_of("CALL"), Fault::MissingOperand(Op::Call));
        assert_eq!(fault_of("JMP -1"), Fault::InvalidJumpTarget(-1));
        assert_eq!(fault_of("CALL -3"), Fault::InvalidJumpTarget(-3));
        assert_eq!(fault_of("PUSH 0\nJZ -1"), Fault::InvalidJumpTarget(-1));
        assert_eq!(fault_of("PUSH 1\nJNZ -1"), Fault::InvalidJumpTarget(-1));
        assert_eq!(
            fault_of("PUSH -9223372036854775808\nPUSH 1\nSUB"),
            Fault::ArithmeticOverflow(Op::Sub)
        );
        assert_eq!(
            fault_of("PUSH 9223372036854775807\nPUSH 2\nMUL"),
            Fault::ArithmeticOverflow(Op::Mul)
        );
        assert_eq!(
            fault_of("PUSH -9223372036854775808\nPUSH -1\nDIV"),
            Fault::ArithmeticOverflow(Op::Div)
        );
        assert_eq!(
            fault_of("PUSH 9223372036854775807\nPUSH 1\nADD"),
            Fault::ArithmeticOverflow(Op::Add)
        );
    }

    #[test]
    fn fault_reports_faulting_instruction() {
        let (outcome, vm) = run("PUSH 1\nPUSH 0\nDIV\nHALT");
        assert_eq!(
            outcome,
            Outcome::Faulted {
                fault: Fault::DivisionByZero,
                ip: 2,
                steps: 3
            }
        );
        assert_eq!(vm.state(), &VmState::Faulted(Fault::DivisionByZero));
    }

    #[test]
    fn jump_past_end_halts() {
        let (outcome, _) = run("JMP 100\nPUSH 1");
        assert_eq!(
            outcome,
            Outcome::Halted {
                reason: HaltReason::EndOfProgram,
                steps: 1
            }
        );
    }

    #[test]
    fn step_limit() {
        let mut vm = vm_with("top:\nJMP top", VmConfig::default().with_step_limit(Some(50)));
        let outcome = vm.run();
        assert_eq!(outcome.fault(), Some(&Fault::StepLimitExceeded(50)));
        assert_eq!(outcome.steps(), 50);
    }

    #[test]
    fn state_machine() {
        let mut vm = vm_with("PUSH 1\nHALT", VmConfig::default());
        assert_eq!(vm.state(), &VmState::Ready);
        assert_eq!(vm.step(), Ok(Flow::Continue));
        assert_eq!(vm.state(), &VmState::Running);
        assert_eq!(vm.step(), Ok(Flow::Halt(HaltReason::Instruction)));
        assert!(vm.state().is_terminal());

        // Terminal states are sticky.
        assert_eq!(vm.step(), Ok(Flow::Halt(HaltReason::Instruction)));
        assert_eq!(vm.steps(), 2);
        assert_eq!(vm.stack(), &[1]);

        vm.load(compile("ADD").unwrap());
        assert_eq!(vm.state(), &VmState::Ready);
        assert!(vm.stack().is_empty());
        assert_eq!(vm.step(), Err(Fault::StackUnderflow));
        assert_eq!(vm.step(), Err(Fault::StackUnderflow));
    }

    #[test]
    fn load_clears_memory_by_default() {
        let mut vm = vm_with("PUSH 5\nPUSH 7\nSTORE", VmConfig::default());
        vm.run();
        assert_eq!(vm.memory()[5], 7);

        vm.load(compile("PUSH 5\nLOAD\nPRINT").unwrap());
        vm.run();
        assert_eq!(vm.sink(), &vec![0]);
    }

    #[test]
    fn persistent_memory() {
        let config = VmConfig::default().with_persist_memory(true);
        let mut vm = vm_with("PUSH 5\nPUSH 7\nSTORE", config);
        vm.run();

        vm.load(compile("PUSH 5\nLOAD\nPRINT").unwrap());
        vm.run();
        assert_eq!(vm.sink(), &vec![7]);

        vm.clear_memory();
        assert!(vm.memory().iter().all(|&cell| cell == 0));
    }

    #[test]
    fn empty_program_halts() {
        let mut vm = Vm::with_output(VmConfig::default(), Vec::<i64>::new());
        assert_eq!(
            vm.run(),
            Outcome::Halted {
                reason: HaltReason::EndOfProgram,
                steps: 0
            }
        );
    }

    #[test]
    fn not_taken_branch_ignores_negative_target() {
        let (outcome, _) = run("PUSH 1\nJZ -1\nPUSH 0\nJNZ -1\nHALT");
        assert!(outcome.is_halted());
    }

    #[test]
    fn invalid_call_target_leaves_call_stack_alone() {
        let (outcome, vm) = run("CALL -3");
        assert_eq!(
            outcome,
            Outcome::Faulted {
                fault: Fault::InvalidJumpTarget(-3),
                ip: 0,
                steps: 1
            }
        );
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn division_by_zero_keeps_dividend() {
        let (outcome, vm) = run("PUSH 1\nPUSH 0\nDIV\nHALT");
        assert_eq!(outcome.fault(), Some(&Fault::DivisionByZero));
        assert_eq!(vm.stack(), &[1]);
    }

    struct ClosedPipe;

    impl Sink for ClosedPipe {
        fn emit(&mut self, _value: i64) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn failing_sink_faults() {
        let mut vm = Vm::with_output(VmConfig::default(), ClosedPipe);
        vm.load(compile("PUSH 1\nPRINT\nHALT").unwrap());
        let outcome = vm.run();
        assert!(matches!(
            outcome,
            Outcome::Faulted {
                fault: Fault::Output(_),
                ip: 1,
                steps: 2
            }
        ));
        assert!(matches!(vm.state(), VmState::Faulted(Fault::Output(_))));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn swap_sink() {
        let vm = vm_with("PUSH 1\nPRINT", VmConfig::default());
        let mut vm = vm.with_sink(crate::sink::WriterSink::new(Vec::<u8>::new()));
        vm.run();
        assert_eq!(vm.into_sink().into_inner(), b"1\n");
    }
}
