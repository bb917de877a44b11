//! A two-pass assembler and a stack-based virtual machine for a tiny integer assembly language.
//!
//! # Example
//!
//! ```text
//! ; print 3, 2, 1
//!         PUSH 0      ; counter lives in cell 0
//!         PUSH 3
//!         STORE
//! loop:
//!         PUSH 0
//!         LOAD
//!         PRINT
//!         PUSH 0
//!         PUSH 0
//!         LOAD
//!         PUSH 1
//!         SUB
//!         STORE
//!         PUSH 0
//!         LOAD
//!         JNZ loop
//!         HALT
//! ```
//!
//! ```
//! use asmvm::{compile, Vm, VmConfig};
//!
//! let program = compile("PUSH 2\nPUSH 3\nADD\nPRINT\nHALT").unwrap();
//! let mut vm = Vm::with_output(VmConfig::default(), Vec::<i64>::new());
//! vm.load(program);
//! assert!(vm.run().is_halted());
//! assert_eq!(vm.sink(), &vec![5]);
//! ```
//!
//! # Syntax
//!
//! - One instruction or label per line; `;` starts a comment. Lines may end in
//!   `\n`, `\r\n` or a lone `\r`.
//! - Mnemonics are case-insensitive.
//! - `name:` at the start of a line declares a label bound to the next instruction.
//! - An operand is a decimal integer or an alphabetic label name. Labels may be
//!   used before they are declared.
//!
//! # Instructions
//!
//! | Instruction | Usage         | Brief   |
//! |-------------|---------------|---------|
//! | Push        | PUSH _n_      | Push `n` on top of the stack. |
//! | Pop         | POP           | Pop a value and discard it. |
//! | Add         | ADD           | Pop `b`, pop `a`, push `a + b`. |
//! | Sub         | SUB           | Pop `b`, pop `a`, push `a - b`. |
//! | Mul         | MUL           | Pop `b`, pop `a`, push `a * b`. |
//! | Div         | DIV           | Pop `b`, pop `a`, push `a / b` rounded toward negative infinity. |
//! | Store       | STORE         | Pop a value, pop an address, write the value to memory. |
//! | Load        | LOAD          | Pop an address, push the memory cell. |
//! | Jmp         | JMP _addr_    | Continue at `addr`. |
//! | Jz          | JZ _addr_     | Pop a value, continue at `addr` if it is zero. |
//! | Jnz         | JNZ _addr_    | Pop a value, continue at `addr` if it is not zero. |
//! | Call        | CALL _addr_   | Push the return address on the call stack and continue at `addr`. |
//! | Ret         | RET           | Continue at the address popped from the call stack. |
//! | Print       | PRINT         | Pop a value and emit it to the output sink. |
//! | Halt        | HALT          | Stop the machine. |
//!
//! Addresses are absolute instruction indices, usually written as labels.
//!
//! # Important notes
//!
//! - Running past the last instruction halts the machine just like `HALT`.
//! - Memory is zero-filled on every load unless [`VmConfig::persist_memory`] is set.
//! - Runtime faults never panic; [`Vm::run`] returns them in its [`Outcome`].

pub mod bytecode;
pub mod error;
pub mod frontend;
mod lexer;
pub mod log;
pub mod sink;
pub mod token;
pub mod vm;

pub use bytecode::{compile, Instruction, Program};
pub use error::{AsmError, Fault};
pub use frontend::{compile_and_run, Frontend};
pub use sink::{Sink, StdoutSink, WriterSink};
pub use token::Op;
pub use vm::{Flow, HaltReason, Outcome, Vm, VmConfig, VmState};
