//! Hooks for languages that compile down to this assembly.

use anyhow::Context;

use crate::bytecode::compile;
use crate::error::AsmError;
use crate::sink::Sink;
use crate::vm::{Outcome, Vm};

/// Compile `source`, load it into `vm` and run it to completion.
pub fn compile_and_run<S: Sink>(source: &str, vm: &mut Vm<S>) -> Result<Outcome, AsmError> {
    let program = compile(source)?;
    vm.load(program);
    Ok(vm.run())
}

/// A language front end that translates its own source text into assembly.
pub trait Frontend {
    fn to_assembly(&self, source: &str) -> anyhow::Result<String>;

    /// Translate, assemble and run.
    fn run<S: Sink>(&self, source: &str, vm: &mut Vm<S>) -> anyhow::Result<Outcome> {
        let assembly = self.to_assembly(source)?;
        compile_and_run(&assembly, vm).context("generated assembly does not compile")
    }
}

/// The assembly language itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct Assembly;

impl Frontend for Assembly {
    fn to_assembly(&self, source: &str) -> anyhow::Result<String> {
        Ok(source.to_string())
    }
}
