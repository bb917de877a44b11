use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{fs, time::Instant};

use anyhow::Context;
use asmvm::{compile, error, info, log, Outcome, Vm, VmConfig};
use clap::Parser;

const EXIT_FAULTED: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Assemble source files and run them one after another on the same stack machine.
#[derive(Parser, Debug)]
#[command(name = "runner", version, about)]
struct Cli {
    /// Assembly source files, or `-` for stdin. Each is loaded in turn into one machine.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Number of memory cells.
    #[arg(long, default_value_t = asmvm::vm::DEFAULT_MEMORY_SIZE)]
    memory_size: usize,

    /// Keep memory from one file's run to the next instead of zero-filling it.
    #[arg(long)]
    persist_memory: bool,

    /// Fault after this many executed instructions per file.
    #[arg(long, value_name = "STEPS")]
    step_limit: Option<u64>,

    /// Print the resolved programs instead of running them.
    #[arg(long)]
    listing: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Leave the time of day out of log lines.
    #[arg(long)]
    no_timestamps: bool,
}

impl Cli {
    fn config(&self) -> VmConfig {
        VmConfig::default()
            .with_memory_size(self.memory_size)
            .with_persist_memory(self.persist_memory)
            .with_step_limit(self.step_limit)
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("could not read stdin")?;
        return Ok(source);
    }

    fs::read_to_string(path).with_context(|| format!("could not read \"{}\"", path.display()))
}

/// Run every file in order. Stops at the first fault and returns its outcome.
fn run(cli: &Cli) -> anyhow::Result<Option<Outcome>> {
    let mut vm = Vm::with_config(cli.config());
    let mut last = None;

    for path in &cli.files {
        let source = read_source(path)?;
        let program = compile(&source).with_context(|| format!("{}", path.display()))?;
        info!("{}: assembled {} instructions", path.display(), program.len());

        if cli.listing {
            print!("{}", program);
            continue;
        }

        vm.load(program);
        let started = Instant::now();
        let outcome = vm.run();
        info!(
            "{}: executed {} steps in {:?}",
            path.display(),
            outcome.steps(),
            started.elapsed()
        );

        let faulted = !outcome.is_halted();
        last = Some(outcome);
        if faulted {
            break;
        }
    }

    Ok(last)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    log::set_quiet(cli.quiet);
    log::set_timestamps(!cli.no_timestamps);

    match run(&cli) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(Outcome::Halted { reason, .. })) => {
            info!("halted: {:?}", reason);
            ExitCode::SUCCESS
        }
        Ok(Some(Outcome::Faulted { .. })) => ExitCode::from(EXIT_FAULTED),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
