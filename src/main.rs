use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use ls8::batch::{self, StressConfig};
use ls8::cpu::{Cpu, CpuConfig, UnknownOpcodePolicy};
use ls8::loader::load_file;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ls8", about = "LS-8 emulator: run 8-bit register machine programs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more program listings. Several files run in parallel,
    /// each on its own machine, and their output is printed in order.
    Run {
        /// Program listings (one binary literal per line, `#` comments).
        #[arg(required = true)]
        programs: Vec<PathBuf>,

        #[command(flatten)]
        machine: MachineArgs,

        /// Print a trace line to stderr before every instruction
        /// (single program only).
        #[arg(long)]
        trace: bool,
    },
    /// Run random memory images and report how the runs ended.
    Stress {
        /// Random seed for reproducibility.
        #[arg(long)]
        seed: u64,

        /// Number of random images.
        #[arg(long, default_value_t = 1 << 12)]
        count: usize,

        #[command(flatten)]
        machine: MachineArgs,
    },
}

#[derive(clap::Args)]
struct MachineArgs {
    /// Max instructions per program (unlimited if omitted; stress defaults to 1024).
    #[arg(long)]
    step_limit: Option<usize>,

    /// What to do on a byte that is not a known opcode.
    #[arg(long, value_enum, default_value_t = OnUnknown::Abort)]
    on_unknown: OnUnknown,

    /// Initial stack pointer (R6) value.
    #[arg(long, default_value_t = 0)]
    stack_pointer: u8,
}

#[derive(Copy, Clone, ValueEnum)]
enum OnUnknown {
    Abort,
    Skip,
}

impl MachineArgs {
    fn config(&self) -> CpuConfig {
        CpuConfig {
            step_limit: self.step_limit,
            unknown_opcode: match self.on_unknown {
                OnUnknown::Abort => UnknownOpcodePolicy::Abort,
                OnUnknown::Skip => UnknownOpcodePolicy::Skip,
            },
            stack_pointer: self.stack_pointer,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            programs,
            machine,
            trace,
        } => {
            let config = machine.config();
            if let [path] = programs.as_slice() {
                run_single(path, config, trace)
            } else if trace {
                bail!("--trace needs exactly one program");
            } else {
                run_many(&programs, &config)
            }
        }
        Command::Stress {
            seed,
            count,
            machine,
        } => {
            let defaults = StressConfig::default();
            let config = StressConfig {
                count,
                step_limit: machine.step_limit.unwrap_or(defaults.step_limit),
            };
            run_stress(&config, &machine.config(), seed);
            Ok(())
        }
    }
}

fn run_single(path: &Path, config: CpuConfig, trace: bool) -> Result<()> {
    let image = load_file(path).with_context(|| format!("loading {}", path.display()))?;
    let mut cpu = Cpu::with_config(config, io::stdout());
    cpu.load(&image)?;
    if trace {
        loop {
            eprintln!("{}", cpu.trace());
            if !cpu.step()? {
                break;
            }
        }
    } else {
        cpu.run()
            .with_context(|| format!("running {}", path.display()))?;
    }
    Ok(())
}

fn run_many(paths: &[PathBuf], config: &CpuConfig) -> Result<()> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(load_file(path).with_context(|| format!("loading {}", path.display()))?);
    }

    let results = batch::run_all(&images, config);

    let mut stdout = io::stdout().lock();
    let mut failed = 0;
    for (path, result) in paths.iter().zip(&results) {
        writeln!(stdout, "== {}", path.display())?;
        stdout.write_all(&result.output)?;
        if let Err(e) = &result.outcome {
            eprintln!("{}: {e}", path.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} programs failed", paths.len());
    }
    Ok(())
}

fn run_stress(config: &StressConfig, cpu: &CpuConfig, seed: u64) {
    let start = std::time::Instant::now();
    let tally = batch::stress(config, cpu, seed);
    let elapsed = start.elapsed();

    let steps_per_sec = tally.total_steps as f64 / elapsed.as_secs_f64();

    eprintln!("Stress results:");
    eprintln!("  Images:          {}", tally.runs());
    eprintln!("  Halted:          {}", tally.halted);
    eprintln!("  Unknown opcode:  {}", tally.unknown_opcode);
    eprintln!("  Out of range:    {}", tally.out_of_range);
    eprintln!("  Step limit:      {}", tally.step_limit);
    eprintln!("  Other errors:    {}", tally.other);
    eprintln!("  Total steps:     {}", tally.total_steps);
    eprintln!("  Elapsed:         {elapsed:.2?}");
    eprintln!("  Steps/sec:       {steps_per_sec:.0}");
}
