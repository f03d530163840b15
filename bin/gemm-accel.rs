use clap::Parser;
use gemm_accel::arch::gemm::format::ElemFormat;
use gemm_accel::simulator::config::{load_and_merge_configs, CliOverrides};
use gemm_accel::simulator::utils::log::init_log;
use gemm_accel::simulator::Simulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// Cycle-approximate simulator of a systolic GEMM accelerator
#[derive(Parser, Debug)]
#[command(name = "gemm-accel")]
#[command(version = "0.1.0")]
#[command(about = "Runs one Z = Y + X*W job on the GEMM accelerator model", long_about = None)]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Array height (H)
  #[arg(long)]
  height: Option<usize>,

  /// Pipeline registers per row (P); the array is H*P elements wide
  #[arg(long)]
  pipe_regs: Option<usize>,

  /// Element format: fp8, fp16 or fp32
  #[arg(short, long)]
  format: Option<ElemFormat>,

  /// Rows of X and Z
  #[arg(short)]
  m: Option<usize>,

  /// Contraction length
  #[arg(short)]
  n: Option<usize>,

  /// Columns of W and Z
  #[arg(short)]
  k: Option<usize>,

  /// Operand seed
  #[arg(long)]
  seed: Option<u64>,

  /// Memory latency per transaction in cycles
  #[arg(long)]
  latency: Option<u64>,

  /// Print the effective configuration as TOML and exit
  #[arg(long)]
  dump_config: bool,
}

fn run(args: Args) -> std::io::Result<()> {
  let cli = CliOverrides {
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    array_height: args.height,
    pipe_regs: args.pipe_regs,
    format: args.format,
    m: args.m,
    n: args.n,
    k: args.k,
    seed: args.seed,
    latency: args.latency,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;

  if args.dump_config {
    print!("{}", config.to_toml()?);
    return Ok(());
  }

  init_log(config.simulation.quiet);
  let mut simulator = Simulator::new(config)?;
  let summary = simulator.run()?;
  match summary.report {
    Some(report) => println!(
      "done: {} cycles, max error {:e}",
      report.cycles,
      summary.max_error.unwrap_or_default()
    ),
    None => println!("stopped after {} steps at t={}", summary.steps, summary.sim_time),
  }
  Ok(())
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("gemm-accel: {}", e);
      ExitCode::FAILURE
    },
  }
}
