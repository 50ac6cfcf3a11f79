use approx_tpu::simulator::config::{load_and_merge_configs, CliOverrides};
use approx_tpu::simulator::server::SocketServer;
use approx_tpu::simulator::sim::mode::SimConfig;
use approx_tpu::simulator::utils::log::init_log;
use approx_tpu::simulator::Simulator;
use clap::Parser;
use std::path::PathBuf;

/// Approximate FP16 8x8 systolic matrix-multiply accelerator model
#[derive(Parser, Debug)]
#[command(name = "approx-tpu")]
#[command(version = "0.1.0")]
#[command(about = "Serves the byte-level command protocol of an approximate FP16 systolic array", long_about = None)]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Listen address, e.g. 127.0.0.1:6000
  #[arg(short, long, value_name = "ADDR")]
  bind: Option<String>,

  /// Significand bits the multiplier reads (1..=11)
  #[arg(long, value_name = "M")]
  mul_bits: Option<u32>,

  /// Largest adder alignment shift (0..=31)
  #[arg(long, value_name = "S")]
  add_shift: Option<u32>,

  /// JSON-lines trace of host commands
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (warnings and errors only)
  #[arg(short, long)]
  quiet: bool,

  /// Run each pass to completion inside Start and reply DONE
  #[arg(long)]
  sync_start: bool,

  /// Print the effective configuration and exit
  #[arg(long)]
  print_config: bool,
}

fn main() -> approx_tpu::Result<()> {
  init_log();

  let args = Args::parse();

  let cli = CliOverrides {
    bind: args.bind,
    mul_bits: args.mul_bits,
    add_shift: args.add_shift,
    trace_file: args.trace_file,
    quiet: args.quiet,
    step: args.step,
    sync_start: args.sync_start,
  };
  let app_config = load_and_merge_configs(args.config.as_deref(), &cli)?;

  if args.print_config {
    print!("{}", app_config.to_toml()?);
    return Ok(());
  }

  let config = SimConfig::from_app_config(&app_config)?;
  let server = SocketServer::bind(&config.bind)?;
  let mut simulator = Simulator::new(config)?;

  let served = simulator.serve(&server, None);
  if !simulator.config().quiet {
    simulator.print_records();
  }
  served
}
