/// Logger setup
use env_logger::Env;
use log::LevelFilter;

/// Initialise `env_logger`; `RUST_LOG` overrides the default `info` filter.
/// Safe to call more than once.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
    .format_target(false)
    .try_init();
}

/// Quiet mode keeps warnings and errors only
pub fn set_quiet(quiet: bool) {
  if quiet {
    log::set_max_level(LevelFilter::Warn);
  }
}
