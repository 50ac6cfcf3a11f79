use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::arch::tpu::fp16::{ApproxConfig, DEFAULT_ADD_SHIFT, DEFAULT_MUL_BITS};
use crate::error::{Result, TpuError};

/// Built-in defaults, the lowest configuration layer
pub const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Prefix of environment overrides, e.g. `APPROX_TPU__APPROX__MUL_BITS=8`
pub const ENV_PREFIX: &str = "APPROX_TPU";

/// Approximate arithmetic section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApproxSection {
  #[serde(default = "default_mul_bits")]
  pub mul_bits: u32,
  #[serde(default = "default_add_shift")]
  pub add_shift: u32,
}

fn default_mul_bits() -> u32 {
  DEFAULT_MUL_BITS
}

fn default_add_shift() -> u32 {
  DEFAULT_ADD_SHIFT
}

impl Default for ApproxSection {
  fn default() -> Self {
    Self {
      mul_bits: default_mul_bits(),
      add_shift: default_add_shift(),
    }
  }
}

/// Host link section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
  #[serde(default = "default_bind")]
  pub bind: String,
  #[serde(default)]
  pub trace_file: String,
}

fn default_bind() -> String {
  "127.0.0.1:6000".to_string()
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      bind: default_bind(),
      trace_file: String::new(),
    }
  }
}

/// Simulation section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub sync_start: bool,
}

/// Effective application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub approx: ApproxSection,
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn approx_config(&self) -> Result<ApproxConfig> {
    ApproxConfig::new(self.approx.mul_bits, self.approx.add_shift)
  }

  /// Render as TOML, for `--print-config`
  pub fn to_toml(&self) -> Result<String> {
    toml::to_string_pretty(self).map_err(|e| TpuError::invalid_config(e.to_string()))
  }
}

/// Command-line overrides; `None`/`false` leaves the lower layers alone
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub bind: Option<String>,
  pub mul_bits: Option<u32>,
  pub add_shift: Option<u32>,
  pub trace_file: Option<String>,
  pub quiet: bool,
  pub step: bool,
  pub sync_start: bool,
}

/// Defaults, then an optional user file, then environment variables under `env_prefix`
pub fn load_layered(custom_config_path: Option<&Path>, env_prefix: &str) -> Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

  if let Some(path) = custom_config_path {
    builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(true));
  }

  builder = builder.add_source(
    Environment::with_prefix(env_prefix)
      .prefix_separator("__")
      .separator("__")
      .try_parsing(true),
  );

  let config = builder.build()?.try_deserialize::<AppConfig>()?;
  Ok(config)
}

/// Apply CLI parameters on top of the loaded configuration
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if let Some(bind) = &cli.bind {
    config.server.bind = bind.clone();
  }
  if let Some(m) = cli.mul_bits {
    config.approx.mul_bits = m;
  }
  if let Some(s) = cli.add_shift {
    config.approx.add_shift = s;
  }
  if let Some(file) = &cli.trace_file {
    config.server.trace_file = file.clone();
  }
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if cli.sync_start {
    config.simulation.sync_start = true;
  }
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
  config.approx_config()?;

  if config.server.bind.trim().is_empty() {
    return Err(TpuError::invalid_config("server.bind cannot be empty"));
  }

  Ok(())
}

/// Load and merge configuration
///
/// 1. embedded defaults
/// 2. user config file, if given
/// 3. `APPROX_TPU__<SECTION>__<KEY>` environment variables
/// 4. CLI overrides
/// 5. validation
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig> {
  let mut config = load_layered(custom_config_path, ENV_PREFIX)?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
