use crate::arch::tpu::fp16::ApproxConfig;
use crate::error::Result;
use crate::simulator::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
  pub bind: String,
  pub approx: ApproxConfig,
  pub quiet: bool,
  pub step_mode: StepMode,
  pub sync_start: bool,
  pub trace_file: Option<String>,
}

impl SimConfig {
  pub fn from_app_config(config: &AppConfig) -> Result<Self> {
    let step_mode = if config.simulation.step_mode {
      StepMode::Step
    } else {
      StepMode::Continuous
    };
    let trace_file = Some(config.server.trace_file.trim())
      .filter(|f| !f.is_empty())
      .map(str::to_string);

    Ok(Self {
      bind: config.server.bind.clone(),
      approx: config.approx_config()?,
      quiet: config.simulation.quiet,
      step_mode,
      sync_start: config.simulation.sync_start,
      trace_file,
    })
  }
}

impl Default for SimConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:6000".to_string(),
      approx: ApproxConfig::default(),
      quiet: false,
      step_mode: StepMode::Continuous,
      sync_start: false,
      trace_file: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_app_config() {
    let mut app = AppConfig::default();
    let sim = SimConfig::from_app_config(&app).unwrap();
    assert_eq!(sim.step_mode, StepMode::Continuous);
    assert_eq!(sim.trace_file, None);
    assert_eq!(sim.bind, SimConfig::default().bind);

    app.simulation.step_mode = true;
    app.server.trace_file = "out.jsonl".to_string();
    app.approx.mul_bits = 11;
    let sim = SimConfig::from_app_config(&app).unwrap();
    assert_eq!(sim.step_mode, StepMode::Step);
    assert_eq!(sim.trace_file.as_deref(), Some("out.jsonl"));
    assert_eq!(sim.approx.mul_bits, 11);

    app.approx.mul_bits = 0;
    assert!(SimConfig::from_app_config(&app).is_err());
  }
}
