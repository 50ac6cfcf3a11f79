use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::thread;
use std::time::Duration;

use super::server::socket::server::{Connection, SocketServer};
use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell};
use super::utils::log::set_quiet;
use super::utils::report::{pass_summary, print_pass_records, TraceWriter};
use crate::arch::tpu::top::Top;
use crate::builtin::Module;
use crate::error::Result;

/// Sleep between socket polls while the core has nothing to do
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Cycles the clock may advance before the step shell is consulted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
  Unlimited,
  Cycles(u32),
}

pub struct Simulator {
  config: SimConfig,
  top: Top,
  trace: Option<TraceWriter<BufWriter<File>>>,
  shell: Option<Shell>,
  budget: Budget,
}

impl Simulator {
  pub fn new(config: SimConfig) -> Result<Self> {
    set_quiet(config.quiet);

    let trace = match &config.trace_file {
      Some(path) => {
        info!("Tracing host commands to {}", path);
        Some(TraceWriter::create(Path::new(path))?)
      }
      None => None,
    };

    let (shell, budget) = match config.step_mode {
      StepMode::Step => {
        println!("Step mode - Enter steps one cycle, 'si N' steps N, 'c' continues, 'q' quits");
        (Some(Shell::new()?), Budget::Cycles(0))
      }
      StepMode::Continuous => (None, Budget::Unlimited),
    };

    let top = Top::new("tpu", config.approx, config.sync_start);

    Ok(Self {
      config,
      top,
      trace,
      shell,
      budget,
    })
  }

  pub fn config(&self) -> &SimConfig {
    &self.config
  }

  pub fn top(&self) -> &Top {
    &self.top
  }

  /// Serve hosts one after another. `max_connections` of `None` serves until
  /// the step shell quits or the listener fails.
  pub fn serve(&mut self, server: &SocketServer, max_connections: Option<usize>) -> Result<()> {
    let mut served = 0;
    while max_connections.map_or(true, |max| served < max) {
      let mut conn = server.accept()?;
      served += 1;
      let keep_going = self.serve_client(&mut conn)?;
      self.on_disconnect(&conn)?;
      if !keep_going {
        break;
      }
    }
    Ok(())
  }

  /// Pump one connection until the host hangs up (`true`) or the shell quits (`false`)
  fn serve_client(&mut self, conn: &mut Connection) -> Result<bool> {
    let mut buf = [0u8; 256];
    loop {
      match conn.poll_read(&mut buf)? {
        Some(0) => return Ok(true),
        Some(n) => {
          for &byte in &buf[..n] {
            if !self.clock_allowed()? {
              return Ok(false);
            }
            self.top.push_byte(byte);
            let out = self.top.take_output();
            if !out.is_empty() {
              conn.send(&out)?;
            }
          }
          self.flush_trace()?;
        }
        // the clock free-runs only while a pass is in flight
        None if self.top.is_busy() => {
          if !self.clock_allowed()? {
            return Ok(false);
          }
          self.top.tick();
        }
        None => thread::sleep(IDLE_POLL),
      }
    }
  }

  fn clock_allowed(&mut self) -> Result<bool> {
    match self.budget {
      Budget::Unlimited => Ok(true),
      Budget::Cycles(n) if n > 0 => {
        self.budget = Budget::Cycles(n - 1);
        Ok(true)
      }
      Budget::Cycles(_) => {
        let Some(shell) = self.shell.as_mut() else {
          self.budget = Budget::Unlimited;
          return Ok(true);
        };
        match shell.read_command(self.top.cycle())? {
          Command::Step(n) => {
            self.budget = Budget::Cycles(n - 1);
            Ok(true)
          }
          Command::Continue => {
            self.budget = Budget::Unlimited;
            Ok(true)
          }
          Command::Quit => Ok(false),
        }
      }
    }
  }

  fn flush_trace(&mut self) -> Result<()> {
    let transactions = self.top.take_transactions();
    if let Some(trace) = self.trace.as_mut() {
      trace.write_all(&transactions)?;
    }
    Ok(())
  }

  fn on_disconnect(&mut self, conn: &Connection) -> Result<()> {
    self.flush_trace()?;
    if self.top.handler().awaiting_command() {
      info!("Disconnected: {} ({})", conn.peer(), pass_summary(self.top.controller()));
    } else {
      warn!(
        "Disconnected mid-payload: {} ({})",
        conn.peer(),
        pass_summary(self.top.controller())
      );
    }
    Ok(())
  }

  pub fn print_records(&self) {
    print_pass_records(self.top.name(), self.top.controller().records());
  }
}
