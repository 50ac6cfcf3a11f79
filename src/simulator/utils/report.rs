use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::arch::tpu::controller::{Controller, PassRecord};
use crate::arch::tpu::protocol::Transaction;
use crate::error::{Result, TpuError};

pub fn print_pass_records(name: &str, records: &[PassRecord]) {
  println!("\n--- Pass Records ---");
  if !records.is_empty() {
    println!("\n[{}]", name);
    for record in records {
      println!("  Cycle {}: {} {}", record.cycle, record.action, record.subject);
    }
  }
  println!("--- End Records ---\n");
}

/// One line summary of the work a controller has done
pub fn pass_summary(ctrl: &Controller) -> String {
  format!(
    "{} passes, {} MACs, {} cycles",
    ctrl.passes(),
    ctrl.mac_operations(),
    ctrl.cycle()
  )
}

/// JSON-lines trace of host transactions
pub struct TraceWriter<W: Write> {
  out: W,
  lines: usize,
}

impl TraceWriter<BufWriter<File>> {
  pub fn create(path: &Path) -> Result<Self> {
    let file = File::create(path)?;
    Ok(Self::new(BufWriter::new(file)))
  }
}

impl<W: Write> TraceWriter<W> {
  pub fn new(out: W) -> Self {
    Self { out, lines: 0 }
  }

  pub fn write(&mut self, transaction: &Transaction) -> Result<()> {
    serde_json::to_writer(&mut self.out, transaction).map_err(|e| TpuError::Io(e.into()))?;
    self.out.write_all(b"\n")?;
    self.lines += 1;
    Ok(())
  }

  pub fn write_all(&mut self, transactions: &[Transaction]) -> Result<()> {
    for t in transactions {
      self.write(t)?;
    }
    self.out.flush()?;
    Ok(())
  }

  pub fn lines(&self) -> usize {
    self.lines
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}
