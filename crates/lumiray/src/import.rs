//! Particle/mesh import: ASCII records of positions plus field columns.
//!
//! The baseline format is one record per line, `#`-prefixed comments and
//! blank lines ignored: three coordinate columns followed by any number of
//! field columns. Truncated records and non-numeric values are fatal;
//! filtering of particles outside the domain is left to the consumer.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glam::DVec3;

use crate::error::{Error, Result};

/// One imported record: a position and the additional field columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleRecord {
  /// Particle position.
  pub position: DVec3,
  /// Values of the extra columns, in file order.
  pub fields: Vec<f64>,
}

impl ParticleRecord {
  /// Value of extra column `g` (zero-based, after the coordinates).
  pub fn value(&self, g: usize) -> Option<f64> {
    self.fields.get(g).copied()
  }
}

/// Reader over an ASCII particle file.
#[derive(Debug)]
pub struct ParticleReader {
  lines: std::io::Lines<BufReader<File>>,
  line_number: usize,
  path: String,
}

impl ParticleReader {
  /// Open the file at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path)
      .map_err(|e| Error::Import(format!("can't open particle file {}: {e}", path.display())))?;
    Ok(Self {
      lines: BufReader::new(file).lines(),
      line_number: 0,
      path: path.display().to_string(),
    })
  }

  /// Read the next record, or `None` at end of file.
  pub fn read(&mut self) -> Result<Option<ParticleRecord>> {
    loop {
      self.line_number += 1;
      let Some(line) = self.lines.next() else {
        return Ok(None);
      };
      let line = line.map_err(|e| Error::Import(format!("read failure in {}: {e}", self.path)))?;
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.starts_with('#') {
        continue;
      }

      let mut values = Vec::new();
      for token in trimmed.split_whitespace() {
        let value: f64 = token.parse().map_err(|_| {
          Error::Import(format!(
            "non-numeric value '{token}' on line {} of {}",
            self.line_number, self.path
          ))
        })?;
        values.push(value);
      }
      if values.len() < 3 {
        return Err(Error::Import(format!(
          "truncated record on line {} of {}: expected at least 3 coordinates",
          self.line_number, self.path
        )));
      }
      let position = DVec3::new(values[0], values[1], values[2]);
      return Ok(Some(ParticleRecord { position, fields: values.split_off(3) }));
    }
  }

  /// Read all remaining records.
  pub fn read_all(&mut self) -> Result<Vec<ParticleRecord>> {
    let mut records = Vec::new();
    while let Some(record) = self.read()? {
      records.push(record);
    }
    Ok(records)
  }
}
