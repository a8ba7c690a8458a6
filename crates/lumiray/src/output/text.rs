//! Text output: key/value reports, column data, and grid plot files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Buffered text file writer for reports and column data.
pub struct TextFile {
  out: BufWriter<File>,
}

impl TextFile {
  /// Create (truncate) the file at `path`.
  pub fn create(path: &Path) -> Result<Self> {
    Ok(Self { out: BufWriter::new(File::create(path)?) })
  }

  /// Write one line.
  pub fn line(&mut self, text: impl AsRef<str>) -> Result<()> {
    self.out.write_all(text.as_ref().as_bytes())?;
    self.out.write_all(b"\n")?;
    Ok(())
  }

  /// Write a `# `-prefixed comment line.
  pub fn comment(&mut self, text: impl AsRef<str>) -> Result<()> {
    self.line(format!("# {}", text.as_ref()))
  }

  /// Write a row of numeric columns separated by tabs.
  pub fn row(&mut self, values: &[f64]) -> Result<()> {
    let text = values.iter().map(|v| format!("{v:e}")).collect::<Vec<_>>().join("\t");
    self.line(text)
  }

  /// Flush buffered output.
  pub fn finish(mut self) -> Result<()> {
    self.out.flush()?;
    Ok(())
  }
}

/// Line segments describing the intersection of a grid's cell walls with
/// the coordinate planes, plus a 3D sample of cell edges.
#[derive(Clone, Debug, Default)]
pub struct GridPlotData {
  /// Segments in the xy plane: `[x1, y1, x2, y2]`.
  pub xy: Vec<[f64; 4]>,
  /// Segments in the xz plane.
  pub xz: Vec<[f64; 4]>,
  /// Segments in the yz plane.
  pub yz: Vec<[f64; 4]>,
  /// 3D segments: `[x1, y1, z1, x2, y2, z2]`.
  pub xyz: Vec<[f64; 6]>,
}

impl GridPlotData {
  /// Append the outline of an axis-aligned rectangle to a plane list.
  pub fn push_rect(list: &mut Vec<[f64; 4]>, a1: f64, b1: f64, a2: f64, b2: f64) {
    list.push([a1, b1, a2, b1]);
    list.push([a2, b1, a2, b2]);
    list.push([a2, b2, a1, b2]);
    list.push([a1, b2, a1, b1]);
  }

  /// True when no segments were collected at all.
  pub fn is_empty(&self) -> bool {
    self.xy.is_empty() && self.xz.is_empty() && self.yz.is_empty() && self.xyz.is_empty()
  }
}

/// Write the four grid plot files `<prefix>_gridxy/xz/yz/xyz.dat`.
pub fn write_grid_plots(data: &GridPlotData, dir: &Path, prefix: &str) -> Result<()> {
  for (plane, segments) in [("xy", &data.xy), ("xz", &data.xz), ("yz", &data.yz)] {
    let mut file = TextFile::create(&dir.join(format!("{prefix}_grid{plane}.dat")))?;
    file.comment(format!("grid wall segments in the {plane} plane"))?;
    file.comment("columns: a1 b1 a2 b2")?;
    for s in segments {
      file.row(s)?;
    }
    file.finish()?;
  }
  let mut file = TextFile::create(&dir.join(format!("{prefix}_gridxyz.dat")))?;
  file.comment("3D grid wall segments")?;
  file.comment("columns: x1 y1 z1 x2 y2 z2")?;
  for s in &data.xyz {
    file.row(s)?;
  }
  file.finish()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_text_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.dat");
    let mut file = TextFile::create(&path).unwrap();
    file.comment("header").unwrap();
    file.row(&[1.0, 2.5]).unwrap();
    file.finish().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# header\n"));
    assert!(text.contains("1e0\t2.5e0"));
  }

  #[test]
  fn test_grid_plot_files_created() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = GridPlotData::default();
    GridPlotData::push_rect(&mut data.xy, 0.0, 0.0, 1.0, 1.0);
    data.xyz.push([0.0; 6]);
    write_grid_plots(&data, dir.path(), "ds").unwrap();
    for name in ["ds_gridxy.dat", "ds_gridxz.dat", "ds_gridyz.dat", "ds_gridxyz.dat"] {
      assert!(dir.path().join(name).exists(), "{name} missing");
    }
    let xy = std::fs::read_to_string(dir.path().join("ds_gridxy.dat")).unwrap();
    assert_eq!(xy.lines().filter(|l| !l.starts_with('#')).count(), 4);
  }
}
