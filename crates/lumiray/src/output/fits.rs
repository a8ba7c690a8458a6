//! Minimal FITS writer for image planes and data cubes.
//!
//! Writes single-HDU primary images: a header of 80-character cards padded
//! to the 2880-byte block size, followed by big-endian IEEE doubles
//! (BITPIX = −64). That is all the downstream tooling needs from the
//! engine's field output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// One header card: `KEY     = value / comment`, padded to 80 bytes.
fn card(key: &str, value: &str, comment: &str) -> [u8; CARD] {
  let text = if comment.is_empty() {
    format!("{key:<8}= {value:>20}")
  } else {
    format!("{key:<8}= {value:>20} / {comment}")
  };
  let mut bytes = [b' '; CARD];
  let text = text.as_bytes();
  bytes[..text.len().min(CARD)].copy_from_slice(&text[..text.len().min(CARD)]);
  bytes
}

/// A bare keyword card (`END`, `COMMENT …`).
fn bare_card(text: &str) -> [u8; CARD] {
  let mut bytes = [b' '; CARD];
  let text = text.as_bytes();
  bytes[..text.len().min(CARD)].copy_from_slice(&text[..text.len().min(CARD)]);
  bytes
}

fn string_value(s: &str) -> String {
  format!("'{s}'")
}

/// Write `data` as a FITS image of `width × height × depth` pixels.
///
/// `depth == 1` produces a two-dimensional image; larger depths a cube with
/// the slowest axis third. `pixel_size_x/y` are recorded as CDELT with the
/// given unit labels.
#[allow(clippy::too_many_arguments)]
pub fn write_fits(
  path: &Path,
  data: &[f64],
  width: usize,
  height: usize,
  depth: usize,
  pixel_size_x: f64,
  pixel_size_y: f64,
  value_unit: &str,
  length_unit: &str,
) -> Result<()> {
  if data.len() != width * height * depth {
    return Err(Error::config(format!(
      "FITS data length {} does not match {width}×{height}×{depth}",
      data.len()
    )));
  }

  let file = File::create(path)?;
  let mut out = BufWriter::new(file);
  let mut header: Vec<[u8; CARD]> = Vec::new();
  header.push(card("SIMPLE", "T", "conforms to the FITS standard"));
  header.push(card("BITPIX", "-64", "IEEE double precision"));
  let naxis = if depth > 1 { 3 } else { 2 };
  header.push(card("NAXIS", &naxis.to_string(), ""));
  header.push(card("NAXIS1", &width.to_string(), ""));
  header.push(card("NAXIS2", &height.to_string(), ""));
  if depth > 1 {
    header.push(card("NAXIS3", &depth.to_string(), ""));
  }
  header.push(card("BUNIT", &string_value(value_unit), "physical unit of the array values"));
  header.push(card("CDELT1", &format!("{pixel_size_x:E}"), "pixel size along the first axis"));
  header.push(card("CDELT2", &format!("{pixel_size_y:E}"), "pixel size along the second axis"));
  header.push(card("CUNIT1", &string_value(length_unit), ""));
  header.push(card("CUNIT2", &string_value(length_unit), ""));
  header.push(bare_card("END"));

  let mut written = 0usize;
  for c in &header {
    out.write_all(c)?;
    written += CARD;
  }
  while written % BLOCK != 0 {
    out.write_all(&[b' '; CARD])?;
    written += CARD;
  }

  let mut data_written = 0usize;
  for &value in data {
    out.write_all(&value.to_be_bytes())?;
    data_written += 8;
  }
  let pad = (BLOCK - data_written % BLOCK) % BLOCK;
  out.write_all(&vec![0u8; pad])?;
  out.flush()?;
  Ok(())
}
