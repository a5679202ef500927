//! Gzip compression of uploaded files.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Stream `input` through gzip into `output`.
///
/// Returns the number of uncompressed bytes read. Errors are returned as
/// human-readable messages, ready to be reported as a failed job.
pub fn gzip_file(input: &Path, output: &Path) -> Result<u64, String> {
    match fs::metadata(input) {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(format!("input file does not exist: {}", input.display())),
    }

    let source = File::open(input).map_err(|e| format!("input stream error: {e}"))?;
    let sink = File::create(output).map_err(|e| format!("compression error: {e}"))?;

    let mut encoder = GzEncoder::new(BufWriter::new(sink), Compression::default());
    let read = io::copy(&mut BufReader::new(source), &mut encoder)
        .map_err(|e| format!("compression error: {e}"))?;

    let mut writer = encoder
        .finish()
        .map_err(|e| format!("compression error: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("compression error: {e}"))?;

    Ok(read)
}
