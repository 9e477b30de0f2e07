//! Gzip compression of database files.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::ReactorError;

/// Path the compressed copy of `source` is written to.
#[must_use]
pub fn compressed_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress `source` into `source.gz`, replacing any previous output. Returns the output path.
///
/// # Errors
/// Returns `ExecutionError` if `source` is not a regular file and `Io` for read/write failures.
pub fn compress_file(source: &Path) -> Result<PathBuf, ReactorError> {
    if !source.is_file() {
        return Err(ReactorError::ExecutionError(format!(
            "cannot compress {}: not a file",
            source.display()
        )));
    }
    let target = compressed_path(source);
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), Compression::default());
    let copied = io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    debug!(source = %source.display(), target = %target.display(), bytes = copied, "compressed file");
    Ok(target)
}
