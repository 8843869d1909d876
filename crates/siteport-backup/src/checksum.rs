//! SHA256 helpers used to seal the dump entry.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Calculates SHA256 checksum of a file.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io_at("open for checksum", path, e))?;
    checksum_reader(&mut file).map_err(|e| Error::io_at("checksum", path, e))
}

/// Calculates SHA256 checksum of everything left in a reader.
pub fn checksum_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writer that calculates SHA256 checksum while writing.
pub struct ChecksumWriter<W: Write> {
    writer: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Flushes and returns the inner writer, the checksum and the byte count
    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.writer.flush()?;
        let checksum = format!("{:x}", self.hasher.finalize());
        Ok((self.writer, checksum, self.bytes_written))
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
