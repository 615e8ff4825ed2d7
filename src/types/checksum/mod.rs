#![forbid(unsafe_code)]
//! CRC-32 helpers shared by the index, dictionary and transaction-log files.

use std::io::{self, Read, Write};

/// Writer adapter that folds every byte written into a running CRC-32.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    /// Wraps `inner` with a fresh checksum.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    /// Checksum of everything written so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes passed through.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Restarts the checksum without touching the inner writer.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Mutable access to the wrapped writer. Bytes written here bypass the
    /// checksum.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader adapter that folds every byte read into a running CRC-32.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> ChecksumReader<R> {
    /// Wraps `inner` with a fresh checksum.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Checksum of everything read so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Restarts the checksum.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Mutable access to the wrapped reader. Bytes read here bypass the
    /// checksum.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
