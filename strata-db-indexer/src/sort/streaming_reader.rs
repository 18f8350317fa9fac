//! Buffered, forward-only reader for run files.
//!
//! Reads `batch` tuples at a time so that a merge over many runs holds only
//! a small window of each run in memory.

use super::run_file::{RunFileHeader, RUN_HEADER_LEN};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use strata_db_core::Tuple;

/// Upper bound on a single record, guarding against corrupt length prefixes.
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

pub struct StreamingRunReader {
    file: BufReader<File>,
    header: RunFileHeader,
    batch: usize,
    /// Read buffer.
    buffer: Vec<Tuple>,
    /// Current position within buffer.
    buf_pos: usize,
    /// Number of records still in the file (not yet read into buffer).
    remaining: u64,
}

impl StreamingRunReader {
    /// Open a run file for streaming.
    pub fn open(path: &Path, batch: usize) -> io::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);

        let mut header_buf = [0u8; RUN_HEADER_LEN];
        file.read_exact(&mut header_buf)?;
        let header = RunFileHeader::read_from(&header_buf)?;

        let batch = batch.max(1);
        let mut reader = Self {
            file,
            header,
            batch,
            buffer: Vec::with_capacity(batch),
            buf_pos: 0,
            remaining: header.record_count,
        };
        reader.fill_buffer()?;
        Ok(reader)
    }

    /// Peek at the current tuple without advancing.
    /// Returns `None` if exhausted.
    #[inline]
    pub fn peek(&self) -> Option<&Tuple> {
        self.buffer.get(self.buf_pos)
    }

    /// Advance to the next tuple. Refills buffer from disk if needed.
    pub fn advance(&mut self) -> io::Result<()> {
        self.buf_pos += 1;
        if self.buf_pos >= self.buffer.len() && self.remaining > 0 {
            self.fill_buffer()?;
        }
        Ok(())
    }

    /// True when all tuples have been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.buf_pos >= self.buffer.len() && self.remaining == 0
    }

    /// Number of tuples in this run file (from the header).
    pub fn record_count(&self) -> u64 {
        self.header.record_count
    }

    /// Fill the buffer with the next batch of tuples from disk.
    fn fill_buffer(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.buf_pos = 0;
        let to_read = (self.remaining as usize).min(self.batch);
        let mut len_buf = [0u8; 4];
        let mut data = Vec::new();
        for _ in 0..to_read {
            self.file.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("run file: record length {} exceeds limit", len),
                ));
            }
            data.resize(len, 0);
            self.file.read_exact(&mut data)?;
            let tuple = Tuple::from_bytes(&data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.buffer.push(tuple);
        }
        self.remaining -= to_read as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::run_file::write_run_file;
    use super::*;

    fn tuples(n: usize) -> Vec<Tuple> {
        (0..n)
            .map(|i| Tuple::from_fields(&[Some(format!("{:04}", i).as_bytes())]))
            .collect()
    }

    #[test]
    fn test_reads_across_batches() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("run.srn");
        let input = tuples(10);
        write_run_file(&path, &input).unwrap();

        let mut r = StreamingRunReader::open(&path, 3).unwrap();
        assert_eq!(r.record_count(), 10);
        let mut out = Vec::new();
        while let Some(t) = r.peek() {
            out.push(t.clone());
            r.advance().unwrap();
        }
        assert!(r.is_exhausted());
        assert_eq!(out, input);
    }

    #[test]
    fn test_empty_run() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("empty.srn");
        write_run_file(&path, &[]).unwrap();
        let r = StreamingRunReader::open(&path, 8).unwrap();
        assert!(r.is_exhausted());
        assert!(r.peek().is_none());
    }

    #[test]
    fn test_truncated_run_errors() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("run.srn");
        write_run_file(&path, &tuples(4)).unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 2).unwrap();
        let mut r = StreamingRunReader::open(&path, 2).unwrap();
        let mut failed = false;
        while r.peek().is_some() {
            if r.advance().is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }
}
