//! Run file binary format: header + length-prefixed tuples.
//!
//! ```text
//! [Header: 32 bytes]
//!   magic: "SRN1" (4B), version: u8, _pad: [u8; 3]
//!   record_count: u64
//!   data_len: u64
//!   _reserved: [u8; 8]
//! [Records: record_count × ([len: u32 LE][tuple bytes])]
//! ```
//!
//! Records are sorted by the sorter's key order. The header is written last
//! (after seeking back), so a file with `record_count == 0` and a non-empty
//! body is a run that was never finished.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use strata_db_core::Tuple;

/// Magic bytes for a run file.
pub const RUN_MAGIC: [u8; 4] = *b"SRN1";

/// Current run file format version.
pub const RUN_VERSION: u8 = 1;

/// Header size in bytes.
pub const RUN_HEADER_LEN: usize = 32;

/// Run file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFileHeader {
    pub version: u8,
    pub record_count: u64,
    pub data_len: u64,
}

impl RunFileHeader {
    /// Write the header to the first 32 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= RUN_HEADER_LEN);
        buf[0..4].copy_from_slice(&RUN_MAGIC);
        buf[4] = self.version;
        buf[5..8].fill(0);
        buf[8..16].copy_from_slice(&self.record_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_len.to_le_bytes());
        buf[24..32].fill(0);
    }

    /// Read the header from the first 32 bytes of `buf`.
    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < RUN_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("run file header too small: {} < {}", buf.len(), RUN_HEADER_LEN),
            ));
        }
        if buf[0..4] != RUN_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "run file: invalid magic bytes",
            ));
        }
        let version = buf[4];
        if version != RUN_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("run file: unsupported version {}", version),
            ));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[8..16]);
        let record_count = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[16..24]);
        let data_len = u64::from_le_bytes(word);
        Ok(Self {
            version,
            record_count,
            data_len,
        })
    }
}

/// Metadata about a finished run file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFileInfo {
    pub path: PathBuf,
    pub record_count: u64,
    /// Bytes of record data (excluding the header).
    pub data_len: u64,
}

/// Streaming writer for one run file. Records must be pushed in order.
pub struct RunFileWriter {
    path: PathBuf,
    out: BufWriter<File>,
    record_count: u64,
    data_len: u64,
}

impl RunFileWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&[0u8; RUN_HEADER_LEN])?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            record_count: 0,
            data_len: 0,
        })
    }

    pub fn push(&mut self, tuple: &Tuple) -> io::Result<()> {
        let bytes = tuple.as_bytes();
        let len = u32::try_from(bytes.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("tuple of {} bytes exceeds run record limit", bytes.len()),
            )
        })?;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(bytes)?;
        self.record_count += 1;
        self.data_len += 4 + bytes.len() as u64;
        Ok(())
    }

    /// Write the header and close the file.
    pub fn finish(mut self) -> io::Result<RunFileInfo> {
        let mut header = [0u8; RUN_HEADER_LEN];
        RunFileHeader {
            version: RUN_VERSION,
            record_count: self.record_count,
            data_len: self.data_len,
        }
        .write_to(&mut header);
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.flush()?;
        Ok(RunFileInfo {
            path: self.path,
            record_count: self.record_count,
            data_len: self.data_len,
        })
    }
}

/// Write already-sorted tuples as a complete run file.
pub fn write_run_file(path: &Path, tuples: &[Tuple]) -> io::Result<RunFileInfo> {
    let mut w = RunFileWriter::create(path)?;
    for t in tuples {
        w.push(t)?;
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let h = RunFileHeader {
            version: RUN_VERSION,
            record_count: 12,
            data_len: 345,
        };
        let mut buf = [0u8; RUN_HEADER_LEN];
        h.write_to(&mut buf);
        assert_eq!(RunFileHeader::read_from(&buf).unwrap(), h);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = [0u8; RUN_HEADER_LEN];
        buf[0..4].copy_from_slice(b"NOPE");
        let err = RunFileHeader::read_from(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_write_run_file_info() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("run_00000.srn");
        let tuples = vec![
            Tuple::from_fields(&[Some(b"a")]),
            Tuple::from_fields(&[Some(b"bc")]),
        ];
        let info = write_run_file(&path, &tuples).unwrap();
        assert_eq!(info.record_count, 2);
        let expected: u64 = tuples.iter().map(|t| 4 + t.size() as u64).sum();
        assert_eq!(info.data_len, expected);
        let on_disk = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk, RUN_HEADER_LEN as u64 + expected);
    }
}
