//! Write-ahead log of a single memtable.
//!
//! Records are `u32` big-endian length prefixes followed by a `bincode`
//! encoded tuple. A torn record at the tail (crash mid-append) ends the
//! replay without an error.

use super::types::Tuple;
use crate::error::StorageError;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const WAL_PREFIX: &str = "wal_";
const WAL_SUFFIX: &str = ".log";

pub fn wal_file_name(table_number: u64) -> String {
    format!("{}{}{}", WAL_PREFIX, table_number, WAL_SUFFIX)
}

/// Table number encoded in a WAL file name.
pub fn parse_wal_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(WAL_PREFIX)?
        .strip_suffix(WAL_SUFFIX)?
        .parse()
        .ok()
}

pub struct WriteAheadLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl WriteAheadLog {
    pub fn create(directory: &Path, table_number: u64) -> Result<Self, StorageError> {
        let path = directory.join(wal_file_name(table_number));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!("Opened write-ahead log {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, tuple: &Tuple) -> Result<(), StorageError> {
        write_record(&mut self.writer, tuple)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn delete(self) -> Result<(), StorageError> {
        drop(self.writer);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads all complete records of a log file.
    pub fn replay(path: &Path) -> Result<Vec<Tuple>, StorageError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut tuples = Vec::new();

        loop {
            match read_record(&mut reader) {
                Ok(Some(tuple)) => tuples.push(tuple),
                Ok(None) => break,
                Err(StorageError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!("Truncated record at the end of {}", path.display());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(tuples)
    }

    /// `(table number, path)` of all logs in `directory`, ascending.
    pub fn list(directory: &Path) -> Result<Vec<(u64, PathBuf)>, StorageError> {
        let mut logs = Vec::new();

        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(number) = name.to_str().and_then(parse_wal_file_name) {
                logs.push((number, entry.path()));
            }
        }

        logs.sort_by_key(|(number, _)| *number);
        Ok(logs)
    }
}

pub(crate) fn write_record<W: Write>(writer: &mut W, tuple: &Tuple) -> Result<(), StorageError> {
    let encoded = bincode::serialize(tuple)?;
    writer.write_all(&(encoded.len() as u32).to_be_bytes())?;
    writer.write_all(&encoded)?;
    Ok(())
}

/// `Ok(None)` on a clean end of input.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<Option<Tuple>, StorageError> {
    let mut length = [0u8; 4];

    match reader.read_exact(&mut length) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut buffer = vec![0u8; u32::from_be_bytes(length) as usize];
    reader.read_exact(&mut buffer)?;

    Ok(Some(bincode::deserialize(&buffer)?))
}
