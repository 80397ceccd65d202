//! Immutable flushed tables.
//!
//! A segment file holds the tuples of one memtable sorted by key and
//! version, each as a length-prefixed `bincode` record. The file is written
//! to a temporary name and renamed into place, so a visible segment is
//! always complete. Segments are loaded fully into memory on open.

use super::tuple_store::{ReadOnlyTupleStore, UsageCounter};
use super::types::Tuple;
use super::wal::{read_record, write_record};
use crate::error::StorageError;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

const SEGMENT_PREFIX: &str = "sstable_";
const SEGMENT_SUFFIX: &str = ".sst";
const TMP_SUFFIX: &str = ".tmp";

pub fn segment_file_name(table_number: u64) -> String {
    format!("{}{}{}", SEGMENT_PREFIX, table_number, SEGMENT_SUFFIX)
}

pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

pub struct Segment {
    table_number: u64,
    path: PathBuf,
    tuples: Vec<Tuple>,
    size_bytes: usize,
    oldest_version: u64,
    newest_version: u64,
    usage: UsageCounter,
    deleted: AtomicBool,
}

fn sort_tuples(tuples: &mut [Tuple]) {
    tuples.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then(a.version_timestamp.cmp(&b.version_timestamp))
    });
}

impl Segment {
    /// Persists `tuples` as segment `table_number` in `directory`.
    pub fn write(directory: &Path, table_number: u64, mut tuples: Vec<Tuple>) -> Result<Self, StorageError> {
        sort_tuples(&mut tuples);

        let path = directory.join(segment_file_name(table_number));
        let tmp = directory.join(format!("{}{}", segment_file_name(table_number), TMP_SUFFIX));

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            for tuple in &tuples {
                write_record(&mut writer, tuple)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &path)?;
        debug!("Wrote segment {} with {} tuples", path.display(), tuples.len());

        Ok(Self::from_tuples(table_number, path, tuples))
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let table_number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_segment_file_name)
            .ok_or_else(|| StorageError::Codec(format!("not a segment file: {}", path.display())))?;

        let mut reader = BufReader::new(File::open(path)?);
        let mut tuples = Vec::new();
        while let Some(tuple) = read_record(&mut reader)? {
            tuples.push(tuple);
        }

        // Older writers may not have sorted; cheap when already ordered
        sort_tuples(&mut tuples);

        Ok(Self::from_tuples(table_number, path.to_path_buf(), tuples))
    }

    fn from_tuples(table_number: u64, path: PathBuf, tuples: Vec<Tuple>) -> Self {
        let size_bytes = tuples.iter().map(Tuple::size).sum();
        let oldest_version = tuples.iter().map(|t| t.version_timestamp).min().unwrap_or(u64::MAX);
        let newest_version = tuples.iter().map(|t| t.version_timestamp).max().unwrap_or(0);

        Self {
            table_number,
            path,
            tuples,
            size_bytes,
            oldest_version,
            newest_version,
            usage: UsageCounter::default(),
            deleted: AtomicBool::new(false),
        }
    }

    /// `(table number, path)` of all segments in `directory`, ascending.
    /// Leftover temporary files of interrupted writes are removed.
    pub fn list(directory: &Path) -> Result<Vec<(u64, PathBuf)>, StorageError> {
        let mut segments = Vec::new();

        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if name.ends_with(TMP_SUFFIX) {
                warn!("Removing incomplete segment {}", entry.path().display());
                fs::remove_file(entry.path())?;
                continue;
            }

            if let Some(number) = parse_segment_file_name(&name) {
                segments.push((number, entry.path()));
            }
        }

        segments.sort_by_key(|(number, _)| *number);
        Ok(segments)
    }

    pub fn table_number(&self) -> u64 {
        self.table_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file was replaced by a newer segment with the same number.
    /// Closing this segment leaves it in place.
    pub(crate) fn disown_file(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    fn delete_file(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("Deleting segment {}", self.path.display());
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Unable to delete segment {}: {}", self.path.display(), e),
        }
    }
}

impl ReadOnlyTupleStore for Segment {
    fn name(&self) -> String {
        segment_file_name(self.table_number)
    }

    fn get(&self, key: &str) -> Vec<Tuple> {
        let start = self.tuples.partition_point(|t| t.key.as_str() < key);
        self.tuples[start..]
            .iter()
            .take_while(|t| t.key == key)
            .cloned()
            .collect()
    }

    fn all_tuples(&self) -> Vec<Tuple> {
        self.tuples.clone()
    }

    fn number_of_tuples(&self) -> usize {
        self.tuples.len()
    }

    fn size(&self) -> usize {
        self.size_bytes
    }

    fn oldest_version(&self) -> u64 {
        self.oldest_version
    }

    fn newest_version(&self) -> u64 {
        self.newest_version
    }

    fn acquire(&self) -> bool {
        self.usage.acquire()
    }

    fn release(&self) {
        if self.usage.release() {
            self.delete_file();
        }
    }

    fn usage_count(&self) -> i32 {
        self.usage.usage()
    }

    fn delete_on_close(&self) {
        if self.usage.delete_on_close() {
            self.delete_file();
        }
    }
}
