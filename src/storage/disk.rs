//! One physical storage location and its background workers.
//!
//! Rotated memtables are queued here and written to segments by a small pool
//! of worker threads; table directories can be queued for asynchronous
//! deletion on the same queue.

use super::engine::StorageEngine;
use super::memtable::Memtable;
use super::metadata::{self, GroupMetadata};
use super::segment::Segment;
use super::tuple_store::ReadOnlyTupleStore;
use super::types::{EngineMode, TupleStoreName};
use crate::error::StorageError;

use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Called with the table name and the creation time of the flushed memtable.
pub type FlushCallback = Arc<dyn Fn(&TupleStoreName, u64) + Send + Sync>;

pub type FlushCallbacks = Arc<RwLock<Vec<FlushCallback>>>;

const DATA_DIR: &str = "data";

pub enum DiskTask {
    Flush {
        engine: Arc<StorageEngine>,
        memtable: Arc<Memtable>,
    },
    Delete(PathBuf),
}

pub struct DiskStorage {
    base_dir: PathBuf,
    sender: Mutex<Option<UnboundedSender<DiskTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    flush_callbacks: FlushCallbacks,
}

impl DiskStorage {
    /// Prepares `base_dir` and starts `threads` workers.
    pub fn start(
        base_dir: &Path,
        threads: usize,
        flush_callbacks: FlushCallbacks,
    ) -> Result<Arc<Self>, StorageError> {
        fs::create_dir_all(base_dir.join(DATA_DIR))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let storage = Arc::new(Self {
            base_dir: base_dir.to_path_buf(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::new()),
            flush_callbacks,
        });

        for worker_id in 0..threads.max(1) {
            let receiver = receiver.clone();
            let callbacks = storage.flush_callbacks.clone();
            let handle = std::thread::Builder::new()
                .name(format!("disk-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, receiver, callbacks))?;
            storage.workers.lock().push(handle);
        }

        info!(
            "Storage location {} started with {} worker(s)",
            base_dir.display(),
            threads.max(1)
        );

        Ok(storage)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(DATA_DIR)
    }

    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.data_dir().join(group)
    }

    pub fn table_dir(&self, name: &TupleStoreName) -> PathBuf {
        self.group_dir(name.group()).join(name.full_name())
    }

    /// All tables with a directory at this location.
    pub fn list_tables(&self) -> Result<Vec<TupleStoreName>, StorageError> {
        let mut tables = Vec::new();

        for group in fs::read_dir(self.data_dir())? {
            let group = group?;
            if !group.file_type()?.is_dir() {
                continue;
            }

            for table in fs::read_dir(group.path())? {
                let table = table?;
                if !table.file_type()?.is_dir() {
                    continue;
                }

                match table.file_name().to_str().map(|n| n.parse::<TupleStoreName>()) {
                    Some(Ok(name)) => tables.push(name),
                    _ => warn!("Ignoring unknown directory {}", table.path().display()),
                }
            }
        }

        tables.sort();
        Ok(tables)
    }

    /// Groups with a directory at this location.
    pub fn list_groups(&self) -> Result<Vec<String>, StorageError> {
        let mut groups = Vec::new();
        for entry in fs::read_dir(self.data_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                groups.push(name.to_string());
            }
        }
        groups.sort();
        Ok(groups)
    }

    pub fn read_group_metadata(&self, group: &str) -> Result<Option<GroupMetadata>, StorageError> {
        metadata::read_group_metadata(&self.group_dir(group))
    }

    pub fn write_group_metadata(&self, group: &str, version: u64) -> Result<(), StorageError> {
        metadata::write_group_metadata(&self.group_dir(group), &GroupMetadata { version })
    }

    fn send(&self, task: DiskTask) -> Result<(), StorageError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(StorageError::Rejected(format!(
                "storage {} is shut down",
                self.base_dir.display()
            )));
        };

        sender
            .send(task)
            .map_err(|_| StorageError::Failed("disk workers are gone".to_string()))
    }

    pub fn schedule_flush(
        &self,
        engine: Arc<StorageEngine>,
        memtable: Arc<Memtable>,
    ) -> Result<(), StorageError> {
        debug!("Scheduling flush of memtable {} of {}", memtable.table_number(), engine.name());
        self.send(DiskTask::Flush { engine, memtable })
    }

    pub fn schedule_delete(&self, path: PathBuf) -> Result<(), StorageError> {
        self.send(DiskTask::Delete(path))
    }

    /// Stops accepting work, drains the queue and joins the workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("Disk worker of {} panicked", self.base_dir.display());
            }
        }

        info!("Storage location {} stopped", self.base_dir.display());
    }
}

pub fn delete_directory(path: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<UnboundedReceiver<DiskTask>>>,
    callbacks: FlushCallbacks,
) {
    debug!("Disk worker {} started", worker_id);

    loop {
        let task = receiver.lock().blocking_recv();

        match task {
            Some(DiskTask::Flush { engine, memtable }) => {
                flush_memtable(&engine, &memtable, &callbacks);
            }
            Some(DiskTask::Delete(path)) => {
                if let Err(e) = delete_directory(&path) {
                    error!("Unable to delete {}: {}", path.display(), e);
                }
            }
            None => break,
        }
    }

    debug!("Disk worker {} stopped", worker_id);
}

/// Writes `memtable` to a segment and swaps it in.
pub(crate) fn flush_memtable(engine: &StorageEngine, memtable: &Arc<Memtable>, callbacks: &FlushCallbacks) {
    if !memtable.acquire() {
        error!("Memtable {} of {} should be flushed but can't be acquired", memtable.table_number(), engine.name());
        engine.instances().replace_memtable_with_segment(memtable, None);
        return;
    }

    let written = if memtable.is_empty() {
        Ok(None)
    } else {
        Segment::write(engine.directory(), memtable.table_number(), memtable.sorted_tuples())
            .map(|segment| Some(Arc::new(segment)))
    };

    match written {
        Ok(segment) => {
            engine.instances().replace_memtable_with_segment(memtable, segment);
            send_callbacks(engine.name(), memtable.created_timestamp(), callbacks);

            // Drop the reference the engine took when it activated the memtable
            memtable.delete_on_close();
            memtable.release();
        }
        Err(e) if engine.instances().mode() == EngineMode::ReadOnly => {
            // The write-ahead log stays on disk and is replayed on the next start
            debug!("Rejected memtable write of {}: {}", engine.name(), e);
            engine.instances().replace_memtable_with_segment(memtable, None);
        }
        Err(e) => {
            error!("Exception while flushing memtable of {}: {}", engine.name(), e);
            engine.fail(format!("flush failed: {}", e));
        }
    }

    memtable.release();
}

fn send_callbacks(name: &TupleStoreName, timestamp: u64, callbacks: &FlushCallbacks) {
    let callbacks: Vec<FlushCallback> = callbacks.read().clone();
    for callback in callbacks {
        callback(name, timestamp);
    }
}
