//! Append-only journal file handle.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::timed_buffer::{IoCallback, TimedBuffer, TimedBufferObserver};
use super::{FactoryShared, WriteTask};
use crate::Result;

pub(crate) struct FileInner {
    path: PathBuf,
    file_name: String,
    file: Mutex<Option<std::fs::File>>,
    timed_buffer: Mutex<Option<Arc<TimedBuffer>>>,
    shared: Arc<FactoryShared>,
}

/// One append-only file inside the journal directory.
///
/// Cheap to clone; clones share the underlying handle. Writes go through
/// the attached timed buffer when the factory has activated one on this
/// file, otherwise to the factory's write executor (or inline when the
/// factory is not started).
#[derive(Clone)]
pub struct SequentialFile {
    inner: Arc<FileInner>,
}

impl SequentialFile {
    pub(crate) fn new(path: PathBuf, file_name: String, shared: Arc<FactoryShared>) -> Self {
        SequentialFile {
            inner: Arc::new(FileInner {
                path,
                file_name,
                file: Mutex::new(None),
                timed_buffer: Mutex::new(None),
                shared,
            }),
        }
    }

    /// Open (creating if absent) for appending. Idempotent.
    pub fn open(&self) -> Result<()> {
        let mut guard = self.inner.file.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&self.inner.path)?;
            *guard = Some(file);
        }
        Ok(())
    }

    /// Close the handle. Writes still queued for this file will fail through
    /// the critical-error path; that is the only way to abandon them.
    pub fn close(&self) {
        *self.inner.file.lock() = None;
    }

    pub fn is_open(&self) -> bool {
        self.inner.file.lock().is_some()
    }

    pub fn file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.inner.path)?.len())
    }

    /// Queue `bytes` for writing. With a timed buffer attached the write is
    /// coalesced; otherwise it is dispatched to the write executor when one
    /// is running, or performed inline.
    pub fn write(&self, bytes: Bytes, sync: bool, callback: Option<Box<dyn IoCallback>>) {
        let buffer = self.inner.timed_buffer.lock().clone();
        if let Some(buffer) = buffer {
            buffer.add_bytes(&bytes, sync, callback);
            return;
        }
        FileInner::dispatch_write(
            &self.inner,
            bytes.to_vec(),
            sync,
            callback.into_iter().collect(),
        );
    }

    /// Force file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        let guard = self.inner.file.lock();
        let file = guard
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file not open"))?;
        file.sync_all()?;
        Ok(())
    }

    pub(crate) fn attach_buffer(&self, buffer: Arc<TimedBuffer>) {
        buffer.set_observer(Some(Arc::new(FileObserver {
            file: Arc::clone(&self.inner),
        })));
        *self.inner.timed_buffer.lock() = Some(buffer);
    }
}

impl FileInner {
    /// Send a write to the executor when the factory is started; otherwise
    /// perform it on the calling thread. Either way the callbacks run after
    /// the physical write, in order.
    pub(crate) fn dispatch_write(
        inner: &Arc<FileInner>,
        bytes: Vec<u8>,
        sync: bool,
        callbacks: Vec<Box<dyn IoCallback>>,
    ) {
        let sender = inner.shared.executor_sender();
        match sender {
            Some(sender) => {
                let task = WriteTask {
                    file: Arc::clone(inner),
                    bytes,
                    sync,
                    callbacks,
                };
                if let Err(send_error) = sender.send(task) {
                    // Executor already shut down; fall back to the caller's
                    // thread so the write is not lost.
                    let task = send_error.into_inner();
                    FileInner::perform_write(&task.file, &task.bytes, task.sync, task.callbacks);
                }
            }
            None => FileInner::perform_write(inner, &bytes, sync, callbacks),
        }
    }

    pub(crate) fn perform_write(
        inner: &Arc<FileInner>,
        bytes: &[u8],
        sync: bool,
        callbacks: Vec<Box<dyn IoCallback>>,
    ) {
        match inner.write_all(bytes, sync) {
            Ok(()) => {
                for callback in callbacks {
                    callback.done();
                }
            }
            Err(error) => {
                let message = format!(
                    "failed to write {} bytes to journal file {}",
                    bytes.len(),
                    inner.file_name
                );
                for callback in callbacks {
                    callback.on_error(&message);
                }
                inner
                    .shared
                    .on_io_error(&error, &message, Some(&inner.file_name));
            }
        }
    }

    fn write_all(&self, bytes: &[u8], sync: bool) -> io::Result<()> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file not open"))?;
        file.write_all(bytes)?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Bridges the timed buffer to its active file.
struct FileObserver {
    file: Arc<FileInner>,
}

impl TimedBufferObserver for FileObserver {
    fn flush_buffer(&self, bytes: Vec<u8>, sync: bool, callbacks: Vec<Box<dyn IoCallback>>) {
        FileInner::dispatch_write(&self.file, bytes, sync, callbacks);
    }
}
