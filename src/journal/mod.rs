//! # Journal File Layer
//!
//! The sequential file factory underpinning the write-ahead journal. The
//! factory owns a directory of append-only files, an optional
//! [`TimedBuffer`] that coalesces writes against the active file, and -
//! between `start()` and `stop()` - a single-thread write executor that
//! turns per-write I/O into ordered batched flushes with completion
//! callbacks.
//!
//! Record formats, file rotation, and compaction policy belong to the
//! journal layer above; this module only creates, enumerates, and owns the
//! files.
//!
//! ## Modules
//!
//! - [`file`] - append-only [`SequentialFile`] handle
//! - [`timed_buffer`] - size/time write coalescer and callback types

pub mod file;
pub mod timed_buffer;

pub use file::SequentialFile;
pub use timed_buffer::{IoCallback, TimedBuffer, TimedBufferObserver};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::{BrokerConfig, Result};
use file::FileInner;

/// How long `stop()` waits for the write executor to drain.
const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(60);

/// The single sink for unrecoverable storage errors. The broker installs
/// one listener and decides there whether to halt; the factory itself never
/// retries a failed write.
pub trait IoCriticalErrorListener: Send + Sync {
    fn on_io_error(&self, error: &io::Error, message: &str, file_name: Option<&str>);
}

/// One batched write travelling to the executor thread.
pub(crate) struct WriteTask {
    pub(crate) file: Arc<FileInner>,
    pub(crate) bytes: Vec<u8>,
    pub(crate) sync: bool,
    pub(crate) callbacks: Vec<Box<dyn IoCallback>>,
}

/// State shared between the factory and every file it created: the live
/// executor sender (present only while the factory is started) and the
/// critical-error sink.
pub(crate) struct FactoryShared {
    executor: Mutex<Option<Sender<WriteTask>>>,
    error_listener: Option<Arc<dyn IoCriticalErrorListener>>,
}

impl FactoryShared {
    pub(crate) fn new(error_listener: Option<Arc<dyn IoCriticalErrorListener>>) -> Self {
        FactoryShared {
            executor: Mutex::new(None),
            error_listener,
        }
    }

    pub(crate) fn executor_sender(&self) -> Option<Sender<WriteTask>> {
        self.executor.lock().clone()
    }

    pub(crate) fn on_io_error(&self, error: &io::Error, message: &str, file_name: Option<&str>) {
        error!(
            "Journal I/O error on {}: {} ({})",
            file_name.unwrap_or("<no file>"),
            message,
            error
        );
        if let Some(listener) = &self.error_listener {
            listener.on_io_error(error, message, file_name);
        }
    }
}

/// Factory capability consumed by the journal layer. Backends differ in how
/// writes are scheduled; the directory and lifecycle contract is common.
pub trait SequentialFileFactory: Send + Sync {
    fn directory(&self) -> &Path;

    /// Whether write completion callbacks are dispatched asynchronously.
    fn supports_callbacks(&self) -> bool;

    fn create_sequential_file(&self, file_name: &str) -> SequentialFile;

    /// Create the journal directory and any missing parents. Succeeds when
    /// the directory already exists.
    fn create_dirs(&self) -> Result<()>;

    /// Names of files in the directory ending in `.<extension>`.
    fn list_files(&self, extension: &str) -> Result<Vec<String>>;

    fn start(&self);

    /// Stop the timed buffer and drain the write executor, waiting up to 60
    /// seconds. Overrun is logged, not fatal. Idempotent.
    fn stop(&self);

    /// Attach the factory's timed buffer to `file`, making it the active
    /// file whose writes are coalesced.
    fn activate_buffer(&self, file: &SequentialFile);

    /// Flush pending coalesced bytes and detach the buffer's observer, in
    /// that order. Called when rolling to a new active file.
    fn deactivate_buffer(&self);

    fn flush(&self);

    fn on_io_error(&self, error: &io::Error, message: &str, file_name: Option<&str>);
}

/// Standard-filesystem backend.
pub struct FsSequentialFileFactory {
    directory: PathBuf,
    timed_buffer: Option<Arc<TimedBuffer>>,
    shared: Arc<FactoryShared>,
    executor_done: Mutex<Option<Receiver<()>>>,
    started: AtomicBool,
}

impl FsSequentialFileFactory {
    pub fn new(
        directory: impl Into<PathBuf>,
        buffered: bool,
        buffer_size: usize,
        buffer_timeout: Duration,
        log_rates: bool,
        error_listener: Option<Arc<dyn IoCriticalErrorListener>>,
    ) -> Self {
        let timed_buffer =
            buffered.then(|| Arc::new(TimedBuffer::new(buffer_size, buffer_timeout, log_rates)));
        FsSequentialFileFactory {
            directory: directory.into(),
            timed_buffer,
            shared: Arc::new(FactoryShared::new(error_listener)),
            executor_done: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        config: &BrokerConfig,
        error_listener: Option<Arc<dyn IoCriticalErrorListener>>,
    ) -> Self {
        Self::new(
            &config.journal_dir,
            true,
            config.journal_buffer_size,
            Duration::from_millis(config.journal_buffer_timeout_ms),
            config.journal_log_write_rates,
            error_listener,
        )
    }
}

impl SequentialFileFactory for FsSequentialFileFactory {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn supports_callbacks(&self) -> bool {
        true
    }

    fn create_sequential_file(&self, file_name: &str) -> SequentialFile {
        SequentialFile::new(
            self.directory.join(file_name),
            file_name.to_string(),
            Arc::clone(&self.shared),
        )
    }

    fn create_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    fn list_files(&self, extension: &str) -> Result<Vec<String>> {
        let suffix = format!(".{}", extension);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(&suffix) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(buffer) = &self.timed_buffer {
            buffer.start();
        }

        if self.supports_callbacks() {
            let (tx, rx) = unbounded::<WriteTask>();
            let (done_tx, done_rx) = bounded(1);
            thread::spawn(move || {
                for task in rx.iter() {
                    FileInner::perform_write(&task.file, &task.bytes, task.sync, task.callbacks);
                }
                let _ = done_tx.send(());
            });
            *self.shared.executor.lock() = Some(tx);
            *self.executor_done.lock() = Some(done_rx);
        }
    }

    fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        // Stop the buffer first so its final flush still reaches the
        // executor, then close the channel and wait for the drain.
        if let Some(buffer) = &self.timed_buffer {
            buffer.stop();
        }

        drop(self.shared.executor.lock().take());
        if let Some(done) = self.executor_done.lock().take() {
            match done.recv_timeout(EXECUTOR_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Timed out after {}s waiting for the journal write executor to drain",
                        EXECUTOR_TIMEOUT.as_secs()
                    );
                }
            }
        }
    }

    fn activate_buffer(&self, file: &SequentialFile) {
        if let Some(buffer) = &self.timed_buffer {
            file.attach_buffer(Arc::clone(buffer));
        }
    }

    fn deactivate_buffer(&self) {
        if let Some(buffer) = &self.timed_buffer {
            buffer.flush();
            buffer.set_observer(None);
        }
    }

    fn flush(&self) {
        if let Some(buffer) = &self.timed_buffer {
            buffer.flush();
        }
    }

    fn on_io_error(&self, error: &io::Error, message: &str, file_name: Option<&str>) {
        self.shared.on_io_error(error, message, file_name);
    }
}

impl Drop for FsSequentialFileFactory {
    fn drop(&mut self) {
        self.stop();
    }
}
