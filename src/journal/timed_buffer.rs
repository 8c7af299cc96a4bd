//! Write-coalescing buffer for the active journal file.
//!
//! Writes against the active file are appended here together with their
//! completion callbacks, and handed to the buffer's observer as one batch
//! when either the buffer fills up or the flush timeout elapses since the
//! first queued write. A dedicated timer thread owns the timeout; size
//! overflow flushes immediately on the writer's thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{error, info};

/// Completion callback for a single journal write.
///
/// Callbacks attached to coalesced writes are invoked in submission order
/// once the batch carrying them has been written.
pub trait IoCallback: Send {
    fn done(&self);
    fn on_error(&self, message: &str);
}

/// Receiver of coalesced batches: the active sequential file. The observer
/// performs (or schedules) the physical write and then drives the callbacks.
pub trait TimedBufferObserver: Send + Sync {
    fn flush_buffer(&self, bytes: Vec<u8>, sync: bool, callbacks: Vec<Box<dyn IoCallback>>);
}

struct TimedBufferState {
    buffer: Vec<u8>,
    callbacks: Vec<Box<dyn IoCallback>>,
    pending_sync: bool,
    observer: Option<Arc<dyn TimedBufferObserver>>,
    /// Set when the first write lands in an empty buffer; the flush deadline
    /// is this instant plus the configured timeout.
    first_write: Option<Instant>,
    running: bool,
    bytes_flushed: u64,
}

struct BufferCore {
    state: Mutex<TimedBufferState>,
    timer_wakeup: Condvar,
    buffer_size: usize,
    timeout: Duration,
    log_rates: bool,
}

/// Size- and time-triggered write coalescer.
pub struct TimedBuffer {
    core: Arc<BufferCore>,
    timer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimedBuffer {
    pub fn new(buffer_size: usize, timeout: Duration, log_rates: bool) -> Self {
        TimedBuffer {
            core: Arc::new(BufferCore {
                state: Mutex::new(TimedBufferState {
                    buffer: Vec::with_capacity(buffer_size),
                    callbacks: Vec::new(),
                    pending_sync: false,
                    observer: None,
                    first_write: None,
                    running: false,
                    bytes_flushed: 0,
                }),
                timer_wakeup: Condvar::new(),
                buffer_size,
                timeout,
                log_rates,
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start the flush timer thread. Idempotent.
    pub fn start(&self) {
        {
            let mut state = self.core.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }
        let core = Arc::clone(&self.core);
        *self.timer.lock() = Some(thread::spawn(move || core.timer_loop()));
    }

    /// Flush pending bytes, stop the timer thread, and wait for it to exit.
    /// Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.core.state.lock();
            self.core.flush_locked(&mut state);
            state.running = false;
            self.core.timer_wakeup.notify_all();
        }
        if let Some(handle) = self.timer.lock().take() {
            let _ = handle.join();
        }
    }

    /// Attach or detach the observer receiving flushed batches. Pending
    /// bytes must be flushed before detaching (`deactivate_buffer` on the
    /// factory does this).
    pub fn set_observer(&self, observer: Option<Arc<dyn TimedBufferObserver>>) {
        self.core.state.lock().observer = observer;
    }

    /// Queue `bytes` and an optional completion callback. Flushes inline
    /// when the buffer reaches its configured size.
    pub fn add_bytes(&self, bytes: &[u8], sync: bool, callback: Option<Box<dyn IoCallback>>) {
        let mut state = self.core.state.lock();

        if state.observer.is_none() {
            error!(
                "Timed buffer has no attached file; dropping {} byte write",
                bytes.len()
            );
            if let Some(callback) = callback {
                MutexGuard::unlocked(&mut state, || {
                    callback.on_error("timed buffer has no attached file");
                });
            }
            return;
        }

        state.buffer.extend_from_slice(bytes);
        if let Some(callback) = callback {
            state.callbacks.push(callback);
        }
        if sync {
            state.pending_sync = true;
        }
        if state.first_write.is_none() {
            state.first_write = Some(Instant::now());
            self.core.timer_wakeup.notify_one();
        }

        if state.buffer.len() >= self.core.buffer_size {
            self.core.flush_locked(&mut state);
        }
    }

    /// Force out whatever is pending.
    pub fn flush(&self) {
        let mut state = self.core.state.lock();
        self.core.flush_locked(&mut state);
    }
}

impl BufferCore {
    /// Hand the pending batch to the observer. The lock is released for the
    /// duration of the observer call so writers are not stalled behind I/O
    /// scheduling.
    fn flush_locked(&self, state: &mut MutexGuard<'_, TimedBufferState>) {
        if state.buffer.is_empty() {
            state.first_write = None;
            return;
        }

        let bytes = std::mem::take(&mut state.buffer);
        let callbacks = std::mem::take(&mut state.callbacks);
        let sync = state.pending_sync;
        state.pending_sync = false;
        state.first_write = None;
        state.bytes_flushed += bytes.len() as u64;

        match state.observer.clone() {
            Some(observer) => {
                MutexGuard::unlocked(state, || observer.flush_buffer(bytes, sync, callbacks));
            }
            None => {
                // Flushes are only reachable with an observer attached;
                // add_bytes refuses writes without one.
                error!("Timed buffer flushed {} bytes with no observer", bytes.len());
                MutexGuard::unlocked(state, || {
                    for callback in callbacks {
                        callback.on_error("timed buffer has no attached file");
                    }
                });
            }
        }
    }

    fn timer_loop(self: Arc<Self>) {
        let mut window_start = Instant::now();
        let mut window_base = 0u64;

        let mut state = self.state.lock();
        while state.running {
            let wait = match state.first_write {
                Some(first) => {
                    let elapsed = first.elapsed();
                    if elapsed >= self.timeout {
                        self.flush_locked(&mut state);
                        continue;
                    }
                    self.timeout - elapsed
                }
                None => self.timeout,
            };
            let _ = self.timer_wakeup.wait_for(&mut state, wait);

            if self.log_rates && window_start.elapsed() >= Duration::from_secs(1) {
                let flushed = state.bytes_flushed - window_base;
                let rate = flushed as f64 / window_start.elapsed().as_secs_f64();
                info!("Journal write rate: {:.0} bytes/sec", rate);
                window_base = state.bytes_flushed;
                window_start = Instant::now();
            }
        }
    }
}
