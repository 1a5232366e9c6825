//! Bounded transfer buffer between the download thread and the decoder
//!
//! This module provides:
//! - `TransferBuffer`: Fixed-capacity circular byte buffer (single producer, single consumer)
//! - `SharedTransfer`: The buffer plus producer lifecycle flags behind one lock
//!
//! The download thread appends with `write_blocking()`, which waits on a
//! condition variable while the buffer is full. The device thread drains with
//! `drain_into()`, which never waits.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// ============ Ring Buffer ============

/// Fixed-capacity circular byte buffer
///
/// Invariant: `bytes_used() + bytes_free() == capacity()`.
/// A full buffer accepts nothing; capacity exhaustion is signaled by a
/// partial (or zero) write, never by an error.
pub struct TransferBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    used: usize,
}

impl std::fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .finish()
    }
}

impl TransferBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            read_pos: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.used
    }

    pub fn bytes_free(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    /// Append as much of `bytes` as fits, returning the number accepted
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.bytes_free());
        if accepted == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let write_pos = (self.read_pos + self.used) % capacity;
        let first = accepted.min(capacity - write_pos);
        self.data[write_pos..write_pos + first].copy_from_slice(&bytes[..first]);
        if first < accepted {
            self.data[..accepted - first].copy_from_slice(&bytes[first..accepted]);
        }

        self.used += accepted;
        accepted
    }

    /// Remove up to `out.len()` bytes from the front, returning the number read
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.used);
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = count.min(capacity - self.read_pos);
        out[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        if first < count {
            out[first..count].copy_from_slice(&self.data[..count - first]);
        }

        self.read_pos = (self.read_pos + count) % capacity;
        self.used -= count;
        count
    }

    /// Discard all content (keeps the allocation)
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.used = 0;
    }
}

// ============ Shared State ============

/// Result of draining the shared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Bytes moved into the caller's buffer
    pub bytes: usize,
    /// Producer has finished and everything it wrote has been drained
    pub finished: bool,
}

struct TransferState {
    buffer: TransferBuffer,
    /// Producer must stop at its next write attempt
    quit: bool,
    /// Producer has stopped writing (end of stream, failure or quit)
    eof: bool,
    /// A producer thread currently owns the write side
    thread_running: bool,
    /// Failure reported by the producer, if any
    failure: Option<String>,
    /// Bytes accepted since the last reset
    received: u64,
}

/// Transfer buffer shared between one producer thread and the decoder
///
/// All fields live behind a single mutex which is only held while bytes are
/// copied in or out, never across network or decode calls.
pub struct SharedTransfer {
    state: Mutex<TransferState>,
    /// Signaled by the consumer after draining, and on quit
    space_available: Condvar,
    /// Signaled by the producer after writing, and on finish
    data_available: Condvar,
}

impl std::fmt::Debug for SharedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedTransfer")
            .field("buffer", &state.buffer)
            .field("quit", &state.quit)
            .field("eof", &state.eof)
            .field("thread_running", &state.thread_running)
            .finish()
    }
}

impl SharedTransfer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TransferState {
                buffer: TransferBuffer::new(capacity),
                quit: false,
                eof: false,
                thread_running: false,
                failure: None,
                received: 0,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().buffer.capacity()
    }

    pub fn bytes_used(&self) -> usize {
        self.state.lock().buffer.bytes_used()
    }

    pub fn bytes_free(&self) -> usize {
        self.state.lock().buffer.bytes_free()
    }

    /// Fill level in percent (0 - 100)
    pub fn percent_used(&self) -> u8 {
        let state = self.state.lock();
        let capacity = state.buffer.capacity().max(1);
        ((state.buffer.bytes_used() * 100) / capacity) as u8
    }

    /// Total bytes accepted from the producer since the last reset
    pub fn received(&self) -> u64 {
        self.state.lock().received
    }

    pub fn is_producer_running(&self) -> bool {
        self.state.lock().thread_running
    }

    pub fn is_eof(&self) -> bool {
        self.state.lock().eof
    }

    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Clear buffer and flags for a new stream
    ///
    /// Must not be called while a producer is running: the old producer
    /// could otherwise write into the buffer of the new session.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.thread_running {
            debug_assert!(false, "transfer buffer reset while producer is running");
            tracing::error!("reset: producer still running, refusing to reset transfer buffer");
            return;
        }
        state.buffer.reset();
        state.quit = false;
        state.eof = false;
        state.failure = None;
        state.received = 0;
    }

    /// Claim the write side for a new producer
    ///
    /// Returns false if another producer is still marked running.
    pub fn begin_producer(&self) -> bool {
        let mut state = self.state.lock();
        if state.thread_running {
            return false;
        }
        state.thread_running = true;
        state.quit = false;
        state.eof = false;
        true
    }

    /// Ask the producer to stop at its next write attempt
    pub fn request_quit(&self) {
        let mut state = self.state.lock();
        state.quit = true;
        drop(state);
        self.space_available.notify_all();
    }

    pub fn quit_requested(&self) -> bool {
        self.state.lock().quit
    }

    /// Release the write side (called by the producer thread on exit)
    pub fn finish_producer(&self, failure: Option<String>) {
        let mut state = self.state.lock();
        state.eof = true;
        state.thread_running = false;
        if failure.is_some() {
            state.failure = failure;
        }
        drop(state);
        self.data_available.notify_all();
    }

    /// Non-blocking append, returns bytes accepted (0 after quit)
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.quit {
            return 0;
        }
        let accepted = state.buffer.write(bytes);
        state.received += accepted as u64;
        drop(state);
        if accepted > 0 {
            self.data_available.notify_all();
        }
        accepted
    }

    /// Append all of `bytes`, waiting for the consumer to make room
    ///
    /// Waits on `space_available` with `poll` as an upper bound per wait, so
    /// a lost wakeup only costs one poll interval. Returns false if quit was
    /// requested before everything was written.
    pub fn write_blocking(&self, bytes: &[u8], poll: Duration) -> bool {
        let mut written = 0;
        let mut state = self.state.lock();
        let mut waits = 0u32;

        while written < bytes.len() {
            if state.quit {
                tracing::debug!("write: quit requested, dropping {} bytes", bytes.len() - written);
                return false;
            }

            let accepted = state.buffer.write(&bytes[written..]);
            written += accepted;
            state.received += accepted as u64;

            if accepted > 0 {
                self.data_available.notify_all();
            }

            if written < bytes.len() {
                waits += 1;
                if waits == 1 {
                    tracing::trace!(
                        "write: buffer full, waiting ({} of {} bytes written)",
                        written,
                        bytes.len()
                    );
                }
                self.space_available.wait_for(&mut state, poll);
            }
        }

        true
    }

    /// Move up to `max` buffered bytes into `out` once at least `min_batch` are available
    ///
    /// Smaller amounts are left in place so that small network reads are
    /// batched, except after the producer finished, when the tail is drained.
    /// Never blocks.
    pub fn drain_into(&self, out: &mut Vec<u8>, min_batch: usize, max: usize) -> Drained {
        let mut state = self.state.lock();
        let used = state.buffer.bytes_used();

        if max == 0 || used == 0 || (used < min_batch && !state.eof) {
            return Drained {
                bytes: 0,
                finished: state.eof && used == 0,
            };
        }

        let start = out.len();
        out.resize(start + used.min(max), 0);
        let read = state.buffer.read(&mut out[start..]);
        out.truncate(start + read);
        let finished = state.eof && state.buffer.is_empty();
        drop(state);

        self.space_available.notify_all();
        Drained {
            bytes: read,
            finished,
        }
    }

    /// Wait until at least `min_bytes` are buffered, the producer finished, or `timeout` elapses
    ///
    /// Returns the number of buffered bytes.
    pub fn wait_for_data(&self, min_bytes: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.buffer.bytes_used() < min_bytes && !state.eof {
            if self
                .data_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.buffer.bytes_used()
    }

    #[cfg(test)]
    fn lock(&self) -> parking_lot::MutexGuard<'_, TransferState> {
        self.state.lock()
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_read_wraps_around() {
        let mut buffer = TransferBuffer::new(8);
        assert_eq!(buffer.write(&[1, 2, 3, 4, 5, 6]), 6);

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Wraps past the end of the arena
        assert_eq!(buffer.write(&[7, 8, 9, 10, 11, 12]), 6);
        assert!(buffer.is_full());

        let mut out = [0u8; 8];
        assert_eq!(buffer.read(&mut out), 8);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_used_plus_free_is_capacity() {
        let mut buffer = TransferBuffer::new(37);
        let mut next_byte = 0u8;
        let mut expected = std::collections::VecDeque::new();

        for step in 0..200usize {
            if step % 3 == 0 {
                let mut out = vec![0u8; (step * 7) % 23];
                let read = buffer.read(&mut out);
                for byte in &out[..read] {
                    // Never returns bytes that were not written
                    assert_eq!(Some(*byte), expected.pop_front());
                }
            } else {
                let chunk: Vec<u8> = (0..(step * 5) % 19)
                    .map(|_| {
                        next_byte = next_byte.wrapping_add(1);
                        next_byte
                    })
                    .collect();
                let accepted = buffer.write(&chunk);
                expected.extend(&chunk[..accepted]);
            }
            assert_eq!(buffer.bytes_used() + buffer.bytes_free(), buffer.capacity());
            assert_eq!(buffer.bytes_used(), expected.len());
        }
    }

    #[test]
    fn test_partial_write_then_drain() {
        let mut buffer = TransferBuffer::new(1024);
        let payload = vec![0xAB; 2000];

        assert_eq!(buffer.write(&payload), 1024);
        // Full: nothing more accepted until the consumer drains
        assert_eq!(buffer.write(&payload[1024..]), 0);

        let mut out = vec![0u8; 1000];
        assert_eq!(buffer.read(&mut out), 1000);
        assert_eq!(buffer.write(&payload[1024..]), 976);
        assert_eq!(buffer.bytes_used(), 1000);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut buffer = TransferBuffer::new(16);
        buffer.write(&[1; 10]);
        buffer.reset();
        assert_eq!(buffer.bytes_used(), 0);
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_write_blocking_waits_for_consumer() {
        let shared = Arc::new(SharedTransfer::new(1024));
        assert!(shared.begin_producer());

        let producer = {
            let shared = shared.clone();
            thread::spawn(move || {
                let payload: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
                let complete = shared.write_blocking(&payload, Duration::from_millis(5));
                shared.finish_producer(None);
                complete
            })
        };

        // Producer fills the buffer, then has to wait for us
        assert_eq!(shared.wait_for_data(1024, Duration::from_secs(5)), 1024);

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let drained = shared.drain_into(&mut received, 1, usize::MAX);
            if drained.finished || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        assert!(producer.join().unwrap());
        assert_eq!(received.len(), 2000);
        assert!(received.iter().enumerate().all(|(i, b)| *b == i as u8));
        assert!(!shared.is_producer_running());
    }

    #[test]
    fn test_quit_releases_blocked_producer() {
        let shared = Arc::new(SharedTransfer::new(64));
        assert!(shared.begin_producer());

        let producer = {
            let shared = shared.clone();
            thread::spawn(move || {
                let complete = shared.write_blocking(&[0u8; 256], Duration::from_secs(10));
                shared.finish_producer(None);
                complete
            })
        };

        shared.wait_for_data(64, Duration::from_secs(5));
        shared.request_quit();
        // Condvar wakeup, not the 10 second poll, releases the producer
        assert!(!producer.join().unwrap());
        assert!(shared.is_eof());
    }

    #[test]
    fn test_drain_batches_small_reads() {
        let shared = SharedTransfer::new(1024);
        assert!(shared.begin_producer());
        shared.write(&[1; 100]);

        let mut out = Vec::new();
        assert_eq!(shared.drain_into(&mut out, 256, usize::MAX).bytes, 0);

        shared.write(&[2; 200]);
        assert_eq!(shared.drain_into(&mut out, 256, usize::MAX).bytes, 300);

        // Tail below the batch size is drained once the producer is done
        shared.write(&[3; 10]);
        shared.finish_producer(None);
        let drained = shared.drain_into(&mut out, 256, usize::MAX);
        assert_eq!(drained.bytes, 10);
        assert!(drained.finished);
        assert_eq!(out.len(), 310);
    }

    #[test]
    fn test_drain_stops_at_max() {
        let shared = SharedTransfer::new(1024);
        assert!(shared.begin_producer());
        shared.write(&[7; 1000]);

        let mut out = Vec::new();
        let drained = shared.drain_into(&mut out, 256, 400);
        assert_eq!(drained.bytes, 400);
        assert!(!drained.finished);
        assert_eq!(shared.bytes_used(), 600);

        // No room on the consumer side leaves everything buffered
        assert_eq!(shared.drain_into(&mut out, 256, 0).bytes, 0);
        assert_eq!(shared.bytes_used(), 600);

        shared.finish_producer(None);
        let drained = shared.drain_into(&mut out, 256, 600);
        assert_eq!(drained.bytes, 600);
        assert!(drained.finished);
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn test_single_producer_claim() {
        let shared = SharedTransfer::new(16);
        assert!(shared.begin_producer());
        assert!(!shared.begin_producer());
        shared.finish_producer(Some("connection reset".to_string()));
        assert_eq!(shared.failure().as_deref(), Some("connection reset"));
        assert!(shared.begin_producer());
    }

    #[test]
    fn test_reset_clears_flags() {
        let shared = SharedTransfer::new(16);
        assert!(shared.begin_producer());
        shared.write(&[1; 8]);
        shared.request_quit();
        shared.finish_producer(Some("quit".to_string()));

        shared.reset();
        let state = shared.lock();
        assert_eq!(state.buffer.bytes_used(), 0);
        assert!(!state.quit);
        assert!(!state.eof);
        assert!(state.failure.is_none());
        assert_eq!(state.received, 0);
    }

    #[test]
    fn test_write_after_quit_is_rejected() {
        let shared = SharedTransfer::new(16);
        assert!(shared.begin_producer());
        shared.request_quit();
        assert_eq!(shared.write(&[1; 4]), 0);
        assert_eq!(shared.bytes_used(), 0);
    }
}
