//! In-memory transport for codec and driver tests

use super::Transport;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Loopback transport: tests inject bytes to be "received" and inspect
/// everything the driver wrote.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    read_queue: VecDeque<u8>,
    written: Vec<u8>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the driver to read
    pub fn inject(&self, data: &[u8]) {
        self.inner.lock().read_queue.extend(data);
    }

    /// All bytes the driver has written so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.inner.lock().written.clear();
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let count = inner.read_queue.len().min(buffer.len());
        for slot in buffer.iter_mut().take(count) {
            *slot = inner.read_queue.pop_front().unwrap_or_default();
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.inner.lock().written.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_queue.len())
    }
}
