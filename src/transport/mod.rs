//! Byte-stream transport between the daemon and the TR-60 bridge MCU

use crate::error::Result;

mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Transport trait for bridge communication
pub trait Transport: Send {
    /// Read available bytes into the buffer, returns the number read.
    /// A read with nothing pending returns 0 rather than blocking.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write bytes, returns the number written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Block until pending writes are on the wire
    fn flush(&mut self) -> Result<()>;

    /// Number of bytes waiting to be read
    fn available(&mut self) -> Result<usize>;
}
