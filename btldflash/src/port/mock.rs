//! In-memory port used by the unit tests.

use crate::port::Port;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

/// Mock serial port with separate read/write buffers.
///
/// Reads drain the scripted device responses and report `TimedOut` once the
/// script is exhausted. Every `write` call is recorded separately so tests can
/// inspect frames one by one.
pub(crate) struct MockPort {
    pub(crate) read_buf: VecDeque<u8>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            writes: Vec::new(),
            timeout: Duration::from_millis(1),
        }
    }

    /// All written bytes concatenated.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for (dst, src) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_up_to_partial_on_timeout() {
        let mut port = MockPort::new(b"@O");
        let mut buf = [0u8; 4];
        let n = port.read_up_to(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"@O");
    }

    #[test]
    fn test_read_up_to_stops_when_full() {
        let mut port = MockPort::new(b"@OK\nF");
        let mut buf = [0u8; 4];
        assert_eq!(port.read_up_to(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"@OK\n");
        assert_eq!(port.read_buf.len(), 1);
    }
}
