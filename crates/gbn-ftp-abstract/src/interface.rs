use bytes::Bytes;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;

use crate::event::ProtocolEvent;

/// Capabilities a driver provides to a protocol endpoint while it handles one event.
///
/// Side effects are expected to be buffered and applied by the driver after the
/// handler returns, so the state machines never block on I/O.
pub trait SystemContext {
    /// Hand a datagram to the unreliable network.
    fn send_datagram(&mut self, to: SocketAddr, datagram: Bytes);

    /// Arm the endpoint's single retransmission timer, replacing any pending expiry.
    fn start_timer(&mut self, delay: Duration);

    /// Disarm the retransmission timer. Cancelling an idle timer is a no-op.
    fn cancel_timer(&mut self);

    /// Forward an observability event to the operator.
    fn report(&mut self, event: ProtocolEvent);

    /// Monotonic time since the driver started.
    fn now(&self) -> Duration;
}

/// Append target the receiver extends with every accepted payload.
pub trait OutputSink {
    /// Append `bytes`; the data must be handed to the OS before this returns.
    fn append_segment(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Discard everything written so far.
    fn reset(&mut self) -> io::Result<()>;
}

impl OutputSink for Vec<u8> {
    fn append_segment(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn append_segment(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).append_segment(bytes)
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }
}

/// Sequential input the sender drains one segment at a time.
pub trait SegmentSource {
    /// Read up to `mss` bytes. `Ok(None)` signals end of input.
    fn read_segment(&mut self, mss: usize) -> io::Result<Option<Bytes>>;
}

impl<S: SegmentSource + ?Sized> SegmentSource for Box<S> {
    fn read_segment(&mut self, mss: usize) -> io::Result<Option<Bytes>> {
        (**self).read_segment(mss)
    }
}

/// Adapts any [`Read`] into MSS-sized segments. Only the last one may be short.
#[derive(Debug)]
pub struct ChunkReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> SegmentSource for ChunkReader<R> {
    fn read_segment(&mut self, mss: usize) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; mss];
        let mut filled = 0;
        while filled < mss {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.bytes_read += filled as u64;
        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Yields at most three bytes per `read` call.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn chunks_are_mss_sized_except_last() {
        let mut reader = ChunkReader::new(Cursor::new(b"abcdefghij".to_vec()));
        let mut sizes = Vec::new();
        while let Some(chunk) = reader.read_segment(4).unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(reader.bytes_read(), 10);
    }

    #[test]
    fn short_reads_are_coalesced() {
        let mut reader = ChunkReader::new(Trickle(Cursor::new(vec![7u8; 20])));
        assert_eq!(reader.read_segment(8).unwrap().unwrap().len(), 8);
        assert_eq!(reader.read_segment(8).unwrap().unwrap().len(), 8);
        assert_eq!(reader.read_segment(8).unwrap().unwrap().len(), 4);
        assert!(reader.read_segment(8).unwrap().is_none());
    }

    #[test]
    fn empty_input_has_no_segments() {
        let mut reader = ChunkReader::new(io::empty());
        assert!(reader.read_segment(500).unwrap().is_none());
    }

    #[test]
    fn vec_sink_appends_and_resets() {
        let mut sink: Vec<u8> = Vec::new();
        sink.append_segment(b"abc").unwrap();
        sink.append_segment(b"def").unwrap();
        assert_eq!(sink, b"abcdef");
        OutputSink::reset(&mut sink).unwrap();
        assert!(sink.is_empty());
    }
}
