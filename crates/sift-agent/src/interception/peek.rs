//! Read-through body wrapper exposing the first bytes of a stream.

use std::io::{self, Read};

/// Wraps a body stream to give access to its first `peek_size` bytes without
/// changing what readers of the stream see.
///
/// The peek buffer is filled once, on the first `read` or `peek`, by reading
/// up to `peek_size` bytes. Reads are then served from the buffer until it is
/// exhausted and fall through to the wrapped stream afterwards, so the bytes
/// returned by `read` are exactly those of the wrapped stream, in order.
pub struct PeekingReader<R> {
    inner: R,
    peek_size: usize,
    buffer: Option<Vec<u8>>,
    pos: usize,
    /// The fill reached the end of the wrapped stream.
    eof: bool,
    fill_error: Option<io::Error>,
    fill_error_reported: bool,
}

impl<R: Read> PeekingReader<R> {
    pub fn new(inner: R, peek_size: usize) -> Self {
        Self {
            inner,
            peek_size,
            buffer: None,
            pos: 0,
            eof: false,
            fill_error: None,
            fill_error_reported: false,
        }
    }

    pub fn peek_size(&self) -> usize {
        self.peek_size
    }

    /// The first `min(peek_size, stream length)` bytes of the stream.
    ///
    /// Does not move the read position. An I/O error hit while filling the
    /// buffer is returned here every time; the bytes buffered before it are
    /// still delivered by `read`.
    pub fn peek(&mut self) -> io::Result<&[u8]> {
        self.fill();
        if let Some(e) = &self.fill_error {
            return Err(io::Error::new(e.kind(), e.to_string()));
        }
        Ok(self.buffer.as_deref().unwrap_or_default())
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the stream. Buffered bytes not yet read are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self) {
        if self.buffer.is_some() {
            return;
        }
        let mut buffer = Vec::new();
        let limit = self.peek_size as u64;
        loop {
            let remaining = limit - buffer.len() as u64;
            if remaining == 0 {
                break;
            }
            match (&mut self.inner).take(remaining).read_to_end(&mut buffer) {
                // read_to_end stops at the limit or at the end of the stream.
                Ok(_) if (buffer.len() as u64) < limit => {
                    // A short stream is a plain end of stream, not an error.
                    self.eof = true;
                    break;
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fill_error = Some(e);
                    break;
                }
            }
        }
        self.buffer = Some(buffer);
    }
}

impl<R: Read> Read for PeekingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill();

        let buffered = self.buffer.as_deref().unwrap_or_default();
        if self.pos < buffered.len() {
            let n = buf.len().min(buffered.len() - self.pos);
            buf[..n].copy_from_slice(&buffered[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        if let Some(e) = &self.fill_error {
            if !self.fill_error_reported {
                self.fill_error_reported = true;
                return Err(io::Error::new(e.kind(), e.to_string()));
            }
        }
        if self.eof {
            return Ok(0);
        }
        self.inner.read(buf)
    }
}
