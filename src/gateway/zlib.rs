//! zlib-stream transport compression
//!
//! The whole connection shares a single zlib context. A message may span
//! several frames and is complete once the buffered input ends with
//! [`ZLIB_SUFFIX`](super::ZLIB_SUFFIX).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::ZLIB_SUFFIX;
use crate::{BenchError, Result};

/// Output growth step while inflating
const INFLATE_CHUNK: usize = 64 * 1024;

/// Inflater for one zlib-stream connection
pub struct ZlibStream {
    inflater: Decompress,
    pending: Vec<u8>,
    output: Vec<u8>,
}

impl ZlibStream {
    /// Create an inflater for a fresh connection
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            pending: Vec::new(),
            output: Vec::with_capacity(INFLATE_CHUNK),
        }
    }

    /// Feed one frame
    ///
    /// Returns the inflated message once the frame completes one, `None`
    /// while a message is still partial. The returned slice is reused by the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns error if the stream is corrupt or stops making progress; the
    /// pending input is dropped so later messages can still be attempted
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<&[u8]>> {
        self.pending.extend_from_slice(frame);
        if !self.pending.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        self.output.clear();
        let result = self.inflate_pending();
        self.pending.clear();
        result?;

        Ok(Some(&self.output))
    }

    /// Bytes buffered for an incomplete message
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn inflate_pending(&mut self) -> Result<()> {
        let mut input = &self.pending[..];

        loop {
            self.output.reserve(INFLATE_CHUNK);
            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();

            let status = self
                .inflater
                .decompress_vec(input, &mut self.output, FlushDecompress::Sync)
                .map_err(|e| BenchError::Decode(format!("zlib-stream inflate failed: {e}")))?;

            let consumed = (self.inflater.total_in() - in_before) as usize;
            let produced = self.inflater.total_out() - out_before;
            input = &input[consumed..];

            let filled = self.output.len() == self.output.capacity();
            if status == Status::StreamEnd || (input.is_empty() && !filled) {
                return Ok(());
            }

            if consumed == 0 && produced == 0 {
                return Err(BenchError::Decode(format!(
                    "zlib-stream inflate stalled with {} bytes left",
                    input.len()
                )));
            }
        }
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Server side of a zlib-stream connection, used to synthesize captures
pub struct ZlibStreamWriter {
    compressor: Compress,
}

impl ZlibStreamWriter {
    /// Create a compressor for a fresh connection
    #[must_use]
    pub fn new() -> Self {
        Self {
            compressor: Compress::new(Compression::default(), true),
        }
    }

    /// Compress one message into one sync-flushed frame
    ///
    /// # Errors
    ///
    /// Returns error if the compressor fails
    pub fn frame(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let mut input = message;
        let mut out = Vec::with_capacity(message.len() / 2 + 64);

        loop {
            let before = self.compressor.total_in();
            self.compressor
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| BenchError::Other(format!("zlib-stream deflate failed: {e}")))?;
            input = &input[(self.compressor.total_in() - before) as usize..];

            if input.is_empty() && out.len() < out.capacity() {
                return Ok(out);
            }
            out.reserve(out.capacity().max(64));
        }
    }
}

impl Default for ZlibStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}
