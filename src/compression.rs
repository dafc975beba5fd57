//! Stateless permessage-deflate (RFC 7692, no context takeover).
//!
//! The sender deflates each message with a sync flush and strips the
//! trailing `00 00 FF FF` empty-block marker; the receiver appends that
//! marker back before inflating. Both ends reset their DEFLATE state per
//! message, so no dictionary survives between messages.

use crate::error::Error;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

pub(crate) const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub const MIN_COMPRESSION_LEVEL: i32 = -2;
pub const MAX_COMPRESSION_LEVEL: i32 = 9;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 1;

pub(crate) fn validate_compression_level(level: i32) -> Result<(), Error> {
    if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&level) {
        return Err(Error::InvalidCompressionLevel(level));
    }
    Ok(())
}

// Levels mirror the zlib scale: negative selects the library default,
// 0 stores, 1..=9 trade speed for ratio.
fn flate_compression(level: i32) -> Compression {
    match level {
        l if l < 0 => Compression::default(),
        0 => Compression::none(),
        l => Compression::new(l as u32),
    }
}

fn grow_chunk(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096
    } else if payload_size <= 65536 {
        16384
    } else {
        65536
    }
}

pub(crate) struct Encoder {
    compressor: Compress,
}

impl Encoder {
    pub fn new(level: i32) -> Result<Self, Error> {
        validate_compression_level(level)?;
        let compressor = Compress::new(flate_compression(level), false);
        Ok(Self { compressor })
    }

    /// Starts a fresh per-message stream. Stateless contract: every message
    /// begins with no carried dictionary.
    pub fn begin_message(&mut self) {
        self.compressor.reset();
    }

    /// Feeds one chunk into the current message stream and returns whatever
    /// deflate emits for it. The result may be empty while deflate buffers
    /// internally; the missing bytes come out of `finish_message`.
    pub fn compress_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, Error> {
        let grow = grow_chunk(chunk.len());
        let mut output = Vec::with_capacity(grow.min(chunk.len() + 64).max(64));

        let mut consumed = 0usize;
        while consumed < chunk.len() {
            if output.len() == output.capacity() {
                output.reserve(grow);
            }
            let before_in = self.compressor.total_in();
            self.compressor
                .compress_vec(&chunk[consumed..], &mut output, FlushCompress::None)?;
            consumed += (self.compressor.total_in() - before_in) as usize;
        }
        Ok(output)
    }

    /// Ends the current message: sync-flushes everything deflate still
    /// holds and strips the trailing empty-block marker.
    pub fn finish_message(&mut self) -> Result<Vec<u8>, Error> {
        let mut output = Vec::with_capacity(64);
        loop {
            if output.len() == output.capacity() {
                output.reserve(grow_chunk(output.len()));
            }
            let before_out = self.compressor.total_out();
            self.compressor
                .compress_vec(&[], &mut output, FlushCompress::Sync)?;
            if self.compressor.total_out() == before_out {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }
        Ok(output)
    }

    /// Deflates one whole message in a single call.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.begin_message();
        let mut output = self.compress_chunk(payload)?;
        let tail = self.finish_message()?;
        output.extend_from_slice(&tail);
        Ok(output)
    }
}

pub(crate) struct Decoder {
    decompressor: Decompress,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            decompressor: Decompress::new(false),
        }
    }

    /// Re-appends the sync-flush trailer and inflates one whole message.
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.decompressor.reset(false);

        let mut input = Vec::with_capacity(payload.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let chunk = grow_chunk(input.len());
        let mut output = Vec::with_capacity(chunk);

        while (self.decompressor.total_in() as usize) < input.len() {
            if output.len() == output.capacity() {
                output.reserve(chunk);
            }
            let consumed = self.decompressor.total_in() as usize;
            let before_out = self.decompressor.total_out();
            let status = self.decompressor.decompress_vec(
                &input[consumed..],
                &mut output,
                FlushDecompress::Sync,
            )?;
            match status {
                Status::StreamEnd => break,
                Status::BufError if self.decompressor.total_out() == before_out => break,
                _ => {}
            }
        }

        Ok(output)
    }
}
