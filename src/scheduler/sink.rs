//! Pixel sinks: where finished frames go.
//!
//! The sink contract is deliberately dumb: raw, tightly packed pixels,
//! `width * height * bytes_per_pixel` per frame, delivered in frame order
//! with no framing or header. The consumer (an encoder or player process)
//! interprets the fixed-size byte stream. A full pipe or channel blocks the
//! render thread; that blocking is the system's backpressure and its only
//! intentional stall outside GPU calls.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, SyncSender};

/// Packed pixel format handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Tightly packed RGB, alpha dropped.
    Rgb24,
    /// RGBA exactly as read back from the GPU.
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
        }
    }
}

/// Pack GPU readback RGBA into the sink format.
pub fn pack_rgba(rgba: &[u8], format: PixelFormat) -> Cow<'_, [u8]> {
    match format {
        PixelFormat::Rgba32 => Cow::Borrowed(rgba),
        PixelFormat::Rgb24 => {
            let mut packed = Vec::with_capacity(rgba.len() / 4 * 3);
            for pixel in rgba.chunks_exact(4) {
                packed.extend_from_slice(&pixel[..3]);
            }
            Cow::Owned(packed)
        }
    }
}

/// One finished frame's identity. Produced by the scheduler, consumed exactly
/// once by the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Monotonic frame counter.
    pub index: u64,
    /// Playback timestamp in seconds.
    pub timestamp: f64,
}

/// Consumer of rendered frames.
pub trait PixelSink: Send {
    /// Deliver one frame's packed pixels. Blocks while the consumer is full.
    fn write_frame(&mut self, frame: &Frame, pixels: &[u8]) -> io::Result<()>;

    /// Flush any buffered output; called once after the final frame.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink writing raw frames to a byte pipe, e.g. an encoder process stdin.
pub struct PipeSink<W: Write + Send> {
    writer: W,
    expected_len: usize,
    next_index: u64,
}

impl<W: Write + Send> PipeSink<W> {
    pub fn new(writer: W, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            writer,
            expected_len: width as usize * height as usize * format.bytes_per_pixel(),
            next_index: 0,
        }
    }
}

impl<W: Write + Send> PixelSink for PipeSink<W> {
    fn write_frame(&mut self, frame: &Frame, pixels: &[u8]) -> io::Result<()> {
        if pixels.len() != self.expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("expected {} bytes, got {}", self.expected_len, pixels.len()),
            ));
        }
        if frame.index != self.next_index {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame {} delivered, expected {}", frame.index, self.next_index),
            ));
        }
        self.writer.write_all(pixels)?;
        self.next_index += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Bounded in-process sink; a full channel blocks like a full pipe.
pub struct ChannelSink {
    sender: SyncSender<Vec<u8>>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end, with room for `depth` frames.
    pub fn bounded(depth: usize) -> (Self, Receiver<Vec<u8>>) {
        let (sender, receiver) = std::sync::mpsc::sync_channel(depth);
        (Self { sender }, receiver)
    }
}

impl PixelSink for ChannelSink {
    fn write_frame(&mut self, _frame: &Frame, pixels: &[u8]) -> io::Result<()> {
        self.sender
            .send(pixels.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame consumer disconnected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgb24_drops_alpha() {
        let rgba = [1u8, 2, 3, 255, 4, 5, 6, 128];
        let packed = pack_rgba(&rgba, PixelFormat::Rgb24);
        assert_eq!(packed.as_ref(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_pack_rgba32_is_borrowed_passthrough() {
        let rgba = [9u8, 8, 7, 6];
        let packed = pack_rgba(&rgba, PixelFormat::Rgba32);
        assert!(matches!(packed, Cow::Borrowed(_)));
        assert_eq!(packed.as_ref(), &rgba);
    }

    #[test]
    fn test_pipe_sink_writes_raw_frames_in_order() {
        let mut out = Vec::new();
        {
            let mut sink = PipeSink::new(&mut out, 2, 1, PixelFormat::Rgb24);
            sink.write_frame(&Frame { index: 0, timestamp: 0.0 }, &[1, 2, 3, 4, 5, 6])
                .unwrap();
            sink.write_frame(&Frame { index: 1, timestamp: 0.033 }, &[7, 8, 9, 10, 11, 12])
                .unwrap();
            sink.finish().unwrap();
        }
        // No framing, no header: just the bytes.
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_pipe_sink_rejects_wrong_size() {
        let mut sink = PipeSink::new(Vec::new(), 4, 4, PixelFormat::Rgb24);
        let err = sink
            .write_frame(&Frame { index: 0, timestamp: 0.0 }, &[0u8; 10])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_pipe_sink_rejects_out_of_order_frames() {
        let mut sink = PipeSink::new(Vec::new(), 1, 1, PixelFormat::Rgb24);
        let err = sink
            .write_frame(&Frame { index: 3, timestamp: 0.1 }, &[0u8; 3])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_channel_sink_delivers_and_reports_disconnect() {
        let (mut sink, receiver) = ChannelSink::bounded(2);
        sink.write_frame(&Frame { index: 0, timestamp: 0.0 }, &[1, 2, 3])
            .unwrap();
        assert_eq!(receiver.recv().unwrap(), vec![1, 2, 3]);

        drop(receiver);
        let err = sink
            .write_frame(&Frame { index: 1, timestamp: 0.0 }, &[4, 5, 6])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
