//! MJPEG framing
//!
//! Cuts a byte stream (ffmpeg image2pipe output or a multipart HTTP body)
//! into standalone JPEG images on SOI/EOI markers.

use axum::body::Bytes;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffer cap; a stream that never closes a JPEG is garbage
pub const DEFAULT_MAX_BUFFER: usize = 16 * 1024 * 1024;

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < 2 || from > haystack.len() - 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Incremental JPEG splitter
#[derive(Debug)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_buffer {
            // Keep only from the newest SOI; everything before it is unusable
            let keep_from = self
                .buf
                .windows(2)
                .rposition(|w| w == SOI)
                .unwrap_or(self.buf.len());
            tracing::warn!(
                buffered = self.buf.len(),
                dropped = keep_from,
                "MJPEG buffer over limit, discarding"
            );
            self.buf.drain(..keep_from);
            if self.buf.len() > self.max_buffer {
                self.buf.clear();
            }
        }
    }

    /// Next complete JPEG, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = find(&self.buf, &SOI, 0)?;
        if start > 0 {
            self.buf.drain(..start);
        }
        let end = find(&self.buf, &EOI, 2)? + 2;
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        Some(Bytes::from(frame))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Width and height from the first SOF segment of a JPEG
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[..2] != SOI {
        return None;
    }
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        // Standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            i += 2;
            continue;
        }
        let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if i + 8 >= data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        if marker == 0xDA {
            return None;
        }
        i += 2 + len;
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal JPEG-shaped bytes: SOI, APP0 stub, SOF0 with the given size, EOI
    pub(crate) fn fake_jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8];
        v.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        v.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        v.extend_from_slice(&height.to_be_bytes());
        v.extend_from_slice(&width.to_be_bytes());
        v.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    #[test]
    fn test_split_across_chunks() {
        let jpeg = fake_jpeg(640, 480);
        let mut stream = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        stream.extend_from_slice(&jpeg);
        stream.extend_from_slice(b"\r\n--frame\r\n");
        stream.extend_from_slice(&jpeg);

        let mut s = MjpegSplitter::new();
        let (a, b) = stream.split_at(20);
        s.push(a);
        assert!(s.next_frame().is_none());
        s.push(b);
        assert_eq!(s.next_frame().unwrap().as_ref(), jpeg.as_slice());
        assert_eq!(s.next_frame().unwrap().as_ref(), jpeg.as_slice());
        assert!(s.next_frame().is_none());
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let jpeg = fake_jpeg(32, 16);
        let mut s = MjpegSplitter::new();
        s.push(&jpeg[..jpeg.len() - 1]);
        assert!(s.next_frame().is_none());
        s.push(&jpeg[jpeg.len() - 1..]);
        assert!(s.next_frame().is_some());
    }

    #[test]
    fn test_buffer_cap() {
        let mut s = MjpegSplitter::with_max_buffer(64);
        s.push(&[0u8; 100]);
        assert_eq!(s.buffered(), 0);
        let jpeg = fake_jpeg(8, 8);
        s.push(&jpeg);
        assert!(s.next_frame().is_some());
    }

    #[test]
    fn test_jpeg_dimensions() {
        assert_eq!(jpeg_dimensions(&fake_jpeg(1920, 1080)), Some((1920, 1080)));
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
    }
}
