//! Segment metadata and the per-segment compression envelope.
//!
//! A segment wraps one packed buffer and hangs in the list's doubly-linked
//! chain (links are arena indices).  Interior segments can hold their buffer
//! in compressed form; the logical (uncompressed) byte size stays available
//! in `bytes` so fill-policy checks never need to inflate anything.

use log::trace;

use super::packed::{Packed, Value};

/// Segments smaller than this never attempt compression; the envelope
/// overhead would eat the gain.
pub(crate) const MIN_COMPRESS_BYTES: usize = 48;

/// Compression must save at least this many bytes or the segment stays raw.
pub(crate) const COMPRESS_GAIN_MIN: usize = 8;

/// Index of a segment slot in the list arena.
pub(crate) type SegIdx = usize;

#[derive(Debug, Clone)]
pub(crate) enum SegData {
    Raw(Packed),
    /// Compressed envelope; the compressed size is the vector length and the
    /// logical size lives in [`Segment::bytes`].
    Lz4(Vec<u8>),
}

#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub(crate) prev: Option<SegIdx>,
    pub(crate) next: Option<SegIdx>,
    pub(crate) data: SegData,
    /// Logical (raw) byte size of the packed buffer.
    pub(crate) bytes: usize,
    /// Entry count, duplicated out of the buffer so chain walks stay cheap.
    pub(crate) count: u16,
    /// Set while a compression-band segment is transiently inflated; the
    /// owner re-applies compression when it releases the segment.
    pub(crate) recompress: bool,
    /// Set when compression was attempted and declined to pay for itself.
    pub(crate) attempted_compress: bool,
}

impl Segment {
    pub(crate) fn from_packed(p: Packed) -> Segment {
        Segment {
            prev: None,
            next: None,
            bytes: p.byte_size(),
            count: p.count(),
            data: SegData::Raw(p),
            recompress: false,
            attempted_compress: false,
        }
    }

    /// A fresh segment holding exactly one value.
    pub(crate) fn singleton(v: &Value) -> Segment {
        let mut p = Packed::new();
        p.push_tail(v);
        Segment::from_packed(p)
    }

    pub(crate) fn is_compressed(&self) -> bool {
        matches!(self.data, SegData::Lz4(_))
    }

    pub(crate) fn packed(&self) -> &Packed {
        match &self.data {
            SegData::Raw(p) => p,
            SegData::Lz4(_) => unreachable!("segment accessed while compressed"),
        }
    }

    pub(crate) fn packed_mut(&mut self) -> &mut Packed {
        match &mut self.data {
            SegData::Raw(p) => p,
            SegData::Lz4(_) => unreachable!("segment accessed while compressed"),
        }
    }

    pub(crate) fn compressed_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            SegData::Lz4(env) => Some(env),
            SegData::Raw(_) => None,
        }
    }

    /// Compresses the buffer in place when the policy says it pays:
    /// the raw form must be at least [`MIN_COMPRESS_BYTES`] and the envelope
    /// must save at least [`COMPRESS_GAIN_MIN`] bytes.  Returns whether the
    /// segment ends up compressed.
    pub(crate) fn try_compress(&mut self) -> bool {
        let raw = match &self.data {
            SegData::Lz4(_) => return true,
            SegData::Raw(p) => p,
        };
        if self.bytes < MIN_COMPRESS_BYTES {
            return false;
        }
        let env = lz4_flex::compress(raw.as_bytes());
        if env.len() + COMPRESS_GAIN_MIN > self.bytes {
            trace!(
                "segment compression declined: {} -> {} bytes",
                self.bytes,
                env.len()
            );
            self.attempted_compress = true;
            return false;
        }
        trace!("segment compressed: {} -> {} bytes", self.bytes, env.len());
        self.attempted_compress = false;
        self.data = SegData::Lz4(env);
        true
    }

    /// Inflates a compressed buffer back to raw form.
    pub(crate) fn decompress(&mut self) {
        let env = match &self.data {
            SegData::Raw(_) => return,
            SegData::Lz4(env) => env,
        };
        let raw = match lz4_flex::decompress(env, self.bytes) {
            Ok(raw) => raw,
            // The envelope was produced by `try_compress` from a buffer we
            // own; a decode failure means memory corruption.
            Err(e) => unreachable!("segment envelope corrupt: {e}"),
        };
        self.data = SegData::Raw(Packed::from_parts(raw, self.count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulky_segment() -> Segment {
        let mut p = Packed::new();
        for _ in 0..8 {
            p.push_tail(&Value::Bytes(vec![b'a'; 40]));
        }
        Segment::from_packed(p)
    }

    #[test]
    fn compress_round_trip_preserves_content() {
        let mut seg = bulky_segment();
        let before = seg.packed().as_bytes().to_vec();
        assert!(seg.try_compress());
        assert!(seg.is_compressed());
        assert!(seg.compressed_bytes().unwrap().len() < before.len());

        seg.decompress();
        assert!(!seg.is_compressed());
        assert_eq!(seg.packed().as_bytes(), &before[..]);
        assert_eq!(seg.packed().count(), 8);
    }

    #[test]
    fn tiny_segments_stay_raw() {
        let mut seg = Segment::singleton(&Value::Int(1));
        assert!(!seg.try_compress());
        assert!(!seg.is_compressed());
        assert!(!seg.attempted_compress);
    }

    #[test]
    fn incompressible_segments_set_attempted_flag() {
        // High-entropy payload: every byte distinct in a rolling pattern.
        let mut p = Packed::new();
        let noise: Vec<u8> = (0..200u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        p.push_tail(&Value::Bytes(noise));
        let mut seg = Segment::from_packed(p);
        let compressed = seg.try_compress();
        if !compressed {
            assert!(seg.attempted_compress);
            assert!(!seg.is_compressed());
        }
    }
}
