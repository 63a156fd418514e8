//! A space-efficient ordered sequence: a doubly-linked chain of bounded,
//! optionally compressed packed-buffer segments.
//!
//! The container keeps short runs of elements in compact single-buffer
//! segments ([`packed`]), bounds each segment with a fill policy (element
//! count or byte size), and keeps interior segments LZ4-compressed while the
//! `compress_depth` outermost segments at each end stay raw for cheap
//! head/tail access.
//!
//! Submodules:
//! - [`packed`]  — the compact entry encoding inside one segment
//! - [`segment`] — segment metadata and the compression envelope
//! - [`iter`]    — forward/reverse cursors with delete-during-iteration
//!
//! The chain itself is arena-backed: segments live in slots of a `Vec` and
//! link to each other by slot index, which keeps the whole structure in safe
//! code while preserving list-style splicing.

pub mod iter;
pub mod packed;
pub(crate) mod segment;

use log::trace;

pub use iter::{Direction, Entry, Iter};
pub use packed::{PackedError, Value, ValueRef};

use packed::Packed;
use segment::{SegIdx, Segment};

/// Positive fill factors are capped here; a segment never admits more
/// elements than this no matter what the caller asked for.
const FILL_MAX: i32 = 8192;

/// Hard byte cap applied alongside count-based fills so a single oversized
/// element cannot balloon a segment.
const SIZE_SAFETY_LIMIT: usize = 8192;

/// Byte limits selected by negative fill factors -1..-5.
const BYTE_LIMITS: [usize; 5] = [4096, 8192, 16384, 32768, 65536];

/// Which end of the list an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Head,
    Tail,
}

/// Result of a byte-string pop when the caller supplies its own projection;
/// integer entries come back unprojected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped<T> {
    Int(i64),
    Bytes(T),
}

/// What `delete_at` did to the segment holding the removed element; the
/// iterator uses this to keep its cursor on the right element.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DelOutcome {
    /// The segment survived in place.
    Kept,
    /// The segment emptied and was unlinked.
    NodeGone {
        prev: Option<SegIdx>,
        next: Option<SegIdx>,
    },
    /// The segment was folded into its predecessor; former offset `o` is now
    /// `o + added` inside `into`.
    MergedPrev { into: SegIdx, added: u16 },
}

// ─────────────────────────────────────────────────────────────────────────────
// The list
// ─────────────────────────────────────────────────────────────────────────────

/// Doubly-linked chain of compressible packed-buffer segments.
#[derive(Debug, Clone)]
pub struct SegList {
    arena: Vec<Option<Segment>>,
    free: Vec<SegIdx>,
    head: Option<SegIdx>,
    tail: Option<SegIdx>,
    /// Total elements across every segment.
    count: u64,
    /// Number of segments in the chain.
    len: usize,
    /// Fill policy: `>= 0` caps elements per segment, `< 0` selects a byte
    /// limit from [`BYTE_LIMITS`].
    fill: i16,
    /// Segments at each end kept raw; 0 disables compression.
    compress_depth: u16,
}

impl Default for SegList {
    fn default() -> Self {
        SegList::new()
    }
}

impl SegList {
    /// An empty list with the default fill (-2: 8 KiB segments) and
    /// compression disabled.
    pub fn new() -> SegList {
        SegList {
            arena: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            count: 0,
            len: 0,
            fill: -2,
            compress_depth: 0,
        }
    }

    /// An empty list with explicit fill and compression depth.
    pub fn with_options(fill: i32, depth: u16) -> SegList {
        let mut list = SegList::new();
        list.set_fill(fill);
        list.set_compress_depth(depth);
        list
    }

    /// Sets the fill policy.  Positive values are capped at 8192 elements;
    /// negative values outside `-5..=-1` fall back to `-2`.
    pub fn set_fill(&mut self, fill: i32) {
        self.fill = if fill > FILL_MAX {
            FILL_MAX as i16
        } else if fill < -5 {
            -2
        } else {
            fill as i16
        };
    }

    /// Sets how many segments at each end stay uncompressed and re-applies
    /// the window to the whole chain.
    pub fn set_compress_depth(&mut self, depth: u16) {
        self.compress_depth = depth;
        self.rebalance_compression(None);
    }

    pub fn set_options(&mut self, fill: i32, depth: u16) {
        self.set_fill(fill);
        self.set_compress_depth(depth);
    }

    pub fn fill(&self) -> i32 {
        self.fill as i32
    }

    pub fn compress_depth(&self) -> u16 {
        self.compress_depth
    }

    /// Total number of elements.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of segments in the chain.
    pub fn segments(&self) -> usize {
        self.len
    }

    /// Whether the segment at chain position `pos` (from the head) is
    /// currently stored compressed.
    pub fn is_compressed(&self, pos: usize) -> Option<bool> {
        let idx = self.seg_at(pos)?;
        Some(self.seg(idx).is_compressed())
    }

    /// The compressed envelope of the segment at chain position `pos`, when
    /// it is stored compressed.
    pub fn compressed_bytes(&self, pos: usize) -> Option<&[u8]> {
        let idx = self.seg_at(pos)?;
        self.seg(idx).compressed_bytes()
    }

    // ── Pushing ──────────────────────────────────────────────────────────────

    /// Prepends a value.  Returns whether a new segment had to be created.
    pub fn push_head<V: Into<Value>>(&mut self, v: V) -> bool {
        let v = v.into();
        let enc = packed::encoded_len(&v);
        if let Some(h) = self.head {
            if self.allow_insert(h, enc) {
                let seg = self.seg_mut(h);
                seg.packed_mut().push_head(&v);
                seg.count += 1;
                seg.bytes += enc;
                seg.attempted_compress = false;
                self.count += 1;
                return false;
            }
        }
        let idx = self.alloc(Segment::singleton(&v));
        self.link_head(idx);
        self.count += 1;
        self.rebalance_compression(None);
        true
    }

    /// Appends a value.  Returns whether a new segment had to be created.
    pub fn push_tail<V: Into<Value>>(&mut self, v: V) -> bool {
        let v = v.into();
        let enc = packed::encoded_len(&v);
        if let Some(t) = self.tail {
            if self.allow_insert(t, enc) {
                let seg = self.seg_mut(t);
                seg.packed_mut().push_tail(&v);
                seg.count += 1;
                seg.bytes += enc;
                seg.attempted_compress = false;
                self.count += 1;
                return false;
            }
        }
        let idx = self.alloc(Segment::singleton(&v));
        self.link_tail(idx);
        self.count += 1;
        self.rebalance_compression(None);
        true
    }

    pub fn push<V: Into<Value>>(&mut self, v: V, whence: Whence) -> bool {
        match whence {
            Whence::Head => self.push_head(v),
            Whence::Tail => self.push_tail(v),
        }
    }

    // ── Positional insertion ─────────────────────────────────────────────────

    /// Inserts `v` immediately before the element `entry` points at.
    pub fn insert_before<V: Into<Value>>(&mut self, entry: &Entry, v: V) {
        self.insert_at(entry.seg, entry.offset, v.into(), false);
    }

    /// Inserts `v` immediately after the element `entry` points at.
    pub fn insert_after<V: Into<Value>>(&mut self, entry: &Entry, v: V) {
        self.insert_at(entry.seg, entry.offset, v.into(), true);
    }

    fn insert_at(&mut self, idx: SegIdx, offset: u16, v: Value, after: bool) {
        let enc = packed::encoded_len(&v);
        let cnt = self.seg(idx).count;
        debug_assert!(offset < cnt);

        // In-place when the fill policy admits one more element.
        if self.allow_insert(idx, enc) {
            let was = self.seg(idx).is_compressed();
            if was {
                self.seg_mut(idx).decompress();
            }
            let seg = self.seg_mut(idx);
            seg.packed_mut().insert(offset + after as u16, &v);
            seg.count += 1;
            seg.bytes += enc;
            seg.attempted_compress = false;
            self.count += 1;
            if was {
                self.seg_mut(idx).try_compress();
            }
            return;
        }

        // Edge insertions spill into an adjacent segment when that admits.
        if after && offset + 1 == cnt {
            if let Some(n) = self.seg(idx).next {
                if self.allow_insert(n, enc) {
                    self.with_raw(n, |seg| {
                        seg.packed_mut().push_head(&v);
                        seg.count += 1;
                        seg.bytes += packed::encoded_len(&v);
                        seg.attempted_compress = false;
                    });
                    self.count += 1;
                    return;
                }
            }
        }
        if !after && offset == 0 {
            if let Some(p) = self.seg(idx).prev {
                if self.allow_insert(p, enc) {
                    self.with_raw(p, |seg| {
                        seg.packed_mut().push_tail(&v);
                        seg.count += 1;
                        seg.bytes += packed::encoded_len(&v);
                        seg.attempted_compress = false;
                    });
                    self.count += 1;
                    return;
                }
            }
        }

        let ins = offset + after as u16;
        if ins == 0 {
            trace!("insert: new segment before full segment");
            let s = self.alloc(Segment::singleton(&v));
            self.link_before(idx, s);
            self.count += 1;
            self.rebalance_compression(None);
            return;
        }
        if ins == cnt {
            trace!("insert: new segment after full segment");
            let s = self.alloc(Segment::singleton(&v));
            self.link_after(idx, s);
            self.count += 1;
            self.rebalance_compression(None);
            return;
        }

        // Interior insertion into a full segment: split at the insertion
        // point, then place the value wherever it fits — the left half, the
        // right half, or a segment of its own between them.
        trace!("insert: splitting segment at {ins}");
        let was = self.seg(idx).is_compressed();
        if was {
            self.seg_mut(idx).decompress();
        }
        let right_packed = self.seg_mut(idx).packed_mut().split_off(ins);
        {
            let seg = self.seg_mut(idx);
            seg.count = seg.packed().count();
            seg.bytes = seg.packed().byte_size();
            seg.attempted_compress = false;
        }
        let mut right = Segment::from_packed(right_packed);

        if self.allow_insert(idx, enc) {
            let seg = self.seg_mut(idx);
            seg.packed_mut().push_tail(&v);
            seg.count += 1;
            seg.bytes += enc;
            let r = self.alloc(right);
            self.link_after(idx, r);
        } else if Self::packed_admits(self.fill, &right, enc) {
            right.packed_mut().push_head(&v);
            right.count += 1;
            right.bytes += enc;
            let r = self.alloc(right);
            self.link_after(idx, r);
        } else {
            let m = self.alloc(Segment::singleton(&v));
            let r = self.alloc(right);
            self.link_after(idx, m);
            self.link_after(m, r);
        }
        self.count += 1;
        self.merge_around(idx);
        self.rebalance_compression(None);
    }

    // ── Deletion ─────────────────────────────────────────────────────────────

    /// Removes `stop - start + 1` elements starting at `start` (both bounds
    /// inclusive, negative values count from the tail).  Returns how many
    /// elements were removed.
    pub fn del_range(&mut self, start: i64, stop: i64) -> usize {
        let n = self.count as i64;
        if n == 0 {
            return 0;
        }
        let mut s = if start < 0 { start + n } else { start };
        let mut e = if stop < 0 { stop + n } else { stop };
        if s < 0 {
            s = 0;
        }
        if e >= n {
            e = n - 1;
        }
        if s > e || s >= n {
            return 0;
        }

        let total = (e - s + 1) as u64;
        let mut remaining = total;
        let (first, mut local) = match self.locate(s) {
            Some((seg, off)) => (seg, off as u64),
            None => return 0,
        };
        let before = self.seg(first).prev;

        let mut cur = Some(first);
        while remaining > 0 {
            let idx = match cur {
                Some(i) => i,
                None => break,
            };
            let next = self.seg(idx).next;
            let c = self.seg(idx).count as u64;
            let take = remaining.min(c - local);
            if local == 0 && take == c {
                // Wholly covered; compressed segments drop without inflating.
                self.unlink_free(idx);
                self.count -= c;
            } else {
                if self.seg(idx).is_compressed() {
                    self.seg_mut(idx).decompress();
                }
                let seg = self.seg_mut(idx);
                for _ in 0..take {
                    seg.packed_mut().remove(local as u16);
                }
                seg.count -= take as u16;
                seg.bytes = seg.packed().byte_size();
                seg.attempted_compress = false;
                self.count -= take;
            }
            remaining -= take;
            local = 0;
            cur = next;
        }

        // Stitch the cut: the trimmed segments on either side of the removed
        // span may now fit in one.
        if matches!(self.arena.get(first), Some(Some(_))) {
            if let Some(n) = self.seg(first).next {
                if self.allow_merge(first, n) {
                    self.merge_segments(first, n);
                }
            }
        }
        if let Some(b) = before {
            if let Some(a) = self.seg(b).next {
                if self.allow_merge(b, a) {
                    self.merge_segments(b, a);
                }
            }
        }
        self.rebalance_compression(None);
        (total - remaining) as usize
    }

    /// Removes one element.  `hold_raw` names a segment an open iterator is
    /// reading; it is left inflated (flagged for recompression) instead of
    /// being recompressed out from under the cursor.
    pub(crate) fn delete_at(
        &mut self,
        idx: SegIdx,
        offset: u16,
        hold_raw: Option<SegIdx>,
    ) -> DelOutcome {
        if self.seg(idx).is_compressed() {
            self.seg_mut(idx).decompress();
        }
        {
            let seg = self.seg_mut(idx);
            seg.packed_mut().remove(offset);
            seg.count -= 1;
            seg.bytes = seg.packed().byte_size();
            seg.attempted_compress = false;
        }
        self.count -= 1;

        if self.seg(idx).count == 0 {
            let prev = self.seg(idx).prev;
            let next = self.seg(idx).next;
            self.unlink_free(idx);
            self.rebalance_compression(hold_raw.filter(|&h| h != idx));
            return DelOutcome::NodeGone { prev, next };
        }

        // Eager merge: two adjacent segments that fit under the fill policy
        // together are folded into the earlier one.
        if let Some(p) = self.seg(idx).prev {
            if self.allow_merge(p, idx) {
                let added = self.seg(p).count;
                self.merge_segments(p, idx);
                let hold = hold_raw.map(|h| if h == idx { p } else { h });
                self.rebalance_compression(hold);
                return DelOutcome::MergedPrev { into: p, added };
            }
        }
        if let Some(n) = self.seg(idx).next {
            if self.allow_merge(idx, n) {
                self.merge_segments(idx, n);
            }
        }
        self.rebalance_compression(hold_raw);
        DelOutcome::Kept
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// The element at logical index `i` (negative counts from the tail).
    pub fn index(&mut self, i: i64) -> Option<Entry> {
        let (seg, offset) = self.locate(i)?;
        let value = self.with_raw(seg, |s| s.packed().get(offset).to_owned());
        Some(Entry { seg, offset, value })
    }

    /// Replaces the element at logical index `i`.  Returns `false` when the
    /// index is out of range.
    pub fn replace_at_index<V: Into<Value>>(&mut self, i: i64, v: V) -> bool {
        let v = v.into();
        match self.locate(i) {
            None => false,
            Some((seg, offset)) => {
                self.with_raw(seg, |s| {
                    s.packed_mut().replace(offset, &v);
                    s.count = s.packed().count();
                    s.bytes = s.packed().byte_size();
                    s.attempted_compress = false;
                });
                true
            }
        }
    }

    // ── Pop / rotate ─────────────────────────────────────────────────────────

    /// Removes and returns the head or tail element.
    pub fn pop(&mut self, whence: Whence) -> Option<Value> {
        self.pop_custom(whence, |b| b.to_vec()).map(|p| match p {
            Popped::Int(n) => Value::Int(n),
            Popped::Bytes(v) => Value::Bytes(v),
        })
    }

    /// Like [`pop`](SegList::pop) but routes byte-string values through a
    /// caller-supplied projection, so callers that only need a length or a
    /// checksum skip the copy.
    pub fn pop_custom<T>(
        &mut self,
        whence: Whence,
        saver: impl FnOnce(&[u8]) -> T,
    ) -> Option<Popped<T>> {
        let idx = match whence {
            Whence::Head => self.head?,
            Whence::Tail => self.tail?,
        };
        // End segments sit inside the uncompressed band by construction.
        debug_assert!(!self.seg(idx).is_compressed());
        let offset = match whence {
            Whence::Head => 0,
            Whence::Tail => self.seg(idx).count - 1,
        };
        let out = match self.seg(idx).packed().get(offset) {
            ValueRef::Int(n) => Popped::Int(n),
            ValueRef::Bytes(b) => Popped::Bytes(saver(b)),
        };
        self.delete_at(idx, offset, None);
        Some(out)
    }

    /// Moves the tail element to the head.
    pub fn rotate(&mut self) {
        if self.count <= 1 {
            return;
        }
        if let Some(v) = self.pop(Whence::Tail) {
            self.push_head(v);
        }
    }

    // ── Whole-list operations ────────────────────────────────────────────────

    /// Deep copy, preserving per-segment encodings.
    pub fn dup(&self) -> SegList {
        let mut out = SegList {
            arena: Vec::with_capacity(self.len),
            free: Vec::new(),
            head: None,
            tail: None,
            count: self.count,
            len: 0,
            fill: self.fill,
            compress_depth: self.compress_depth,
        };
        let mut cur = self.head;
        while let Some(idx) = cur {
            let seg = self.seg(idx);
            let copy = seg.clone();
            cur = seg.next;
            let slot = out.alloc(copy);
            out.link_tail(slot);
        }
        out
    }

    /// Wraps an externally built packed buffer as one new tail segment.
    pub fn append_packed(&mut self, buf: Vec<u8>) -> Result<(), PackedError> {
        let p = Packed::from_bytes(buf)?;
        if p.is_empty() {
            return Ok(());
        }
        let added = p.count() as u64;
        let idx = self.alloc(Segment::from_packed(p));
        self.link_tail(idx);
        self.count += added;
        self.rebalance_compression(None);
        Ok(())
    }

    /// Appends each entry of a packed buffer individually, re-packing them
    /// under this list's fill policy.
    pub fn extend_from_packed(&mut self, buf: Vec<u8>) -> Result<(), PackedError> {
        let p = Packed::from_bytes(buf)?;
        for i in 0..p.count() {
            self.push_tail(p.get(i).to_owned());
        }
        Ok(())
    }

    /// Builds a list with the given options from a packed buffer.
    pub fn from_packed(fill: i32, depth: u16, buf: Vec<u8>) -> Result<SegList, PackedError> {
        let mut list = SegList::with_options(fill, depth);
        list.extend_from_packed(buf)?;
        Ok(list)
    }

    // ── Iteration ────────────────────────────────────────────────────────────

    /// A cursor starting at the head (forward) or tail (reverse).
    pub fn iter(&mut self, direction: Direction) -> Iter<'_> {
        Iter::new(self, direction)
    }

    /// A cursor positioned on logical index `idx`; its first `next()` yields
    /// that element.  Out-of-range indexes yield an exhausted cursor.
    pub fn iter_at(&mut self, direction: Direction, idx: i64) -> Iter<'_> {
        let at = self.locate(idx);
        Iter::new_at(self, direction, at)
    }

    // ── Fill policy ──────────────────────────────────────────────────────────

    fn byte_limit(&self) -> usize {
        debug_assert!(self.fill < 0);
        BYTE_LIMITS[(-(self.fill as i32) - 1) as usize]
    }

    /// Whether the segment admits one more element of encoded size `enc`.
    fn allow_insert(&self, idx: SegIdx, enc: usize) -> bool {
        let seg = self.seg(idx);
        if seg.count == u16::MAX {
            return false;
        }
        let new_bytes = seg.bytes + enc;
        if self.fill >= 0 {
            (seg.count as i32) < self.fill as i32 && new_bytes <= SIZE_SAFETY_LIMIT
        } else {
            new_bytes <= self.byte_limit()
        }
    }

    /// `allow_insert` for a segment not yet in the arena.
    fn packed_admits(fill: i16, seg: &Segment, enc: usize) -> bool {
        if seg.count == u16::MAX {
            return false;
        }
        let new_bytes = seg.bytes + enc;
        if fill >= 0 {
            (seg.count as i32) < fill as i32 && new_bytes <= SIZE_SAFETY_LIMIT
        } else {
            new_bytes <= BYTE_LIMITS[(-(fill as i32) - 1) as usize]
        }
    }

    fn allow_merge(&self, a: SegIdx, b: SegIdx) -> bool {
        let sa = self.seg(a);
        let sb = self.seg(b);
        let merged_count = sa.count as u32 + sb.count as u32;
        if merged_count > u16::MAX as u32 {
            return false;
        }
        let merged_bytes = sa.bytes + sb.bytes;
        if self.fill >= 0 {
            merged_count <= self.fill as u32 && merged_bytes <= SIZE_SAFETY_LIMIT
        } else {
            merged_bytes <= self.byte_limit()
        }
    }

    /// Folds segment `b` into segment `a` (`a` is the earlier one).
    fn merge_segments(&mut self, a: SegIdx, b: SegIdx) {
        trace!("merging segment {b} into {a}");
        debug_assert_eq!(self.seg(a).next, Some(b));
        if self.seg(a).is_compressed() {
            self.seg_mut(a).decompress();
        }
        if self.seg(b).is_compressed() {
            self.seg_mut(b).decompress();
        }
        let bseg = match self.arena[b].take() {
            Some(s) => s,
            None => unreachable!("dangling segment index"),
        };
        self.free.push(b);
        self.len -= 1;

        if let Some(n) = bseg.next {
            self.seg_mut(n).prev = Some(a);
        } else {
            self.tail = Some(a);
        }
        let bcount = bseg.count;
        let bpacked = match bseg.data {
            segment::SegData::Raw(p) => p,
            segment::SegData::Lz4(_) => unreachable!("merge of compressed segment"),
        };
        let seg = self.seg_mut(a);
        seg.next = bseg.next;
        seg.packed_mut().extend(bpacked);
        seg.count += bcount;
        seg.bytes = seg.packed().byte_size();
        seg.attempted_compress = false;
        seg.recompress = false;
    }

    /// After a split, consolidates the neighborhood the way repeated
    /// insertions would have left it: four candidate pairs around `center`.
    fn merge_around(&mut self, center: SegIdx) {
        let prev = self.seg(center).prev;
        let prev_prev = prev.and_then(|p| self.seg(p).prev);
        if let (Some(pp), Some(p)) = (prev_prev, prev) {
            if self.allow_merge(pp, p) {
                self.merge_segments(pp, p);
            }
        }
        let next = self.seg(center).next;
        let next_next = next.and_then(|n| self.seg(n).next);
        if let (Some(n), Some(nn)) = (next, next_next) {
            if self.allow_merge(n, nn) {
                self.merge_segments(n, nn);
            }
        }
        let mut center = center;
        if let Some(p) = self.seg(center).prev {
            if self.allow_merge(p, center) {
                self.merge_segments(p, center);
                center = p;
            }
        }
        if let Some(n) = self.seg(center).next {
            if self.allow_merge(center, n) {
                self.merge_segments(center, n);
            }
        }
    }

    // ── Compression window ───────────────────────────────────────────────────

    /// Re-applies the compression window to the whole chain: the
    /// `compress_depth` outermost segments at each end raw, everything
    /// between compressed.  `hold_raw` names a segment to leave inflated
    /// (an open iterator is reading it); it keeps its `recompress` flag.
    pub(crate) fn rebalance_compression(&mut self, hold_raw: Option<SegIdx>) {
        let depth = self.compress_depth as usize;
        let len = self.len;
        let mut pos = 0usize;
        let mut cur = self.head;
        while let Some(idx) = cur {
            cur = self.seg(idx).next;
            let in_band = depth == 0 || pos < depth || len - 1 - pos < depth;
            if in_band {
                let seg = self.seg_mut(idx);
                seg.recompress = false;
                seg.decompress();
            } else if hold_raw == Some(idx) {
                self.seg_mut(idx).recompress = true;
            } else {
                let seg = self.seg_mut(idx);
                seg.recompress = false;
                seg.try_compress();
            }
            pos += 1;
        }
    }

    /// Undoes a transient inflation: clears the `recompress` flag and
    /// compresses the segment again when its position calls for it.
    pub(crate) fn restore_encoding(&mut self, idx: SegIdx) {
        let alive = matches!(self.arena.get(idx), Some(Some(_)));
        if !alive || !self.seg(idx).recompress {
            return;
        }
        self.seg_mut(idx).recompress = false;
        if let Some(pos) = self.position_of(idx) {
            let depth = self.compress_depth as usize;
            let in_band = depth == 0 || pos < depth || self.len - 1 - pos < depth;
            if !in_band {
                self.seg_mut(idx).try_compress();
            }
        }
    }

    // ── Chain plumbing ───────────────────────────────────────────────────────

    pub(crate) fn seg(&self, idx: SegIdx) -> &Segment {
        match self.arena[idx].as_ref() {
            Some(s) => s,
            None => unreachable!("dangling segment index"),
        }
    }

    pub(crate) fn seg_mut(&mut self, idx: SegIdx) -> &mut Segment {
        match self.arena[idx].as_mut() {
            Some(s) => s,
            None => unreachable!("dangling segment index"),
        }
    }

    fn seg_at(&self, pos: usize) -> Option<SegIdx> {
        let mut cur = self.head;
        for _ in 0..pos {
            cur = self.seg(cur?).next;
        }
        cur
    }

    fn position_of(&self, idx: SegIdx) -> Option<usize> {
        let mut cur = self.head;
        let mut pos = 0usize;
        while let Some(i) = cur {
            if i == idx {
                return Some(pos);
            }
            pos += 1;
            cur = self.seg(i).next;
        }
        None
    }

    fn alloc(&mut self, seg: Segment) -> SegIdx {
        match self.free.pop() {
            Some(i) => {
                self.arena[i] = Some(seg);
                i
            }
            None => {
                self.arena.push(Some(seg));
                self.arena.len() - 1
            }
        }
    }

    fn link_head(&mut self, idx: SegIdx) {
        self.seg_mut(idx).prev = None;
        self.seg_mut(idx).next = self.head;
        match self.head {
            Some(h) => self.seg_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    fn link_tail(&mut self, idx: SegIdx) {
        self.seg_mut(idx).next = None;
        self.seg_mut(idx).prev = self.tail;
        match self.tail {
            Some(t) => self.seg_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    fn link_after(&mut self, at: SegIdx, idx: SegIdx) {
        let nxt = self.seg(at).next;
        self.seg_mut(idx).prev = Some(at);
        self.seg_mut(idx).next = nxt;
        self.seg_mut(at).next = Some(idx);
        match nxt {
            Some(n) => self.seg_mut(n).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.len += 1;
    }

    fn link_before(&mut self, at: SegIdx, idx: SegIdx) {
        let prv = self.seg(at).prev;
        self.seg_mut(idx).next = Some(at);
        self.seg_mut(idx).prev = prv;
        self.seg_mut(at).prev = Some(idx);
        match prv {
            Some(p) => self.seg_mut(p).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    fn unlink_free(&mut self, idx: SegIdx) {
        let prev = self.seg(idx).prev;
        let next = self.seg(idx).next;
        match prev {
            Some(p) => self.seg_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.seg_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.arena[idx] = None;
        self.free.push(idx);
        self.len -= 1;
    }

    /// Runs `f` against the segment in raw form, restoring the previous
    /// encoding afterward.
    fn with_raw<R>(&mut self, idx: SegIdx, f: impl FnOnce(&mut Segment) -> R) -> R {
        let was = self.seg(idx).is_compressed();
        if was {
            self.seg_mut(idx).decompress();
        }
        let r = f(self.seg_mut(idx));
        if was {
            self.seg_mut(idx).try_compress();
        }
        r
    }

    /// Resolves a logical index to (segment, offset-within-segment).
    pub(crate) fn locate(&self, index: i64) -> Option<(SegIdx, u16)> {
        let n = self.count as i64;
        let idx = if index < 0 { index + n } else { index };
        if idx < 0 || idx >= n {
            return None;
        }
        if index >= 0 {
            let mut acc: i64 = 0;
            let mut cur = self.head;
            while let Some(i) = cur {
                let c = self.seg(i).count as i64;
                if idx < acc + c {
                    return Some((i, (idx - acc) as u16));
                }
                acc += c;
                cur = self.seg(i).next;
            }
        } else {
            let from_tail = n - 1 - idx;
            let mut acc: i64 = 0;
            let mut cur = self.tail;
            while let Some(i) = cur {
                let c = self.seg(i).count as i64;
                if from_tail < acc + c {
                    let offset = c - 1 - (from_tail - acc);
                    return Some((i, offset as u16));
                }
                acc += c;
                cur = self.seg(i).prev;
            }
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_normalization() {
        let mut l = SegList::new();
        assert_eq!(l.fill(), -2);
        l.set_fill(100_000);
        assert_eq!(l.fill(), 8192);
        l.set_fill(-9);
        assert_eq!(l.fill(), -2);
        l.set_fill(-5);
        assert_eq!(l.fill(), -5);
        l.set_fill(3);
        assert_eq!(l.fill(), 3);
    }

    #[test]
    fn locate_from_both_ends() {
        let mut l = SegList::with_options(3, 0);
        for i in 0..10i64 {
            l.push_tail(i);
        }
        for i in 0..10i64 {
            let (seg_f, off_f) = l.locate(i).unwrap();
            let (seg_r, off_r) = l.locate(i - 10).unwrap();
            assert_eq!((seg_f, off_f), (seg_r, off_r), "index {i}");
        }
        assert!(l.locate(10).is_none());
        assert!(l.locate(-11).is_none());
    }

    #[test]
    fn byte_fill_splits_by_size() {
        let mut l = SegList::with_options(-1, 0); // 4096-byte segments
        // Each entry encodes to 1005 bytes; four fit, the fifth opens a new
        // segment.
        for _ in 0..6 {
            l.push_tail(vec![b'x'; 1000]);
        }
        assert_eq!(l.count(), 6);
        assert_eq!(l.segments(), 2);
    }

    #[test]
    fn oversized_element_respects_safety_cap() {
        let mut l = SegList::with_options(100, 0);
        l.push_tail(vec![b'x'; 6000]);
        l.push_tail(vec![b'y'; 6000]);
        // Count-based fill would admit both, the byte cap does not.
        assert_eq!(l.segments(), 2);
    }

    #[test]
    fn compression_window_positions() {
        let mut l = SegList::with_options(1, 2);
        for i in 0..8i64 {
            // One element per segment, large enough to compress.
            l.push_tail(i.to_string().repeat(80).as_str());
        }
        assert_eq!(l.segments(), 8);
        for pos in 0..8 {
            let want = !(pos < 2 || pos >= 6);
            assert_eq!(l.is_compressed(pos), Some(want), "position {pos}");
        }
        // Disabling compression inflates everything.
        l.set_compress_depth(0);
        for pos in 0..8 {
            assert_eq!(l.is_compressed(pos), Some(false));
        }
    }

    #[test]
    fn del_range_spanning_segments() {
        let mut l = SegList::with_options(4, 0);
        for i in 0..16i64 {
            l.push_tail(i);
        }
        assert_eq!(l.segments(), 4);
        assert_eq!(l.del_range(2, 13), 12);
        assert_eq!(l.count(), 4);
        let mut got = Vec::new();
        let mut it = l.iter(Direction::Forward);
        while let Some(e) = it.next() {
            got.push(e.value().clone());
        }
        drop(it);
        assert_eq!(
            got,
            vec![Value::Int(0), Value::Int(1), Value::Int(14), Value::Int(15)]
        );
        // The two boundary remnants fit one segment of four.
        assert_eq!(l.segments(), 1);
    }

    #[test]
    fn del_range_negative_indices() {
        let mut l = SegList::with_options(5, 0);
        for i in 0..10i64 {
            l.push_tail(i);
        }
        assert_eq!(l.del_range(-3, -1), 3);
        assert_eq!(l.count(), 7);
        assert_eq!(l.index(-1).unwrap().value(), &Value::Int(6));
        // Out-of-range stop clamps.
        assert_eq!(l.del_range(5, 100), 2);
        assert_eq!(l.count(), 5);
        // Inverted range removes nothing.
        assert_eq!(l.del_range(4, 2), 0);
    }
}
