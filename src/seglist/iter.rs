//! Forward/reverse cursors over the segmented list.
//!
//! A cursor holds the segment it is visiting and the entry offset inside
//! that segment.  Visiting a segment inside the compression band transiently
//! inflates it; the cursor restores the encoding when it moves on or is
//! dropped.  While a cursor is live it has exclusive access to the list, and
//! the only structural mutation it supports is [`Iter::del_entry`] — the
//! cursor stays valid across the segment unlinks and neighbor merges a
//! deletion can trigger.

use super::packed::Value;
use super::segment::SegIdx;
use super::{DelOutcome, SegList};

/// Iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// A read-only projection of one element, carrying enough position to anchor
/// `insert_before`/`insert_after`/`del_entry`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) seg: SegIdx,
    pub(crate) offset: u16,
    pub(crate) value: Value,
}

impl Entry {
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Offset of the element inside its segment's packed buffer.
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Integer-aware equality against raw bytes.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.value.eq_bytes(other)
    }
}

/// A mutable cursor over a [`SegList`].
pub struct Iter<'a> {
    list: &'a mut SegList,
    current: Option<SegIdx>,
    /// Entry offset within the current segment; negative values count from
    /// the segment's end (`-1` is the last entry), used when entering a
    /// segment from the tail side.
    offset: i32,
    /// Whether `offset` names an already-yielded entry (in which case the
    /// next step advances past it) or a landing position to yield as-is.
    at_entry: bool,
    direction: Direction,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(list: &'a mut SegList, direction: Direction) -> Iter<'a> {
        let (current, offset) = match direction {
            Direction::Forward => (list.head, 0),
            Direction::Reverse => (list.tail, -1),
        };
        Iter {
            list,
            current,
            offset,
            at_entry: false,
            direction,
        }
    }

    pub(crate) fn new_at(
        list: &'a mut SegList,
        direction: Direction,
        at: Option<(SegIdx, u16)>,
    ) -> Iter<'a> {
        match at {
            Some((seg, off)) => Iter {
                list,
                current: Some(seg),
                offset: off as i32,
                at_entry: false,
                direction,
            },
            None => Iter {
                list,
                current: None,
                offset: 0,
                at_entry: false,
                direction,
            },
        }
    }

    /// Repositions to the head, iterating forward.
    pub fn rewind(&mut self) {
        self.release_current();
        self.direction = Direction::Forward;
        self.current = self.list.head;
        self.offset = 0;
        self.at_entry = false;
    }

    /// Repositions to the tail, iterating in reverse.
    pub fn rewind_tail(&mut self) {
        self.release_current();
        self.direction = Direction::Reverse;
        self.current = self.list.tail;
        self.offset = -1;
        self.at_entry = false;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Yields the next element in the iteration direction, or `None` when
    /// the cursor runs off the end of the chain.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Entry> {
        loop {
            let cur = self.current?;
            if self.list.seg(cur).is_compressed() {
                // Inside the compression band: inflate for the visit and
                // leave a note to recompress when the cursor moves on.
                self.list.seg_mut(cur).decompress();
                self.list.seg_mut(cur).recompress = true;
            }
            let count = self.list.seg(cur).count as i32;
            let resolved = if self.at_entry {
                match self.direction {
                    Direction::Forward => self.offset + 1,
                    Direction::Reverse => self.offset - 1,
                }
            } else if self.offset < 0 {
                count + self.offset
            } else {
                self.offset
            };

            if resolved >= 0 && resolved < count {
                self.offset = resolved;
                self.at_entry = true;
                let value = self.list.seg(cur).packed().get(resolved as u16).to_owned();
                return Some(Entry {
                    seg: cur,
                    offset: resolved as u16,
                    value,
                });
            }

            // Off the segment: restore its encoding and move to the next one.
            let next = match self.direction {
                Direction::Forward => self.list.seg(cur).next,
                Direction::Reverse => self.list.seg(cur).prev,
            };
            self.list.restore_encoding(cur);
            self.current = next;
            self.offset = match self.direction {
                Direction::Forward => 0,
                Direction::Reverse => -1,
            };
            self.at_entry = false;
        }
    }

    /// Deletes the element `entry` points at and repositions the cursor so
    /// the following `next()` yields the element logically after the deleted
    /// one in the iteration direction.
    pub fn del_entry(&mut self, entry: &Entry) {
        let res = self.list.delete_at(entry.seg, entry.offset, self.current);
        self.at_entry = false;
        match res {
            DelOutcome::NodeGone { prev, next } => match self.direction {
                Direction::Forward => {
                    self.current = next;
                    self.offset = 0;
                }
                Direction::Reverse => {
                    self.current = prev;
                    self.offset = -1;
                }
            },
            DelOutcome::MergedPrev { into, added } => {
                self.current = Some(into);
                match self.direction {
                    Direction::Forward => {
                        // The surviving successor kept its relative position,
                        // shifted by the predecessor's old length.
                        self.offset = entry.offset as i32 + added as i32;
                    }
                    Direction::Reverse => {
                        let o = entry.offset as i32 + added as i32 - 1;
                        if o < 0 {
                            let prev = self.list.seg(into).prev;
                            self.list.restore_encoding(into);
                            self.current = prev;
                            self.offset = -1;
                        } else {
                            self.offset = o;
                        }
                    }
                }
            }
            DelOutcome::Kept => match self.direction {
                Direction::Forward => {
                    // Deletion shifted the successor into the vacated slot.
                    self.offset = entry.offset as i32;
                }
                Direction::Reverse => {
                    let o = entry.offset as i32 - 1;
                    if o < 0 {
                        let prev = self.list.seg(entry.seg).prev;
                        self.list.restore_encoding(entry.seg);
                        self.current = prev;
                        self.offset = -1;
                    } else {
                        self.offset = o;
                    }
                }
            },
        }
    }

    fn release_current(&mut self) {
        if let Some(cur) = self.current {
            self.list.restore_encoding(cur);
        }
    }
}

impl Drop for Iter<'_> {
    fn drop(&mut self) {
        self.release_current();
    }
}
