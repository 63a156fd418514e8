//! Event-loop and compressed segmented-list primitives for an in-memory
//! data store.
//!
//! Two independent cores, sharing no state:
//!
//! - [`event`] — a single-threaded reactor multiplexing descriptor
//!   readiness with timed callbacks over a pluggable backend (epoll on
//!   Linux, a portable `select(2)` scan elsewhere).
//! - [`seglist`] — an ordered sequence container built from bounded
//!   packed-buffer segments, with LZ4 compression of interior segments and
//!   iterators that stay valid across delete-during-iteration.

pub mod event;
pub mod seglist;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level re-exports of the primary API surface.
// ─────────────────────────────────────────────────────────────────────────────

/// The dispatcher: registration table, timers, and the process loop.
pub use event::EventLoop;
/// Dispatcher error kinds.
pub use event::EventError;
/// Turn-selection flags for [`EventLoop::process_events`].
pub use event::EventFlags;
/// Readiness interest bits of a file registration.
pub use event::Mask;
/// One-shot readiness wait on a bare descriptor, outside any loop.
pub use event::wait_for;

/// The segmented list container.
pub use seglist::SegList;
/// Iteration direction for [`SegList::iter`].
pub use seglist::Direction;
/// A read-only projection of one list element.
pub use seglist::Entry;
/// List cursor supporting delete-during-iteration.
pub use seglist::Iter;
/// Validation errors for externally supplied packed buffers.
pub use seglist::PackedError;
/// Byte-string pop with a caller-supplied projection.
pub use seglist::Popped;
/// An owned list element: integer or byte string.
pub use seglist::Value;
/// Head/tail selector for push and pop.
pub use seglist::Whence;
