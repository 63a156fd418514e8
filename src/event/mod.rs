//! Single-threaded event dispatcher: readiness events on file descriptors
//! multiplexed with timed callbacks.
//!
//! One [`EventLoop`] owns a descriptor-indexed registration table, an
//! unsorted timer list, and a pluggable readiness [`Backend`].  Each turn
//! computes the nearest timer deadline, asks the backend to wait at most
//! that long, dispatches the file callbacks that fired, then walks the
//! timers.  Everything runs on the calling thread; the backend poll is the
//! only blocking point.
//!
//! Callbacks are owned closures.  A file callback may freely register or
//! unregister descriptors — including its own — and create or delete
//! timers; the dispatcher re-reads the registration between the readable
//! and writable dispatches of a turn, and timers created from inside a
//! callback never fire before the next turn.
//!
//! Submodules:
//! - [`backend`] — the add/del/poll capability set and platform selection
//! - [`epoll`]   — level-triggered kernel poller (Linux)
//! - [`select`]  — stateless scan poller (portable fallback)

pub mod backend;
#[cfg(target_os = "linux")]
pub mod epoll;
pub mod select;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use log::{debug, trace, warn};

use backend::{default_backend, Backend, Fired};

bitflags! {
    /// Readiness interest and fired-event bits of one registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mask: u32 {
        const READABLE = 1;
        const WRITABLE = 2;
        /// With both directions ready in one turn, dispatch only the
        /// writable callback; the readable one waits for a later turn.
        /// Useful to flush pending output before accepting more input.
        const BARRIER = 4;
    }
}

bitflags! {
    /// What a [`EventLoop::process_events`] turn should handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const FILE_EVENTS = 1;
        const TIME_EVENTS = 2;
        const ALL_EVENTS = 3;
        /// Never block in the backend, even with pending timers.
        const DONT_WAIT = 4;
        /// Run the after-sleep hook when the poll returns.
        const CALL_AFTER_SLEEP = 8;
    }
}

/// Timer ids marked for deferred removal; swept on the next timer pass.
const DELETED_EVENT_ID: i64 = -1;

/// File callback: `(loop, fd, fired-mask)`.  Shared so one closure can serve
/// both the readable and writable slots of a registration.
pub type FileProc = Rc<RefCell<dyn FnMut(&mut EventLoop, RawFd, Mask)>>;

/// Timer callback: returns `Some(ms)` to fire again that many milliseconds
/// from now, `None` to be removed.
pub type TimerProc = Box<dyn FnMut(&mut EventLoop, i64) -> Option<u64>>;

/// Invoked exactly once when a timer is removed.
pub type FinalizerProc = Box<dyn FnOnce(&mut EventLoop)>;

type HookProc = Rc<RefCell<dyn FnMut(&mut EventLoop)>>;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum EventError {
    /// The descriptor does not fit the loop's registration table.
    OutOfRange { fd: RawFd, set_size: usize },
    /// A shrink would orphan a registered descriptor; nothing was changed.
    ResizeDenied { set_size: usize, max_fd: RawFd },
    /// No live timer carries this id.
    TimerNotFound(i64),
    /// The kernel-facing backend call failed; no partial state is retained.
    Backend(io::Error),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::OutOfRange { fd, set_size } => {
                write!(f, "descriptor {fd} out of range (set size {set_size})")
            }
            EventError::ResizeDenied { set_size, max_fd } => write!(
                f,
                "cannot shrink set size to {set_size}: descriptor {max_fd} still registered"
            ),
            EventError::TimerNotFound(id) => write!(f, "no timer with id {id}"),
            EventError::Backend(e) => write!(f, "backend failure: {e}"),
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EventError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EventError {
    fn from(e: io::Error) -> EventError {
        EventError::Backend(e)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop state
// ─────────────────────────────────────────────────────────────────────────────

struct FileEvent {
    mask: Mask,
    rfile: Option<FileProc>,
    wfile: Option<FileProc>,
}

impl Default for FileEvent {
    fn default() -> FileEvent {
        FileEvent {
            mask: Mask::empty(),
            rfile: None,
            wfile: None,
        }
    }
}

struct TimeEvent {
    id: i64,
    when_sec: u64,
    when_ms: u64,
    proc: Option<TimerProc>,
    finalizer: Option<FinalizerProc>,
}

/// The dispatcher.
pub struct EventLoop {
    max_fd: RawFd,
    events: Vec<FileEvent>,
    fired: Vec<Fired>,
    timers: Vec<TimeEvent>,
    next_timer_id: i64,
    /// Wall-clock seconds sampled on the previous timer pass; a smaller
    /// current sample means the clock jumped backwards.
    last_time: u64,
    stop: bool,
    backend: Box<dyn Backend>,
    before_sleep: Option<HookProc>,
    after_sleep: Option<HookProc>,
}

impl EventLoop {
    /// A loop able to track descriptors in `[0, set_size)`, on the
    /// platform's preferred backend.
    pub fn new(set_size: usize) -> Result<EventLoop, EventError> {
        let backend = default_backend(set_size)?;
        Ok(EventLoop::with_backend(set_size, backend))
    }

    /// A loop on an explicit backend.
    pub fn with_backend(set_size: usize, backend: Box<dyn Backend>) -> EventLoop {
        let mut events = Vec::with_capacity(set_size);
        events.resize_with(set_size, FileEvent::default);
        EventLoop {
            max_fd: -1,
            events,
            fired: Vec::with_capacity(set_size),
            timers: Vec::new(),
            next_timer_id: 1,
            last_time: now_sec_ms().0,
            stop: false,
            backend,
            before_sleep: None,
            after_sleep: None,
        }
    }

    pub fn api_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Capacity of the registration table.
    pub fn set_size(&self) -> usize {
        self.events.len()
    }

    /// Grows or shrinks the registration table.  Shrinking below a still
    /// registered descriptor is refused and nothing changes.
    pub fn resize_set_size(&mut self, set_size: usize) -> Result<(), EventError> {
        if set_size == self.events.len() {
            return Ok(());
        }
        if self.max_fd >= set_size as RawFd {
            return Err(EventError::ResizeDenied {
                set_size,
                max_fd: self.max_fd,
            });
        }
        self.backend.resize(set_size)?;
        self.events.resize_with(set_size, FileEvent::default);
        Ok(())
    }

    /// Makes [`run`](EventLoop::run) return after the current turn.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn set_before_sleep(&mut self, hook: impl FnMut(&mut EventLoop) + 'static) {
        self.before_sleep = Some(Rc::new(RefCell::new(hook)));
    }

    pub fn clear_before_sleep(&mut self) {
        self.before_sleep = None;
    }

    pub fn set_after_sleep(&mut self, hook: impl FnMut(&mut EventLoop) + 'static) {
        self.after_sleep = Some(Rc::new(RefCell::new(hook)));
    }

    pub fn clear_after_sleep(&mut self) {
        self.after_sleep = None;
    }

    // ── File events ──────────────────────────────────────────────────────────

    /// Registers `proc` for the requested readiness on `fd`, merging with
    /// any existing registration.  The closure lands in the readable slot,
    /// the writable slot, or both, according to `mask`.
    pub fn create_file_event(
        &mut self,
        fd: RawFd,
        mask: Mask,
        proc: impl FnMut(&mut EventLoop, RawFd, Mask) + 'static,
    ) -> Result<(), EventError> {
        if fd < 0 || fd as usize >= self.events.len() {
            return Err(EventError::OutOfRange {
                fd,
                set_size: self.events.len(),
            });
        }
        let old = self.events[fd as usize].mask;
        self.backend.add(fd, old, mask)?;

        let proc: FileProc = Rc::new(RefCell::new(proc));
        let fe = &mut self.events[fd as usize];
        fe.mask |= mask;
        if mask.contains(Mask::READABLE) {
            fe.rfile = Some(proc.clone());
        }
        if mask.contains(Mask::WRITABLE) {
            fe.wfile = Some(proc.clone());
        }
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        debug!("registered fd {fd} for {mask:?}");
        Ok(())
    }

    /// Drops the requested readiness bits from `fd`'s registration.  Unknown
    /// or unregistered descriptors are ignored.
    pub fn delete_file_event(&mut self, fd: RawFd, mask: Mask) {
        if fd < 0 || fd as usize >= self.events.len() {
            return;
        }
        if self.events[fd as usize].mask.is_empty() {
            return;
        }
        // The barrier qualifies the writable dispatch; it cannot outlive it.
        let mask = if mask.contains(Mask::WRITABLE) {
            mask | Mask::BARRIER
        } else {
            mask
        };
        let remaining = self.events[fd as usize].mask & !mask;
        self.backend.del(fd, remaining);

        let fe = &mut self.events[fd as usize];
        fe.mask = remaining;
        if !remaining.contains(Mask::READABLE) {
            fe.rfile = None;
        }
        if !remaining.contains(Mask::WRITABLE) {
            fe.wfile = None;
        }
        if fd == self.max_fd && remaining.is_empty() {
            self.max_fd = (0..fd)
                .rev()
                .find(|&j| !self.events[j as usize].mask.is_empty())
                .unwrap_or(-1);
        }
        debug!("dropped {mask:?} from fd {fd}");
    }

    /// The readiness currently registered for `fd` (empty when none).
    pub fn get_file_events(&self, fd: RawFd) -> Mask {
        if fd < 0 || fd as usize >= self.events.len() {
            return Mask::empty();
        }
        self.events[fd as usize].mask
    }

    // ── Time events ──────────────────────────────────────────────────────────

    /// Schedules `proc` to fire `ms` milliseconds from now.  Returns the
    /// timer id.
    pub fn create_time_event(
        &mut self,
        ms: u64,
        proc: impl FnMut(&mut EventLoop, i64) -> Option<u64> + 'static,
        finalizer: Option<FinalizerProc>,
    ) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let (when_sec, when_ms) = add_ms(ms);
        self.timers.push(TimeEvent {
            id,
            when_sec,
            when_ms,
            proc: Some(Box::new(proc)),
            finalizer,
        });
        trace!("created timer {id} firing in {ms}ms");
        id
    }

    /// Marks timer `id` for removal.  The entry is unlinked — and its
    /// finalizer runs — on the next timer pass, not here.
    pub fn delete_time_event(&mut self, id: i64) -> Result<(), EventError> {
        match self
            .timers
            .iter_mut()
            .find(|t| t.id == id && t.id != DELETED_EVENT_ID)
        {
            Some(te) => {
                te.id = DELETED_EVENT_ID;
                Ok(())
            }
            None => Err(EventError::TimerNotFound(id)),
        }
    }

    /// Live (not yet deleted) timers.
    pub fn timer_count(&self) -> usize {
        self.timers
            .iter()
            .filter(|t| t.id != DELETED_EVENT_ID)
            .count()
    }

    // ── The turn ─────────────────────────────────────────────────────────────

    /// Runs one dispatcher turn and returns how many events were handled.
    ///
    /// With pending file registrations (or waitable timers) the backend
    /// blocks until the nearest timer deadline, indefinitely when only file
    /// events exist, or not at all under `DONT_WAIT`.
    pub fn process_events(&mut self, flags: EventFlags) -> usize {
        let mut processed = 0usize;
        if !flags.intersects(EventFlags::FILE_EVENTS | EventFlags::TIME_EVENTS) {
            return 0;
        }

        if self.max_fd != -1
            || (flags.contains(EventFlags::TIME_EVENTS) && !flags.contains(EventFlags::DONT_WAIT))
        {
            let shortest = if flags.contains(EventFlags::TIME_EVENTS)
                && !flags.contains(EventFlags::DONT_WAIT)
            {
                self.nearest_timer()
            } else {
                None
            };
            let timeout = match shortest {
                Some((sec, ms)) => Some(until(sec, ms)),
                None if flags.contains(EventFlags::DONT_WAIT) => Some(Duration::ZERO),
                None => None,
            };

            trace!("{} poll, timeout {timeout:?}", self.backend.name());
            let numevents = match self.backend.poll(timeout, &mut self.fired) {
                Ok(n) => n,
                Err(e) => {
                    warn!("backend poll failed: {e}");
                    0
                }
            };

            if flags.contains(EventFlags::CALL_AFTER_SLEEP) {
                if let Some(hook) = self.after_sleep.clone() {
                    (&mut *hook.borrow_mut())(self);
                }
            }

            for j in 0..numevents {
                let fired = self.fired[j];
                let fd = fired.fd;
                if fd < 0 || fd as usize >= self.events.len() {
                    continue;
                }
                let reg = self.events[fd as usize].mask;
                let ready = reg & fired.mask;
                if ready.is_empty() {
                    continue;
                }
                let barrier = reg.contains(Mask::BARRIER);
                let both =
                    ready.contains(Mask::READABLE) && ready.contains(Mask::WRITABLE);

                let mut invoked = 0usize;
                let mut called_r: Option<FileProc> = None;

                // With a barrier and both directions ready, only the
                // writable callback runs this turn.
                if ready.contains(Mask::READABLE) && !(barrier && both) {
                    if let Some(proc) = self.events[fd as usize].rfile.clone() {
                        (&mut *proc.borrow_mut())(self, fd, fired.mask);
                        invoked += 1;
                        called_r = Some(proc);
                    }
                }

                // Re-read the registration: the readable callback may have
                // unregistered or replaced this descriptor.
                let still = self.events[fd as usize].mask & fired.mask;
                if still.contains(Mask::WRITABLE) {
                    if let Some(proc) = self.events[fd as usize].wfile.clone() {
                        let duplicate = called_r
                            .as_ref()
                            .is_some_and(|r| Rc::ptr_eq(r, &proc));
                        if !duplicate {
                            (&mut *proc.borrow_mut())(self, fd, fired.mask);
                            invoked += 1;
                        }
                    }
                }

                if invoked > 0 {
                    processed += 1;
                }
            }
        }

        if flags.contains(EventFlags::TIME_EVENTS) {
            processed += self.process_time_events();
        }
        processed
    }

    /// Runs turns until [`stop`](EventLoop::stop) is called.
    pub fn run(&mut self) {
        self.stop = false;
        while !self.stop {
            if let Some(hook) = self.before_sleep.clone() {
                (&mut *hook.borrow_mut())(self);
            }
            self.process_events(EventFlags::ALL_EVENTS | EventFlags::CALL_AFTER_SLEEP);
        }
    }

    // ── Timer processing ─────────────────────────────────────────────────────

    fn nearest_timer(&self) -> Option<(u64, u64)> {
        self.timers
            .iter()
            .filter(|t| t.id != DELETED_EVENT_ID)
            .map(|t| (t.when_sec, t.when_ms))
            .min()
    }

    fn process_time_events(&mut self) -> usize {
        // Sweep entries deleted on earlier turns; each finalizer runs
        // exactly once, one turn after the deletion.
        let mut j = 0;
        while j < self.timers.len() {
            if self.timers[j].id == DELETED_EVENT_ID {
                let mut te = self.timers.remove(j);
                if let Some(fin) = te.finalizer.take() {
                    fin(self);
                }
            } else {
                j += 1;
            }
        }

        // A clock that moved backwards would strand every deadline in the
        // future; firing early once beats stalling for hours.
        let (now_sec, _) = now_sec_ms();
        if now_sec < self.last_time {
            warn!("system clock moved backwards, forcing timers to fire");
            for te in &mut self.timers {
                te.when_sec = 0;
                te.when_ms = 0;
            }
        }
        self.last_time = now_sec;

        // Timers created by the callbacks below carry ids past this
        // snapshot and wait for the next turn.
        let max_id = self.next_timer_id - 1;
        let mut processed = 0usize;
        let mut i = 0;
        while i < self.timers.len() {
            {
                let te = &self.timers[i];
                if te.id == DELETED_EVENT_ID || te.id > max_id {
                    i += 1;
                    continue;
                }
                let (sec, ms) = now_sec_ms();
                if sec < te.when_sec || (sec == te.when_sec && ms < te.when_ms) {
                    i += 1;
                    continue;
                }
            }
            let id = self.timers[i].id;
            let mut proc = match self.timers[i].proc.take() {
                Some(p) => p,
                None => {
                    i += 1;
                    continue;
                }
            };
            let ret = proc(self, id);
            processed += 1;

            // The slot is still at `i`: callbacks may append timers or mark
            // deletions, but unlinking only happens in the sweep above.
            let te = &mut self.timers[i];
            if te.id != DELETED_EVENT_ID {
                match ret {
                    Some(next_ms) => {
                        let (s, m) = add_ms(next_ms);
                        te.when_sec = s;
                        te.when_ms = m;
                        te.proc = Some(proc);
                    }
                    None => te.id = DELETED_EVENT_ID,
                }
            }
            i += 1;
        }
        processed
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Pending finalizers still owe their one invocation.
        let mut timers = std::mem::take(&mut self.timers);
        for te in &mut timers {
            if let Some(fin) = te.finalizer.take() {
                fin(self);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot wait
// ─────────────────────────────────────────────────────────────────────────────

/// Waits up to `ms` milliseconds for `fd` to become ready, outside any loop.
/// Returns the readiness that fired (error and hang-up fold into WRITABLE).
pub fn wait_for(fd: RawFd, mask: Mask, ms: i64) -> Result<Mask, EventError> {
    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    if mask.contains(Mask::READABLE) {
        pfd.events |= libc::POLLIN;
    }
    if mask.contains(Mask::WRITABLE) {
        pfd.events |= libc::POLLOUT;
    }
    let n = unsafe { libc::poll(&mut pfd, 1, ms.clamp(-1, libc::c_int::MAX as i64) as libc::c_int) };
    if n == -1 {
        return Err(EventError::Backend(io::Error::last_os_error()));
    }
    let mut ret = Mask::empty();
    if n > 0 {
        if pfd.revents & libc::POLLIN != 0 {
            ret |= Mask::READABLE;
        }
        if pfd.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0 {
            ret |= Mask::WRITABLE;
        }
    }
    Ok(ret)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wall-clock helpers
// ─────────────────────────────────────────────────────────────────────────────

fn now_sec_ms() -> (u64, u64) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs(), d.subsec_millis() as u64),
        Err(_) => (0, 0),
    }
}

fn add_ms(ms: u64) -> (u64, u64) {
    let (sec, cur_ms) = now_sec_ms();
    let total = cur_ms + ms;
    (sec + total / 1000, total % 1000)
}

fn until(when_sec: u64, when_ms: u64) -> Duration {
    let (sec, ms) = now_sec_ms();
    let now = sec * 1000 + ms;
    let when = when_sec * 1000 + when_ms;
    Duration::from_millis(when.saturating_sub(now))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
