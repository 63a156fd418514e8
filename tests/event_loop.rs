// Integration tests for the event dispatcher.
//
// Coverage:
//   - expired timers all fire in one turn, and never twice
//   - a rearming timer respects its requested interval
//   - deleted timers run their finalizer exactly once, on the following turn
//   - a readable callback that unregisters its own descriptor suppresses the
//     paired writable dispatch in the same turn
//   - one closure registered for both directions is invoked once per turn
//   - registration surface: masks, maxfd bookkeeping, resize rules
//   - the one-shot wait helper and the select fallback backend

use std::cell::Cell;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use keel::event::select::SelectBackend;
use keel::{wait_for, EventError, EventFlags, EventLoop, Mask};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let c = Rc::new(Cell::new(0u32));
    (c.clone(), c)
}

// ─────────────────────────────────────────────────────────────────────────────
// Timers: same-turn firing and non-repetition
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn expired_timers_fire_together_and_only_once() {
    init_logging();
    let mut el = EventLoop::new(16).unwrap();
    let (a, a2) = counter();
    let (b, b2) = counter();
    let (c, c2) = counter();
    el.create_time_event(0, move |_el, _id| { a2.set(a2.get() + 1); None }, None);
    el.create_time_event(0, move |_el, _id| { b2.set(b2.get() + 1); None }, None);
    el.create_time_event(0, move |_el, _id| { c2.set(c2.get() + 1); None }, None);

    std::thread::sleep(Duration::from_millis(5));
    el.process_events(EventFlags::TIME_EVENTS);
    assert_eq!((a.get(), b.get(), c.get()), (1, 1, 1));

    // All three returned "no more": nothing fires on later turns.
    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!((a.get(), b.get(), c.get()), (1, 1, 1));
    assert_eq!(el.timer_count(), 0);
}

#[test]
fn rearming_timer_waits_its_interval() {
    init_logging();
    let mut el = EventLoop::new(16).unwrap();
    let (fired, f) = counter();
    el.create_time_event(
        0,
        move |_el, _id| {
            f.set(f.get() + 1);
            Some(60)
        },
        None,
    );

    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(fired.get(), 1);

    // Rearmed 60ms out: an immediate turn must not fire it again.
    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(fired.get(), 1);

    std::thread::sleep(Duration::from_millis(80));
    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(fired.get(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Timers: deferred deletion and finalizers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn timer_deleted_from_another_callback_finalizes_next_turn() {
    init_logging();
    let mut el = EventLoop::new(16).unwrap();
    let (finalized, fin) = counter();

    let victim = el.create_time_event(
        3_600_000,
        |_el, _id| None,
        Some(Box::new(move |_el| fin.set(fin.get() + 1))),
    );
    el.create_time_event(
        0,
        move |el, _id| {
            el.delete_time_event(victim).unwrap();
            None
        },
        None,
    );

    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(finalized.get(), 0, "finalizer must wait for the next turn");

    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(finalized.get(), 1);

    el.process_events(EventFlags::TIME_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(finalized.get(), 1, "finalizer must run exactly once");
}

#[test]
fn dropping_the_loop_runs_pending_finalizers() {
    init_logging();
    let (finalized, fin) = counter();
    {
        let mut el = EventLoop::new(8).unwrap();
        el.create_time_event(
            3_600_000,
            |_el, _id| None,
            Some(Box::new(move |_el| fin.set(fin.get() + 1))),
        );
    }
    assert_eq!(finalized.get(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// File events: self-unregistration and shared closures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn self_unregistering_readable_suppresses_paired_writable() {
    init_logging();
    let (sa, mut sb) = UnixStream::pair().unwrap();
    sb.write_all(b"!").unwrap(); // make sa readable; its buffer is empty so it is also writable
    let fd = sa.as_raw_fd();

    let mut el = EventLoop::new(64).unwrap();
    let (r_count, rc) = counter();
    let (w_count, wc) = counter();

    el.create_file_event(fd, Mask::READABLE, move |el, fd, _mask| {
        rc.set(rc.get() + 1);
        el.delete_file_event(fd, Mask::READABLE | Mask::WRITABLE);
    })
    .unwrap();
    el.create_file_event(fd, Mask::WRITABLE, move |_el, _fd, _mask| {
        wc.set(wc.get() + 1);
    })
    .unwrap();

    el.process_events(EventFlags::ALL_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(r_count.get(), 1);
    assert_eq!(w_count.get(), 0, "writable must not fire after self-delete");
    assert_eq!(el.get_file_events(fd), Mask::empty());
    drop(sa);
}

#[test]
fn shared_closure_for_both_directions_runs_once_per_turn() {
    init_logging();
    let (sa, mut sb) = UnixStream::pair().unwrap();
    sb.write_all(b"!").unwrap();
    let fd = sa.as_raw_fd();

    let mut el = EventLoop::new(64).unwrap();
    let (calls, cc) = counter();
    el.create_file_event(fd, Mask::READABLE | Mask::WRITABLE, move |_el, _fd, _m| {
        cc.set(cc.get() + 1);
    })
    .unwrap();

    el.process_events(EventFlags::ALL_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(calls.get(), 1, "one closure, one dispatch per turn");
    drop(sa);
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration surface
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn masks_merge_and_maxfd_tracks_registrations() {
    init_logging();
    let (r, w) = nix::unistd::pipe().unwrap();
    let (rfd, wfd) = (r.as_raw_fd(), w.as_raw_fd());
    let mut el = EventLoop::new(64).unwrap();

    el.create_file_event(rfd, Mask::READABLE, |_el, _fd, _m| {}).unwrap();
    el.create_file_event(wfd, Mask::WRITABLE, |_el, _fd, _m| {}).unwrap();
    assert_eq!(el.get_file_events(rfd), Mask::READABLE);
    assert_eq!(el.get_file_events(wfd), Mask::WRITABLE);

    // Merging a second interest into an existing registration.
    el.create_file_event(rfd, Mask::WRITABLE, |_el, _fd, _m| {}).unwrap();
    assert_eq!(el.get_file_events(rfd), Mask::READABLE | Mask::WRITABLE);

    el.delete_file_event(rfd, Mask::WRITABLE);
    assert_eq!(el.get_file_events(rfd), Mask::READABLE);

    el.delete_file_event(rfd, Mask::READABLE);
    el.delete_file_event(wfd, Mask::WRITABLE);
    assert_eq!(el.get_file_events(rfd), Mask::empty());
}

#[test]
fn resize_is_refused_below_a_live_registration() {
    init_logging();
    let (r, _w) = nix::unistd::pipe().unwrap();
    let rfd = r.as_raw_fd();
    let mut el = EventLoop::new(64).unwrap();
    el.create_file_event(rfd, Mask::READABLE, |_el, _fd, _m| {}).unwrap();

    let err = el.resize_set_size(rfd as usize).unwrap_err();
    assert!(matches!(err, EventError::ResizeDenied { .. }));
    assert_eq!(el.set_size(), 64, "refused resize must change nothing");

    el.resize_set_size(128).unwrap();
    assert_eq!(el.set_size(), 128);

    el.delete_file_event(rfd, Mask::READABLE);
    el.resize_set_size(1).unwrap();
    assert_eq!(el.set_size(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot wait and the select fallback
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn wait_for_reports_pipe_readiness() {
    init_logging();
    let (r, w) = nix::unistd::pipe().unwrap();
    let rfd = r.as_raw_fd();
    let mut wf = File::from(w);

    // Nothing to read yet.
    let got = wait_for(rfd, Mask::READABLE, 0).unwrap();
    assert_eq!(got, Mask::empty());

    // The write side of a fresh pipe is writable at once.
    let got = wait_for(wf.as_raw_fd(), Mask::WRITABLE, 100).unwrap();
    assert_eq!(got, Mask::WRITABLE);

    wf.write_all(b"x").unwrap();
    let got = wait_for(rfd, Mask::READABLE, 100).unwrap();
    assert_eq!(got, Mask::READABLE);
}

#[test]
fn select_backend_delivers_pipe_events() {
    init_logging();
    let (r, w) = nix::unistd::pipe().unwrap();
    let rfd = r.as_raw_fd();
    let mut rf = File::from(r);
    let mut wf = File::from(w);

    let backend = SelectBackend::new(64).unwrap();
    let mut el = EventLoop::with_backend(64, Box::new(backend));
    assert_eq!(el.api_name(), "select");

    wf.write_all(b"s").unwrap();
    let (got, gc) = counter();
    el.create_file_event(rfd, Mask::READABLE, move |_el, _fd, _m| {
        gc.set(gc.get() + 1);
    })
    .unwrap();

    let n = el.process_events(EventFlags::ALL_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(n, 1);
    assert_eq!(got.get(), 1);

    let mut buf = [0u8; 1];
    rf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"s");
}
