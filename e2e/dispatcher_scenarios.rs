//! E2E Suite: dispatcher scenarios.
//!
//! Full-loop runs against real descriptors:
//! - a one-shot timer fires exactly once and is finalized
//! - a pipe byte travels writer -> reader through one loop run
//! - a barrier registration dispatches only one direction per turn

use std::cell::Cell;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use keel::{EventFlags, EventLoop, Mask};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 1: one-shot timer under a full loop run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_shot_timer_fires_once_and_finalizes() {
    init_logging();
    let mut el = EventLoop::new(64).unwrap();

    let fired = Rc::new(Cell::new(0u32));
    let finalized = Rc::new(Cell::new(0u32));
    let f = fired.clone();
    let fin = finalized.clone();
    el.create_time_event(
        10,
        move |_el, _id| {
            f.set(f.get() + 1);
            None
        },
        Some(Box::new(move |_el| fin.set(fin.get() + 1))),
    );
    // A second timer ends the run well after the first one has fired and
    // been swept.
    el.create_time_event(
        40,
        |el, _id| {
            el.stop();
            None
        },
        None,
    );

    el.run();

    assert_eq!(fired.get(), 1, "one-shot timer must fire exactly once");
    assert_eq!(finalized.get(), 1, "finalizer must run exactly once");
    assert_eq!(el.timer_count(), 0, "timer list must end empty");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 2: pipe echo through one loop run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pipe_byte_travels_through_the_loop() {
    init_logging();
    let (r, w) = nix::unistd::pipe().unwrap();
    let rfd = r.as_raw_fd();
    let wfd = w.as_raw_fd();
    let mut rf = File::from(r);
    let mut wf = Some(File::from(w));

    let mut el = EventLoop::new(64).unwrap();
    let got = Rc::new(Cell::new(0u8));

    // One-shot writer: emit a byte, then drop the registration (and the
    // descriptor with it).
    el.create_file_event(wfd, Mask::WRITABLE, move |el, fd, _mask| {
        if let Some(mut f) = wf.take() {
            f.write_all(b"X").unwrap();
        }
        el.delete_file_event(fd, Mask::WRITABLE);
    })
    .unwrap();

    let g = got.clone();
    el.create_file_event(rfd, Mask::READABLE, move |el, _fd, _mask| {
        let mut buf = [0u8; 1];
        rf.read_exact(&mut buf).unwrap();
        g.set(buf[0]);
        el.stop();
    })
    .unwrap();

    el.run();
    assert_eq!(got.get(), b'X');
    assert_eq!(el.get_file_events(wfd), Mask::empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 3: barrier suppresses one of a simultaneous pair
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn barrier_dispatches_only_one_direction_per_turn() {
    init_logging();
    let (sa, mut sb) = UnixStream::pair().unwrap();
    sb.write_all(b"!").unwrap(); // readable; the send buffer keeps it writable too
    let fd = sa.as_raw_fd();

    let mut el = EventLoop::new(64).unwrap();
    let r_count = Rc::new(Cell::new(0u32));
    let w_count = Rc::new(Cell::new(0u32));

    let rc = r_count.clone();
    el.create_file_event(fd, Mask::READABLE | Mask::BARRIER, move |_el, _fd, _m| {
        rc.set(rc.get() + 1);
    })
    .unwrap();
    let wc = w_count.clone();
    el.create_file_event(fd, Mask::WRITABLE, move |_el, _fd, _m| {
        wc.set(wc.get() + 1);
    })
    .unwrap();

    el.process_events(EventFlags::ALL_EVENTS);
    assert_eq!(
        r_count.get() + w_count.get(),
        1,
        "barrier allows exactly one of the pair per turn"
    );

    // Once the readable side is drained the pair is no longer simultaneous
    // and the writable callback dispatches alone.
    let mut buf = [0u8; 1];
    (&sa).read_exact(&mut buf).unwrap();
    el.process_events(EventFlags::ALL_EVENTS | EventFlags::DONT_WAIT);
    assert_eq!(w_count.get(), 2);
    assert_eq!(r_count.get(), 0);
    drop(sa);
}
