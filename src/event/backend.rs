//! The readiness-multiplexer capability set behind the event loop.
//!
//! A backend owns whatever kernel or user-space state its mechanism needs
//! and exposes add/del/poll/resize.  The loop passes the previous interest
//! mask into [`Backend::add`] and the residual mask into [`Backend::del`],
//! so backends never reach back into loop state.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::Mask;

/// One descriptor reported ready by a poll, with the readiness that fired.
#[derive(Debug, Clone, Copy)]
pub struct Fired {
    pub fd: RawFd,
    pub mask: Mask,
}

/// A readiness multiplexer.
pub trait Backend {
    /// Starts or extends interest in `fd`.  `old` is the interest registered
    /// so far (empty for a fresh descriptor); `add` is the new bits.
    fn add(&mut self, fd: RawFd, old: Mask, add: Mask) -> io::Result<()>;

    /// Reduces interest in `fd` to `remaining`; an empty `remaining` drops
    /// the descriptor entirely.  Failures during teardown are logged, not
    /// surfaced.
    fn del(&mut self, fd: RawFd, remaining: Mask);

    /// Blocks up to `timeout` (`None` blocks indefinitely, zero returns at
    /// once) and fills `fired` with the descriptors that became ready.
    /// Error and hang-up conditions are folded into WRITABLE so one code
    /// path handles disconnect cleanup.
    fn poll(&mut self, timeout: Option<Duration>, fired: &mut Vec<Fired>) -> io::Result<usize>;

    /// Adjusts internal buffers for a new descriptor-table capacity.
    fn resize(&mut self, set_size: usize) -> io::Result<()>;

    fn name(&self) -> &'static str;
}

/// The preferred backend for this platform: the level-triggered kernel
/// poller where one exists, the stateless scan poller elsewhere.
pub fn default_backend(set_size: usize) -> io::Result<Box<dyn Backend>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(super::epoll::EpollBackend::new(set_size)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Box::new(super::select::SelectBackend::new(set_size)?))
    }
}
