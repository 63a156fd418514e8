//! Level-triggered epoll backend (Linux).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::debug;

use super::backend::{Backend, Fired};
use super::Mask;

pub struct EpollBackend {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new(set_size: usize) -> io::Result<EpollBackend> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollBackend {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; set_size.max(1)],
        })
    }
}

fn interest_bits(mask: Mask) -> u32 {
    let mut bits = 0u32;
    if mask.contains(Mask::READABLE) {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.contains(Mask::WRITABLE) {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

impl Backend for EpollBackend {
    fn add(&mut self, fd: RawFd, old: Mask, add: Mask) -> io::Result<()> {
        // A descriptor we already watch needs a MOD, a fresh one an ADD; the
        // new interest is the union of old and requested bits.
        let op = if old.intersects(Mask::READABLE | Mask::WRITABLE) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let mut ev = libc::epoll_event {
            events: interest_bits(old | add),
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn del(&mut self, fd: RawFd, remaining: Mask) {
        let bits = interest_bits(remaining);
        let mut ev = libc::epoll_event {
            events: bits,
            u64: fd as u64,
        };
        let op = if bits != 0 {
            libc::EPOLL_CTL_MOD
        } else {
            // Old kernels insist on a non-null event pointer even for DEL.
            libc::EPOLL_CTL_DEL
        };
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) } == -1 {
            debug!(
                "epoll_ctl del fd {fd} failed: {}",
                io::Error::last_os_error()
            );
        }
    }

    fn poll(&mut self, timeout: Option<Duration>, fired: &mut Vec<Fired>) -> io::Result<usize> {
        let timeout_ms: libc::c_int = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        fired.clear();
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for i in 0..n as usize {
            let ev = self.events[i];
            let mut mask = Mask::empty();
            if ev.events & libc::EPOLLIN as u32 != 0 {
                mask |= Mask::READABLE;
            }
            if ev.events & libc::EPOLLOUT as u32 != 0 {
                mask |= Mask::WRITABLE;
            }
            if ev.events & libc::EPOLLERR as u32 != 0 {
                mask |= Mask::WRITABLE;
            }
            if ev.events & libc::EPOLLHUP as u32 != 0 {
                mask |= Mask::WRITABLE;
            }
            fired.push(Fired {
                fd: ev.u64 as RawFd,
                mask,
            });
        }
        Ok(n as usize)
    }

    fn resize(&mut self, set_size: usize) -> io::Result<()> {
        self.events
            .resize(set_size.max(1), libc::epoll_event { events: 0, u64: 0 });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
