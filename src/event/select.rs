//! Portable stateless-scan backend built on `select(2)`.
//!
//! No kernel registration state exists: the backend keeps a plain interest
//! table and rebuilds both descriptor sets by scanning it on every poll.
//! Capacity is bounded by `FD_SETSIZE`.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use super::backend::{Backend, Fired};
use super::Mask;

pub struct SelectBackend {
    masks: Vec<Mask>,
}

impl SelectBackend {
    pub fn new(set_size: usize) -> io::Result<SelectBackend> {
        if set_size > libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "set size exceeds FD_SETSIZE",
            ));
        }
        Ok(SelectBackend {
            masks: vec![Mask::empty(); set_size],
        })
    }
}

impl Backend for SelectBackend {
    fn add(&mut self, fd: RawFd, old: Mask, add: Mask) -> io::Result<()> {
        match self.masks.get_mut(fd as usize) {
            Some(slot) => {
                *slot = old | add;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "descriptor outside the interest table",
            )),
        }
    }

    fn del(&mut self, fd: RawFd, remaining: Mask) {
        if let Some(slot) = self.masks.get_mut(fd as usize) {
            *slot = remaining;
        }
    }

    fn poll(&mut self, timeout: Option<Duration>, fired: &mut Vec<Fired>) -> io::Result<usize> {
        let mut rfds: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut wfds: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut rfds);
            libc::FD_ZERO(&mut wfds);
        }
        let mut max_fd: RawFd = -1;
        for (fd, mask) in self.masks.iter().enumerate() {
            let fd = fd as RawFd;
            if mask.contains(Mask::READABLE) {
                unsafe { libc::FD_SET(fd, &mut rfds) };
                max_fd = max_fd.max(fd);
            }
            if mask.contains(Mask::WRITABLE) {
                unsafe { libc::FD_SET(fd, &mut wfds) };
                max_fd = max_fd.max(fd);
            }
        }

        let mut tv;
        let tvp = match timeout {
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
            None => ptr::null_mut(),
        };

        let n = unsafe { libc::select(max_fd + 1, &mut rfds, &mut wfds, ptr::null_mut(), tvp) };
        fired.clear();
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        if n > 0 {
            for (fd, reg) in self.masks.iter().enumerate() {
                let fd = fd as RawFd;
                let mut mask = Mask::empty();
                if reg.contains(Mask::READABLE) && unsafe { libc::FD_ISSET(fd, &rfds) } {
                    mask |= Mask::READABLE;
                }
                if reg.contains(Mask::WRITABLE) && unsafe { libc::FD_ISSET(fd, &wfds) } {
                    mask |= Mask::WRITABLE;
                }
                if !mask.is_empty() {
                    fired.push(Fired { fd, mask });
                }
            }
        }
        Ok(fired.len())
    }

    fn resize(&mut self, set_size: usize) -> io::Result<()> {
        if set_size > libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "set size exceeds FD_SETSIZE",
            ));
        }
        self.masks.resize(set_size, Mask::empty());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "select"
    }
}
