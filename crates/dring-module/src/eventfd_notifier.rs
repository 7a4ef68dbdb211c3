//! `EventFdNotifier`: default `Notifier` implementation.
//!
//! The device side writes to an eventfd when a descriptor with `irq_en`
//! completes; the consumer polls or reads the eventfd, then dequeues.
//! Coalescing: several `notify()` calls before the consumer reads
//! produce a single wakeup (eventfd counter semantics).

use dring_core::error::{Result, RingError};
use dring_core::notifier::Notifier;
use nix::errno::Errno;

use std::os::unix::io::RawFd;

pub struct EventFdNotifier {
    fd: RawFd,
    owned: bool, // true if we created the fd (must close on drop)
}

impl EventFdNotifier {
    /// Wrap an existing eventfd. The caller keeps ownership; the fd is
    /// not closed on drop.
    ///
    /// The eventfd should be created with `EFD_NONBLOCK | EFD_CLOEXEC`.
    pub fn new(eventfd: RawFd) -> Self {
        Self { fd: eventfd, owned: false }
    }

    /// Create a new non-blocking eventfd. Closed on drop.
    pub fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(RingError::Os(Errno::last() as i32));
        }
        Ok(Self { fd, owned: true })
    }

    /// Raw descriptor, for the consumer's poll loop.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read and reset the counter. Returns the number of coalesced
    /// notifications, 0 if none were pending.
    pub fn drain(&self) -> Result<u64> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                return Ok(0);
            }
            return Err(RingError::Os(errno as i32));
        }
        Ok(val)
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // Counter would overflow: a wakeup is already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(RingError::Os(errno as i32));
        }
        Ok(())
    }
}

impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        if self.owned && self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_coalesce() {
        let n = EventFdNotifier::create().unwrap();
        assert_eq!(n.drain().unwrap(), 0);
        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert_eq!(n.drain().unwrap(), 3);
        assert_eq!(n.drain().unwrap(), 0);
    }

    #[test]
    fn test_borrowed_fd_not_closed() {
        let owner = EventFdNotifier::create().unwrap();
        {
            let borrowed = EventFdNotifier::new(owner.fd());
            borrowed.notify().unwrap();
        }
        assert_eq!(owner.drain().unwrap(), 1);
    }
}
