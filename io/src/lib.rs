//! Types and traits for suspendable io operations.
//!
//! An operation that would block on a socket does not block here. It returns
//! [`Step::Pending`] carrying a [`PollRequest`]: the file descriptor and the
//! readiness interest the operation is waiting for. The caller decides how to
//! wait (a `select`/`epoll` loop over many connections, or the built in
//! blocking driver of [`Operation::wait`]) and resumes the operation once the
//! descriptor is ready.

use std::{io, os::fd::RawFd, time::Duration};

use mio::{Events, Poll, Token, unix::SourceFd};

pub mod net;

// re-export of the readiness interest type.
pub use mio::Interest;

/// Readiness requirement of a suspended io operation.
///
/// The operation that emitted this value can continue without blocking once
/// the file descriptor is ready for the io types in the interest mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    fd: RawFd,
    interest: Interest,
}

impl PollRequest {
    #[inline]
    pub const fn new(fd: RawFd, interest: Interest) -> Self {
        Self { fd, interest }
    }

    /// File descriptor the suspended operation depends on.
    #[inline]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// Readiness interest the suspended operation waits for.
    #[inline]
    pub const fn interest(&self) -> Interest {
        self.interest
    }

    /// Block until the file descriptor is ready for the requested io.
    ///
    /// Convenience wait used by [`Operation::wait`]. With a timeout it returns
    /// `Ok(false)` when the timeout elapsed before the descriptor became
    /// ready.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(4);
        poll.registry()
            .register(&mut SourceFd(&self.fd), Token(0), self.interest)?;
        loop {
            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if events.is_empty() {
                // woke up with nothing to report. with a deadline that is the
                // timeout expiring. without one poll again.
                if timeout.is_some() {
                    return Ok(false);
                }
                continue;
            }
            return Ok(true);
        }
    }
}

/// Outcome of driving a suspendable operation by one step.
#[derive(Debug)]
pub enum Step<T> {
    /// operation finished with its terminal value.
    Ready(T),
    /// operation would block. resume after the readiness requirement is met.
    Pending(PollRequest),
}

impl<T> Step<T> {
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn map<U, F>(self, f: F) -> Step<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Ready(value) => Step::Ready(f(value)),
            Self::Pending(req) => Step::Pending(req),
        }
    }
}

/// A resumable io operation.
///
/// `step` makes as much progress as possible without blocking and either
/// finishes, fails, or suspends with a [`PollRequest`]. A suspended operation
/// must be resumed by calling `step` again once the requested readiness holds.
/// Abandoning an operation midway leaves the underlying connection in an
/// indeterminate state.
pub trait Operation {
    type Output;
    type Error: From<io::Error>;

    fn step(&mut self) -> Result<Step<Self::Output>, Self::Error>;

    /// Drive the operation to completion, blocking on every emitted
    /// [`PollRequest`].
    fn wait(&mut self) -> Result<Self::Output, Self::Error> {
        loop {
            match self.step()? {
                Step::Ready(value) => return Ok(value),
                Step::Pending(req) => {
                    req.wait(None)?;
                }
            }
        }
    }

    /// Like [`Operation::wait`] with a per suspension timeout. Returns
    /// `Ok(None)` when a single readiness wait exceeds the timeout; the
    /// operation stays resumable.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<Self::Output>, Self::Error> {
        loop {
            match self.step()? {
                Step::Ready(value) => return Ok(Some(value)),
                Step::Pending(req) => {
                    if !req.wait(Some(timeout))? {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::Write,
        os::{fd::AsRawFd, unix::net::UnixStream},
    };

    use super::*;

    #[test]
    fn wait_for_readable() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let req = PollRequest::new(rx.as_raw_fd(), Interest::READABLE);
        assert!(!req.wait(Some(Duration::from_millis(50))).unwrap());

        tx.write_all(b"x").unwrap();
        assert!(req.wait(Some(Duration::from_secs(5))).unwrap());
    }

    #[test]
    fn writable_socket_is_ready_at_once() {
        let (tx, _rx) = UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();

        let req = PollRequest::new(tx.as_raw_fd(), Interest::WRITABLE);
        assert!(req.wait(Some(Duration::from_secs(5))).unwrap());
    }

    #[test]
    fn step_map() {
        let step = Step::Ready(21).map(|n| n * 2);
        assert!(matches!(step, Step::Ready(42)));

        let req = PollRequest::new(0, Interest::READABLE);
        assert!(Step::<()>::Pending(req).map(|_| 0).is_pending());
    }

    #[test]
    fn operation_wait_drives_to_completion() {
        struct CountDown(u32, RawFd);

        impl Operation for CountDown {
            type Output = u32;
            type Error = io::Error;

            fn step(&mut self) -> Result<Step<u32>, io::Error> {
                if self.0 == 0 {
                    Ok(Step::Ready(42))
                } else {
                    self.0 -= 1;
                    Ok(Step::Pending(PollRequest::new(self.1, Interest::WRITABLE)))
                }
            }
        }

        let (tx, _rx) = UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();

        let mut op = CountDown(3, tx.as_raw_fd());
        assert_eq!(op.wait().unwrap(), 42);
    }
}
