use std::{io, time::Duration};

use mio::{Events, Interest, Poll, Registry, Token, event::Source};

/// Thin facade over a readiness-based notifier (`mio::Poll`): register,
/// modify, deregister, wait.
///
/// `ERROR` and `PEER_CLOSED` are not separate interest bits here the way
/// the spec's interest set enumerates them: under epoll (which `mio` wraps
/// in level-triggered mode on Linux), `EPOLLERR`/`EPOLLHUP` are reported
/// regardless of the requested interest set. Callers inspect them on the
/// returned `mio::event::Event` via `is_error()` / `is_read_closed()` /
/// `is_write_closed()` instead of arming them up front.
pub struct Notifier {
    poll: Poll,
    events: Events,
}

impl Notifier {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(event_capacity) })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn register(
        &self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn modify(
        &self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister(&self, source: &mut impl Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks (indefinitely if `timeout` is `None`) until at least one
    /// event is ready, then returns the batch.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<&Events> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(&self.events),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
