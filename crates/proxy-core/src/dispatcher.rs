use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    os::fd::AsRawFd,
};

use mio::{Interest, Token, net::TcpListener};
use proxy_config::RouteTable;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    connection::Connection,
    handlers::{HandlerResult, on_backend_readable, on_backend_writable, on_client_readable, on_client_writable},
    notifier::Notifier,
};

/// Maximum number of connections the dispatcher will queue for destruction
/// within a single event batch before falling back to destroying them
/// immediately, per §4.G.
const DEFERRED_DESTROY_CAP: usize = 4096;

/// Token reserved for the listening socket. Connection tokens are assigned
/// from a monotonically increasing counter starting at 1, so this value
/// never collides with one.
const LISTENER_TOKEN: Token = Token(0);

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("failed to bind listening socket on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
    #[error("failed to create event notifier: {0}")]
    Notifier(io::Error),
    #[error("failed to register listening socket: {0}")]
    Register(io::Error),
}

/// Which half of a connection a non-listener token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Backend,
}

/// What a `mio::Token` observed on a `wait()` batch refers to.
///
/// The source models this by storing the connection record's address as
/// notifier user-data and recovering it with a pointer cast. Rust has no
/// stable address for a value living inside a growable `Vec`, so instead
/// every registered fd's token maps, via this table, to a slab slot plus
/// which of that slot's two sockets (client or backend) it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchTarget {
    Listener,
    Connection { slot: usize, role: Role },
}

/// Accept loop + event dispatch + batched deferred cleanup (§4.G).
///
/// Owns the route table, the listening socket, the notifier, and the slab
/// of live connections. Each connection's fds are looked up by `Token` via
/// `targets`, which is kept in lockstep with `slab`: a token is present in
/// `targets` if and only if the slot (and, for a backend token, the
/// backend socket) it names is still live. This is the invariant the
/// source enforces by deregistering before freeing; here it is enforced by
/// removing the token's map entry in the same step that frees the slot.
pub struct Dispatcher {
    listener: TcpListener,
    notifier: Notifier,
    routes: RouteTable,
    slab: Vec<Option<Connection>>,
    free_slots: Vec<usize>,
    targets: HashMap<Token, DispatchTarget>,
    next_token: usize,
}

impl Dispatcher {
    /// Binds a non-blocking listening socket on `addr` with the given
    /// `backlog`, creates the notifier, and registers the listener.
    ///
    /// `std::net::TcpListener::bind` already sets `SO_REUSEADDR` on Unix,
    /// but caps the backlog at a fixed 128; `libc::listen` is called again
    /// on the same fd to raise it to the caller's request, satisfying the
    /// spec's "backlog >= 512" requirement without hand-rolling the
    /// socket/bind dance libc would otherwise require.
    pub fn bind(addr: SocketAddr, backlog: u32, routes: RouteTable) -> Result<Self, DispatcherError> {
        let std_listener = std::net::TcpListener::bind(addr)
            .map_err(|source| DispatcherError::Listen { addr, source })?;
        // SAFETY: `std_listener`'s fd is open and owned by this scope for
        // the duration of the call; `listen` only updates the backlog of
        // an already-listening socket.
        let listen_ret = unsafe { libc::listen(std_listener.as_raw_fd(), backlog as libc::c_int) };
        if listen_ret < 0 {
            return Err(DispatcherError::Listen { addr, source: io::Error::last_os_error() });
        }
        std_listener
            .set_nonblocking(true)
            .map_err(|source| DispatcherError::Listen { addr, source })?;
        let mut listener = TcpListener::from_std(std_listener);

        let notifier = Notifier::new(1024).map_err(DispatcherError::Notifier)?;
        notifier
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(DispatcherError::Register)?;

        info!(%addr, backlog, routes = routes.len(), "listening");
        Ok(Self {
            listener,
            notifier,
            routes,
            slab: Vec::new(),
            free_slots: Vec::new(),
            targets: HashMap::new(),
            next_token: 1,
        })
    }

    /// The address the listening socket was bound to. Mainly useful in
    /// tests that bind to port 0 and need to learn the OS-assigned port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Reserves a slab slot (reusing a freed one if available) and
    /// constructs the connection with `build`, which receives the slot
    /// index that was decided.
    fn allocate_slot(&mut self, build: impl FnOnce(usize) -> Connection) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.slab[slot] = Some(build(slot));
            slot
        } else {
            let slot = self.slab.len();
            self.slab.push(Some(build(slot)));
            slot
        }
    }

    /// Runs the dispatch loop forever. Only returns on a notifier failure;
    /// the caller treats that as a fatal startup/runtime error (spec §7,
    /// "Dispatcher/notifier failure... the main loop breaks; process
    /// exits").
    pub fn run(&mut self) -> io::Result<()> {
        let mut deferred: Vec<usize> = Vec::with_capacity(DEFERRED_DESTROY_CAP.min(256));
        loop {
            // `wait` borrows `self.notifier` mutably; the batch is
            // collected into an owned `Vec` up front so that borrow is
            // released before dispatch, which needs `&mut self` to reach
            // the connection handlers.
            let batch: Vec<(Token, bool, bool)> = self
                .notifier
                .wait(None)?
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();

            deferred.clear();
            for (token, readable, writable) in batch {
                self.dispatch_one(token, readable, writable, &mut deferred);
            }

            for slot in deferred.drain(..) {
                self.destroy(slot);
            }
        }
    }

    fn dispatch_one(
        &mut self,
        token: Token,
        readable: bool,
        writable: bool,
        deferred: &mut Vec<usize>,
    ) {
        let Some(target) = self.targets.get(&token).copied() else {
            debug!(?token, "event for a token with no live target, already torn down this batch");
            return;
        };

        let DispatchTarget::Connection { slot, role } = target else {
            self.accept_loop();
            return;
        };

        let Some(conn) = self.slab[slot].as_mut() else {
            warn!(?token, slot, "token pointed at an empty slab slot");
            return;
        };
        if conn.should_free {
            return;
        }

        // An error/hangup bit (EPOLLERR/EPOLLHUP) always arrives alongside
        // the readable/writable bit for the fd's registered interest; it is
        // not special-cased here, same as the source's dispatch loop, so a
        // failed non-blocking connect still reaches `on_backend_writable`
        // and its `take_error()` check (which is what actually sends the
        // client-visible 502).
        let mut terminated = false;
        if readable {
            let result = match role {
                Role::Client => {
                    let candidate_backend_token = self.next_token();
                    let result = on_client_readable(
                        self.slab[slot].as_mut().unwrap(),
                        &self.routes,
                        &self.notifier,
                        candidate_backend_token,
                    );
                    if self.slab[slot].as_ref().and_then(|c| c.backend_token) == Some(candidate_backend_token) {
                        self.targets.insert(candidate_backend_token, DispatchTarget::Connection { slot, role: Role::Backend });
                    }
                    result
                }
                Role::Backend => on_backend_readable(self.slab[slot].as_mut().unwrap(), &self.notifier),
            };
            terminated = matches!(result, HandlerResult::PeerClosed | HandlerResult::Fatal);
        }
        if !terminated && writable {
            let result = match role {
                Role::Backend => on_backend_writable(self.slab[slot].as_mut().unwrap(), &self.notifier),
                Role::Client => on_client_writable(self.slab[slot].as_mut().unwrap(), &self.notifier),
            };
            terminated = matches!(result, HandlerResult::PeerClosed | HandlerResult::Fatal);
        }
        if terminated {
            self.mark_for_destruction(slot, deferred);
        } else if self.slab[slot].as_ref().is_some_and(Connection::is_terminal) {
            self.mark_for_destruction(slot, deferred);
        }
    }

    fn mark_for_destruction(&mut self, slot: usize, deferred: &mut Vec<usize>) {
        let Some(conn) = self.slab[slot].as_mut() else { return };
        if conn.should_free {
            return;
        }
        conn.should_free = true;
        if deferred.len() >= DEFERRED_DESTROY_CAP {
            warn!(slot, "deferred destruction list full, destroying connection immediately");
            self.destroy(slot);
        } else {
            deferred.push(slot);
        }
    }

    /// Accepts every pending connection on the listener. A single failed
    /// `accept` is logged and does not stop the dispatcher; repeated
    /// non-`WouldBlock` failures (e.g. the process is out of file
    /// descriptors) do stop this inner loop so it can't busy-spin, but the
    /// dispatcher itself keeps running.
    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.accept_one(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn accept_one(&mut self, mut stream: mio::net::TcpStream, peer_addr: SocketAddr) {
        let client_token = self.next_token();
        if let Err(e) = self.notifier.register(
            &mut stream,
            client_token,
            Interest::READABLE,
        ) {
            warn!(error = %e, ?peer_addr, "failed to register accepted client socket");
            return;
        }

        let slot = self.allocate_slot(|slot| Connection::new(slot, stream, client_token));
        self.targets.insert(client_token, DispatchTarget::Connection { slot, role: Role::Client });
        debug!(?peer_addr, slot, "accepted connection");
    }

    /// Destroys a connection: removes its token(s) from `targets`,
    /// deregisters and closes its sockets (dropping `mio::net::TcpStream`
    /// closes the fd), and releases the slab slot for reuse. Parsed
    /// request data and buffers are freed automatically when `Connection`
    /// drops.
    fn destroy(&mut self, slot: usize) {
        let Some(mut conn) = self.slab[slot].take() else { return };
        self.targets.remove(&conn.client_token);
        if let Some(backend_token) = conn.backend_token {
            self.targets.remove(&backend_token);
        }
        if let Err(e) = self.notifier.deregister(&mut conn.client) {
            debug!(error = %e, slot, "client fd deregister failed (already gone)");
        }
        if let Some(mut backend) = conn.backend.take() {
            if let Err(e) = self.notifier.deregister(&mut backend) {
                debug!(error = %e, slot, "backend fd deregister failed (already gone)");
            }
        }
        self.free_slots.push(slot);
    }
}
