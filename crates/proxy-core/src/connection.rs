use mio::{Token, net::TcpStream};
use proxy_config::Route;
use proxy_http::ParsedRequest;

use crate::buffer::Buffer;

/// Per-transaction lifecycle. `Listening` from the original spec has no
/// variant here — the listener is modeled as a tagged dispatcher-level
/// variant (`DispatchTarget::Listener`) rather than a `Connection` value,
/// per the spec's own Design Notes suggestion for languages without stable
/// addresses for statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ReadingRequest,
    /// Transient: set the instant the completion predicate passes, and
    /// overwritten before the handler returns (by `ConnectingBackend` on
    /// success or `Error` on failure). Never observed by the dispatcher.
    RequestComplete,
    ConnectingBackend,
    SendingRequest,
    ReadingResponse,
    /// Backend's read half is closed; bytes may still be buffered.
    BackendEof,
    SendingResponse,
    Error,
    Done,
}

/// Per-transaction state: client socket, backend socket, the three
/// buffers, the parsed request (once available), the matched route, the
/// client's IP, and the lifecycle state.
///
/// Owns its sockets for its entire lifetime: it is responsible for
/// deregistering and closing them exactly once, which the dispatcher does
/// via [`crate::dispatcher::Dispatcher`]'s deferred-destruction path.
pub struct Connection {
    /// Index into the dispatcher's slab. `client_token` and `backend_token`
    /// are independent values minted from the dispatcher's monotonic token
    /// counter and mapped back to this slot via `Dispatcher`'s `targets`
    /// table.
    pub slot: usize,
    pub client: TcpStream,
    pub client_token: Token,
    pub client_ip: String,

    pub backend: Option<TcpStream>,
    pub backend_token: Option<Token>,

    pub request_in: Buffer,
    pub request_rebuilt: Buffer,
    pub response: Buffer,

    pub parsed: Option<ParsedRequest>,
    /// Cloned out of the (immutable, process-lived) route table at match
    /// time. The original borrows the route non-owningly; a slab-indexed
    /// connection can't hold a borrow of a sibling-owned table without
    /// threading a lifetime through every handler signature, so this clones
    /// the small `{prefix, host, port}` triple instead. See DESIGN.md.
    pub route: Option<Route>,

    pub state: State,
    pub should_free: bool,
}

impl Connection {
    pub fn new(slot: usize, client: TcpStream, client_token: Token) -> Self {
        Self {
            slot,
            client,
            client_token,
            client_ip: String::new(),
            backend: None,
            backend_token: None,
            request_in: Buffer::new(),
            request_rebuilt: Buffer::new(),
            response: Buffer::new(),
            parsed: None,
            route: None,
            state: State::ReadingRequest,
            should_free: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Error | State::Done)
    }
}
