//! The event-driven I/O core of the reverse proxy: the hybrid buffer, the
//! per-connection state machine, the backend dialer, and the dispatcher
//! that drives it all from a single `mio::Poll`.

mod buffer;
mod connection;
mod dialer;
mod dispatcher;
mod error_responder;
mod handlers;
mod notifier;

pub use buffer::{Buffer, ReadOutcome, WriteOutcome, INLINE_CAP};
pub use connection::{Connection, State};
pub use dialer::{DialError, dial_backend};
pub use dispatcher::{Dispatcher, DispatcherError};
pub use error_responder::send_http_error;
pub use handlers::{
    HandlerResult, on_backend_readable, on_backend_writable, on_client_readable, on_client_writable,
};
pub use notifier::Notifier;
