use std::net::SocketAddr;

use mio::{Interest, Token};
use proxy_config::RouteTable;
use proxy_http::{is_request_complete, parse_request, rebuild_request};
use proxy_utils::safe_assert;
use tracing::{debug, warn};

use crate::{
    buffer::{ReadOutcome, WriteOutcome},
    connection::{Connection, State},
    dialer::dial_backend,
    error_responder::send_http_error,
    notifier::Notifier,
};

/// Outcome of a single handler invocation. `PeerClosed` and `Fatal` both
/// mark the connection for deferred destruction; `Ok` with a terminal state
/// does too (the dispatcher checks `Connection::is_terminal` after every
/// call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    Ok,
    PeerClosed,
    Fatal,
}

/// At least 4 KiB is reserved for the rebuilt request before the rebuilder
/// writes into it.
const REBUILD_BUF_RESERVE: usize = 4096;

/// `backend_token` is allocated by the caller (the dispatcher owns the
/// token counter and the token→slot map) and is only actually registered
/// with `notifier` if this call reaches the point of dialing a backend;
/// the caller is responsible for noticing `conn.backend_token` went from
/// `None` to `Some` and recording the mapping.
pub fn on_client_readable(
    conn: &mut Connection,
    routes: &RouteTable,
    notifier: &Notifier,
    backend_token: Token,
) -> HandlerResult {
    match conn.request_in.read_from_fd(&mut conn.client) {
        ReadOutcome::Eof => return HandlerResult::PeerClosed,
        ReadOutcome::Error => {
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        ReadOutcome::Read(0) => return HandlerResult::Ok,
        ReadOutcome::Read(_) => {}
    }

    if !is_request_complete(conn.request_in.readable()) {
        debug!(fd = ?conn.client_token, "waiting for more request bytes");
        return HandlerResult::Ok;
    }
    conn.state = State::RequestComplete;

    let parsed = match parse_request(conn.request_in.readable()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "failed to parse client request");
            send_http_error(&mut conn.client, 400, "Bad Request");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
    };

    let Some(route) = routes.find(&parsed.path).cloned() else {
        warn!(path = %parsed.path, "no route matches request path");
        send_http_error(&mut conn.client, 502, "Bad Gateway");
        conn.state = State::Error;
        return HandlerResult::Fatal;
    };

    conn.client_ip = client_ip(&conn.client);
    let client_ip = conn.client_ip.clone();
    let backend_host = route.host.clone();
    let backend_port = route.port;

    let rebuild_result = conn.request_rebuilt.write_with(REBUILD_BUF_RESERVE, |dest| {
        rebuild_request(&parsed, &client_ip, &backend_host, backend_port, dest)
    });
    if let Err(e) = rebuild_result {
        warn!(error = %e, "failed to rebuild request for backend");
        send_http_error(&mut conn.client, 500, "Internal Server Error");
        conn.state = State::Error;
        return HandlerResult::Fatal;
    }

    conn.parsed = Some(parsed);

    let mut backend = match dial_backend(&route.host, route.port) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(host = %route.host, port = route.port, error = %e, "failed to dial backend");
            send_http_error(&mut conn.client, 502, "Bad Gateway");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
    };

    if let Err(e) = notifier.register(
        &mut backend,
        backend_token,
        Interest::WRITABLE,
    ) {
        warn!(error = %e, "failed to register backend fd with notifier");
        send_http_error(&mut conn.client, 502, "Bad Gateway");
        conn.state = State::Error;
        return HandlerResult::Fatal;
    }

    conn.route = Some(route);
    conn.backend = Some(backend);
    conn.backend_token = Some(backend_token);
    conn.state = State::ConnectingBackend;
    HandlerResult::Ok
}

fn client_ip(client: &mio::net::TcpStream) -> String {
    match client.peer_addr() {
        Ok(SocketAddr::V4(addr)) => addr.ip().to_string(),
        Ok(SocketAddr::V6(addr)) => addr.ip().to_string(),
        Err(e) => {
            warn!(error = %e, "could not read client peer address");
            String::from("0.0.0.0")
        }
    }
}

pub fn on_backend_writable(conn: &mut Connection, notifier: &Notifier) -> HandlerResult {
    if conn.state == State::ConnectingBackend {
        let backend = conn.backend.as_ref().expect("connecting without a backend socket");
        match backend.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                warn!(error = %e, "backend connect failed");
                conn.state = State::Error;
                return HandlerResult::Fatal;
            }
        }
        conn.state = State::SendingRequest;
    }

    if conn.state != State::SendingRequest {
        return HandlerResult::Ok;
    }

    let backend = conn.backend.as_mut().expect("sending request without a backend socket");
    match conn.request_rebuilt.write_to_fd(backend) {
        WriteOutcome::Error => {
            warn!("failed to forward request to backend");
            send_http_error(&mut conn.client, 502, "Bad Gateway");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        WriteOutcome::Eof => return HandlerResult::PeerClosed,
        WriteOutcome::Wrote(_) => {}
    }

    if conn.request_rebuilt.readable_len() == 0 {
        let backend_token = conn.backend_token.expect("backend socket without a token");
        if let Err(e) = notifier.modify(backend, backend_token, Interest::READABLE) {
            warn!(error = %e, "failed to rearm backend fd for reading");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        conn.state = State::ReadingResponse;
    }
    HandlerResult::Ok
}

pub fn on_backend_readable(conn: &mut Connection, notifier: &Notifier) -> HandlerResult {
    if conn.state != State::ReadingResponse {
        return HandlerResult::Ok;
    }

    let backend = conn.backend.as_mut().expect("reading response without a backend socket");
    match conn.response.read_from_fd(backend) {
        ReadOutcome::Error => {
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        ReadOutcome::Eof => {
            conn.state = State::BackendEof;
            if let Err(e) = notifier.deregister(conn.backend.as_mut().unwrap()) {
                warn!(error = %e, "failed to deregister backend fd after EOF");
            }
        }
        ReadOutcome::Read(_) => {}
    }

    if conn.response.readable_len() == 0 {
        return if conn.state == State::BackendEof { HandlerResult::PeerClosed } else { HandlerResult::Ok };
    }

    match conn.response.write_to_fd(&mut conn.client) {
        WriteOutcome::Error => {
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        WriteOutcome::Eof => return HandlerResult::PeerClosed,
        WriteOutcome::Wrote(_) => {}
    }

    if conn.response.readable_len() == 0 {
        if conn.state == State::BackendEof {
            return HandlerResult::PeerClosed;
        }
        conn.state = State::ReadingResponse;
    } else {
        conn.state = State::SendingResponse;
        if let Err(e) = notifier.modify(&mut conn.client, conn.client_token, Interest::WRITABLE) {
            warn!(error = %e, "failed to arm client fd for writing");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
    }
    HandlerResult::Ok
}

pub fn on_client_writable(conn: &mut Connection, notifier: &Notifier) -> HandlerResult {
    if conn.state != State::SendingResponse {
        return HandlerResult::Ok;
    }

    match conn.response.write_to_fd(&mut conn.client) {
        WriteOutcome::Error => {
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
        WriteOutcome::Eof => return HandlerResult::PeerClosed,
        WriteOutcome::Wrote(_) => {}
    }

    if conn.response.readable_len() != 0 {
        return HandlerResult::Ok;
    }

    if conn.state == State::BackendEof {
        return HandlerResult::PeerClosed;
    }

    safe_assert!(conn.backend.is_some(), "reading response with no backend socket");
    conn.state = State::ReadingResponse;
    if let (Some(backend), Some(backend_token)) = (conn.backend.as_mut(), conn.backend_token) {
        if let Err(e) = notifier.modify(backend, backend_token, Interest::READABLE) {
            warn!(error = %e, "failed to rearm backend fd for reading");
            conn.state = State::Error;
            return HandlerResult::Fatal;
        }
    }
    // Drop the client fd's WRITABLE interest now that the buffered response
    // has fully drained; otherwise it stays writable-armed and every poll
    // re-invokes this handler as a no-op until the backend produces more.
    if let Err(e) = notifier.modify(&mut conn.client, conn.client_token, Interest::READABLE) {
        warn!(error = %e, "failed to strip writable interest from client fd");
        conn.state = State::Error;
        return HandlerResult::Fatal;
    }
    HandlerResult::Ok
}
