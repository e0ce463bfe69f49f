use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::TcpStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("could not resolve {host} to an IPv4 address")]
    Resolve { host: String },
    #[error("failed to dial {host}:{port}: {source}")]
    Connect { host: String, port: u16, source: std::io::Error },
}

/// Resolves `host` (a bare hostname, or `host:port` with the port portion
/// ignored — the route's port is authoritative) to one IPv4 address and
/// initiates a non-blocking TCP connect to `port`.
///
/// `mio::net::TcpStream::connect` already does the non-blocking
/// socket-create-then-connect dance the spec's dialer describes: it
/// creates a `SOCK_STREAM` socket, sets it non-blocking, calls `connect`,
/// and surfaces anything other than `EINPROGRESS` as an `Err` (dropping the
/// socket). The caller registers the returned stream with `WRITABLE`
/// interest to detect connect completion, exactly per the spec.
pub fn dial_backend(host: &str, port: u16) -> Result<TcpStream, DialError> {
    let hostname = host.split(':').next().unwrap_or(host);
    let addr = resolve_ipv4(hostname, port)?;
    TcpStream::connect(addr)
        .map_err(|source| DialError::Connect { host: hostname.to_owned(), port, source })
}

fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, DialError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| DialError::Resolve { host: host.to_owned() })?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| DialError::Resolve { host: host.to_owned() })
}
