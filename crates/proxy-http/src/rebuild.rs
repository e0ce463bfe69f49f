use thiserror::Error;

use crate::request::ParsedRequest;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("rebuilt request ({needed} bytes) does not fit destination buffer ({available} bytes)")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Rewrites `req` for forwarding to `backend_host:backend_port`, writing the
/// wire-format bytes into `dest` and returning the number of bytes written.
///
/// - The request line is preserved verbatim.
/// - `Host` is replaced with `backend_host:backend_port` (in its original
///   position if present, appended otherwise).
/// - Any existing `Connection` header is dropped; `Connection: close` is
///   always emitted.
/// - `X-Forwarded-For: <client_ip>` is appended after the other headers.
/// - All other headers are preserved in their original order.
/// - The body, if any, is copied verbatim after the blank line.
pub fn rebuild_request(
    req: &ParsedRequest,
    client_ip: &str,
    backend_host: &str,
    backend_port: u16,
    dest: &mut [u8],
) -> Result<usize, RebuildError> {
    let mut cursor = Cursor::new(dest);

    cursor.write_fmt(format_args!("{} {} {}\r\n", req.method, req.path, req.version))?;

    let mut wrote_host = false;
    for (name, value) in &req.headers {
        if name.eq_ignore_ascii_case("host") {
            cursor.write_fmt(format_args!("Host: {backend_host}:{backend_port}\r\n"))?;
            wrote_host = true;
        } else if name.eq_ignore_ascii_case("connection") {
            // Dropped; we always emit our own `Connection: close` below.
        } else {
            cursor.write_fmt(format_args!("{name}: {value}\r\n"))?;
        }
    }
    if !wrote_host {
        cursor.write_fmt(format_args!("Host: {backend_host}:{backend_port}\r\n"))?;
    }

    cursor.write_fmt(format_args!("Connection: close\r\n"))?;
    cursor.write_fmt(format_args!("X-Forwarded-For: {client_ip}\r\n"))?;
    cursor.write_str("\r\n")?;
    cursor.write_bytes(&req.body)?;

    Ok(cursor.written())
}

/// A minimal fallible byte-slice writer. `std::io::Write` would also work,
/// but a destination `&mut [u8]` doesn't implement it, and pulling in
/// `std::io::Cursor` just to get `Write::write_all`'s `UnexpectedEof` (not
/// our `RebuildError`) isn't worth it for three call sites.
struct Cursor<'a> {
    dest: &'a mut [u8],
    len: usize,
}

impl<'a> Cursor<'a> {
    fn new(dest: &'a mut [u8]) -> Self {
        Self { dest, len: 0 }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RebuildError> {
        let end = self.len + bytes.len();
        let Some(slot) = self.dest.get_mut(self.len..end) else {
            return Err(RebuildError::BufferTooSmall { needed: end, available: self.dest.len() });
        };
        slot.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> Result<(), RebuildError> {
        self.write_bytes(s.as_bytes())
    }

    fn write_fmt(&mut self, args: std::fmt::Arguments<'_>) -> Result<(), RebuildError> {
        self.write_str(&args.to_string())
    }

    fn written(&self) -> usize {
        self.len
    }
}
