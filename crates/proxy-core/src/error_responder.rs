use std::io::{self, Write};

use mio::net::TcpStream;
use tracing::{debug, error, warn};

/// Largest error response this responder will ever format. Exceeding it is
/// a programming error (reason strings here are all short, static
/// messages), not a runtime condition — overflow is logged, not sent.
const RESPONSE_BUF_SIZE: usize = 512;

/// Synthesizes and writes a minimal HTTP error response to the client,
/// using a short bounded stack buffer and a best-effort blocking-style send
/// loop (`EINTR` retried locally; anything else, including the socket not
/// being ready yet, is logged and abandoned rather than queued — by the
/// time this runs the proxy has nothing else to say to this client).
pub fn send_http_error(stream: &mut TcpStream, status: u16, reason: &str) {
    let mut formatted = [0u8; RESPONSE_BUF_SIZE];
    let mut cursor = io::Cursor::new(&mut formatted[..]);
    let written = write!(
        cursor,
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {reason}",
        len = reason.len(),
    );
    let Ok(()) = written else {
        error!(status, reason, "error response overflowed the stack buffer, not sent");
        return;
    };
    let len = cursor.position() as usize;

    let mut sent = 0usize;
    while sent < len {
        match stream.write(&formatted[sent..len]) {
            Ok(0) => {
                error!(status, "send returned 0 writing error response, client gone");
                return;
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                ) =>
            {
                debug!(status, %e, "client disconnected before error response was sent");
                return;
            }
            Err(e) => {
                warn!(status, %e, "failed to send error response");
                return;
            }
        }
    }
}
