use crate::find::{find_bytes, find_bytes_ci};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"content-length:";

/// Returns true once `buf` holds a complete HTTP/1.1 request: the headers
/// are terminated by `\r\n\r\n` and, if `Content-Length` is present, at least
/// that many body bytes follow. Ignores `Transfer-Encoding: chunked` — such
/// requests are accepted headers-only and the body may be truncated; see the
/// HTTP-completion predicate in the repo docs.
///
/// Monotonic: once this returns true for `buf`, it returns true for every
/// buffer formed by appending more bytes to `buf` (the header end and the
/// required body length are both invariant under appending).
pub fn is_request_complete(buf: &[u8]) -> bool {
    let Some(headers_end) = find_bytes(buf, HEADER_TERMINATOR) else {
        return false;
    };
    let h = headers_end + HEADER_TERMINATOR.len();

    match content_length(&buf[..h]) {
        Some(needed) => buf.len() - h >= needed,
        None => true,
    }
}

/// Parses the decimal value of a `Content-Length` header found anywhere in
/// `header_block`, skipping leading whitespace after the colon and stopping
/// at the first non-digit. Returns `None` if no such header is present;
/// an unparsable value (no leading digit) is treated as length zero.
fn content_length(header_block: &[u8]) -> Option<usize> {
    let start = find_bytes_ci(header_block, CONTENT_LENGTH)?;
    let mut rest = &header_block[start + CONTENT_LENGTH.len()..];
    while let Some((b' ' | b'\t', tail)) = rest.split_first() {
        rest = tail;
    }
    let digits_end = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    let digits = &rest[..digits_end];
    if digits.is_empty() {
        return Some(0);
    }
    // A request's Content-Length fits comfortably in a usize on any
    // platform we run on; an absurd value just means "keep waiting".
    std::str::from_utf8(digits).ok()?.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_without_header_terminator() {
        assert!(!is_request_complete(b"GET / HTTP/1.1\r\nHost: x\r\n"));
    }

    #[test]
    fn complete_with_no_body_expected() {
        assert!(is_request_complete(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn waits_for_full_body() {
        let partial = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";
        assert!(!is_request_complete(partial));
        let full = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde";
        assert!(is_request_complete(full));
    }

    #[test]
    fn content_length_is_case_insensitive() {
        let full = b"POST / HTTP/1.1\r\ncontent-LENGTH: 2\r\n\r\nhi";
        assert!(is_request_complete(full));
    }

    #[test]
    fn byte_at_a_time_flips_exactly_once() {
        let full = b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc".to_vec();
        let mut seen_complete_at = None;
        for i in 1..=full.len() {
            if is_request_complete(&full[..i]) {
                seen_complete_at = Some(i);
                break;
            }
        }
        assert_eq!(seen_complete_at, Some(full.len()));
    }

    #[test]
    fn once_complete_stays_complete_on_append() {
        let base = b"GET / HTTP/1.1\r\n\r\n".to_vec();
        assert!(is_request_complete(&base));
        let mut extended = base.clone();
        extended.extend_from_slice(b"extra trailing garbage");
        assert!(is_request_complete(&extended));
    }
}
