/// Byte-exact substring search. `memchr`-free since the needles here are
/// always tiny (4 bytes or a header name) and called on buffers that are at
/// most a few KiB.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Case-insensitive ASCII substring search, used to locate header names
/// regardless of how a client or backend capitalizes them.
pub(crate) fn find_bytes_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window.eq_ignore_ascii_case(needle))
}
