use thiserror::Error;

use crate::find::find_bytes;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A fully parsed HTTP/1.1 request. Headers retain their original order and
/// casing so the rebuilder can emit them unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request is missing the header terminator")]
    MissingHeaderTerminator,
    #[error("headers are not valid UTF-8")]
    InvalidHeaderEncoding,
    #[error("request line is missing")]
    MissingRequestLine,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),
}

impl ParsedRequest {
    /// Looks up a header by case-insensitive name, returning the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Parses a complete raw HTTP/1.1 request. Callers are expected to have
/// already established completeness via [`crate::is_request_complete`];
/// this function does not itself wait for more bytes.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest, ParseError> {
    let headers_end = find_bytes(buf, HEADER_TERMINATOR).ok_or(ParseError::MissingHeaderTerminator)?;
    let head = std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidHeaderEncoding)?;
    let body = buf[headers_end + HEADER_TERMINATOR.len()..].to_vec();

    let mut lines = head.split("\r\n");
    let request_line = lines.next().filter(|l| !l.is_empty()).ok_or(ParseError::MissingRequestLine)?;

    let mut parts = request_line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::MalformedRequestLine(request_line.to_owned()));
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let colon = line.find(':').ok_or_else(|| ParseError::MalformedHeaderLine(line.to_owned()))?;
        let key = &line[..colon];
        let value = line[colon + 1..].trim_start_matches([' ', '\t']);
        headers.push((key.to_owned(), value.to_owned()));
    }

    Ok(ParsedRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        version: version.to_owned(),
        headers,
        body,
    })
}
