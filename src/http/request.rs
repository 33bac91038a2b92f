use crate::errors::ErrorKind;
use memchr::memchr2;

/// The request line of an inbound request: `[METHOD] SP [TARGET] SP [VERSION]`.
///
/// Created once per connection from the first line of the inbound text and
/// never mutated afterwards. Tokens are kept verbatim: the method is not
/// checked against a known verb set and the version is not checked for
/// format, so `BREW /pot HTCPCP/1.0` parses just as well as `GET / HTTP/1.1`.
///
/// # Input data requirements
///
/// - The first line ends at the first `\r` or `\n` (or at the end of input).
/// - Leading and trailing whitespace of that line is ignored.
/// - The line must split on whitespace into **exactly** three tokens.
///
/// | First line                 | Result                                |
/// |----------------------------|---------------------------------------|
/// | `GET /foo?x=1 HTTP/1.1`    | `GET`, `/foo?x=1`, `HTTP/1.1`         |
/// | `  GET   /   HTTP/1.0  `   | `GET`, `/`, `HTTP/1.0`                |
/// | `GET`                      | error, 1 token                        |
/// | `GET / HTTP/1.1 extra`     | error, 4 tokens                       |
/// | *(empty input)*            | error, 0 tokens                       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: String,
    path: String,
    version: String,
}

// Public API
impl RequestLine {
    #[inline(always)]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw request target, query string included.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl RequestLine {
    /// Parses the request line out of the full inbound text.
    #[inline]
    pub(crate) fn parse(text: &str) -> Result<Self, ErrorKind> {
        let end = memchr2(b'\r', b'\n', text.as_bytes()).unwrap_or(text.len());
        let mut tokens = text[..end].split_whitespace();

        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(path), Some(version), None) => Ok(Self {
                method: method.to_string(),
                path: path.to_string(),
                version: version.to_string(),
            }),
            (a, b, c, d) => Err(ErrorKind::MalformedRequestLine {
                found: [a, b, c, d].iter().filter(|t| t.is_some()).count() + tokens.count(),
            }),
        }
    }
}

/// Decodes the inbound bytes as UTF-8 text.
#[inline]
pub(crate) fn decode(data: &[u8]) -> Result<&str, ErrorKind> {
    simdutf8::basic::from_utf8(data).map_err(|_| ErrorKind::Decode)
}
