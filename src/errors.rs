use std::{error, fmt, io};
use thiserror::Error;

/// Error type returned by [`Application`](crate::Application) implementations.
pub type AppError = Box<dyn error::Error + Send + Sync + 'static>;

/// Everything that can end a connection abnormally.
///
/// None of these are recovered locally: the connection handler hands the error
/// to the server loop, which logs it and closes the stream. Only the variants
/// that have an entry in [`as_http`](ErrorKind::as_http) can ever be answered
/// on the wire, and only when the server is configured to do so.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Inbound bytes are not valid UTF-8.
    #[error("request is not valid UTF-8")]
    Decode,

    /// The first line does not split into exactly three tokens.
    #[error("malformed request line: expected 3 tokens, found {found}")]
    MalformedRequestLine { found: usize },

    /// A second normal-path `start_response` call without an intervening
    /// exception-context call.
    #[error("start_response callback already fired")]
    AlreadyStarted,

    /// A lifecycle event arrived in a state that does not accept it.
    #[error("connection event `{event}` is not valid in state {state:?}")]
    UnexpectedState {
        event: &'static str,
        state: crate::server::connection::ConnState,
    },

    /// The application returned an error instead of a body.
    #[error("application failed: {0}")]
    Application(AppError),

    /// The application panicked while producing the response.
    #[error("application panicked: {message}")]
    ApplicationPanic { message: String },

    /// The request filled the whole read buffer.
    #[error("request does not fit into {limit} bytes")]
    RequestTooLarge { limit: usize },

    /// The admission queue is full.
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    #[error(transparent)]
    Io(#[from] io::Error),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:literal; )*) => {
        /// Canned response for errors that may be answered on the wire.
        pub(crate) const fn as_http(&self) -> Option<&'static [u8]> {
            match self {
                $(Self::$name { .. } => Some(concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ).as_bytes()),)*
                _ => None,
            }
        }
    };
}

impl ErrorKind {
    http_errors! {
        MalformedRequestLine: "400 Bad Request";
        RequestTooLarge: "413 Payload Too Large";
        ServiceUnavailable: "503 Service Unavailable";
    }

    /// `true` for failures of the transport itself rather than of the request.
    #[inline]
    pub(crate) fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<AppError> for ErrorKind {
    fn from(err: AppError) -> Self {
        ErrorKind::Application(err)
    }
}

/// Error information handed to the exception-context `start_response` call.
///
/// Wraps whatever the application caught so that the bridge can log it. The
/// bridge never inspects it beyond its [`Display`](fmt::Display) output.
pub struct ExcInfo<'a>(pub &'a (dyn error::Error + 'static));

impl ExcInfo<'_> {
    /// Renders the error followed by its `source()` chain, one per line.
    pub fn format_chain(&self) -> String {
        let mut out = self.0.to_string();
        let mut source = self.0.source();

        while let Some(err) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }

        out
    }
}

impl fmt::Debug for ExcInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExcInfo").field(&self.0.to_string()).finish()
    }
}

impl<'a, E: error::Error + 'static> From<&'a E> for ExcInfo<'a> {
    fn from(err: &'a E) -> Self {
        ExcInfo(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] io::Error);

    #[test]
    fn as_http() {
        let cases: [(ErrorKind, Option<&str>); 6] = [
            (
                ErrorKind::MalformedRequestLine { found: 1 },
                Some("HTTP/1.0 400 Bad Request\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"),
            ),
            (
                ErrorKind::RequestTooLarge { limit: 8 },
                Some("HTTP/1.0 413 Payload Too Large\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"),
            ),
            (
                ErrorKind::ServiceUnavailable,
                Some("HTTP/1.0 503 Service Unavailable\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"),
            ),
            (ErrorKind::AlreadyStarted, None),
            (ErrorKind::Decode, None),
            (ErrorKind::ApplicationPanic { message: String::new() }, None),
        ];

        for (err, expected) in cases {
            assert_eq!(err.as_http(), expected.map(str::as_bytes));
        }
    }

    #[test]
    fn display() {
        assert_eq!(
            ErrorKind::MalformedRequestLine { found: 1 }.to_string(),
            "malformed request line: expected 3 tokens, found 1"
        );
        assert_eq!(
            ErrorKind::AlreadyStarted.to_string(),
            "start_response callback already fired"
        );
        assert_eq!(
            ErrorKind::ApplicationPanic { message: "boom".into() }.to_string(),
            "application panicked: boom"
        );
    }

    #[test]
    fn format_chain() {
        let err = Outer(io::Error::new(io::ErrorKind::Other, "inner"));
        assert_eq!(ExcInfo::from(&err).format_chain(), "outer\ncaused by: inner");
    }
}
