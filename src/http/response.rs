//! The `start_response` side of the gateway contract.

use crate::{errors::{ErrorKind, ExcInfo}, http::types::Header};
use std::time::SystemTime;
use tracing::warn;

/// Response collector handed to [`Application::call`](crate::Application::call).
///
/// The application declares the status and headers of its response by calling
/// [`start_response`](StartResponse::start_response), then returns the body.
/// Nothing is written to the connection before the application returns, so
/// the declared status and headers may still be replaced after an error by a
/// call carrying exception context.
///
/// # Calling contract
///
/// | Previous state | Call                   | Result                      |
/// |----------------|------------------------|-----------------------------|
/// | unset          | `exc_info = None`      | stored, finalized           |
/// | finalized      | `exc_info = None`      | [`ErrorKind::AlreadyStarted`] |
/// | overridden     | `exc_info = None`      | stored, finalized           |
/// | any            | `exc_info = Some(..)`  | stored, overridden          |
///
/// A rejected call is remembered: the connection fails before any byte is
/// written, even if the application ignores the returned error.
///
/// Every stored header list starts with two bridge-owned headers, `Date` and
/// `Server`, followed by the application headers in the order given. Names
/// and values are written verbatim, without validation.
///
/// # Examples
/// ```
/// use gateway_bridge::{AppError, Environ, StartResponse, StatusCode};
///
/// fn app(_: &mut Environ, start_response: &mut StartResponse) -> Result<Vec<&'static str>, AppError> {
///     start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;
///     Ok(vec!["Hello ", "world!"])
/// }
/// ```
#[derive(Debug)]
pub struct StartResponse {
    version: String,
    server: String,
    status: String,
    headers: Vec<Header>,
    state: ResponseState,
    violated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseState {
    Unset,
    Finalized,
    Overridden,
}

impl StartResponse {
    /// `version` is echoed on the status line, `server` is the value of the
    /// bridge-owned `Server` header.
    #[inline]
    pub(crate) fn new<V: Into<String>, S: Into<String>>(version: V, server: S) -> Self {
        Self {
            version: version.into(),
            server: server.into(),
            status: String::new(),
            headers: Vec::new(),
            state: ResponseState::Unset,
            violated: false,
        }
    }
}

// Public API
impl StartResponse {
    /// Declares the status and headers of the response.
    ///
    /// `status` is the full status text (`"200 OK"`) or a
    /// [`StatusCode`](crate::StatusCode). Pass `exc_info` only from an error
    /// path, to replace a previously declared response.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AlreadyStarted`] on a second call without `exc_info`,
    /// unless an exception-context call happened in between.
    pub fn start_response<S, I, N, V>(
        &mut self,
        status: S,
        headers: I,
        exc_info: Option<ExcInfo<'_>>,
    ) -> Result<(), ErrorKind>
    where
        S: Into<String>,
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        if exc_info.is_none() && self.state == ResponseState::Finalized {
            self.violated = true;
            return Err(ErrorKind::AlreadyStarted);
        }

        self.status = status.into();
        self.headers = self.bridge_headers();
        self.headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));

        self.state = match exc_info {
            Some(exc) => {
                warn!(status = %self.status, error = %exc.0, "response overridden with exception context");
                ResponseState::Overridden
            }
            None => ResponseState::Finalized,
        };

        Ok(())
    }

    /// Status text of the last accepted call, empty before the first one.
    #[inline]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Headers of the last accepted call, bridge-owned headers first.
    #[inline]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Whether an accepted call has happened.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.state() != ResponseState::Unset
    }
}

impl StartResponse {
    #[inline]
    fn bridge_headers(&self) -> Vec<Header> {
        vec![
            ("Date".to_string(), httpdate::fmt_http_date(SystemTime::now())),
            ("Server".to_string(), self.server.clone()),
        ]
    }

    #[inline]
    pub(crate) fn state(&self) -> ResponseState {
        self.state
    }

    /// Fails if the application ever broke the calling contract.
    #[inline]
    pub(crate) fn check(&self) -> Result<(), ErrorKind> {
        match self.violated {
            true => Err(ErrorKind::AlreadyStarted),
            false => Ok(()),
        }
    }

    /// Writes the status line, the headers and the blank separator line.
    pub(crate) fn write_head(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.push(b' ');
        buffer.extend_from_slice(self.status.as_bytes());
        buffer.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"\r\n");
    }
}
