//! The per-request environment mapping handed to applications

use crate::{http::request::RequestLine, limits::ServerIdentity};
use memchr::memchr;
use std::{
    collections::{hash_map, HashMap},
    fmt,
    io::{self, BufRead, Cursor, Read, Seek, SeekFrom, Write},
    sync::OnceLock,
};

/// Well-known environment keys
pub mod keys {
    pub const VERSION: &str = "wsgi.version";
    pub const URL_SCHEME: &str = "wsgi.url_scheme";
    pub const MULTITHREAD: &str = "wsgi.multithread";
    pub const MULTIPROCESS: &str = "wsgi.multiprocess";
    pub const RUN_ONCE: &str = "wsgi.run_once";
    pub const ERRORS: &str = "wsgi.errors";
    pub const INPUT: &str = "wsgi.input";

    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const HTTP_HOST: &str = "HTTP_HOST";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";

    /// Every key an application may rely on.
    pub const REQUIRED: [&str; 15] = [
        VERSION,
        URL_SCHEME,
        MULTITHREAD,
        MULTIPROCESS,
        RUN_ONCE,
        ERRORS,
        INPUT,
        REQUEST_METHOD,
        SCRIPT_NAME,
        PATH_INFO,
        QUERY_STRING,
        SERVER_NAME,
        SERVER_PORT,
        HTTP_HOST,
        SERVER_PROTOCOL,
    ];
}

/// A value of the environment mapping.
#[derive(Debug, Clone)]
pub enum EnvValue {
    /// Placeholder of the defaults template, never seen by applications.
    Unset,
    Str(String),
    Bool(bool),
    /// Protocol version marker, `(major, minor)`.
    Version(u8, u8),
    /// Error output sink (`wsgi.errors`).
    Errors(ErrorStream),
    /// Request input stream (`wsgi.input`).
    Input(InputStream),
}

impl EnvValue {
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for EnvValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for EnvValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for EnvValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<unset>"),
            Self::Str(value) => f.write_str(value),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Version(major, minor) => write!(f, "({major}, {minor})"),
            Self::Errors(_) => f.write_str("<stderr>"),
            Self::Input(input) => write!(f, "<input: {} bytes>", input.len()),
        }
    }
}

//

/// Seekable in-memory stream over the raw inbound text.
///
/// Holds the **entire** request as received, request line and headers
/// included: the bridge does not separate the body from the head.
#[derive(Debug, Clone)]
pub struct InputStream(Cursor<String>);

impl InputStream {
    #[inline]
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self(Cursor::new(text.into()))
    }

    /// The whole underlying text, independent of the stream position.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.get_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.get_ref().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.get_ref().is_empty()
    }
}

impl Read for InputStream {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl BufRead for InputStream {
    #[inline]
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.0.fill_buf()
    }

    #[inline]
    fn consume(&mut self, amt: usize) {
        self.0.consume(amt)
    }
}

impl Seek for InputStream {
    #[inline]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// Error output sink, writes to the process standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorStream;

impl Write for ErrorStream {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

//

/// The environment mapping of one request.
///
/// Keys are unique, iteration order is unspecified. See [`keys`] for the
/// entries the bridge always provides.
///
/// # Known gaps
///
/// - `PATH_INFO` is always empty; `SCRIPT_NAME` is the raw request target,
///   query string included.
/// - No `HTTP_*` variables besides `HTTP_HOST`, which is derived from the
///   server identity and not from the request's `Host` header.
/// - `wsgi.input` yields the whole raw request, not only the body.
#[derive(Debug, Clone, Default)]
pub struct Environ {
    vars: HashMap<String, EnvValue>,
}

static DEFAULTS: OnceLock<Environ> = OnceLock::new();

impl Environ {
    /// The static template every request environment starts from.
    pub fn defaults() -> &'static Environ {
        DEFAULTS.get_or_init(|| {
            let mut env = Environ::default();

            env.insert(keys::VERSION, EnvValue::Version(1, 0));
            env.insert(keys::URL_SCHEME, "http");
            env.insert(keys::MULTITHREAD, false);
            env.insert(keys::MULTIPROCESS, false);
            env.insert(keys::RUN_ONCE, false);
            env.insert(keys::ERRORS, EnvValue::Errors(ErrorStream));
            env.insert(keys::INPUT, EnvValue::Unset);

            for key in [
                keys::REQUEST_METHOD,
                keys::SCRIPT_NAME,
                keys::PATH_INFO,
                keys::QUERY_STRING,
                keys::SERVER_NAME,
                keys::SERVER_PORT,
                keys::HTTP_HOST,
                keys::SERVER_PROTOCOL,
            ] {
                env.insert(key, EnvValue::Unset);
            }

            env
        })
    }

    /// Specializes a copy of the [`defaults`](Environ::defaults) for one request.
    pub(crate) fn build(request: &RequestLine, raw: &str, identity: &ServerIdentity) -> Self {
        let mut env = Self::defaults().clone();

        env.insert(keys::INPUT, EnvValue::Input(InputStream::new(raw)));
        env.insert(keys::REQUEST_METHOD, request.method());
        env.insert(keys::SCRIPT_NAME, request.path());
        env.insert(keys::PATH_INFO, "");
        env.insert(keys::QUERY_STRING, query_string(request.path()));
        env.insert(keys::SERVER_PROTOCOL, request.version());

        env.insert(keys::SERVER_NAME, identity.host.as_str());
        env.insert(keys::SERVER_PORT, identity.port.to_string());
        env.insert(keys::HTTP_HOST, identity.http_host());

        env
    }
}

// Public API
impl Environ {
    #[inline]
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.vars.get(key)
    }

    /// Returns the value of a string entry.
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(EnvValue::as_str)
    }

    #[inline]
    pub fn insert<K: Into<String>, V: Into<EnvValue>>(&mut self, key: K, value: V) -> Option<EnvValue> {
        self.vars.insert(key.into(), value.into())
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.vars.remove(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    #[inline]
    pub fn iter(&self) -> hash_map::Iter<'_, String, EnvValue> {
        self.vars.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The `wsgi.input` stream.
    #[inline]
    pub fn input(&mut self) -> Option<&mut InputStream> {
        match self.vars.get_mut(keys::INPUT) {
            Some(EnvValue::Input(input)) => Some(input),
            _ => None,
        }
    }

    /// The `wsgi.errors` sink.
    #[inline]
    pub fn errors(&self) -> Option<ErrorStream> {
        match self.vars.get(keys::ERRORS) {
            Some(EnvValue::Errors(errors)) => Some(*errors),
            _ => None,
        }
    }
}

impl<'a> IntoIterator for &'a Environ {
    type Item = (&'a String, &'a EnvValue);
    type IntoIter = hash_map::Iter<'a, String, EnvValue>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

impl From<&String> for EnvValue {
    #[inline]
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

/// Query component of a request target: the text after the first `?`,
/// without any `#fragment`. Empty when there is no query.
#[inline]
pub(crate) fn query_string(target: &str) -> &str {
    let bytes = target.as_bytes();
    let end = memchr(b'#', bytes).unwrap_or(bytes.len());

    match memchr(b'?', &bytes[..end]) {
        Some(start) => &target[start + 1..end],
        None => "",
    }
}
