//! Server configuration: concurrency limits, connection limits and server identity
//!
//! All structures carry conservative defaults and a hidden `_priv` field, so
//! they are meant to be built with struct update syntax:
//!
//! ```no_run
//! # gateway_bridge::impt_default_app!{MyApp}
//! use gateway_bridge::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
//!         .application(MyApp)
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_write_timeout: Some(Duration::from_secs(3)),
//!             ..ConnLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::{net::SocketAddr, time::Duration};

/// Controls server-level concurrency, queueing and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   Yes   /----------------\   No   [---------------]
/// [ Add to queue ] <====== | Room in queue? | =====> [ Overflow queue ]
/// [--------------]         \----------------/        [---------------]
///        ||
///        \/
/// [--------]   one fresh connection handler per stream
/// [ Worker ] ============================================> response, close
/// [--------]
/// ```
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks serving connections concurrently (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted streams waiting for a worker (default: `250`).
    ///
    /// Streams accepted while the queue is full go to the overflow queue.
    pub max_pending_connections: usize,

    /// How idle workers wait for the next stream (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Tasks answering overflow streams with `503 Service Unavailable`
    /// (default: `1`). With `0`, overflow streams are closed silently.
    pub count_503_handlers: usize,

    /// Answer a malformed request line with `400 Bad Request` before
    /// closing (default: `false`).
    ///
    /// By default a malformed request line is fatal to the connection: the
    /// error is logged and the stream is closed without any response.
    pub bad_request_responses: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            bad_request_responses: false,

            _priv: (),
        }
    }
}

/// Strategy for worker tasks waiting when no stream is queued
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]. Keeps a core busy.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Per-connection limits
///
/// A connection reads exactly once, so the read buffer bounds the size of
/// the whole request. No timeouts are applied unless configured.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Largest request accepted, in bytes (default: `8 KiB`)
    ///
    /// The request must arrive in the single read of the connection; longer
    /// requests fail with `RequestTooLarge`.
    pub read_buffer_size: usize,

    /// Maximum wait for the request bytes (default: `None`, wait forever)
    pub socket_read_timeout: Option<Duration>,

    /// Maximum wait for writing the response (default: `None`)
    pub socket_write_timeout: Option<Duration>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            socket_read_timeout: None,
            socket_write_timeout: None,

            _priv: (),
        }
    }
}

/// Process-wide identity of the server, fixed before the first connection
/// is accepted and shared read-only by every connection.
///
/// Feeds `SERVER_NAME`, `SERVER_PORT` and `HTTP_HOST` of the environment and
/// the value of the `Server` response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub host: String,
    pub port: u16,
    /// Value of the bridge-owned `Server` header.
    pub software: String,
}

impl ServerIdentity {
    pub const DEFAULT_SOFTWARE: &'static str = "gateway-bridge";

    #[inline]
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            software: Self::DEFAULT_SOFTWARE.to_string(),
        }
    }

    /// Identity derived from a bound address.
    #[inline]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    #[inline]
    pub fn software<S: Into<String>>(mut self, software: S) -> Self {
        self.software = software.into();
        self
    }

    /// Value of `HTTP_HOST`: `http://<host>:<port>`.
    #[inline]
    pub fn http_host(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self::new("localhost", 8888)
    }
}
