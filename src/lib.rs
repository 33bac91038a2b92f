//! gateway_bridge - bridge between raw HTTP connections and gateway applications
//!
//! Translates one inbound HTTP request into an environment mapping in the
//! common-gateway style, invokes an application under a two-phase
//! "start response, then return the body" contract, and writes whatever the
//! application produced back on the same connection.
//!
//! # Scope
//!
//! - **One request per connection**: a single read, a single write, then close.
//!   No keep-alive, no pipelining, no chunked encoding, no TLS.
//! - **Raw input**: `wsgi.input` exposes the whole request text, head included.
//! - **No synthesized error pages**: failures close the connection and are
//!   logged (a `400` for malformed request lines can be enabled, see
//!   [`ServerLimits::bad_request_responses`](limits::ServerLimits::bad_request_responses)).
//!
//! # Examples
//!
//! ```no_run
//! use gateway_bridge::{AppError, Environ, Server, StartResponse, StatusCode};
//!
//! fn hello(env: &mut Environ, start_response: &mut StartResponse) -> Result<Vec<String>, AppError> {
//!     start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;
//!     Ok(vec![format!("query: {}", env.get_str("QUERY_STRING").unwrap_or(""))])
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
//!         .application(hello)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Recovering from an error after the response was already started:
//! ```
//! use gateway_bridge::{AppError, Environ, ExcInfo, StartResponse, StatusCode};
//!
//! fn app(_: &mut Environ, start_response: &mut StartResponse) -> Result<Vec<String>, AppError> {
//!     start_response.start_response(StatusCode::Ok, [("Content-Type", "text/html")], None)?;
//!
//!     match "forty-two".parse::<u32>() {
//!         Ok(n) => Ok(vec![format!("<b>{n}</b>")]),
//!         Err(err) => {
//!             start_response.start_response(
//!                 StatusCode::InternalServerError,
//!                 [("Content-Type", "text/plain")],
//!                 Some(ExcInfo(&err)),
//!             )?;
//!             Ok(vec![err.to_string()])
//!         }
//!     }
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod environ;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub mod apps;
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{AppError, ErrorKind, ExcInfo},
    http::{
        environ::{keys, EnvValue, Environ, ErrorStream, InputStream},
        response::StartResponse,
        types::{Header, StatusCode, NO_HEADERS},
    },
    server::{
        connection::ConnState,
        server_impl::{Application, Server, ServerBuilder},
    },
};

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_app {
    ($name:ident) => {
        use gateway_bridge::{AppError, Application, Environ, StartResponse, StatusCode};
        struct $name;

        impl Application for $name {
            fn call(
                &self,
                _: &mut Environ,
                start_response: &mut StartResponse,
            ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
                start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;
                Ok(["Hello world!"])
            }
        }
    };
}
