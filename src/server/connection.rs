use crate::{
    errors::ErrorKind,
    http::{
        environ::Environ,
        request::{self, RequestLine},
        response::StartResponse,
    },
    limits::{ConnLimits, ServerIdentity},
    server::server_impl::Application,
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tokio::net::TcpStream;
use tracing::debug;

/// Lifecycle of a single connection.
///
/// ```text
/// Idle --established--> AwaitingData --data--> Dispatching --app returned--> Responding --written--> Closed
/// ```
///
/// Each state is left at most once: a connection serves exactly one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    AwaitingData,
    Dispatching,
    Responding,
    Closed,
}

/// One accepted connection: request record, environment, response state and
/// lifecycle state. Created per stream and dropped after the single response.
pub(crate) struct GatewayConnection<A: Application> {
    app: Arc<A>,
    identity: Arc<ServerIdentity>,
    state: ConnState,

    pub(crate) request: Option<RequestLine>,
    pub(crate) environ: Option<Environ>,
    pub(crate) response: Option<StartResponse>,
}

impl<A: Application> GatewayConnection<A> {
    #[inline]
    pub(crate) fn new(app: Arc<A>, identity: Arc<ServerIdentity>) -> Self {
        Self {
            app,
            identity,
            state: ConnState::Idle,

            request: None,
            environ: None,
            response: None,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    fn expect_state(&self, event: &'static str, expected: ConnState) -> Result<(), ErrorKind> {
        match self.state == expected {
            true => Ok(()),
            false => Err(ErrorKind::UnexpectedState {
                event,
                state: self.state,
            }),
        }
    }
}

// Lifecycle events
impl<A: Application> GatewayConnection<A> {
    /// The transport is registered.
    #[inline]
    pub(crate) fn connection_made(&mut self) -> Result<(), ErrorKind> {
        self.expect_state("connection_made", ConnState::Idle)?;
        self.state = ConnState::AwaitingData;
        Ok(())
    }

    /// Runs the whole bridge for one delivery of inbound bytes and returns
    /// the response bytes to write.
    ///
    /// Any error leaves the connection in the state it failed in; nothing is
    /// produced for the wire.
    pub(crate) fn data_received(&mut self, data: &[u8]) -> Result<Vec<u8>, ErrorKind> {
        self.expect_state("data_received", ConnState::AwaitingData)?;
        self.state = ConnState::Dispatching;

        let text = request::decode(data)?;
        let request = RequestLine::parse(text)?;
        debug!(
            method = request.method(),
            path = request.path(),
            version = request.version(),
            "request line"
        );

        let mut environ = Environ::build(&request, text, &self.identity);
        let mut response = StartResponse::new(request.version(), self.identity.software.as_str());
        self.request = Some(request);

        let app = &self.app;
        let body = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<u8>, ErrorKind> {
            let chunks = app
                .call(&mut environ, &mut response)
                .map_err(ErrorKind::Application)?;

            let mut body = Vec::new();
            for chunk in chunks {
                body.extend_from_slice(chunk.as_ref());
            }
            Ok(body)
        }))
        .map_err(|payload| ErrorKind::ApplicationPanic {
            message: panic_message(&*payload),
        })??;
        self.state = ConnState::Responding;

        response.check()?;
        debug!(status = response.status(), body_len = body.len(), "response");

        let mut buffer = Vec::with_capacity(256 + body.len());
        response.write_head(&mut buffer);
        buffer.extend_from_slice(&body);

        self.environ = Some(environ);
        self.response = Some(response);

        Ok(buffer)
    }

    /// The transport is closed.
    #[inline]
    pub(crate) fn connection_lost(&mut self) {
        self.state = ConnState::Closed;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(message), _) => message.to_string(),
        (_, Some(message)) => message.clone(),
        _ => "non-string panic payload".to_string(),
    }
}

impl<A: Application> GatewayConnection<A> {
    /// Serves the single request of `stream`, then shuts it down.
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        limits: &ConnLimits,
    ) -> Result<(), ErrorKind> {
        self.connection_made()?;

        // One spare byte tells a request of exactly `read_buffer_size` bytes
        // apart from a longer one.
        let mut buffer = vec![0; limits.read_buffer_size + 1];
        let result = self.impl_run(stream, &mut buffer, limits).await;

        self.connection_lost();
        result
    }

    #[inline(always)]
    async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
        buffer: &mut [u8],
        limits: &ConnLimits,
    ) -> Result<(), ErrorKind> {
        let len = writer::read_once(stream, buffer, limits.socket_read_timeout).await?;

        if len == 0 {
            debug!("connection closed before any data");
            return writer::shutdown(stream).await;
        }
        if len > limits.read_buffer_size {
            return Err(ErrorKind::RequestTooLarge {
                limit: limits.read_buffer_size,
            });
        }

        let response = self.data_received(&buffer[..len])?;

        writer::write_bytes(stream, &response, limits.socket_write_timeout).await?;
        writer::shutdown(stream).await
    }
}

pub(crate) mod writer {
    use crate::errors::ErrorKind;
    use std::time::Duration;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        time::timeout,
    };

    /// Single read: the request must arrive in one delivery.
    #[inline(always)]
    pub(crate) async fn read_once(
        stream: &mut TcpStream,
        buffer: &mut [u8],
        time: Option<Duration>,
    ) -> Result<usize, ErrorKind> {
        Ok(match time {
            Some(time) => timeout(time, stream.read(buffer)).await.map_err(std::io::Error::from)??,
            None => stream.read(buffer).await?,
        })
    }

    #[inline(always)]
    pub(crate) async fn write_bytes(
        stream: &mut TcpStream,
        response: &[u8],
        time: Option<Duration>,
    ) -> Result<(), ErrorKind> {
        match time {
            Some(time) => timeout(time, stream.write_all(response))
                .await
                .map_err(std::io::Error::from)??,
            None => stream.write_all(response).await?,
        }

        Ok(())
    }

    #[inline(always)]
    pub(crate) async fn shutdown(stream: &mut TcpStream) -> Result<(), ErrorKind> {
        Ok(stream.shutdown().await?)
    }
}

#[cfg(test)]
pub(crate) mod test_app {
    use super::*;
    use crate::{errors::AppError, StartResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `200 OK` with fixed chunks and counts its invocations.
    pub(crate) struct Chunks {
        pub(crate) chunks: Vec<&'static str>,
        pub(crate) calls: AtomicUsize,
    }

    impl Chunks {
        pub(crate) fn new(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Application for Chunks {
        fn call(
            &self,
            _: &mut Environ,
            start_response: &mut StartResponse,
        ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            start_response.start_response("200 OK", [("Content-Type", "text/plain")], None)?;
            Ok(self.chunks.clone())
        }
    }

    impl<A: Application> GatewayConnection<A> {
        pub(crate) fn from_app(app: A) -> Self {
            let mut conn = Self::new(
                Arc::new(app),
                Arc::new(ServerIdentity::new("localhost", 8888).software("test-server")),
            );
            conn.connection_made().unwrap();
            conn
        }
    }
}
