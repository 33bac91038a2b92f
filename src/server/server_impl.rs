use crate::{
    errors::{AppError, ErrorKind},
    http::{environ::Environ, response::StartResponse},
    limits::{ConnLimits, ServerIdentity, ServerLimits, WaitStrategy},
    server::connection::{writer, GatewayConnection},
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    marker::{Send, Sync},
    net::SocketAddr,
    sync::Arc,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};
use tracing::{debug, error, info, warn};

/// A gateway application: turns an environment into a response.
///
/// The application is called once per request, synchronously, with the
/// request [`Environ`] and the [`StartResponse`] collector. It must declare
/// its status and headers through `start_response` and return the body as a
/// finite sequence of byte chunks, which the bridge consumes eagerly and in
/// order before writing anything.
///
/// - `&self` is shared by all connections and must be thread-safe.
/// - Errors the application wants to show to the client must be handled
///   inside `call` (see [`StartResponse`] for the exception-context call).
///   A returned `Err` aborts the connection without a response.
///
/// Any closure `Fn(&mut Environ, &mut StartResponse) -> Result<B, AppError>`
/// is an application.
///
/// # Examples
///
/// ```
/// use gateway_bridge::{AppError, Application, Environ, StartResponse, StatusCode};
///
/// struct Hello;
///
/// impl Application for Hello {
///     fn call(
///         &self,
///         env: &mut Environ,
///         start_response: &mut StartResponse,
///     ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
///         start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;
///
///         let method = env.get_str("REQUEST_METHOD").unwrap_or("?").to_string();
///         Ok(vec!["Hello from ".to_string(), method])
///     }
/// }
/// ```
pub trait Application
where
    Self: Sync + Send + 'static,
{
    /// Processes one request.
    ///
    /// # Errors
    ///
    /// Any error ends the connection abnormally: nothing is written and the
    /// error is logged by the server.
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError>;
}

impl<F, B> Application for F
where
    F: Fn(&mut Environ, &mut StartResponse) -> Result<B, AppError> + Sync + Send + 'static,
    B: IntoIterator,
    B::Item: AsRef<[u8]>,
{
    #[inline]
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
        self(environ, start_response)
    }
}

/// A server bridging TCP connections to an [`Application`].
///
/// Every accepted stream is served by a fresh connection handler: one read,
/// one application call, one write, then the stream is closed.
///
/// # Examples
///
/// ```no_run
/// # gateway_bridge::impt_default_app!{ MyApp }
/// use gateway_bridge::Server;
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
///         .application(MyApp)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
    identity: Arc<ServerIdentity>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder<A: Application>() -> ServerBuilder<A> {
        ServerBuilder {
            listener: None,
            application: None,
            identity: None,

            server_limits: None,
            connection_limits: None,
        }
    }

    /// Binds a listening socket with `SO_REUSEADDR` set.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        TcpListener::from_std(socket.into())
    }

    /// Identity shared by every connection of this server.
    #[inline]
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections. Never returns.
    #[inline]
    pub async fn launch(self) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            debug!(peer = %addr, "connection accepted");

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push((stream, addr)),
                false => {
                    warn!(peer = %addr, "admission queue full");
                    self.error_queue.push((stream, addr))
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<A: Application> {
    listener: Option<TcpListener>,
    application: Option<Arc<A>>,
    identity: Option<ServerIdentity>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<A: Application> ServerBuilder<A> {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the application serving every request.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn application(mut self, application: A) -> Self {
        self.application = Some(Arc::new(application));
        self
    }

    /// Sets the server identity exposed to applications.
    ///
    /// Defaults to the listener's local address with the default `Server`
    /// header value.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # gateway_bridge::impt_default_app!{ MyApp }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use gateway_bridge::{limits::ServerIdentity, Server};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
    ///     .application(MyApp)
    ///     .identity(ServerIdentity::new("localhost", 8888).software("my-gateway/1.0"))
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn identity(mut self, identity: ServerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Configures concurrency, queueing and error responses.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures the read buffer and socket timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawns the worker tasks and returns the
    /// [`Server`]. Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when [`listener`](Self::listener) or
    /// [`application`](Self::application) was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, application, identity, limits) = self.get_all_parts();
        let identity = Arc::new(identity);

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &identity, &application);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        info!(
            host = %identity.host,
            port = identity.port,
            workers = limits.0.max_connections,
            "server ready"
        );

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
            identity,
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        identity: &Arc<ServerIdentity>,
        application: &Arc<A>,
    ) {
        let queue = queue.clone();
        let identity = identity.clone();
        let application = application.clone();
        let (server_limits, conn_limits) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) =
                    Server::get_stream(&queue, &server_limits.wait_strategy).await;

                let mut conn = GatewayConnection::new(application.clone(), identity.clone());

                match conn.run(&mut stream, &conn_limits).await {
                    Ok(()) => debug!(peer = %addr, state = ?conn.state(), "connection closed"),
                    Err(err) => {
                        Self::report(&err, addr);

                        if server_limits.bad_request_responses {
                            if let Some(response) = err.as_http() {
                                let _ = writer::write_bytes(
                                    &mut stream,
                                    response,
                                    conn_limits.socket_write_timeout,
                                )
                                .await;
                            }
                        }
                    }
                }
            }
        });
    }

    #[inline]
    fn report(err: &ErrorKind, addr: SocketAddr) {
        match err {
            ErrorKind::Application(_)
            | ErrorKind::ApplicationPanic { .. }
            | ErrorKind::AlreadyStarted => {
                error!(peer = %addr, error = %err, "application failed")
            }
            err if err.is_io() => debug!(peer = %addr, error = %err, "transport error"),
            _ => warn!(peer = %addr, error = %err, "connection aborted"),
        }
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) =
                    Server::get_stream(&queue, &server_limits.wait_strategy).await;

                if let Some(response) = ErrorKind::ServiceUnavailable.as_http() {
                    let _ = writer::write_bytes(
                        &mut stream,
                        response,
                        conn_limits.socket_write_timeout,
                    )
                    .await;
                }
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, _) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &server_limits.wait_strategy).await;

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<A>, ServerIdentity, AllLimits) {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let application = self
            .application
            .expect("The `application` method must be called to create");

        let identity = match self.identity {
            Some(identity) => identity,
            None => listener
                .local_addr()
                .map(ServerIdentity::from_addr)
                .unwrap_or_default(),
        };

        (
            listener,
            application,
            identity,
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ExcInfo, http::environ::keys, StatusCode};
    use std::{fmt, time::Duration};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug)]
    struct Terrible;

    impl fmt::Display for Terrible {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Something terrible has happened.")
        }
    }

    impl std::error::Error for Terrible {}

    fn echo_query(env: &mut Environ, sr: &mut StartResponse) -> Result<Vec<String>, AppError> {
        sr.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;

        Ok(vec![
            env.get_str(keys::QUERY_STRING).unwrap_or_default().to_string(),
            "|".to_string(),
            env.get_str(keys::SERVER_NAME).unwrap_or_default().to_string(),
        ])
    }

    fn failing(_: &mut Environ, sr: &mut StartResponse) -> Result<Vec<String>, AppError> {
        sr.start_response(StatusCode::Ok, [("Content-Type", "text/html")], None)?;

        let err = Terrible;
        sr.start_response(
            StatusCode::InternalServerError,
            [("Content-Type", "text/plain")],
            Some(ExcInfo(&err)),
        )?;
        Ok(vec![err.to_string()])
    }

    fn server_limits() -> ServerLimits {
        ServerLimits {
            max_connections: 2,
            ..ServerLimits::default()
        }
    }

    fn conn_limits() -> ConnLimits {
        ConnLimits {
            socket_read_timeout: Some(Duration::from_secs(5)),
            socket_write_timeout: Some(Duration::from_secs(5)),
            ..ConnLimits::default()
        }
    }

    async fn start<A: Application>(app: A, server_limits: ServerLimits, conn_limits: ConnLimits) -> SocketAddr {
        let server = Server::builder()
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .application(app)
            .server_limits(server_limits)
            .connection_limits(conn_limits)
            .build();

        let addr = server.local_addr().unwrap();
        tokio::spawn(server.launch());
        addr
    }

    /// Reads until the server closes the stream; a reset ends the read too.
    async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
        let mut response = Vec::new();
        let mut chunk = [0; 1024];

        let read = async {
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(len) => response.extend_from_slice(&chunk[..len]),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), read).await.unwrap();
        response
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();

        read_all(&mut stream).await
    }

    #[tokio::test]
    async fn serves_one_request() {
        let addr = start(echo_query, server_limits(), conn_limits()).await;

        let response = exchange(addr, b"GET /foo?x=1 HTTP/1.1\r\nHost: t\r\n\r\n").await;
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\nDate: "), "{text}");
        assert!(text.contains("\r\nServer: gateway-bridge\r\nContent-Type: text/plain\r\n\r\n"), "{text}");
        assert!(text.ends_with("\r\n\r\nx=1|127.0.0.1"), "{text}");
    }

    #[tokio::test]
    async fn exception_override_on_the_wire() {
        let addr = start(failing, server_limits(), conn_limits()).await;

        let response = exchange(addr, b"GET / HTTP/1.0\r\n\r\n").await;
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.0 500 Internal Server Error\r\n"), "{text}");
        assert!(!text.contains("text/html"), "{text}");
        assert!(text.ends_with("\r\n\r\nSomething terrible has happened."), "{text}");
    }

    #[tokio::test]
    async fn malformed_request_closes_silently() {
        let addr = start(echo_query, server_limits(), conn_limits()).await;

        let response = exchange(addr, b"GET\r\n\r\n").await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn malformed_request_with_bad_request_responses() {
        let limits = ServerLimits {
            bad_request_responses: true,
            ..server_limits()
        };
        let addr = start(echo_query, limits, conn_limits()).await;

        let response = exchange(addr, b"GET\r\n\r\n").await;
        assert!(response.starts_with(b"HTTP/1.0 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn request_filling_the_buffer() {
        let conn_limits = ConnLimits {
            read_buffer_size: 64,
            ..conn_limits()
        };
        let addr = start(echo_query, server_limits(), conn_limits.clone()).await;

        // Exactly `read_buffer_size` bytes still fit.
        let request = format!("GET /?fits HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "p".repeat(32));
        assert_eq!(request.len(), 64);

        let text = String::from_utf8(exchange(addr, request.as_bytes()).await).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("fits|127.0.0.1"), "{text}");

        // One byte more is rejected without a response.
        let request = format!("GET /?fits HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "p".repeat(33));
        assert!(exchange(addr, request.as_bytes()).await.is_empty());

        // ...unless error responses are enabled.
        let limits = ServerLimits {
            bad_request_responses: true,
            ..server_limits()
        };
        let addr = start(echo_query, limits, conn_limits).await;

        let response = exchange(addr, request.as_bytes()).await;
        assert!(response.starts_with(b"HTTP/1.0 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn full_queue_answers_503() {
        let limits = ServerLimits {
            max_pending_connections: 0,
            ..server_limits()
        };
        let addr = start(echo_query, limits, conn_limits()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let response = read_all(&mut stream).await;

        assert!(response.starts_with(b"HTTP/1.0 503 Service Unavailable\r\n"));
    }

    #[tokio::test]
    async fn full_queue_without_503_handlers() {
        let limits = ServerLimits {
            max_pending_connections: 0,
            count_503_handlers: 0,
            ..server_limits()
        };
        let addr = start(echo_query, limits, conn_limits()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(read_all(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn read_timeout_closes_idle_connection() {
        let conn_limits = ConnLimits {
            socket_read_timeout: Some(Duration::from_millis(100)),
            ..conn_limits()
        };
        let addr = start(echo_query, server_limits(), conn_limits).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let started = std::time::Instant::now();

        assert!(read_all(&mut stream).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));

        // The worker is free again.
        let response = exchange(addr, b"GET /?after HTTP/1.1\r\n\r\n").await;
        assert!(response.ends_with(b"after|127.0.0.1"));
    }

    #[tokio::test]
    async fn worker_survives_application_panic() {
        let app = |env: &mut Environ, sr: &mut StartResponse| -> Result<Vec<String>, AppError> {
            sr.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;
            match env.get_str(keys::QUERY_STRING) {
                Some("boom") => panic!("boom"),
                other => Ok(vec![other.unwrap_or_default().to_string()]),
            }
        };
        let limits = ServerLimits {
            max_connections: 1,
            ..ServerLimits::default()
        };
        let addr = start(app, limits, conn_limits()).await;

        assert!(exchange(addr, b"GET /?boom HTTP/1.1\r\n\r\n").await.is_empty());

        let text = String::from_utf8(exchange(addr, b"GET /?fine HTTP/1.1\r\n\r\n").await).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("\r\n\r\nfine"), "{text}");
    }

    #[tokio::test]
    async fn custom_identity() {
        let server = Server::builder()
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .application(echo_query)
            .identity(ServerIdentity::new("example.org", 80).software("custom/2.0"))
            .build();
        assert_eq!(server.identity().http_host(), "http://example.org:80");

        let addr = server.local_addr().unwrap();
        tokio::spawn(server.launch());

        let response = exchange(addr, b"GET /?a=b HTTP/1.1\r\n\r\n").await;
        let text = String::from_utf8(response).unwrap();

        assert!(text.contains("\r\nServer: custom/2.0\r\n"), "{text}");
        assert!(text.ends_with("a=b|example.org"), "{text}");
    }
}
