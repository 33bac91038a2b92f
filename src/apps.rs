//! Built-in applications served by the `gateway-bridge` binary

use crate::{
    errors::{AppError, ExcInfo},
    http::{environ::Environ, response::StartResponse, types::StatusCode},
    server::server_impl::Application,
};
use std::{error, fmt};

/// Names accepted by [`by_name`].
pub const NAMES: [&str; 2] = ["environ", "error"];

/// Replies `200 OK` with the environment, one sorted `>> KEY: VALUE` line
/// per entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironDump;

impl Application for EnvironDump {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
        start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;

        let mut lines: Vec<String> = environ
            .iter()
            .map(|(key, value)| format!(">> {key}: {value}\n"))
            .collect();
        lines.sort();

        Ok(lines)
    }
}

/// Starts a `text/html` response, fails while producing the body and
/// replaces the response with a `500` carrying the error description.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingApp;

#[derive(Debug)]
pub struct TerribleError;

impl fmt::Display for TerribleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Something terrible has happened.")
    }
}

impl error::Error for TerribleError {}

impl FailingApp {
    fn render(&self) -> Result<Vec<String>, TerribleError> {
        Err(TerribleError)
    }
}

impl Application for FailingApp {
    fn call(
        &self,
        _: &mut Environ,
        start_response: &mut StartResponse,
    ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
        start_response.start_response(StatusCode::Ok, [("Content-Type", "text/html")], None)?;

        match self.render() {
            Ok(body) => Ok(body),
            Err(err) => {
                start_response.start_response(
                    StatusCode::InternalServerError,
                    [("Content-Type", "text/plain")],
                    Some(ExcInfo(&err)),
                )?;

                Ok(vec![format!("{}\n", ExcInfo(&err).format_chain())])
            }
        }
    }
}

/// Either built-in application, selected at startup.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinApp {
    Environ(EnvironDump),
    Error(FailingApp),
}

/// Looks up a built-in application by name.
pub fn by_name(name: &str) -> Option<BuiltinApp> {
    match name {
        "environ" => Some(BuiltinApp::Environ(EnvironDump)),
        "error" => Some(BuiltinApp::Error(FailingApp)),
        _ => None,
    }
}

impl Application for BuiltinApp {
    fn call(
        &self,
        environ: &mut Environ,
        start_response: &mut StartResponse,
    ) -> Result<impl IntoIterator<Item = impl AsRef<[u8]>>, AppError> {
        let chunks: Vec<Vec<u8>> = match self {
            Self::Environ(app) => collect(app.call(environ, start_response)?),
            Self::Error(app) => collect(app.call(environ, start_response)?),
        };

        Ok(chunks)
    }
}

#[inline]
fn collect<I: IntoIterator>(chunks: I) -> Vec<Vec<u8>>
where
    I::Item: AsRef<[u8]>,
{
    chunks.into_iter().map(|c| c.as_ref().to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::environ::keys, limits::ServerIdentity, server::connection::GatewayConnection};

    fn serve<A: Application>(app: A, request: &str) -> String {
        let mut conn = GatewayConnection::new(
            std::sync::Arc::new(app),
            std::sync::Arc::new(ServerIdentity::new("localhost", 8888)),
        );
        conn.connection_made().unwrap();

        String::from_utf8(conn.data_received(request.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn environ_dump() {
        let text = serve(EnvironDump, "GET /foo?x=1 HTTP/1.1\r\n\r\n");
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.ends_with("Content-Type: text/plain"));

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), keys::REQUIRED.len());

        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);

        for line in [
            ">> QUERY_STRING: x=1",
            ">> REQUEST_METHOD: GET",
            ">> SCRIPT_NAME: /foo?x=1",
            ">> PATH_INFO: ",
            ">> HTTP_HOST: http://localhost:8888",
            ">> wsgi.version: (1, 0)",
            ">> wsgi.multithread: false",
        ] {
            assert!(lines.contains(&line), "{line}");
        }
    }

    #[test]
    fn failing_app() {
        let text = serve(FailingApp, "GET / HTTP/1.0\r\n\r\n");

        assert!(text.starts_with("HTTP/1.0 500 Internal Server Error\r\n"));
        assert!(!text.contains("text/html"));
        assert!(text.ends_with("\r\nContent-Type: text/plain\r\n\r\nSomething terrible has happened.\n"));
    }

    #[test]
    fn lookup() {
        for name in NAMES {
            assert!(by_name(name).is_some(), "{name}");
        }
        assert!(by_name("nope").is_none());

        let text = serve(by_name("error").unwrap(), "GET / HTTP/1.1\r\n\r\n");
        assert!(text.starts_with("HTTP/1.1 500 "));
    }
}
