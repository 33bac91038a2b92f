use gateway_bridge::{AppError, Environ, ExcInfo, Server, StartResponse, StatusCode};

fn double_query(env: &Environ) -> Result<u32, AppError> {
    let n: u32 = env.get_str("QUERY_STRING").unwrap_or("").parse()?;
    n.checked_mul(2)
        .ok_or_else(|| format!("{n} * 2 does not fit into u32").into())
}

fn app(env: &mut Environ, start_response: &mut StartResponse) -> Result<Vec<String>, AppError> {
    // Optimistic start, replaced below if the body cannot be produced.
    start_response.start_response(StatusCode::Ok, [("Content-Type", "text/html")], None)?;

    match double_query(env) {
        Ok(n) => Ok(vec![format!("<h1>{n}</h1>")]),
        Err(err) => {
            start_response.start_response(
                StatusCode::BadRequest,
                [("Content-Type", "text/plain")],
                Some(ExcInfo(&*err)),
            )?;
            Ok(vec![format!("cannot double {:?}: {err}\n", env.get_str("QUERY_STRING"))])
        }
    }
}

#[tokio::main]
async fn main() {
    Server::builder()
        .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
        .application(app)
        .build()
        .launch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_query(query: &str) -> Environ {
        let mut env = Environ::default();
        env.insert("QUERY_STRING", query);
        env
    }

    #[test]
    fn doubles() {
        assert_eq!(double_query(&with_query("21")).unwrap(), 42);
        assert_eq!(double_query(&with_query("2147483647")).unwrap(), u32::MAX - 1);
    }

    #[test]
    fn rejects() {
        let err = double_query(&with_query("4294967295")).unwrap_err();
        assert_eq!(err.to_string(), "4294967295 * 2 does not fit into u32");

        assert!(double_query(&with_query("forty-two")).is_err());
        assert!(double_query(&Environ::default()).is_err());
    }
}
