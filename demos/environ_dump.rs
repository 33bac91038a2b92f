use gateway_bridge::{AppError, Environ, Server, StartResponse, StatusCode};

fn environ_dump(env: &mut Environ, start_response: &mut StartResponse) -> Result<Vec<String>, AppError> {
    start_response.start_response(StatusCode::Ok, [("Content-Type", "text/plain")], None)?;

    let mut lines: Vec<String> = env
        .iter()
        .map(|(key, value)| format!(">> {key}: {value}\n"))
        .collect();
    lines.sort();

    Ok(lines)
}

#[tokio::main]
async fn main() {
    Server::builder()
        .listener(Server::bind("127.0.0.1:8888".parse().unwrap()).unwrap())
        .application(environ_dump)
        .build()
        .launch()
        .await;
}
