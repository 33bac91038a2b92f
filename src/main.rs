use clap::Parser;
use gateway_bridge::{apps, limits::ServerIdentity, Server};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serve a built-in gateway application over HTTP.
#[derive(Debug, Parser)]
#[command(name = "gateway-bridge", version, about)]
struct Cli {
    /// Application to serve
    #[arg(value_parser = clap::builder::PossibleValuesParser::new(apps::NAMES))]
    app: String,

    /// Host name or address to listen on
    #[arg(long, default_value = "localhost", env = "GATEWAY_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, short, default_value_t = 8888, env = "GATEWAY_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let app = apps::by_name(&cli.app).ok_or_else(|| format!("unknown application `{}`", cli.app))?;

    let addr: SocketAddr = (cli.host.as_str(), cli.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("`{}` does not resolve to any address", cli.host))?;

    let server = Server::builder()
        .listener(Server::bind(addr)?)
        .application(app)
        .identity(ServerIdentity::new(cli.host.as_str(), cli.port))
        .build();

    println!("Serving on {}", server.local_addr()?);

    tokio::select! {
        _ = server.launch() => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    tracing::info!("shutting down");
    Ok(())
}
