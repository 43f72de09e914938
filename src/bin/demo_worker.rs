//! Minimal worker for trying stove out and for its integration tests.
//!
//! Answers every connection with a tiny HTTP/1.0 response naming its tag and
//! port, then closes the connection.

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "stove-demo-worker")]
#[command(about = "Example worker that reports which port served the request", long_about = None)]
struct Args {
    /// Host to bind
    #[arg(long, env = "STOVE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "STOVE_PORT")]
    port: u16,

    /// Text included in every response
    #[arg(long, default_value = "demo")]
    tag: String,

    /// Keep running on SIGTERM so only SIGKILL stops the worker
    #[arg(long)]
    ignore_sigterm: bool,

    /// Wait this long before binding, to simulate a slow startup
    #[arg(long, default_value = "0")]
    startup_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();

    if args.startup_delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(args.startup_delay_ms)).await;
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("Worker '{}' listening on {}", args.tag, listener.local_addr()?);

    let body = format!("{} {}\n", args.tag, args.port);

    tokio::select! {
        result = serve(listener, body) => result,
        _ = terminated(args.ignore_sigterm) => {
            info!("Worker '{}' shutting down", args.tag);
            Ok(())
        }
    }
}

async fn serve(listener: TcpListener, body: String) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let body = body.clone();
        tokio::spawn(async move {
            if let Err(e) = respond(stream, &body).await {
                warn!("Request failed: {}", e);
            }
        });
    }
}

async fn respond(mut stream: TcpStream, body: &str) -> anyhow::Result<()> {
    let mut buf = [0u8; 8192];
    let _ = stream.read(&mut buf).await?;
    let response = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(unix)]
async fn terminated(ignore_sigterm: bool) {
    use tokio::signal::unix::{signal, SignalKind};
    let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
        return std::future::pending().await;
    };
    loop {
        sigterm.recv().await;
        if !ignore_sigterm {
            return;
        }
        warn!("Ignoring SIGTERM");
    }
}

#[cfg(not(unix))]
async fn terminated(_ignore_sigterm: bool) {
    tokio::signal::ctrl_c().await.ok();
}
