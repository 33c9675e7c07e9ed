use relaycache::cache::Cache;
use relaycache::worker::handle_client;
use relaycache::MAX_CLIENTS;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

fn usage_and_exit(program: &str) -> ! {
    eprintln!("Usage: {program} <port>");
    std::process::exit(1);
}

fn parse_port() -> u16 {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "relaycache".to_string());

    let (Some(port_arg), None) = (args.next(), args.next()) else {
        usage_and_exit(&program);
    };

    match port_arg.parse::<u16>() {
        Ok(port) => port,
        Err(_) => usage_and_exit(&program),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaycache=info".parse()?),
        )
        .init();

    let port = parse_port();

    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(format!("0.0.0.0:{port}").parse()?)?;
    let listener = socket.listen(MAX_CLIENTS as u32)?;

    info!(port, max_clients = MAX_CLIENTS, "proxy listening");

    let cache = Cache::new();
    let admission = Arc::new(Semaphore::new(MAX_CLIENTS));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (client, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed, continuing: {e}");
                        continue;
                    }
                };

                // Admission token acquired before any work beyond holding the
                // socket, per spec.md §4.4: an overloaded proxy blocks new
                // accepts rather than accumulating unbounded per-request state.
                let permit = admission.clone().acquire_owned().await.expect("semaphore not closed");
                debug!(%addr, "accepted connection");

                let cache = cache.clone();
                tokio::spawn(async move {
                    handle_client(client, cache).await;
                    drop(permit);
                });
            }
        }
    }

    Ok(())
}
