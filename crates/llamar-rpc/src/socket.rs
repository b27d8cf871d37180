//! TCP transport: accept connections and run the line pump per
//! connection, one task each. Ordering within a connection comes from the
//! pump's sequential loop; ordering across connections is unspecified.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::handler::RpcHandler;
use crate::pump::pump;

/// Bind the listener. Failure here is fatal to startup.
pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))
}

/// Accept loop. Ctrl-C interrupts the loop; in-flight connections are
/// dropped with the runtime, which discards their pending results.
pub async fn serve(listener: TcpListener, handler: Arc<RpcHandler>) -> Result<()> {
    let local_addr = listener.local_addr().context("failed to read local address")?;
    info!(%local_addr, "tool server listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received; closing listener");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("failed to accept connection")?;
                let connection_handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, connection_handler).await {
                        warn!(%peer, %error, "connection ended with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<RpcHandler>) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    pump(BufReader::new(read_half), write_half, handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::path::PathBuf;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use llamar_config::Config;
    use llamar_skills::tools::register_builtins;
    use llamar_skills::{SkillContext, SkillRegistry};

    fn handler() -> Arc<RpcHandler> {
        let mut registry = SkillRegistry::new();
        register_builtins(&mut registry).unwrap();
        let ctx = SkillContext::bare(Arc::new(Config::default()), PathBuf::from("/tmp"));
        Arc::new(RpcHandler::new(Arc::new(registry), ctx))
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, handler()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n")
            .await
            .unwrap();
        // A notification in the middle must produce no bytes.
        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\",\"params\":{}}\n")
            .await
            .unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let first: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["result"]["serverInfo"]["name"], "llamar");

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let second: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(second["id"], 2, "notification must not produce a response");
        assert!(second["result"]["tools"].as_array().unwrap().len() > 3);

        drop(write_half);
        server.abort();
    }

    #[tokio::test]
    async fn test_sequential_connections() {
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, handler()));

        for i in 0..3 {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let request =
                format!("{{\"jsonrpc\":\"2.0\",\"id\":{i},\"method\":\"initialize\",\"params\":{{}}}}\n");
            write_half.write_all(request.as_bytes()).await.unwrap();

            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let response: Value = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(response["id"], i);
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_bind_failure_is_error() {
        let first = bind(0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        // Binding the same port again must fail loudly.
        assert!(bind(port).await.is_err());
    }
}
