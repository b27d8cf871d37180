//! Stdio transport: the pump over stdin/stdout. Everything diagnostic
//! goes to stderr through tracing; stdout carries only protocol bytes.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;

use crate::handler::RpcHandler;
use crate::pump::pump;

/// Serve until EOF on stdin.
pub async fn serve(handler: Arc<RpcHandler>) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    pump(reader, writer, handler).await
}
