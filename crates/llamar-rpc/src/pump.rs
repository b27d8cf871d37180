//! The shared line pump: read one line, dispatch, write the response and
//! flush, repeat until EOF. One request is fully handled before the next
//! line is read, which is what keeps per-connection ordering (and with it
//! the session invariants) without extra locking.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

use crate::handler::RpcHandler;

pub async fn pump<R, W>(mut reader: R, mut writer: W, handler: Arc<RpcHandler>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .context("failed to read request line")?;
        if bytes == 0 {
            return Ok(());
        }

        let response = handler.handle_line(&line).await;
        let Some(response) = response else {
            continue;
        };

        if let Err(write_error) = write_response(&mut writer, &response).await {
            // The client is gone; the in-flight result is discarded.
            error!(%write_error, "failed to write response; closing connection");
            return Ok(());
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &str) -> Result<()> {
    writer
        .write_all(response.as_bytes())
        .await
        .context("failed to write response")?;
    writer
        .write_all(b"\n")
        .await
        .context("failed to write response delimiter")?;
    writer.flush().await.context("failed to flush response")
}
