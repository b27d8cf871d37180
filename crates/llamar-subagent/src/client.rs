//! Line-framed MCP client for talking to a child tool server over TCP.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct McpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: i64,
}

impl McpClient {
    pub async fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to connect to subagent on port {port}"))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 1,
        })
    }

    /// MCP handshake: `initialize` request plus the initialized
    /// notification.
    pub async fn initialize(&mut self) -> Result<Value> {
        let result = self
            .request("initialize", json!({"protocolVersion": "2024-11-05"}))
            .await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// Invoke a tool and return the text of its envelope. An Error
    /// envelope comes back as `Err` here so callers see one failure path.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        let text = result
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            bail!("subagent tool '{name}' failed: {text}");
        }
        Ok(text)
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_line(&frame).await?;

        let mut line = String::new();
        let bytes = tokio::time::timeout(REQUEST_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("subagent response timed out")?
            .context("failed to read subagent response")?;
        if bytes == 0 {
            bail!("subagent closed the connection");
        }

        let response: Value =
            serde_json::from_str(line.trim()).context("failed to parse subagent response")?;
        if response.get("id") != Some(&json!(id)) {
            bail!("subagent response id mismatch");
        }
        if let Some(error) = response.get("error") {
            bail!("subagent returned an error: {error}");
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        let frame = json!({"jsonrpc": "2.0", "method": method});
        self.send_line(&frame).await
    }

    async fn send_line(&mut self, frame: &Value) -> Result<()> {
        let payload = serde_json::to_string(frame).context("failed to serialize request")?;
        self.writer
            .write_all(payload.as_bytes())
            .await
            .context("failed to write request")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("failed to write request delimiter")?;
        self.writer.flush().await.context("failed to flush request")
    }
}
