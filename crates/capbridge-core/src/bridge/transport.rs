//! Line-delimited JSON transport over any byte stream

use crate::error::{BridgeError, Error, Result};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Default upper bound on a single inbound line
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Outcome of reading one newline-terminated line
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    /// The line (newline included) is in the buffer
    Line,
    /// Longer than the limit; consumed and discarded, never buffered
    Oversized(usize),
}

/// Read one line into `buf`, holding at most `max_bytes` of it in memory.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut total = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match total {
                0 => LineRead::Eof,
                n if n > max_bytes => LineRead::Oversized(n),
                _ => LineRead::Line,
            });
        }

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        total += used;
        if total <= max_bytes {
            buf.extend_from_slice(&available[..used]);
        } else if !buf.is_empty() {
            buf.clear();
            buf.shrink_to_fit();
        }
        reader.consume(used);

        if done {
            return Ok(if total > max_bytes {
                LineRead::Oversized(total)
            } else {
                LineRead::Line
            });
        }
    }
}

/// Cloneable, non-blocking handle for writing to a [`Transport`].
///
/// Writes go to an unbounded queue drained by the writer task, so sending
/// never waits on the peer.
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<String>,
}

impl TransportSender {
    /// Queue any serializable message as one line
    pub fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        trace!("Queueing: {}", json);
        self.tx.send(json).map_err(|_| {
            Error::Bridge(BridgeError::TransportClosed(
                "writer task has stopped".to_string(),
            ))
        })
    }

    pub fn send_request(&self, request: &JsonRpcRequest) -> Result<()> {
        self.send(request)
    }

    pub fn send_response(&self, response: &JsonRpcResponse) -> Result<()> {
        self.send(response)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport layer for bridge communication.
/// Uses channels to avoid lock contention between send and receive.
pub struct Transport {
    sender: TransportSender,
    /// Lines read by the reader task
    inbound_rx: Mutex<mpsc::Receiver<String>>,
    reader_task: tokio::task::JoinHandle<()>,
    _writer_task: tokio::task::JoinHandle<()>,
    _stderr_task: Option<tokio::task::JoinHandle<()>>,
}

impl Transport {
    /// Build a transport over an arbitrary reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_max_line_bytes(reader, writer, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes<R, W>(reader: R, writer: W, max_line_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(100);

        let writer_task = tokio::spawn(Self::write_task(writer, outbound_rx));
        let reader_task = tokio::spawn(Self::read_task(reader, inbound_tx, max_line_bytes));

        Self {
            sender: TransportSender { tx: outbound_tx },
            inbound_rx: Mutex::new(inbound_rx),
            reader_task,
            _writer_task: writer_task,
            _stderr_task: None,
        }
    }

    /// Spawn the client context as a child process and talk over its stdio
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
        max_line_bytes: usize,
    ) -> Result<(Self, Child)> {
        debug!("Spawning client: {} {:?} (cwd: {:?})", command, args, cwd);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Bridge(BridgeError::TransportClosed(format!(
                "Failed to spawn client process: {}",
                e
            )))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Bridge(BridgeError::TransportClosed(
                "Failed to capture stdin".to_string(),
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Bridge(BridgeError::TransportClosed(
                "Failed to capture stdout".to_string(),
            ))
        })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Bridge(BridgeError::TransportClosed(
                "Failed to capture stderr".to_string(),
            ))
        })?;

        let mut transport = Self::with_max_line_bytes(stdout, stdin, max_line_bytes);

        // Drain stderr so the client can't deadlock on a full pipe.
        transport._stderr_task = Some(tokio::spawn(Self::read_stderr_task(stderr)));

        Ok((transport, child))
    }

    /// Talk to the parent over this process's own stdin/stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Two transports connected back to back through an in-process pipe
    pub fn in_memory_pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (Self::new(a_read, a_write), Self::new(b_read, b_write))
    }

    /// Background task draining the outbound queue
    async fn write_task<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(data.as_bytes()).await {
                error!("Failed to write line: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("Failed to flush writer: {}", e);
                break;
            }
        }
        // Signal EOF to the peer.
        let _ = writer.shutdown().await;
        debug!("Writer task ended");
    }

    /// Background task reading inbound lines
    async fn read_task<R>(reader: R, tx: mpsc::Sender<String>, max_line_bytes: usize)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            match read_bounded_line(&mut reader, &mut buf, max_line_bytes).await {
                Ok(LineRead::Eof) => {
                    debug!("Peer closed the stream");
                    break;
                }
                Ok(LineRead::Oversized(n)) => {
                    warn!("Dropping oversized message ({} bytes)", n);
                }
                Ok(LineRead::Line) => {
                    let text = match std::str::from_utf8(&buf) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Skipping non-UTF-8 line ({} bytes): {}", buf.len(), e);
                            continue;
                        }
                    };
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        trace!("Received: {}", trimmed);
                        if tx.send(trimmed.to_string()).await.is_err() {
                            warn!("Failed to forward line, channel closed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading from peer: {}", e);
                    break;
                }
            }
        }
    }

    /// Background task to drain the child's stderr into our log.
    async fn read_stderr_task(stderr: ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("Client stderr closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        info!(target: "capbridge::client", "{}", trimmed);
                    }
                }
                Err(e) => {
                    error!("Error reading client stderr: {}", e);
                    break;
                }
            }
        }
    }

    /// Handle for queueing outbound messages
    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    pub fn send_request(&self, request: &JsonRpcRequest) -> Result<()> {
        self.sender.send_request(request)
    }

    pub fn send_response(&self, response: &JsonRpcResponse) -> Result<()> {
        self.sender.send_response(response)
    }

    /// Receive next raw line from the peer. `None` once the peer is gone.
    pub async fn recv_line(&self) -> Option<String> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Receive with timeout.
    pub async fn recv_line_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<String>> {
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(v) => Ok(v),
            Err(_) => Err(Error::Bridge(BridgeError::Timeout)),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The reader holds the read half; release it so the stream can close.
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_transport_spawn_invalid_command() {
        let result = Transport::spawn(
            "nonexistent_command_12345",
            &[],
            &HashMap::new(),
            None,
            DEFAULT_MAX_LINE_BYTES,
        );

        assert!(result.is_err());
        if let Err(Error::Bridge(BridgeError::TransportClosed(msg))) = result {
            assert!(msg.contains("Failed to spawn"));
        } else {
            panic!("Expected TransportClosed error");
        }
    }

    #[tokio::test]
    async fn test_in_memory_pair_carries_lines_both_ways() {
        let (left, right) = Transport::in_memory_pair();

        let request = JsonRpcRequest::new(1, "api/openFileDialog", None);
        left.send_request(&request).unwrap();
        let line = right
            .recv_line_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(line.contains("\"method\":\"api/openFileDialog\""));

        let response = JsonRpcResponse::success(1, serde_json::json!({"path": null}));
        right.send_response(&response).unwrap();
        let line = left
            .recv_line_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(line.contains("\"id\":1"));
    }

    #[tokio::test]
    async fn test_peer_drop_ends_stream() {
        let (left, right) = Transport::in_memory_pair();
        drop(right);

        let next = left.recv_line_timeout(Duration::from_secs(1)).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_oversized_lines_are_skipped() {
        let (a, b) = tokio::io::duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let small = Transport::with_max_line_bytes(a_read, a_write, 32);
        let peer = Transport::new(b_read, b_write);

        peer.sender().send(&"x".repeat(100)).unwrap();
        peer.sender().send(&"ok").unwrap();

        let line = small
            .recv_line_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "\"ok\"");
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped_and_stream_survives() {
        let (a, mut raw) = tokio::io::duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let transport = Transport::new(a_read, a_write);

        raw.write_all(b"\xff\xfe garbage\n{\"after\":true}\n").await.unwrap();

        let line = transport
            .recv_line_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "{\"after\":true}");
    }

    #[tokio::test]
    async fn test_bounded_read_discards_without_buffering() {
        let input = format!("{}\nshort\ntail", "y".repeat(10_000));
        let mut reader = BufReader::with_capacity(64, input.as_bytes());
        let mut buf = Vec::new();

        let first = read_bounded_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(first, LineRead::Oversized(10_001));
        assert!(buf.capacity() <= 64);

        let second = read_bounded_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(second, LineRead::Line);
        assert_eq!(buf, b"short\n");

        let third = read_bounded_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(third, LineRead::Line);
        assert_eq!(buf, b"tail");

        let end = read_bounded_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(end, LineRead::Eof);
    }
}
