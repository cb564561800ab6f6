//! CDP Transport Layer
//!
//! Speaks the DevTools protocol to Chrome over a minimal client-side WebSocket.
//! Responses are routed back to their callers by message id; events are not
//! consumed by the harvester and are dropped at trace level.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// WebSocket opcodes we care about
mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Encode one masked client frame
fn encode_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(0x80 | opcode);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    // Clients must mask every frame (RFC 6455 5.3)
    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

fn write_frame(stream: &mut TcpStream, opcode: u8, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    stream.write_all(&encode_frame(opcode, data))?;
    stream.flush()
}

/// Read a WebSocket frame, returns (opcode, payload)
fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    use std::io::Read;

    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext)?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext)?;
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}

/// Turn a raw response message into the caller's result
fn response_result(msg: &Value) -> Result<Value> {
    match msg.get("error") {
        Some(error) => Err(Error::cdp(
            msg.get("method")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown"),
            error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown"),
        )),
        None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
    }
}

/// CDP Transport - owns the Chrome process and the socket to it
pub struct Transport {
    child: Mutex<Child>,
    writer: Mutex<TcpStream>,
    next_id: AtomicU64,
    pending: PendingMap,
    /// Set once the reader thread has stopped
    closed: Arc<AtomicBool>,
    /// Ceiling for any single command's response
    command_timeout: Duration,
}

impl Transport {
    /// Connect to Chrome's DevTools WebSocket
    pub fn new(child: Child, ws_url: &str, command_timeout: Duration) -> Result<Self> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, path) = url.split_once('/').unwrap_or((url, ""));

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET /{path} HTTP/1.1\r\n\
             Host: {host_port}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );

        use std::io::{Read, Write};
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        let mut response = [0u8; 1024];
        let n = stream
            .read(&mut response)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        let response = String::from_utf8_lossy(&response[..n]);
        if !response.contains("101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response
            )));
        }

        tracing::debug!(url = ws_url, "WebSocket connected");

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, &reader_pending);
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed-channel error
            reader_pending.blocking_lock().clear();
        });

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending,
            closed,
            command_timeout,
        })
    }

    fn reader_loop(mut stream: TcpStream, pending: &PendingMap) {
        loop {
            let (opcode, payload) = match read_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let msg: Value = match serde_json::from_slice(&payload) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("Failed to parse CDP message: {}", e);
                            continue;
                        }
                    };

                    let Some(id) = msg.get("id").and_then(|v| v.as_u64()) else {
                        tracing::trace!(
                            method = msg.get("method").and_then(|m| m.as_str()),
                            "CDP event ignored"
                        );
                        continue;
                    };

                    let sender = pending.blocking_lock().remove(&id);
                    match sender {
                        Some(sender) => {
                            let _ = sender.send(response_result(&msg));
                        }
                        None => tracing::trace!("Response for unknown id: {}", id),
                    }
                }
                ws::OPCODE_PING => {
                    let _ = write_frame(&mut stream, ws::OPCODE_PONG, &payload);
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by Chrome");
                    break;
                }
                _ => {}
            }
        }

        tracing::debug!("CDP reader loop ended");
    }

    /// Whether the socket to Chrome is gone
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a browser-level CDP command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(None, method, params).await
    }

    /// Send a CDP command to an attached target session
    pub async fn send_to_session<C, R>(
        &self,
        session_id: &str,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(Some(session_id), method, params).await
    }

    async fn dispatch<C, R>(&self, session_id: Option<&str>, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(Error::transport(format!(
                "Connection to Chrome closed before {}",
                method
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
            // The reader may have cleared the map between the check above and the insert
            if self.is_closed() {
                pending.remove(&id);
                return Err(Error::transport(format!(
                    "Connection to Chrome closed before {}",
                    method
                )));
            }
        }

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?,
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }
        let data = serde_json::to_vec(&msg)?;

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut writer, ws::OPCODE_TEXT, &data) {
                self.pending.lock().await.remove(&id);
                return Err(Error::transport_io("WebSocket write failed", e));
            }
        }

        tracing::trace!(method, id, session = session_id, "Sent CDP command");

        let result = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(received) => received.map_err(|_| Error::transport("Response channel closed"))??,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(method, id, timeout_ms = self.command_timeout.as_millis() as u64, "CDP command timed out");
                return Err(Error::SessionLost(format!(
                    "{} got no response within {}ms",
                    method,
                    self.command_timeout.as_millis()
                )));
            }
        };
        Ok(serde_json::from_value(result)?)
    }

    /// Close the socket and kill Chrome
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = write_frame(&mut writer, ws::OPCODE_CLOSE, &[]);
        }

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Never leave an orphaned Chrome behind, whatever the exit path
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Launch Chrome and read the DevTools WebSocket URL from its stderr
pub fn launch_chrome(path: &Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut child = Command::new(path)
        .args(args)
        .arg("--remote-debugging-port=0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to launch Chrome: {}", e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Launch("No stderr from Chrome".into()))?;

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    let ws_url = BufReader::new(stderr)
        .lines()
        .map_while(|line| line.ok())
        .inspect(|line| tracing::trace!("Chrome stderr: {}", line))
        .find_map(|line| {
            if !line.contains("DevTools listening on") {
                return None;
            }
            line.find("ws://").map(|start| line[start..].trim().to_string())
        });

    match ws_url {
        Some(url) => {
            tracing::info!(url = %url, "Chrome DevTools endpoint ready");
            Ok((child, url))
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(Error::Launch(
                "Failed to get DevTools WebSocket URL from Chrome".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_frame_is_masked_and_sized() {
        let frame = encode_frame(ws::OPCODE_TEXT, b"hello");
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x80 | 5);
        let mask = &frame[2..6];
        let payload: Vec<u8> = frame[6..]
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_medium_frame_uses_16_bit_length() {
        let data = vec![b'x'; 300];
        let frame = encode_frame(ws::OPCODE_TEXT, &data);
        assert_eq!(frame[1], 0x80 | 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);
        assert_eq!(frame.len(), 4 + 4 + 300);
    }

    /// Accept one WebSocket client, complete the handshake, then stay silent
    #[cfg(unix)]
    fn silent_endpoint() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
                .unwrap();
            while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
        });
        format!("ws://{}/devtools/browser/test", addr)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unanswered_command_times_out_as_session_loss() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let transport =
            Transport::new(child, &silent_endpoint(), Duration::from_millis(100)).unwrap();

        let err = transport
            .send::<_, Value>("Runtime.evaluate", &json!({"expression": "1"}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionLost(_)));
        assert!(err.is_session_lost());
        assert!(transport.pending.lock().await.is_empty());
    }

    #[test]
    fn test_error_response_maps_to_cdp_error() {
        let msg = json!({"id": 3, "error": {"code": -32000, "message": "No node with given id"}});
        match response_result(&msg) {
            Err(Error::Cdp { code, message, .. }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "No node with given id");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
