//! A raw TCP backend that misbehaves on cue.
//!
//! HTTP mock servers always finish their responses; failover tests also need
//! backends that drop the connection mid-body or never finish at all.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::BackendConfig;

/// What the backend does with every request it receives.
#[derive(Debug, Clone)]
pub enum Script {
    /// Send the chunks and finish the response cleanly.
    Complete(Vec<String>),
    /// Send the chunks, then close the connection without finishing the body.
    DropAfter(Vec<String>),
    /// Read the request and close the connection without answering.
    DropBeforeHeaders,
    /// Send the chunks, then keep the connection open and idle.
    Hang(Vec<String>),
}

/// Terminate each line with `\n`, ready to be used as chunks.
pub fn ndjson(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

pub struct ScriptedBackend {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ScriptedBackend {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind scripted backend");
        let addr = listener.local_addr().expect("scripted backend has no address");
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let script = script.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let _ = serve(socket, script, counter).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn config(&self, name: &str) -> BackendConfig {
        BackendConfig::new(name, &self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    script: Script,
    counter: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    read_request(&mut socket).await?;
    counter.fetch_add(1, Ordering::SeqCst);

    match script {
        Script::Complete(chunks) => {
            write_head(&mut socket).await?;
            for chunk in &chunks {
                write_chunk(&mut socket, chunk.as_bytes()).await?;
            }
            socket.write_all(b"0\r\n\r\n").await?;
            socket.shutdown().await
        }
        Script::DropAfter(chunks) => {
            write_head(&mut socket).await?;
            for chunk in &chunks {
                write_chunk(&mut socket, chunk.as_bytes()).await?;
            }
            Ok(())
        }
        Script::DropBeforeHeaders => Ok(()),
        Script::Hang(chunks) => {
            write_head(&mut socket).await?;
            for chunk in &chunks {
                write_chunk(&mut socket, chunk.as_bytes()).await?;
            }
            // Stays open until the client goes away.
            let mut buf = [0u8; 64];
            while socket.read(&mut buf).await? > 0 {}
            Ok(())
        }
    }
}

/// Read one request: headers plus a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(())
}

async fn write_head(socket: &mut TcpStream) -> std::io::Result<()> {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\n\
              content-type: application/x-ndjson\r\n\
              transfer-encoding: chunked\r\n\
              connection: close\r\n\r\n",
        )
        .await?;
    socket.flush().await
}

async fn write_chunk(socket: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    socket
        .write_all(format!("{:x}\r\n", data.len()).as_bytes())
        .await?;
    socket.write_all(data).await?;
    socket.write_all(b"\r\n").await?;
    socket.flush().await
}
