//! Scripted beanstalkd server for client tests
#![allow(dead_code)] // Test utility module - not all methods used in every test
//!
//! Accepts a single connection, records every command line (and the body of
//! each `put`) and answers with the scripted replies in order. When the script
//! runs out the connection is closed.

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::Mutex,
    task::JoinHandle,
};

/// Command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub line: String,
    pub body: Option<Vec<u8>>,
}

pub struct MockBeanstalkd {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    handle: JoinHandle<()>,
}

impl MockBeanstalkd {
    pub async fn start(replies: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);

            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    return;
                }
                let line = line.trim_end().to_string();

                let body = if line.starts_with("put ") {
                    let len: usize = line
                        .rsplit(' ')
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    let mut body = vec![0u8; len + 2];
                    reader.read_exact(&mut body).await.unwrap();
                    body.truncate(len);
                    Some(body)
                } else {
                    None
                };

                log.lock().await.push(Received { line, body });
                if write.write_all(&reply).await.is_err() {
                    return;
                }
            }
        });

        Self {
            addr,
            received,
            handle,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .map(|r| r.line.clone())
            .collect()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

pub fn reply(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}
