//! Mock decision services for tests

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use std::time::Duration;

pub(crate) struct MockDecisionServer {
    /// Base URL, without a trailing slash
    pub url: String,
    /// Raw request heads, one per accepted connection
    pub requests: mpsc::UnboundedReceiver<String>,
}

/// Start a server that answers every connection with the same raw HTTP response
pub(crate) async fn start_mock_decision_server(response: &str) -> MockDecisionServer {
    start_delayed_decision_server(response, Duration::ZERO).await
}

/// Like [`start_mock_decision_server`], but every reply is held back for `delay`
pub(crate) async fn start_delayed_decision_server(response: &str, delay: Duration) -> MockDecisionServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = response.to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let response = response.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                serve_once(stream, &response, delay, tx).await;
            });
        }
    });

    MockDecisionServer {
        url: format!("http://127.0.0.1:{}", addr.port()),
        requests: rx,
    }
}

async fn serve_once(
    mut stream: TcpStream,
    response: &str,
    delay: Duration,
    tx: mpsc::UnboundedSender<String>,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Start a server that accepts connections and never answers
pub(crate) async fn start_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("http://127.0.0.1:{}", addr.port())
}

/// URL of a local port with nothing listening on it
pub(crate) async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
