// Shared by several test binaries, not all of which use every helper.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// How the mock server answers one request
#[derive(Clone, Debug)]
pub enum Reply {
    Json(u16, &'static str),
    /// Read the request and never answer
    Hang,
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lower case
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Plain HTTP/1.1 server answering with scripted replies.
///
/// The n-th request gets the n-th reply; once the script is used up the last
/// reply repeats. Every request is recorded before it is answered.
pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let port = listener
            .local_addr()
            .expect("failed to get mock server address")
            .port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let replies = Arc::new(replies);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = recorded.clone();
                let replies = replies.clone();

                tokio::spawn(async move {
                    serve(stream, recorded, replies).await;
                });
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}/rest"),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("poisoned").len()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    replies: Arc<Vec<Reply>>,
) {
    let mut reader = BufReader::new(&mut stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    // read HTTP headers
    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.is_err() {
            return;
        }

        if line.trim().is_empty() {
            break;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }

    let reply = {
        let mut recorded = recorded.lock().expect("poisoned");
        let index = recorded.len().min(replies.len().saturating_sub(1));
        recorded.push(RecordedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&body).to_string(),
        });
        replies.get(index).cloned().unwrap_or(Reply::Json(200, "{}"))
    };

    match reply {
        Reply::Json(status, body) => {
            let response = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        Reply::Hang => std::future::pending::<()>().await,
    }
}
