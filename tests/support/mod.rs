//! Test support: a scripted webhook endpoint.
//!
//! Serves a minimal HTTP/1.1 responder on a random local port. Each
//! incoming POST is recorded (body and arrival time) and answered with
//! the next scripted response; once the script runs out, everything gets
//! 204 No Content. Responses always close the connection so request
//! ordering is one-connection-per-request.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// One recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub at: Instant,
    pub body: serde_json::Value,
}

/// A scripted response: status code and JSON body.
pub type ScriptedResponse = (u16, String);

pub struct ScriptedWebhook {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedWebhook {
    /// Bind a local listener and start serving.
    pub async fn start(script: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let recorded = recorded.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, recorded, script).await;
                });
            }
        });

        Self { url, requests }
    }

    /// Bodies of all requests received so far, in arrival order.
    pub async fn received(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|r| r.body.clone())
            .collect()
    }

    /// Arrival times of all requests received so far.
    pub async fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().await.iter().map(|r| r.at).collect()
    }

    /// `content` values of all received messages, in arrival order.
    pub async fn received_contents(&self) -> Vec<String> {
        self.received()
            .await
            .iter()
            .map(|body| body["content"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Poll until at least `count` requests have arrived or `deadline`
    /// passes. Returns whether the count was reached.
    pub async fn wait_for_requests(&self, count: usize, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if self.requests.lock().await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Read one request, record it, answer with the next scripted response.
async fn serve_one(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();

    let header_end = loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = (header_end + content_length).min(buf.len());
    let body = serde_json::from_slice(&buf[header_end..body_end]).unwrap_or(serde_json::Value::Null);

    recorded.lock().await.push(RecordedRequest {
        at: Instant::now(),
        body,
    });

    let (status, response_body) = script
        .lock()
        .await
        .pop_front()
        .unwrap_or((204, String::new()));

    stream
        .write_all(render_response(status, &response_body).as_bytes())
        .await?;
    stream.shutdown().await
}

fn render_response(status: u16, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Response",
    };

    if status == 204 {
        format!("HTTP/1.1 204 {reason}\r\nconnection: close\r\n\r\n")
    } else {
        format!(
            "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
