//! Local HTTP stand-in for the CoinGecko API, shared by the client and export tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{Config, PlanTier};

pub const MARKET_CHART_BODY: &str = r#"{"prices":[[1704067200000,42000.0],[1704153600000,43000.0]],"market_caps":[[1704067200000,8.2e11],[1704153600000,8.4e11]],"total_volumes":[[1704067200000,1.5e10],[1704153600000,1.6e10]]}"#;

pub fn test_config(base_url: &str, pro: bool, key: Option<&str>) -> Config {
    Config {
        plan: if pro { PlanTier::Pro } else { PlanTier::Demo },
        api_key: key.map(str::to_string),
        base_url: base_url.to_string(),
        log_level: "debug".to_string(),
        http_timeout_secs: 5,
    }
}

/// One canned answer: served when `path` occurs in the request line.
pub struct Route {
    pub path: &'static str,
    pub status_line: &'static str,
    pub body: String,
}

impl Route {
    pub fn ok(path: &'static str, body: impl Into<String>) -> Self {
        Self {
            path,
            status_line: "200 OK",
            body: body.into(),
        }
    }
}

/// Accepts `count` connections one after another and answers each from the first matching
/// route (404 otherwise). Yields the raw request heads in arrival order.
pub async fn serve(routes: Vec<Route>, count: usize) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let head = String::from_utf8_lossy(&buf).to_string();
            let request_line = head.lines().next().unwrap_or_default();

            let (status_line, body) = routes
                .iter()
                .find(|r| request_line.contains(r.path))
                .map(|r| (r.status_line, r.body.as_str()))
                .unwrap_or(("404 Not Found", r#"{"error":"coin not found"}"#));
            let resp = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            requests.push(head);
        }
        requests
    });
    (format!("http://{addr}"), handle)
}

/// Answers a single request with `status_line` and `body`.
pub async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<Vec<String>>) {
    serve(
        vec![Route {
            path: "",
            status_line,
            body,
        }],
        1,
    )
    .await
}
