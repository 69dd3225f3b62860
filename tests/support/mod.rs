#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Scripted status that drops the connection with a TCP reset instead of
/// answering.
pub const RESET_CONNECTION: u16 = 0;

#[derive(Debug, Clone)]
struct Route {
    responses: Vec<(u16, String)>,
    delay: Duration,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
    requests: HashMap<String, String>,
}

/// Minimal HTTP/1.1 server with scripted responses per path. The last
/// scripted response repeats; unknown paths answer 404.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn route(&self, path: &str, responses: &[(u16, &str)]) {
        self.route_delayed(path, Duration::ZERO, responses);
    }

    pub fn route_delayed(&self, path: &str, delay: Duration, responses: &[(u16, &str)]) {
        let route = Route {
            responses: responses
                .iter()
                .map(|(status, body)| (*status, body.to_string()))
                .collect(),
            delay,
        };
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), route);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn template(&self, prefix: &str) -> String {
        format!("http://{}{}{{day}}", self.addr, prefix)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.lock().unwrap().hits.values().sum()
    }

    pub fn last_request(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().requests.get(path).cloned()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let (status, body, delay) = {
        let mut state = state.lock().unwrap();
        let seen = *state.hits.get(&path).unwrap_or(&0);
        state.hits.insert(path.clone(), seen + 1);
        state.requests.insert(path.clone(), head);
        match state.routes.get(&path) {
            Some(route) if !route.responses.is_empty() => {
                let (status, body) = &route.responses[seen.min(route.responses.len() - 1)];
                (*status, body.clone(), route.delay)
            }
            _ => (404, "not found".to_string(), Duration::ZERO),
        }
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if status == RESET_CONNECTION {
        // Zero linger turns the close into an RST.
        #[allow(deprecated)]
        stream.set_linger(Some(Duration::ZERO))?;
        drop(stream);
        return Ok(());
    }

    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        reason(status),
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// A plan day page in the shape the live site uses: a "Scripture" heading
/// next to a list of `/bible/` links, and optionally an embedded video.
pub fn day_page(references: &[&str], video: Option<&str>) -> String {
    let links = references
        .iter()
        .map(|reference| format!(r#"<li><a href="/bible/111/X.1">{reference}</a></li>"#))
        .collect::<String>();
    let iframe = video
        .map(|url| format!(r#"<iframe src="{url}"></iframe>"#))
        .unwrap_or_default();
    format!(
        "<html><body><main><section><h2>Scripture</h2><ul>{links}</ul></section>{iframe}\
         <footer><a href=\"https://www.youtube.com/@channel\">Channel</a></footer></main></body></html>"
    )
}
