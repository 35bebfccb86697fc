//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a mutable table of routes, each with a status, body and optional
//! delay before the response is written, and counts requests per path. HEAD is
//! answered with the headers a GET would get. Every response closes the
//! connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

#[derive(Clone)]
pub struct FeedServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl FeedServer {
    /// Starts a server in a background thread. It runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}/"),
            state,
        }
    }

    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:12345/`.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.route(path, 200, body.into(), Duration::ZERO);
    }

    pub fn serve_slowly(&self, path: &str, body: impl Into<Vec<u8>>, delay: Duration) {
        self.route(path, 200, body.into(), delay);
    }

    pub fn fail(&self, path: &str, status: u16) {
        self.route(path, status, b"error".to_vec(), Duration::ZERO);
    }

    pub fn hits(&self, path: &str) -> usize {
        let key = normalize(path);
        self.state.lock().unwrap().hits.get(&key).copied().unwrap_or(0)
    }

    fn route(&self, path: &str, status: u16, body: Vec<u8>, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(normalize(path), Route { status, body, delay });
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").split('?').next().unwrap_or("/").to_string();

    let route = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(path.clone()).or_insert(0) += 1;
        state.routes.get(&path).cloned()
    };
    let route = route.unwrap_or(Route {
        status: 404,
        body: b"not found".to_vec(),
        delay: Duration::ZERO,
    });

    if !route.delay.is_zero() {
        thread::sleep(route.delay);
    }

    let reason = match route.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        reason,
        route.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    if !method.eq_ignore_ascii_case("HEAD") {
        let _ = stream.write_all(&route.body);
    }
    let _ = stream.flush();
}
