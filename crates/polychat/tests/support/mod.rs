#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// What the test server saw of the single request it served.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub type Captured = Arc<Mutex<Option<CapturedRequest>>>;

/// Serves one request, writing `parts` of the body as separate socket
/// writes so the client sees them as separate reads.
pub fn spawn_server(status: u16, content_type: &str, parts: Vec<String>) -> (String, Captured) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    let captured: Captured = Arc::new(Mutex::new(None));
    let captured_thread = Arc::clone(&captured);
    let content_type = content_type.to_string();

    thread::spawn(move || {
        let Ok((mut socket, _)) = listener.accept() else {
            return;
        };
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set read timeout");
        *captured_thread.lock().expect("capture lock") = read_http_request(&mut socket);

        let length: usize = parts.iter().map(String::len).sum();
        let head = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n",
            reason_phrase(status)
        );
        socket.write_all(head.as_bytes()).expect("write head");
        let _ = socket.flush();
        for part in parts {
            thread::sleep(Duration::from_millis(15));
            if socket.write_all(part.as_bytes()).is_err() {
                return;
            }
            let _ = socket.flush();
        }
    });

    (format!("http://{address}"), captured)
}

pub fn spawn_json_server(status: u16, body: Value) -> (String, Captured) {
    spawn_server(status, "application/json", vec![body.to_string()])
}

pub fn spawn_sse_server(parts: Vec<String>) -> (String, Captured) {
    spawn_server(200, "text/event-stream", parts)
}

pub fn captured(captured: &Captured) -> CapturedRequest {
    captured
        .lock()
        .expect("capture lock")
        .clone()
        .expect("server captured a request")
}

/// `data: <json>` frames separated by blank lines.
pub fn sse_body(events: &[Value], append_done: bool) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("data: ");
        body.push_str(&serde_json::to_string(event).expect("serialize event"));
        body.push_str("\n\n");
    }
    if append_done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

/// Cuts `body` into pieces of at most `size` bytes, on char boundaries.
pub fn split_every(body: &str, size: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for ch in body.chars() {
        if current.len() + ch.len_utf8() > size && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn read_http_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 8192];
    let header_end = loop {
        let read_len = socket.read(&mut buffer).ok()?;
        if read_len == 0 {
            return None;
        }
        raw.extend_from_slice(&buffer[..read_len]);
        if let Some(position) = find(&raw, b"\r\n\r\n") {
            break position;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[(header_end + 4)..].to_vec();
    while body.len() < content_length {
        let read_len = socket.read(&mut buffer).ok()?;
        if read_len == 0 {
            break;
        }
        body.extend_from_slice(&buffer[..read_len]);
    }

    Some(CapturedRequest {
        method,
        path,
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
