use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::{ChatError, ChatErrorCode};
use crate::types::{ChunkSignal, RequestHeaders};

/// A fully resolved POST request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: RequestHeaders,
    pub body: Value,
}

/// Status and body text of a finished request. For streamed 2xx responses
/// the body is empty: the bytes went to the chunk handler instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Invoked once per raw read of a streamed 2xx body.
pub type ChunkHandler<'a> = &'a mut (dyn FnMut(&[u8]) -> ChunkSignal + Send);

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, ChatError>> + Send + 'a>>;

pub trait Transport: Send + Sync {
    /// Sends `request`. With a chunk handler, a 2xx body is handed over read
    /// by read until it is exhausted or the handler returns `Halt`.
    fn perform_request<'a>(
        &'a self,
        request: HttpRequest,
        chunk_handler: Option<ChunkHandler<'a>>,
    ) -> TransportFuture<'a>;
}

pub type TransportRef = Arc<dyn Transport>;

/// Process-wide reqwest transport.
pub fn default_transport() -> TransportRef {
    static TRANSPORT: OnceLock<TransportRef> = OnceLock::new();
    TRANSPORT
        .get_or_init(|| Arc::new(ReqwestTransport))
        .clone()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl Transport for ReqwestTransport {
    fn perform_request<'a>(
        &'a self,
        request: HttpRequest,
        chunk_handler: Option<ChunkHandler<'a>>,
    ) -> TransportFuture<'a> {
        Box::pin(send_request(request, chunk_handler))
    }
}

async fn send_request(
    request: HttpRequest,
    chunk_handler: Option<ChunkHandler<'_>>,
) -> Result<HttpResponse, ChatError> {
    let client = shared_http_client(&request.url);
    let body = serde_json::to_vec(&request.body).map_err(|error| {
        ChatError::new(
            ChatErrorCode::ProviderTransport,
            format!("Failed to encode request body: {error}"),
        )
    })?;

    let mut builder = client.post(request.url.as_str());
    for (name, value) in &request.headers {
        for value in value.values() {
            builder = builder.header(name.as_str(), value);
        }
    }

    let mut response = builder.body(body).send().await.map_err(|error| {
        ChatError::new(
            ChatErrorCode::ProviderTransport,
            format!("Request to {} failed: {error}", request.url),
        )
    })?;
    let status = response.status().as_u16();

    let handler = match chunk_handler {
        Some(handler) if response.status().is_success() => handler,
        _ => {
            let body = response.text().await.map_err(|error| {
                ChatError::new(
                    ChatErrorCode::ProviderTransport,
                    format!("Failed to read response body: {error}"),
                )
            })?;
            return Ok(HttpResponse { status, body });
        }
    };

    loop {
        let chunk = response.chunk().await.map_err(|error| {
            ChatError::new(
                ChatErrorCode::ProviderTransport,
                format!("Stream read failed: {error}"),
            )
        })?;
        let Some(chunk) = chunk else {
            break;
        };
        if handler(chunk.as_ref()) == ChunkSignal::Halt {
            debug!(url = %request.url, "stream halted by parser");
            break;
        }
    }

    Ok(HttpResponse {
        status,
        body: String::new(),
    })
}

fn shared_http_client(url: &str) -> &'static Client {
    static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();
    static LOOPBACK_CLIENT: OnceLock<Client> = OnceLock::new();

    if is_loopback_url(url) {
        LOOPBACK_CLIENT.get_or_init(|| {
            Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new())
        })
    } else {
        DEFAULT_CLIENT.get_or_init(Client::new)
    }
}

fn is_loopback_url(url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "[::1]"
}
