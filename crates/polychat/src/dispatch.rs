use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::delivery::{ChatEventStream, ChatMessage, EventStream, StreamMessage, StreamTask, spawn_task};
use crate::error::{ChatError, ChatErrorCode};
use crate::provider::{ChatProvider, ProviderRef};
use crate::providers::{ensure_builtin_providers_registered, join_url};
use crate::registry::get_provider;
use crate::transport::{ChunkHandler, HttpRequest, Transport, TransportRef, default_transport};
use crate::types::{ChunkSignal, HeaderValue};
use crate::validation::validate_options;

/// Appended to the leftover buffer at end of stream so that a final frame
/// sent without its terminator is still parsed.
const FLUSH_TERMINATOR: &str = "\n\n";

fn resolve_provider(name: &str) -> Result<ProviderRef, ChatError> {
    ensure_builtin_providers_registered();
    get_provider(name).ok_or_else(|| {
        ChatError::new(
            ChatErrorCode::ProviderNotFound,
            format!("No provider registered for name: {name}"),
        )
    })
}

/// Validates `options` and resolves the request for the selected endpoint.
fn prepare_request(
    provider: &dyn ChatProvider,
    options: &Value,
    streaming: bool,
) -> Result<HttpRequest, ChatError> {
    debug!(provider = provider.name(), streaming, state = "initiating", "chat request");
    let validated = validate_options(options, &provider.schema())?;
    let endpoint = if streaming {
        provider.resolve_stream_endpoint(&validated)
    } else {
        provider.resolve_endpoint(&validated)
    };
    let merged = endpoint.apply_defaults(&validated);

    let mut headers = vec![(
        "content-type".to_string(),
        HeaderValue::from("application/json"),
    )];
    headers.extend(provider.request_headers(&merged));

    Ok(HttpRequest {
        url: join_url(&provider.base_url(&merged), &endpoint.path),
        headers,
        body: provider.build_body(&merged),
    })
}

/// Sends one non-streaming request through the named provider.
pub async fn complete(provider: &str, options: Value) -> Result<Value, ChatError> {
    let provider = resolve_provider(provider)?;
    let transport = default_transport();
    complete_with(provider.as_ref(), transport.as_ref(), options).await
}

pub async fn complete_with(
    provider: &dyn ChatProvider,
    transport: &dyn Transport,
    options: Value,
) -> Result<Value, ChatError> {
    let request = prepare_request(provider, &options, false)?;
    debug!(provider = provider.name(), url = %request.url, state = "sending", "chat request");

    let response = transport.perform_request(request, None).await.map_err(|error| {
        debug!(provider = provider.name(), state = "failed", %error, "chat request");
        error
    })?;

    if !response.is_success() {
        debug!(provider = provider.name(), status = response.status, state = "failed", "chat request");
        return Err(ChatError::http(
            provider.name(),
            response.status,
            provider.decode_error(&response.body),
        ));
    }

    let decoded = provider.decode_response(&response.body)?;
    debug!(provider = provider.name(), state = "completed", "chat request");
    Ok(decoded)
}

/// Starts a streaming request through the named provider and returns the
/// pull side of its events.
pub fn stream(provider: &str, options: Value) -> Result<ChatEventStream, ChatError> {
    let provider = resolve_provider(provider)?;
    stream_with(provider, default_transport(), options)
}

pub fn stream_with(
    provider: ProviderRef,
    transport: TransportRef,
    options: Value,
) -> Result<ChatEventStream, ChatError> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let task = stream_to_with(provider, transport, options, sender)?;
    Ok(EventStream::new(receiver, task))
}

/// Starts a streaming request through the named provider, delivering every
/// event and the terminal message to `recipient`.
pub fn stream_to(
    provider: &str,
    options: Value,
    recipient: mpsc::UnboundedSender<ChatMessage>,
) -> Result<StreamTask, ChatError> {
    let provider = resolve_provider(provider)?;
    stream_to_with(provider, default_transport(), options, recipient)
}

pub fn stream_to_with(
    provider: ProviderRef,
    transport: TransportRef,
    options: Value,
    recipient: mpsc::UnboundedSender<ChatMessage>,
) -> Result<StreamTask, ChatError> {
    let request = prepare_request(provider.as_ref(), &options, true)?;

    spawn_task(async move {
        let outcome = run_stream(provider.as_ref(), transport.as_ref(), request, &recipient).await;
        let message = match outcome {
            Ok(accumulator) => {
                debug!(provider = provider.name(), state = "completed", "chat stream");
                StreamMessage::Completed(accumulator)
            }
            Err(error) => {
                debug!(provider = provider.name(), state = "failed", %error, "chat stream");
                StreamMessage::Failed(error)
            }
        };
        let _ = recipient.send(message);
    })
}

async fn run_stream(
    provider: &dyn ChatProvider,
    transport: &dyn Transport,
    request: HttpRequest,
    recipient: &mpsc::UnboundedSender<ChatMessage>,
) -> Result<Value, ChatError> {
    debug!(provider = provider.name(), url = %request.url, state = "sending", "chat stream");
    let mut state = StreamState::new(provider, recipient);

    let response = {
        let mut on_chunk = |bytes: &[u8]| state.feed(bytes);
        let handler: ChunkHandler<'_> = &mut on_chunk;
        transport.perform_request(request, Some(handler)).await?
    };

    if !response.is_success() {
        return Err(ChatError::http(
            provider.name(),
            response.status,
            provider.decode_error(&response.body),
        ));
    }

    state.finish()
}

/// Per-request streaming state: reassembles frames and UTF-8 sequences
/// split across reads and folds each event into the accumulator.
struct StreamState<'a> {
    provider: &'a dyn ChatProvider,
    recipient: &'a mpsc::UnboundedSender<ChatMessage>,
    pending_bytes: Vec<u8>,
    remainder: String,
    accumulator: Value,
    event_count: usize,
    halted: bool,
}

impl<'a> StreamState<'a> {
    fn new(
        provider: &'a dyn ChatProvider,
        recipient: &'a mpsc::UnboundedSender<ChatMessage>,
    ) -> Self {
        Self {
            provider,
            recipient,
            pending_bytes: Vec::new(),
            remainder: String::new(),
            accumulator: Value::Null,
            event_count: 0,
            halted: false,
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> ChunkSignal {
        if self.halted {
            return ChunkSignal::Halt;
        }

        self.pending_bytes.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending_bytes) {
            Ok(_) => self.pending_bytes.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => self.pending_bytes.len(),
        };
        let tail = self.pending_bytes.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
        self.pending_bytes = tail;

        let mut buffer = std::mem::take(&mut self.remainder);
        buffer.push_str(&text);
        self.parse(&buffer)
    }

    fn parse(&mut self, buffer: &str) -> ChunkSignal {
        let parsed = self.provider.parse_chunk(buffer);
        self.remainder = parsed.remainder;

        for event in parsed.events {
            if self.event_count == 0 {
                debug!(provider = self.provider.name(), state = "receiving", "chat stream");
            }
            self.event_count += 1;
            let _ = self.recipient.send(StreamMessage::Event(event.clone()));
            let accumulator = std::mem::take(&mut self.accumulator);
            self.accumulator = self.provider.merge_event(accumulator, event);
        }

        if parsed.signal == ChunkSignal::Halt {
            self.halted = true;
        }
        parsed.signal
    }

    fn finish(mut self) -> Result<Value, ChatError> {
        if !self.halted {
            let mut leftover = std::mem::take(&mut self.remainder);
            if !self.pending_bytes.is_empty() {
                leftover.push_str(&String::from_utf8_lossy(&self.pending_bytes));
                self.pending_bytes.clear();
            }
            if !leftover.trim().is_empty() {
                leftover.push_str(FLUSH_TERMINATOR);
                self.parse(&leftover);
                if !self.remainder.trim().is_empty() {
                    warn!(
                        provider = self.provider.name(),
                        bytes = self.remainder.len(),
                        "discarding incomplete frame at end of stream"
                    );
                }
            }
        }

        if self.event_count == 0 {
            return Err(ChatError::new(
                ChatErrorCode::ProviderProtocol,
                format!("{} stream ended without any events", self.provider.name()),
            ));
        }
        Ok(self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::providers::ProviderKind;
    use crate::transport::{HttpResponse, TransportFuture};
    use crate::types::ProviderConfig;

    /// Replays canned reads instead of talking to a server.
    struct ScriptedTransport {
        status: u16,
        chunks: Vec<Vec<u8>>,
        body: String,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn streaming<C: AsRef<[u8]>>(chunks: Vec<C>) -> Self {
            Self {
                status: 200,
                chunks: chunks.iter().map(|chunk| chunk.as_ref().to_vec()).collect(),
                body: String::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn body(status: u16, body: &str) -> Self {
            Self {
                status,
                chunks: Vec::new(),
                body: body.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> HttpRequest {
            self.requests
                .lock()
                .expect("requests lock")
                .last()
                .cloned()
                .expect("a request was sent")
        }
    }

    impl Transport for ScriptedTransport {
        fn perform_request<'a>(
            &'a self,
            request: HttpRequest,
            chunk_handler: Option<ChunkHandler<'a>>,
        ) -> TransportFuture<'a> {
            Box::pin(async move {
                self.requests.lock().expect("requests lock").push(request);
                match chunk_handler {
                    Some(handler) if (200..300).contains(&self.status) => {
                        for chunk in &self.chunks {
                            if handler(chunk.as_slice()) == ChunkSignal::Halt {
                                break;
                            }
                        }
                        Ok(HttpResponse {
                            status: self.status,
                            body: String::new(),
                        })
                    }
                    _ => Ok(HttpResponse {
                        status: self.status,
                        body: self.body.clone(),
                    }),
                }
            })
        }
    }

    fn openai() -> ProviderRef {
        ProviderKind::OpenAi.build(ProviderConfig::default().with_api_key("sk-test"))
    }

    fn chat_options() -> Value {
        json!({ "model": "gpt-test", "messages": [{ "role": "user", "content": "hi" }] })
    }

    async fn drain(mut stream: ChatEventStream) -> (Vec<Value>, Result<Option<Value>, ChatError>) {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => events.push(event),
                Err(error) => return (events, Err(error)),
            }
        }
        (events, Ok(stream.result().cloned()))
    }

    #[tokio::test]
    async fn frames_and_utf8_split_across_reads_are_reassembled() {
        let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();
        let split = body.find('\u{e9}').expect("accent") + 1;
        let transport = Arc::new(ScriptedTransport::streaming(vec![
            &bytes[..10],
            &bytes[10..split],
            &bytes[split..],
        ]));

        let stream = stream_with(openai(), transport.clone(), chat_options()).expect("stream");
        let (events, result) = drain(stream).await;

        assert_eq!(events.len(), 1);
        let merged = result.expect("ok").expect("completed");
        assert_eq!(merged["choices"][0]["message"]["content"], json!("caf\u{e9}"));
    }

    #[tokio::test]
    async fn stream_request_carries_defaults_and_headers() {
        let transport = Arc::new(ScriptedTransport::streaming(vec![
            "data: {\"choices\":[]}\n\ndata: [DONE]\n\n",
        ]));
        let stream = stream_with(openai(), transport.clone(), chat_options()).expect("stream");
        let _ = drain(stream).await;

        let request = transport.last_request();
        assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(request.body["stream"], json!(true));
        assert_eq!(request.headers[0].0, "content-type");
        assert_eq!(request.headers[1].1.values(), vec!["Bearer sk-test"]);
    }

    #[tokio::test]
    async fn last_frame_without_terminator_is_flushed() {
        let transport = Arc::new(ScriptedTransport::streaming(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"}}]}",
        ]));
        let stream = stream_with(openai(), transport, chat_options()).expect("stream");
        let (events, result) = drain(stream).await;

        assert_eq!(events.len(), 2);
        let merged = result.expect("ok").expect("completed");
        assert_eq!(merged["choices"][0]["message"]["content"], json!("ab"));
    }

    #[tokio::test]
    async fn empty_stream_is_a_protocol_error() {
        let transport = Arc::new(ScriptedTransport::streaming(vec![": keep-alive\n\n"]));
        let stream = stream_with(openai(), transport, chat_options()).expect("stream");
        let (events, result) = drain(stream).await;

        assert!(events.is_empty());
        assert_eq!(result.expect_err("error").code, ChatErrorCode::ProviderProtocol);
    }

    #[tokio::test]
    async fn error_status_fails_stream_with_decoded_body() {
        let transport = Arc::new(ScriptedTransport::body(
            401,
            "{\"error\":{\"message\":\"bad key\"}}",
        ));
        let stream = stream_with(openai(), transport, chat_options()).expect("stream");
        let (_, result) = drain(stream).await;

        let error = result.expect_err("error");
        assert_eq!(error.status(), Some(401));
        assert_eq!(error.body(), Some(&json!({"error": {"message": "bad key"}})));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_any_request() {
        let transport = Arc::new(ScriptedTransport::body(200, "{}"));
        let error = stream_with(openai(), transport.clone(), json!({ "model": "gpt-test" }))
            .expect_err("invalid");

        assert_eq!(error.code, ChatErrorCode::OptionsInvalid);
        assert_eq!(error.invalid_fields(), vec!["messages"]);
        assert!(transport.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn complete_decodes_body_and_maps_error_status() {
        let provider = openai();
        let ok = ScriptedTransport::body(200, "{\"id\":\"x\",\"choices\":[]}");
        let value = complete_with(provider.as_ref(), &ok, chat_options())
            .await
            .expect("complete");
        assert_eq!(value["id"], json!("x"));
        assert!(ok.last_request().body.get("stream").is_none());

        let failing = ScriptedTransport::body(503, "upstream down");
        let error = complete_with(provider.as_ref(), &failing, chat_options())
            .await
            .expect_err("http error");
        assert_eq!(error.status(), Some(503));
        assert_eq!(error.body(), Some(&json!("upstream down")));
    }

    #[tokio::test]
    async fn push_mode_delivers_events_then_completion() {
        let transport = Arc::new(ScriptedTransport::streaming(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n",
        ]));
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let task = stream_to_with(openai(), transport, chat_options(), sender).expect("task");

        let mut messages = Vec::new();
        while let Some(message) = receiver.recv().await {
            messages.push(message);
        }
        task.join().await;

        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], StreamMessage::Event(_)));
        let StreamMessage::Completed(merged) = &messages[1] else {
            panic!("expected completion, got {:?}", messages[1]);
        };
        assert_eq!(merged["choices"][0]["message"]["content"], json!("x"));
    }

    #[tokio::test]
    async fn unknown_provider_name_is_rejected() {
        let error = stream("no-such-provider", chat_options()).expect_err("unknown");
        assert_eq!(error.code, ChatErrorCode::ProviderNotFound);
    }
}
