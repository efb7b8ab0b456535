//! One chat-completion contract over several vendor HTTP APIs, with
//! streamed responses rebuilt into the shape the synchronous endpoint
//! returns.

mod delivery;
mod dispatch;
mod error;
pub mod merge;
mod provider;
mod providers;
mod registry;
mod transport;
mod types;
mod validation;

pub use delivery::{
    ChatEventStream, ChatMessage, DEFAULT_PULL_TIMEOUT, EventStream, StreamMessage, StreamTask,
};
pub use dispatch::{complete, complete_with, stream, stream_to, stream_to_with, stream_with};
pub use error::{ChatError, ChatErrorCode};
pub use provider::{ChatProvider, ProviderRef};
pub use providers::{
    AnthropicProvider, GoogleProvider, OllamaChatProvider, OllamaGenerateProvider, OpenAiProvider,
    ProviderKind, register_builtin_providers, reset_providers,
};
pub use registry::{
    clear_providers, get_provider, get_providers, register_provider, unregister_providers,
};
pub use transport::{
    ChunkHandler, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportFuture,
    TransportRef, default_transport,
};
pub use types::{
    ChatOptions, ChunkSignal, Endpoint, HeaderValue, ParsedChunk, ProviderConfig, RequestHeaders,
};
pub use validation::validate_options;
