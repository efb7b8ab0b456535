use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ChatError, ChatErrorCode};

/// How long `EventStream::next` waits for the next message before ending
/// the sequence.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// One message on a delivery channel: any number of events followed by
/// exactly one terminal message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage<T, R> {
    Event(T),
    Completed(R),
    Failed(ChatError),
}

pub type ChatMessage = StreamMessage<Value, Value>;
pub type ChatEventStream = EventStream<Value, Value>;

/// Handle of the background task serving one request.
#[derive(Debug)]
pub struct StreamTask {
    handle: JoinHandle<()>,
}

impl StreamTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task together with its in-flight request. No terminal
    /// message is sent afterwards.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Runs `task` on the current tokio runtime, or on a dedicated thread with
/// a current-thread runtime when called outside of one.
pub(crate) fn spawn_task<F>(task: F) -> Result<StreamTask, ChatError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return Ok(StreamTask {
            handle: handle.spawn(task),
        });
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            ChatError::new(
                ChatErrorCode::ProviderTransport,
                format!("Failed to start stream runtime: {error}"),
            )
        })?;

    let (finished_tx, finished_rx) = oneshot::channel::<()>();
    let handle = runtime.spawn(async move {
        task.await;
        drop(finished_tx);
    });
    std::thread::spawn(move || {
        runtime.block_on(async move {
            let _ = finished_rx.await;
        });
    });

    Ok(StreamTask { handle })
}

/// Pull side of a delivery channel.
///
/// The sequence ends on the terminal message, when the channel closes, or
/// when no message arrives within the pull timeout. A timeout ends the
/// sequence silently. Dropping the stream early cancels the request.
#[derive(Debug)]
pub struct EventStream<T, R> {
    receiver: Option<mpsc::UnboundedReceiver<StreamMessage<T, R>>>,
    result: Option<R>,
    pull_timeout: Duration,
    task: Option<StreamTask>,
}

impl<T, R> EventStream<T, R> {
    pub fn new(receiver: mpsc::UnboundedReceiver<StreamMessage<T, R>>, task: StreamTask) -> Self {
        Self {
            receiver: Some(receiver),
            result: None,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            task: Some(task),
        }
    }

    pub fn with_pull_timeout(mut self, pull_timeout: Duration) -> Self {
        self.pull_timeout = pull_timeout;
        self
    }

    pub fn pull_timeout(&self) -> Duration {
        self.pull_timeout
    }

    /// Next event; `None` once the sequence is over. A failure is yielded
    /// once as `Some(Err(_))` and ends the sequence.
    pub async fn next(&mut self) -> Option<Result<T, ChatError>> {
        let receiver = self.receiver.as_mut()?;
        let message = tokio::time::timeout(self.pull_timeout, receiver.recv()).await;

        match message {
            Ok(Some(StreamMessage::Event(event))) => Some(Ok(event)),
            Ok(Some(StreamMessage::Completed(result))) => {
                self.result = Some(result);
                self.release();
                None
            }
            Ok(Some(StreamMessage::Failed(error))) => {
                self.release();
                Some(Err(error))
            }
            Ok(None) => {
                debug!("delivery channel closed without a terminal message");
                self.release();
                None
            }
            Err(_) => {
                debug!(timeout_ms = self.pull_timeout.as_millis() as u64, "pull timed out");
                self.release();
                None
            }
        }
    }

    /// Merged response, available once `next` has returned `None` after a
    /// completed request.
    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<R> {
        let mut stream = self;
        stream.result.take()
    }

    /// Pulls every remaining event and returns the merged response.
    pub async fn collect_result(mut self) -> Result<Option<R>, ChatError> {
        while let Some(event) = self.next().await {
            event?;
        }
        Ok(self.result.take())
    }

    pub fn is_finished(&self) -> bool {
        self.receiver.is_none()
    }

    fn release(&mut self) {
        self.receiver = None;
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

impl<T, R> Drop for EventStream<T, R> {
    fn drop(&mut self) {
        self.release();
    }
}
