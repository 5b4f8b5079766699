//! Processing progress endpoints

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Json,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::{ChannelSink, JobCounts, JobSnapshot, JobSummary, ProgressTracker};
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct ActiveTasksResponse {
    pub tasks: Vec<JobSummary>,
}

fn lookup(state: &AppState, id: &str) -> Result<Arc<ProgressTracker>> {
    let id = Uuid::parse_str(id).map_err(|_| Error::JobNotFound(id.to_string()))?;
    state.registry().get(&id)
}

/// GET /api/processing-status/:id - Snapshot of one job
pub async fn processing_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>> {
    Ok(Json(lookup(&state, &id)?.snapshot()))
}

/// GET /api/active-processing-tasks - Sweep expired jobs, then list the rest
pub async fn active_tasks(State(state): State<AppState>) -> Json<ActiveTasksResponse> {
    let removed = state.registry().sweep();
    if removed > 0 {
        tracing::debug!("Swept {} expired jobs", removed);
    }
    Json(ActiveTasksResponse {
        tasks: state.registry().list(),
    })
}

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub message: String,
}

/// DELETE /api/processing-task/:id - Forget a job
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteTaskResponse>> {
    let tracker = lookup(&state, &id)?;
    state.registry().remove(&tracker.id())?;
    Ok(Json(DeleteTaskResponse {
        message: format!("Task {} removed", tracker.id()),
    }))
}

/// GET /api/processing-tasks-summary - Totals after sweeping expired jobs
pub async fn tasks_summary(State(state): State<AppState>) -> Json<JobCounts> {
    state.registry().sweep();
    Json(state.registry().counts())
}

/// GET /api/ws/processing-status/:id - Push every snapshot until the job completes
pub async fn processing_status_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let tracker = lookup(&state, &id).ok();
    let grace = state.push_grace();
    ws.on_upgrade(move |socket| async move {
        match tracker {
            Some(tracker) => stream_progress(socket, tracker, grace).await,
            None => reject(socket).await,
        }
    })
}

/// Either half of a push connection: axum's `WebSocket` in production
trait PushSocket:
    Sink<Message, Error = axum::Error>
    + Stream<Item = std::result::Result<Message, axum::Error>>
    + Unpin
    + Send
{
}

impl<S> PushSocket for S where
    S: Sink<Message, Error = axum::Error>
        + Stream<Item = std::result::Result<Message, axum::Error>>
        + Unpin
        + Send
{
}

async fn reject(mut socket: impl PushSocket) {
    let body = serde_json::json!({ "error": "Processing task not found" }).to_string();
    let _ = socket.send(Message::Text(body)).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn stream_progress(
    mut socket: impl PushSocket,
    tracker: Arc<ProgressTracker>,
    grace: Duration,
) {
    let (sink, mut rx) = ChannelSink::new();
    let subscription = tracker.subscribe(sink);
    let job_id = tracker.id();
    tracing::debug!("Push channel opened for job {}", job_id);

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                let complete = snapshot.is_complete;
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to serialize snapshot for job {}: {}", job_id, e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if complete {
                    tokio::time::sleep(grace).await;
                    break;
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracker.unsubscribe(subscription);
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!("Push channel closed for job {}", job_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Instant;
    use tokio::sync::mpsc;

    /// In-memory stand-in for a client connection
    struct TestSocket {
        from_client: mpsc::UnboundedReceiver<Message>,
        to_client: mpsc::UnboundedSender<Message>,
    }

    fn connect() -> (
        TestSocket,
        mpsc::UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        (
            TestSocket {
                from_client,
                to_client,
            },
            client_tx,
            client_rx,
        )
    }

    impl Stream for TestSocket {
        type Item = std::result::Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.from_client.poll_recv(cx).map(|message| message.map(Ok))
        }
    }

    impl Sink<Message> for TestSocket {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> std::result::Result<(), Self::Error> {
            self.to_client.send(item).map_err(axum::Error::new)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn snapshot_of(message: Message) -> JobSnapshot {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    fn two_stage_tracker() -> Arc<ProgressTracker> {
        let tracker = Arc::new(ProgressTracker::new("acme.pdf"));
        tracker.add_stage("Extract", "Read pages", 50.0);
        tracker.add_stage("Index", "Write vectors", 50.0);
        tracker
    }

    #[tokio::test]
    async fn test_push_channel_streams_until_grace_expires() {
        let tracker = two_stage_tracker();
        let (socket, _client_tx, mut client_rx) = connect();
        let grace = Duration::from_millis(100);
        let task = tokio::spawn(stream_progress(socket, tracker.clone(), grace));

        let initial = snapshot_of(client_rx.recv().await.unwrap());
        assert!(!initial.is_complete);
        assert_eq!(initial.steps.len(), 2);

        tracker.start_next_stage(None);
        tracker.complete_current_stage(None);
        tracker.complete_job();

        let mut last = initial;
        let completed_at = loop {
            let snapshot = snapshot_of(client_rx.recv().await.unwrap());
            assert!(snapshot.overall_progress >= last.overall_progress);
            last = snapshot;
            if last.is_complete {
                break Instant::now();
            }
        };
        assert_eq!(last.overall_progress, 100.0);

        assert!(matches!(client_rx.recv().await, Some(Message::Close(None))));
        assert!(completed_at.elapsed() >= Duration::from_millis(90));

        task.await.unwrap();
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_client_close_unsubscribes() {
        let tracker = two_stage_tracker();
        let (socket, client_tx, mut client_rx) = connect();
        let task = tokio::spawn(stream_progress(socket, tracker.clone(), Duration::from_secs(60)));

        snapshot_of(client_rx.recv().await.unwrap());
        client_tx.send(Message::Close(None)).unwrap();

        task.await.unwrap();
        assert_eq!(tracker.subscriber_count(), 0);
        assert!(!tracker.is_complete());
    }

    #[tokio::test]
    async fn test_unknown_job_gets_error_then_close() {
        let (socket, _client_tx, mut client_rx) = connect();
        reject(socket).await;

        match client_rx.recv().await {
            Some(Message::Text(text)) => {
                let body: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(body["error"], "Processing task not found");
            }
            other => panic!("expected an error frame, got {:?}", other),
        }
        assert!(matches!(client_rx.recv().await, Some(Message::Close(None))));
    }
}
