//! Server-Sent Events (SSE) utilities

use crate::events::ProgressMessage;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

/// Heartbeat interval for long-lived progress streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert a progress message into an SSE event named after its status
pub fn progress_event(message: &ProgressMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Event::default().event(message.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize progress message: {}", e);
            None
        }
    }
}

/// Wrap a stream of progress messages as an SSE response with heartbeat
/// keep-alive. The stream ends after the first terminal message.
pub fn progress_sse_stream<S>(messages: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProgressMessage> + Send + 'static,
{
    let stream = async_stream::stream! {
        futures::pin_mut!(messages);
        while let Some(message) = messages.next().await {
            let terminal = message.status.is_terminal();
            if let Some(event) = progress_event(&message) {
                yield Ok(event);
            }
            if terminal {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobStatus;

    #[test]
    fn test_progress_event_builds() {
        let msg = ProgressMessage::new(JobStatus::Running, 10, Some(20));
        assert!(progress_event(&msg).is_some());
    }
}
