use crate::AppState;
use axum::extract::State;
use axum::http::header::CONNECTION;
use axum::http::HeaderName;
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use log::*;
use std::time::Duration;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// SSE handler that opens a long-lived stream on the configured channel.
/// The client first receives the channel's recent history, then live messages.
pub(crate) async fn stream_messages(State(app_state): State<AppState>) -> impl IntoResponse {
    let channel = app_state.stream_channel().clone();
    let (session_id, receiver) = app_state.manager.open_session(channel);
    debug!("Establishing stream for session {session_id}");

    // Dropping the body (client disconnect) drops the receiver, which the
    // session observes as its peer closing.
    let sse = with_keep_alive(
        Sse::new(receiver.into_stream()),
        app_state.manager.settings().keep_alive,
    );

    ([(CONNECTION, "keep-alive"), (X_ACCEL_BUFFERING, "no")], sse)
}

fn with_keep_alive<S>(sse: Sse<S>, interval: Option<Duration>) -> Sse<S> {
    match interval {
        Some(interval) => sse.keep_alive(::sse::message::keep_alive(interval)),
        None => sse,
    }
}

#[cfg(test)]
mod tests {
    use crate::router::define_routes;
    use crate::AppState;
    use axum::body::{Body, Bytes};
    use axum::http::{Request, StatusCode};
    use clap::Parser;
    use events::{Channel, MemoryHistoryStore, MemorySource};
    use futures::StreamExt;
    use service::config::Config;
    use ::sse::{Manager, Settings};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn alerts() -> Channel {
        Channel::new("alerts").unwrap()
    }

    fn app_state(history: Arc<MemoryHistoryStore>, source: Arc<MemorySource>) -> AppState {
        app_state_with(history, source, Settings::default())
    }

    fn app_state_with(
        history: Arc<MemoryHistoryStore>,
        source: Arc<MemorySource>,
        settings: Settings,
    ) -> AppState {
        let config = Config::try_parse_from(["stream_bridge", "--stream-channels", "alerts"]).unwrap();
        let manager = Manager::new(history, source, settings, CancellationToken::new());
        AppState::new(config, Arc::new(manager), alerts())
    }

    fn stream_request() -> Request<Body> {
        Request::builder()
            .uri("/stream/messages")
            .body(Body::empty())
            .unwrap()
    }

    async fn next_chunk<S>(body: &mut S) -> Bytes
    where
        S: futures::Stream<Item = Result<Bytes, axum::Error>> + Unpin,
    {
        tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap()
    }

    #[tokio::test]
    async fn test_stream_sets_event_stream_headers() {
        let state = app_state(
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(MemorySource::new()),
        );

        let response = define_routes(state).oneshot(stream_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["connection"], "keep-alive");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[tokio::test]
    async fn test_stream_replays_history_then_live_messages() {
        let history = Arc::new(MemoryHistoryStore::new());
        let source = Arc::new(MemorySource::new());
        history.push(&alerts(), "low-disk");
        history.push(&alerts(), "cpu-spike");
        let state = app_state(history, source.clone());
        let registry = state.manager.registry().clone();

        let response = define_routes(state).oneshot(stream_request()).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        assert_eq!(next_chunk(&mut body).await, Bytes::from_static(b"\n"));
        assert_eq!(
            next_chunk(&mut body).await,
            Bytes::from_static(b"event: alerts\nid: 1\ndata: low-disk\n\n")
        );
        assert_eq!(
            next_chunk(&mut body).await,
            Bytes::from_static(b"event: alerts\nid: 2\ndata: cpu-spike\n\n")
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.session_count(&alerts()) == 0 || source.subscriber_count(&alerts()) == 0
            {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("session should go live");
        source.publish(&alerts(), "new-deploy");

        assert_eq!(
            next_chunk(&mut body).await,
            Bytes::from_static(b"event: alerts\nid: 3\ndata: new-deploy\n\n")
        );
    }

    #[tokio::test]
    async fn test_idle_stream_receives_keep_alive_comments() {
        let settings = Settings {
            keep_alive: Some(Duration::from_millis(10)),
            ..Settings::default()
        };
        let state = app_state_with(
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(MemorySource::new()),
            settings,
        );

        let response = define_routes(state).oneshot(stream_request()).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        assert_eq!(next_chunk(&mut body).await, Bytes::from_static(b"\n"));
        assert_eq!(
            next_chunk(&mut body).await,
            Bytes::from_static(b": keep-alive\n\n")
        );
    }

    #[tokio::test]
    async fn test_dropping_the_response_closes_the_session() {
        let state = app_state(
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(MemorySource::new()),
        );
        let registry = state.manager.registry().clone();

        let response = define_routes(state).oneshot(stream_request()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.session_count(&alerts()) == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("session should go live");

        drop(response);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.channel_count() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("session should be deregistered");
    }
}
