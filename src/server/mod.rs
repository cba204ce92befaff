pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::movement::{plan_route, Neighborhood, TickReport};
use crate::store::{Store, StoreError};
use protocol::{
    ClientRequest, CrisisView, ErrorMessage, FailureKind, HealthStatus, RouteResult, TickDiff,
};

/// Shared server state accessible from all connection handlers and the service loop.
pub struct ServerState<S: Store> {
    pub store: Arc<S>,
    /// Adjacency used when planning routes requested by clients.
    pub neighborhood: Neighborhood,
    /// Broadcast channel for tick diffs.
    pub tick_sender: broadcast::Sender<String>,
    /// Health data updated each tick.
    pub health: RwLock<HealthData>,
}

/// Data needed for the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct HealthData {
    pub tick: u64,
    pub failed_ticks: u64,
    pub last_tick_ms: f32,
    pub last_snapshot_tick: u64,
}

impl<S: Store> ServerState<S> {
    pub fn new(store: Arc<S>, neighborhood: Neighborhood, health: HealthData) -> Self {
        let (tx, _) = broadcast::channel(64);
        ServerState {
            store,
            neighborhood,
            tick_sender: tx,
            health: RwLock::new(health),
        }
    }

    /// Push the tick's diff to every client and record it for `/health`.
    pub async fn on_tick(&self, report: &TickReport) {
        // No receivers is fine
        let _ = self.tick_sender.send(to_json(&TickDiff::from_report(report)));

        let mut health = self.health.write().await;
        health.tick = report.tick;
        health.last_tick_ms = report.duration_ms;
    }

    pub async fn on_tick_failed(&self, failed_ticks: u64) {
        self.health.write().await.failed_ticks = failed_ticks;
    }

    pub async fn on_snapshot(&self, tick: u64) {
        self.health.write().await.last_snapshot_tick = tick;
    }
}

fn to_json<T: Serialize>(msg: &T) -> String {
    serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string())
}

/// Answer one client request with a JSON reply.
///
/// Blocks on the store; call it off the async runtime.
pub fn dispatch<S: Store>(store: &S, neighborhood: Neighborhood, text: &str) -> String {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "Malformed client request");
            return to_json(&ErrorMessage::new(
                Some(FailureKind::InvalidInput),
                format!("malformed request: {}", e),
            ));
        }
    };

    match request {
        ClientRequest::Crisis { crisis_id } => {
            let view = store.run_in_transaction(|tx| {
                let crisis = tx.read_crisis(crisis_id)?;
                let divisions = tx.read_divisions(crisis_id)?;
                Ok::<_, StoreError>(CrisisView::from_crisis(&crisis, &divisions))
            });
            match view {
                Ok(view) => to_json(&view),
                Err(e) => to_json(&ErrorMessage::new(Some((&e).into()), e.to_string())),
            }
        }
        ClientRequest::DivisionRoute { division_id, route } => {
            match plan_route(store, division_id, &route, neighborhood) {
                Ok(outcome) => to_json(&RouteResult::from_outcome(&outcome)),
                Err(e) => {
                    warn!(division = division_id, error = %e, "Route request failed");
                    to_json(&RouteResult::from_store_error(&e))
                }
            }
        }
    }
}

/// Divisions currently executing a route across all active crises.
fn count_routed<S: Store>(store: &S) -> Result<usize, StoreError> {
    store.run_in_transaction(|tx| {
        let mut routed = 0;
        for crisis_id in tx.active_crisis_ids()? {
            routed += tx.read_divisions_with_pending_routes(crisis_id)?.len();
        }
        Ok(routed)
    })
}

/// Start the WebSocket + HTTP server on the given address.
/// Runs until the listener fails; abort the task to stop it.
pub async fn start_server<S: Store>(
    state: Arc<ServerState<S>>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, state).await {
                error!(%peer, "Connection error: {}", e);
            }
        });
    }
}

/// Route an incoming TCP connection to WebSocket or HTTP.
async fn handle_connection<S: Store>(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState<S>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = [0u8; 512];
    let n = stream.peek(&mut buf).await?;
    let request_line = String::from_utf8_lossy(&buf[..n]).to_lowercase();

    if request_line.contains("upgrade: websocket") {
        handle_websocket(stream, peer, state).await
    } else if request_line.contains("get /health") {
        handle_health_request(stream, state).await
    } else {
        handle_not_found(stream).await
    }
}

/// Serve requests from one WebSocket client and stream tick diffs to it.
async fn handle_websocket<S: Store>(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState<S>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "WebSocket connected");

    let (mut write, mut read) = futures_util::StreamExt::split(ws_stream);
    let mut rx = state.tick_sender.subscribe();

    loop {
        tokio::select! {
            diff = rx.recv() => {
                match diff {
                    Ok(json) => {
                        if futures_util::SinkExt::send(&mut write, Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, lagged = n, "Client lagged behind on diffs");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = futures_util::StreamExt::next(&mut read) => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let store = Arc::clone(&state.store);
                        let neighborhood = state.neighborhood;
                        let text = text.as_str().to_owned();
                        let reply = tokio::task::spawn_blocking(move || {
                            dispatch(store.as_ref(), neighborhood, &text)
                        })
                        .await?;
                        if futures_util::SinkExt::send(&mut write, Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%peer, "WebSocket disconnected");
    Ok(())
}

async fn write_http_response(
    stream: &mut TcpStream,
    status: &str,
    body: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    // Read and discard the full HTTP request
    let mut buf = vec![0u8; 4096];
    let _ = stream.read(&mut buf).await?;

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn handle_not_found(
    mut stream: TcpStream,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let body = to_json(&ErrorMessage::new(None, "not found"));
    write_http_response(&mut stream, "404 Not Found", &body).await
}

/// Handle an HTTP health request.
async fn handle_health_request<S: Store>(
    mut stream: TcpStream,
    state: Arc<ServerState<S>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::clone(&state.store);
    let routed = tokio::task::spawn_blocking(move || count_routed(store.as_ref())).await?;

    let routed_divisions = match routed {
        Ok(n) => n,
        Err(e) => {
            let body = to_json(&ErrorMessage::new(Some((&e).into()), e.to_string()));
            return write_http_response(&mut stream, "503 Service Unavailable", &body).await;
        }
    };

    let health = state.health.read().await.clone();
    let status = HealthStatus {
        tick: health.tick,
        failed_ticks: health.failed_ticks,
        routed_divisions,
        last_tick_ms: health.last_tick_ms,
        last_snapshot_tick: health.last_snapshot_tick,
    };
    write_http_response(&mut stream, "200 OK", &to_json(&status)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crisis::fixtures::small_dataset;
    use crate::crisis::Coords;
    use crate::movement::{DivisionStep, StepStatus};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn make_state() -> Arc<ServerState<MemoryStore>> {
        let store = Arc::new(MemoryStore::new(small_dataset()));
        Arc::new(ServerState::new(
            store,
            Neighborhood::Four,
            HealthData::default(),
        ))
    }

    fn make_report(tick: u64) -> TickReport {
        TickReport {
            tick,
            steps: vec![DivisionStep {
                division_id: 1,
                crisis_id: 1,
                from: Coords::new(0, 0),
                to: Coords::new(1, 0),
                remaining_steps: 3,
                status: StepStatus::Moving,
            }],
            duration_ms: 2.5,
        }
    }

    fn reply(state: &ServerState<MemoryStore>, text: &str) -> serde_json::Value {
        let json = dispatch(state.store.as_ref(), state.neighborhood, text);
        serde_json::from_str(&json).expect("valid JSON")
    }

    #[test]
    fn crisis_request_returns_view() {
        let state = make_state();
        let parsed = reply(&state, r#"{"op":"crisis","crisis_id":1}"#);
        assert_eq!(parsed["message_type"], "CrisisView");
        assert_eq!(parsed["name"], "Baltic");
        assert_eq!(parsed["divisions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unknown_crisis_is_not_found() {
        let state = make_state();
        let parsed = reply(&state, r#"{"op":"crisis","crisis_id":42}"#);
        assert_eq!(parsed["message_type"], "Error");
        assert_eq!(parsed["kind"], "not_found");
    }

    #[test]
    fn malformed_request_is_invalid_input() {
        let state = make_state();
        for text in ["not json", r#"{"op":"teleport"}"#, r#"{"op":"division_route"}"#] {
            let parsed = reply(&state, text);
            assert_eq!(parsed["message_type"], "Error");
            assert_eq!(parsed["kind"], "invalid_input");
        }
    }

    #[test]
    fn route_request_plans_and_stores_route() {
        let state = make_state();
        let parsed = reply(
            &state,
            r#"{"op":"division_route","division_id":1,"route":[{"x":3,"y":0}]}"#,
        );
        assert_eq!(parsed["message_type"], "RouteResult");
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["cost"], 3);
        assert_eq!(parsed["division"]["route"].as_array().unwrap().len(), 3);

        let data = state.store.snapshot().unwrap();
        assert_eq!(data.divisions[&1].route.as_ref().unwrap().remaining_steps(), 3);
    }

    #[test]
    fn rejected_route_request_keeps_prior_route() {
        let state = make_state();
        reply(
            &state,
            r#"{"op":"division_route","division_id":1,"route":[{"x":2,"y":0}]}"#,
        );
        let parsed = reply(
            &state,
            r#"{"op":"division_route","division_id":1,"route":[{"x":10,"y":0}]}"#,
        );
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["kind"], "invalid_input");

        let data = state.store.snapshot().unwrap();
        let route = data.divisions[&1].route.as_ref().unwrap();
        assert_eq!(route.destination(), Coords::new(2, 0));
    }

    #[test]
    fn route_request_for_unknown_division() {
        let state = make_state();
        let parsed = reply(
            &state,
            r#"{"op":"division_route","division_id":77,"route":[{"x":1,"y":0}]}"#,
        );
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["kind"], "not_found");
    }

    #[tokio::test]
    async fn on_tick_updates_health_and_broadcasts_diff() {
        let state = make_state();
        let mut rx = state.tick_sender.subscribe();

        state.on_tick(&make_report(5)).await;
        state.on_tick_failed(2).await;
        state.on_snapshot(3).await;

        let health = state.health.read().await.clone();
        assert_eq!(health.tick, 5);
        assert_eq!(health.failed_ticks, 2);
        assert_eq!(health.last_snapshot_tick, 3);
        assert!((health.last_tick_ms - 2.5).abs() < f32::EPSILON);

        let received = rx.recv().await.expect("should receive diff");
        let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(parsed["message_type"], "TickDiff");
        assert_eq!(parsed["tick"], 5);
        assert_eq!(parsed["changed_divisions"][0]["id"], 1);
    }

    #[tokio::test]
    async fn websocket_client_requests_and_receives_diff() {
        let state = make_state();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_state = Arc::clone(&state);
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, server_state).await;
            }
        });

        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        async fn next_json<W>(ws: &mut W) -> serde_json::Value
        where
            W: futures_util::Stream<
                    Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
                > + Unpin,
        {
            let msg = tokio::time::timeout(Duration::from_secs(5), futures_util::StreamExt::next(ws))
                .await
                .expect("timeout waiting for message")
                .expect("stream ended")
                .expect("message error");
            let text = msg.into_text().unwrap();
            serde_json::from_str(&text).unwrap()
        }

        futures_util::SinkExt::send(
            &mut ws,
            Message::Text(r#"{"op":"crisis","crisis_id":1}"#.to_string().into()),
        )
        .await
        .unwrap();
        let view = next_json(&mut ws).await;
        assert_eq!(view["message_type"], "CrisisView");

        futures_util::SinkExt::send(
            &mut ws,
            Message::Text(
                r#"{"op":"division_route","division_id":1,"route":[{"x":0,"y":4}]}"#
                    .to_string()
                    .into(),
            ),
        )
        .await
        .unwrap();
        let result = next_json(&mut ws).await;
        assert_eq!(result["message_type"], "RouteResult");
        assert_eq!(result["success"], true);

        state.on_tick(&make_report(1)).await;
        let diff = next_json(&mut ws).await;
        assert_eq!(diff["message_type"], "TickDiff");

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let state = make_state();
        state.on_tick(&make_report(42)).await;
        state.on_snapshot(40).await;
        let store = Arc::clone(&state.store);
        tokio::task::spawn_blocking(move || {
            plan_route(store.as_ref(), 2, &[Coords::new(9, 5)], Neighborhood::Four)
        })
        .await
        .unwrap()
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_state = Arc::clone(&state);
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_connection(stream, peer, server_state).await;
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response_str = String::from_utf8_lossy(&response);

        assert!(response_str.contains("200 OK"));
        assert!(response_str.contains("application/json"));

        let body_start = response_str.find('{').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response_str[body_start..]).unwrap();
        assert_eq!(parsed["tick"], 42);
        assert_eq!(parsed["failed_ticks"], 0);
        assert_eq!(parsed["routed_divisions"], 1);
        assert_eq!(parsed["last_snapshot_tick"], 40);

        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let state = make_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_connection(stream, peer, state).await;
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).contains("404 Not Found"));

        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn client_disconnect_does_not_crash_server() {
        let state = make_state();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, state).await;
            }
        });

        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        drop(ws);

        let result = tokio::time::timeout(Duration::from_secs(5), server_handle).await;
        assert!(result.is_ok(), "Server should handle disconnect within 5s");
    }
}
