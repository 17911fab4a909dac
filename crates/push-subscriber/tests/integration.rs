use std::time::Duration;

use httpmock::prelude::*;
use push_subscriber::{
    BackoffPolicy, ChannelSink, ConnectionState, HostBindings, MemoryTokenSource,
    NotificationEvent, StatusSnapshot, Supervisor, SupervisorConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const TOKEN: &str = "integration-token-0001";
const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Minimal SSE server: one accept per connection, response body sent as
/// HTTP/1.1 chunks so the stream can be held open.
struct MockSseServer {
    listener: TcpListener,
    url: String,
}

struct SseConn {
    stream: TcpStream,
    /// Request head, lowercased.
    request: String,
}

impl MockSseServer {
    async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            url: format!("http://127.0.0.1:{port}/sse"),
        })
    }

    async fn accept(&self) -> std::io::Result<SseConn> {
        let (mut stream, _) = self.listener.accept().await?;
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            head.extend_from_slice(&buf[..n]);
        }
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  content-type: text/event-stream\r\n\
                  cache-control: no-cache\r\n\
                  transfer-encoding: chunked\r\n\r\n",
            )
            .await?;
        stream.flush().await?;
        Ok(SseConn {
            stream,
            request: String::from_utf8_lossy(&head).to_lowercase(),
        })
    }
}

impl SseConn {
    async fn send(&mut self, text: &str) -> std::io::Result<()> {
        let chunk = format!("{:x}\r\n{text}\r\n", text.len());
        self.stream.write_all(chunk.as_bytes()).await?;
        self.stream.flush().await
    }

    async fn finish(mut self) -> std::io::Result<()> {
        self.stream.write_all(b"0\r\n\r\n").await?;
        self.stream.flush().await
    }

    fn has_header(&self, line: &str) -> bool {
        self.request.lines().any(|l| l.trim() == line)
    }

    /// Resolves once the client hangs up.
    async fn closed_by_client(&mut self) -> bool {
        let mut buf = [0u8; 256];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return true,
                Ok(_) => {}
            }
        }
    }
}

fn notification_frame(id: &str, title: &str) -> String {
    let data = serde_json::json!({ "id": id, "title": title, "body": "b" });
    format!("event: notification\ndata: {data}\n\n")
}

fn spawn_supervisor(
    url: &str,
    token: Option<&str>,
    backoff: Duration,
) -> (Supervisor, mpsc::Receiver<NotificationEvent>) {
    let mut config = SupervisorConfig::new(url).unwrap();
    config.backoff = BackoffPolicy::new(vec![backoff]).unwrap();
    config.timing.cleanup_delay = Duration::from_millis(50);
    let tokens = MemoryTokenSource::new(token.map(str::to_string));
    let (sink, rx) = ChannelSink::new(16);
    let sup = Supervisor::spawn(config, HostBindings::new(tokens, sink)).unwrap();
    (sup, rx)
}

async fn next_notification(rx: &mut mpsc::Receiver<NotificationEvent>) -> NotificationEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("sink closed")
}

async fn wait_for_status(
    sup: &Supervisor,
    check: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    tokio::time::timeout(WAIT, async {
        loop {
            let status = sup.status().await.unwrap();
            if check(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status never matched")
}

// ---------------------------------------------------------------------------
// httpmock: finite response bodies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivers_notifications_from_event_stream() {
    let server = MockServer::start_async().await;
    let body = format!(
        ": connected\n\nevent: ping\ndata: {{}}\n\n{}{}",
        notification_frame("n-1", "First"),
        "data: [{\"title\":\"old\"},{\"title\":\"Second\",\"type\":\"file-7\"}]\n\n",
    );
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sse")
                .header("authorization", format!("Bearer {TOKEN}"))
                .header("accept", "text/event-stream")
                .header("cache-control", "no-cache");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
        .await;

    let (sup, mut rx) = spawn_supervisor(&server.url("/sse"), Some(TOKEN), Duration::from_secs(60));
    sup.start().await.unwrap();

    let first = next_notification(&mut rx).await;
    assert_eq!(first.id, "n-1");
    assert_eq!(first.title, "First");

    let second = next_notification(&mut rx).await;
    assert_eq!(second.title, "Second");
    assert_eq!(second.kind, "file-7");
    assert_eq!(
        second.deep_link().map(|l| l.path()).as_deref(),
        Some("/dashboard/files-mobile/7")
    );

    // The body ended, so the supervisor is backing off.
    let status = wait_for_status(&sup, |s| s.state == ConnectionState::Reconnecting).await;
    assert_eq!(status.attempt_count, 1);
    assert!(!status.has_live_connection);
    assert_eq!(mock.hits_async().await, 1);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn error_status_schedules_reconnect() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/sse");
            then.status(401).body("unauthorized");
        })
        .await;

    let (sup, mut rx) = spawn_supervisor(&server.url("/sse"), Some(TOKEN), Duration::from_secs(60));
    sup.start().await.unwrap();

    let status = wait_for_status(&sup, |s| s.attempt_count == 1).await;
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert!(status.running);
    assert_eq!(mock.hits_async().await, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn wrong_content_type_is_a_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/sse");
            then.status(200)
                .header("content-type", "application/json")
                .body("{\"title\":\"not a stream\"}");
        })
        .await;

    let (sup, mut rx) = spawn_supervisor(&server.url("/sse"), None, Duration::from_secs(60));
    sup.start().await.unwrap();

    wait_for_status(&sup, |s| s.attempt_count == 1).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn anonymous_request_has_no_authorization() {
    let server = MockServer::start_async().await;
    let authed = server
        .mock_async(|when, then| {
            when.method(GET).path("/sse").header_exists("authorization");
            then.status(403);
        })
        .await;
    let anonymous = server
        .mock_async(|when, then| {
            when.method(GET).path("/sse");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(notification_frame("anon", "Hello"));
        })
        .await;

    let (sup, mut rx) = spawn_supervisor(&server.url("/sse"), None, Duration::from_secs(60));
    sup.start().await.unwrap();

    assert_eq!(next_notification(&mut rx).await.id, "anon");
    assert_eq!(authed.hits_async().await, 0);
    assert_eq!(anonymous.hits_async().await, 1);
}

// ---------------------------------------------------------------------------
// Raw TCP server: long-lived streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sends_expected_request_headers() {
    let server = MockSseServer::start().await.unwrap();
    let (sup, _rx) = spawn_supervisor(&server.url, Some(TOKEN), Duration::from_secs(60));
    sup.start().await.unwrap();

    let conn = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    assert!(conn.request.starts_with("get /sse http/1.1"));
    assert!(conn.has_header("accept: text/event-stream"));
    assert!(conn.has_header("cache-control: no-cache"));
    assert!(conn.has_header(&format!("authorization: bearer {}", TOKEN.to_lowercase())));
    assert!(conn.has_header(&format!(
        "user-agent: {}",
        push_subscriber::DEFAULT_USER_AGENT
    )));

    let status = wait_for_status(&sup, |s| s.state == ConnectionState::Open).await;
    assert!(status.has_live_connection);
    assert_eq!(status.attempt_count, 0);
}

#[tokio::test]
async fn frames_split_across_chunks_are_reassembled() {
    let server = MockSseServer::start().await.unwrap();
    let (sup, mut rx) = spawn_supervisor(&server.url, Some(TOKEN), Duration::from_secs(60));
    sup.start().await.unwrap();

    let mut conn = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    conn.send("event: notifi").await.unwrap();
    conn.send("cation\ndata: {\"id\":\"split\",").await.unwrap();
    conn.send("\"title\":\"اعلان\"}\n").await.unwrap();
    conn.send("\n").await.unwrap();

    let event = next_notification(&mut rx).await;
    assert_eq!(event.id, "split");
    assert_eq!(event.title, "اعلان");
}

#[tokio::test]
async fn reconnects_after_server_closes_stream() {
    let server = MockSseServer::start().await.unwrap();
    let (sup, mut rx) = spawn_supervisor(&server.url, Some(TOKEN), Duration::from_millis(50));
    sup.start().await.unwrap();

    let mut first = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    first.send(&notification_frame("a", "one")).await.unwrap();
    assert_eq!(next_notification(&mut rx).await.id, "a");
    first.finish().await.unwrap();

    let mut second = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    second.send(&notification_frame("b", "two")).await.unwrap();
    assert_eq!(next_notification(&mut rx).await.id, "b");

    let status = wait_for_status(&sup, |s| s.state == ConnectionState::Open).await;
    assert_eq!(status.attempt_count, 0);
}

#[tokio::test]
async fn token_change_replaces_live_stream() {
    const NEW_TOKEN: &str = "integration-token-0002";
    let server = MockSseServer::start().await.unwrap();
    let (sup, mut rx) = spawn_supervisor(&server.url, Some(TOKEN), Duration::from_secs(60));
    sup.start().await.unwrap();

    let mut first = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    wait_for_status(&sup, |s| s.state == ConnectionState::Open).await;

    sup.set_token(NEW_TOKEN).await.unwrap();
    assert!(tokio::time::timeout(WAIT, first.closed_by_client()).await.unwrap());

    let mut second = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    assert!(second.has_header(&format!("authorization: bearer {}", NEW_TOKEN.to_lowercase())));
    second.send(&notification_frame("after", "new token")).await.unwrap();
    assert_eq!(next_notification(&mut rx).await.id, "after");
}

#[tokio::test]
async fn stop_closes_stream_and_stays_down() {
    let server = MockSseServer::start().await.unwrap();
    let (sup, _rx) = spawn_supervisor(&server.url, Some(TOKEN), Duration::from_millis(50));
    sup.start().await.unwrap();

    let mut conn = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
    wait_for_status(&sup, |s| s.state == ConnectionState::Open).await;
    sup.stop().await.unwrap();
    assert!(tokio::time::timeout(WAIT, conn.closed_by_client()).await.unwrap());

    let again = tokio::time::timeout(Duration::from_millis(300), server.accept()).await;
    assert!(again.is_err(), "supervisor reconnected after stop");
    let status = sup.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Stopped);
    assert!(!status.running);
}
