mod support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatmirror_core::{Error, Store};
use chatmirror_runtime::gateway::GatewayTimeouts;
use chatmirror_runtime::{
    GatewayClient, SendGateway, SendRequest, SendResponse, SendService, send_with_fallback,
};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use support::FakeSession;

struct Harness {
    dir: TempDir,
    store: Store,
    session: Arc<FakeSession>,
    socket: PathBuf,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(&dir.path().join("chatmirror.db"))
            .await
            .expect("open store");
        let socket = dir.path().join("send.sock");
        Self {
            dir,
            store,
            session: Arc::new(FakeSession::new()),
            socket,
        }
    }

    fn service(&self) -> SendService {
        SendService::new(self.store.clone(), self.session.clone())
    }

    async fn serve(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        let gateway = SendGateway::bind(&self.socket, self.service(), GatewayTimeouts::default())
            .await
            .expect("bind gateway");
        tokio::spawn(gateway.serve(cancel.child_token()))
    }
}

async fn raw_exchange(socket: &Path, line: &str) -> SendResponse {
    let stream = UnixStream::connect(socket).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(line.as_bytes()).await.expect("write");
    write_half.shutdown().await.expect("shutdown");

    let mut reply = String::new();
    BufReader::new(read_half)
        .read_line(&mut reply)
        .await
        .expect("read reply");
    serde_json::from_str(reply.trim_end()).expect("reply json")
}

#[tokio::test]
async fn text_send_goes_through_gateway_and_is_recorded() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let client = GatewayClient::new(&harness.socket);
    let response = client
        .send(&SendRequest::text("+1 555-0100", "hi there"))
        .await
        .expect("send")
        .expect("gateway reachable");

    assert!(response.success);
    assert_eq!(response.id.as_deref(), Some("SENT-1"));
    assert_eq!(response.to.as_deref(), Some("15550100@s.whatsapp.net"));
    assert_eq!(
        harness.session.sent(),
        vec![("15550100@s.whatsapp.net".to_string(), "hi there".to_string())]
    );

    let echo = harness
        .store
        .get_message("15550100@s.whatsapp.net", "SENT-1")
        .await
        .expect("query")
        .expect("echo stored");
    assert!(echo.from_me);
    assert_eq!(echo.sender_name.as_deref(), Some("me"));
    assert_eq!(echo.text.as_deref(), Some("hi there"));

    cancel.cancel();
    server.await.expect("server");
    assert!(!harness.socket.exists());
}

#[tokio::test]
async fn file_send_reports_media_details() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let file = harness.dir.path().join("receipt");
    std::fs::write(&file, b"%PDF-1.4 fake").expect("write file");
    let mut req = SendRequest::file("15550100", file.to_string_lossy());
    req.filename = "receipt.pdf".to_string();
    req.caption = "for you".to_string();

    let response = GatewayClient::new(&harness.socket)
        .send(&req)
        .await
        .expect("send")
        .expect("gateway reachable");

    let sent = response.file.expect("file details");
    assert_eq!(sent.name, "receipt.pdf");
    assert_eq!(sent.mime_type, "application/pdf");
    assert_eq!(sent.media, "document");

    let echo = harness
        .store
        .get_message("15550100@s.whatsapp.net", "SENT-1")
        .await
        .expect("query")
        .expect("echo stored");
    assert_eq!(echo.media_type.as_deref(), Some("document"));
    assert_eq!(echo.display_text.as_deref(), Some("for you"));

    cancel.cancel();
    server.await.expect("server");
}

#[tokio::test]
async fn error_reply_is_returned_without_fallback() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let client = GatewayClient::new(&harness.socket);
    let mut fallback_ran = false;
    let err = send_with_fallback(&client, SendRequest::text("", "hi"), |_| {
        fallback_ran = true;
        async { Ok(SendResponse::default()) }
    })
    .await
    .expect_err("missing recipient");

    assert!(!fallback_ran);
    assert_eq!(err.to_string(), "to is required");
    assert!(harness.session.sent().is_empty());

    cancel.cancel();
    server.await.expect("server");
}

#[tokio::test]
async fn falls_back_when_no_gateway_listens() {
    let harness = Harness::new().await;
    let client = GatewayClient::new(&harness.socket);

    assert!(
        client
            .send(&SendRequest::text("123", "hi"))
            .await
            .expect("no error")
            .is_none()
    );

    let service = harness.service();
    let response = send_with_fallback(&client, SendRequest::text("123", "hi"), |req| async move {
        service.execute(req).await
    })
    .await
    .expect("fallback send");
    assert!(response.success);
    assert_eq!(harness.session.sent().len(), 1);
}

#[tokio::test]
async fn malformed_requests_get_error_replies() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let reply = raw_exchange(&harness.socket, "not json\n").await;
    assert!(!reply.success);
    assert!(
        reply
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("invalid json"))
    );

    let reply = raw_exchange(&harness.socket, "").await;
    assert_eq!(reply.error.as_deref(), Some("no input"));

    let reply = raw_exchange(&harness.socket, "{\"to\":\"123\"}\n").await;
    assert_eq!(reply.error.as_deref(), Some("to and message are required"));

    cancel.cancel();
    server.await.expect("server");
}

#[tokio::test]
async fn live_gateway_is_not_replaced() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let err = SendGateway::bind(&harness.socket, harness.service(), GatewayTimeouts::default())
        .await
        .err()
        .expect("second bind refused");
    assert!(matches!(err, Error::Other(ref msg) if msg.contains("already running")));

    cancel.cancel();
    server.await.expect("server");
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let harness = Harness::new().await;
    drop(std::os::unix::net::UnixListener::bind(&harness.socket).expect("stale bind"));
    assert!(harness.socket.exists());

    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;
    let response = GatewayClient::new(&harness.socket)
        .send(&SendRequest::text("123", "hello"))
        .await
        .expect("send")
        .expect("gateway reachable");
    assert!(response.success);

    cancel.cancel();
    server.await.expect("server");
}

#[tokio::test]
async fn stopping_waits_for_accepted_requests() {
    let harness = Harness::new().await;
    harness.session.slow_sends(std::time::Duration::from_millis(300));
    let cancel = CancellationToken::new();
    let server = harness.serve(&cancel).await;

    let client = GatewayClient::new(&harness.socket);
    let pending = tokio::spawn(async move { client.send(&SendRequest::text("123", "late")).await });
    support::wait_until(|| harness.session.sends_started() == 1).await;

    cancel.cancel();
    server.await.expect("server");

    // The echo is written before the gateway reports itself stopped.
    let echo = harness
        .store
        .get_message("123@s.whatsapp.net", "SENT-1")
        .await
        .expect("query")
        .expect("echo stored");
    assert_eq!(echo.text.as_deref(), Some("late"));
    assert!(!harness.socket.exists());

    let response = pending
        .await
        .expect("client task")
        .expect("send")
        .expect("gateway reachable");
    assert!(response.success);
}
