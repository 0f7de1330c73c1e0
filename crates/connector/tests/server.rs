mod common;

use std::error::Error;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use common::{Peer, crlf};
use http::{Request, Response, StatusCode};
use indoc::indoc;
use micro_connector::ConnectorConfig;
use micro_connector::connection::TlsInfo;
use micro_connector::controller::{ControllerHandle, ServerController};
use micro_connector::handler::{ConnectorService, Handler, make_handler};
use micro_connector::protocol::{Entity, InboundEntity};

struct Running {
    addr: SocketAddr,
    handle: ControllerHandle,
    thread: JoinHandle<std::io::Result<()>>,
}

impl Running {
    fn start<H: Handler + 'static>(config: ConnectorConfig, handler: H) -> Self {
        Self::start_with_service(config, handler, None)
    }

    fn start_with_service<H: Handler + 'static>(
        config: ConnectorConfig,
        handler: H,
        service: Option<Arc<dyn ConnectorService>>,
    ) -> Self {
        let controller = ServerController::bind_with_service("127.0.0.1:0".parse().unwrap(), config, handler, service).unwrap();
        let addr = controller.local_addr().unwrap();
        let handle = controller.handle();
        let thread = controller.spawn().unwrap();
        Self { addr, handle, thread }
    }

    fn peer(&self) -> Peer {
        Peer::connect(self.addr)
    }

    fn stop(self) {
        self.handle.shutdown();
        self.thread.join().unwrap().unwrap();
    }
}

async fn echo(mut request: Request<InboundEntity>) -> Result<Response<Entity>, Box<dyn Error + Send + Sync>> {
    let target = request.uri().to_string();
    match request.uri().path() {
        "/fail" => Err("refused".into()),
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Response::new(Entity::from(target)))
        }
        "/medium" => {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Response::new(Entity::from(target)))
        }
        "/upper" => {
            let text = request.body_mut().text().await?;
            Ok(Response::new(Entity::reader(Cursor::new(text.to_uppercase().into_bytes()), None)))
        }
        "/length" => {
            let text = request.body_mut().text().await?;
            Ok(Response::new(Entity::from(text.len().to_string())))
        }
        _ => Ok(Response::new(Entity::from(target))),
    }
}

#[test]
fn get_with_query() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(&crlf(indoc! {r"
        GET /foo?x=1 HTTP/1.1
        Host: localhost

    "}));
    let response = peer.read_response();
    assert_eq!(response.start_line, "HTTP/1.1 200 OK");
    assert_eq!(response.header("content-length"), Some("8"));
    assert_eq!(response.header("connection"), None);
    assert_eq!(response.text(), "/foo?x=1");

    // the connection stays open for the next request
    peer.send(b"GET /bar HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(peer.read_response().text(), "/bar");

    server.stop();
}

#[test]
fn pipelined_responses_keep_request_order() {
    let config = ConnectorConfig::builder().pipelining_connections(true).min_threads(4).max_threads(8).build().unwrap();
    let server = Running::start(config, make_handler(echo));
    let mut peer = server.peer();

    // the first request takes the longest to handle, the last one the shortest
    peer.send(&crlf(indoc! {r"
        GET /slow HTTP/1.1
        Host: localhost

        GET /medium HTTP/1.1
        Host: localhost

        GET /fast HTTP/1.1
        Host: localhost

    "}));

    let bodies: Vec<String> = (0..3).map(|_| peer.read_response().text().to_owned()).collect();
    assert_eq!(bodies, ["/slow", "/medium", "/fast"]);

    server.stop();
}

#[test]
fn connections_over_the_limit_are_refused() {
    let config = ConnectorConfig::builder().max_total_connections(2).build().unwrap();
    let server = Running::start(config, make_handler(echo));

    let mut first = server.peer();
    let mut second = server.peer();
    for peer in [&mut first, &mut second] {
        peer.send(b"GET /in HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(peer.read_response().text(), "/in");
    }

    let mut third = server.peer();
    assert!(third.is_closed_by_peer());

    // the admitted connections are still served
    first.send(b"GET /again HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(first.read_response().text(), "/again");

    server.stop();
}

#[test]
fn chunked_request_and_response() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(&crlf(indoc! {r"
        POST /upper HTTP/1.1
        Host: localhost
        Transfer-Encoding: chunked

        4
        Wiki
        5
        pedia
        0

    "}));
    let response = peer.read_response();
    assert_eq!(response.status(), 200);
    assert_eq!(response.header("transfer-encoding"), Some("chunked"));
    assert_eq!(response.header("content-length"), None);
    assert_eq!(response.text(), "WIKIPEDIA");

    server.stop();
}

#[test]
fn synchronous_handling() {
    let config = ConnectorConfig::builder().worker_threads(false).build().unwrap();
    let server = Running::start(config, make_handler(echo));
    let mut peer = server.peer();

    peer.send(b"POST /length HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nhello world");
    let response = peer.read_response();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "11");

    server.stop();
}

#[test]
fn http10_request_closes_the_connection() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(b"GET /old HTTP/1.0\r\n\r\n");
    let response = peer.read_response();
    assert_eq!(response.start_line, "HTTP/1.0 200 OK");
    assert_eq!(response.header("connection"), Some("close"));
    assert_eq!(response.text(), "/old");
    assert!(peer.is_closed_by_peer());

    server.stop();
}

#[test]
fn expect_continue() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(&crlf(indoc! {r"
        POST /length HTTP/1.1
        Host: localhost
        Content-Length: 5
        Expect: 100-continue

    "}));
    let interim = peer.read_response();
    assert_eq!(interim.start_line, "HTTP/1.1 100 Continue");

    peer.send(b"hello");
    let response = peer.read_response();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "5");

    server.stop();
}

#[test]
fn handler_error_becomes_internal_server_error() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(b"GET /fail HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let response = peer.read_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR.as_u16());
    assert_eq!(response.header("content-length"), Some("0"));

    server.stop();
}

#[test]
fn malformed_request_is_dropped_silently() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let mut peer = server.peer();

    peer.send(b"GET / HTTP/1.1\rX\n\r\n");
    assert!(peer.is_closed_by_peer());

    server.stop();
}

/// Stands for a TLS front end that negotiated the same session for every peer.
struct Terminated;

impl ConnectorService for Terminated {
    fn tls_info(&self, _peer: SocketAddr) -> Option<TlsInfo> {
        Some(TlsInfo::new("TLS_AES_128_GCM_SHA256", None))
    }
}

async fn whoami(request: Request<InboundEntity>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
    let peer = request.extensions().get::<SocketAddr>().map_or_else(|| "unknown".to_owned(), ToString::to_string);
    let tls = request
        .extensions()
        .get::<TlsInfo>()
        .map_or_else(|| "plain".to_owned(), |tls| format!("{} {}", tls.cipher_suite(), tls.key_size().unwrap_or(0)));
    Ok(Response::new(format!("{peer} {tls}")))
}

#[test]
fn requests_carry_peer_and_tls_session() {
    let server = Running::start_with_service(ConnectorConfig::default(), make_handler(whoami), Some(Arc::new(Terminated)));
    let mut peer = server.peer();

    peer.send(b"GET /whoami HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let response = peer.read_response();
    assert_eq!(response.text(), format!("{} TLS_AES_128_GCM_SHA256 128", peer.local_addr()));

    server.stop();
}

#[test]
fn plain_connections_have_no_tls_session() {
    let server = Running::start(ConnectorConfig::default(), make_handler(whoami));
    let mut peer = server.peer();

    peer.send(b"GET /whoami HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(peer.read_response().text(), format!("{} plain", peer.local_addr()));

    server.stop();
}

#[test]
fn shutdown_stops_the_controller() {
    let server = Running::start(ConnectorConfig::default(), make_handler(echo));
    let addr = server.addr;
    server.stop();

    let refused = std::net::TcpStream::connect_timeout(&addr, Duration::from_secs(1));
    assert!(refused.is_err());
}
