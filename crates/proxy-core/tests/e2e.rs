//! End-to-end scenarios driven against real loopback TCP sockets, mirroring
//! the scenarios in the proxy's design documentation (happy path, no route,
//! dial refusal, split request, large response, client abort).

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use proxy_config::RouteTable;
use proxy_core::Dispatcher;
use tempfile::NamedTempFile;

/// Starts a proxy on an OS-assigned loopback port with the given route
/// table contents, running its dispatch loop on a background thread for
/// the lifetime of the test process. Returns the proxy's bound address.
fn start_proxy(routes_conf: &str) -> SocketAddr {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(routes_conf.as_bytes()).unwrap();
    let routes = RouteTable::load(file.path()).unwrap();

    let mut dispatcher =
        Dispatcher::bind("127.0.0.1:0".parse().unwrap(), 512, routes).unwrap();
    let addr = dispatcher.local_addr().unwrap();
    // The dispatch loop runs until the process exits; tests never join it,
    // same as letting a server daemonize for the test's duration.
    thread::spawn(move || {
        let _ = dispatcher.run();
    });
    addr
}

/// Grabs an unused loopback port and releases it immediately, for tests
/// that need a port nothing is listening on.
fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Accepts exactly one connection, reads until the header terminator (and
/// `Content-Length` body, if any) has arrived, then writes `response` and
/// closes. Returns the bytes of the request the backend observed.
fn spawn_one_shot_backend(response: Vec<u8>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request_headers(&mut stream);
        stream.write_all(&response).unwrap();
        stream.flush().unwrap();
    });
    port
}

fn read_request_headers(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return buf;
        }
    }
}

fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    buf
}

#[test]
fn happy_path_forwards_request_and_relays_response() {
    let backend_port = spawn_one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec());
    let proxy_addr = start_proxy(&format!("/api 127.0.0.1 {backend_port}\n"));

    let mut client = TcpStream::connect(proxy_addr).unwrap();
    client.write_all(b"GET /api/users HTTP/1.1\r\nHost: proxy\r\n\r\n").unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();

    let response = read_all(&mut client);
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(b"OK"));
}

#[test]
fn no_matching_route_yields_502() {
    let proxy_addr = start_proxy("/api 127.0.0.1 1\n");

    let mut client = TcpStream::connect(proxy_addr).unwrap();
    client.write_all(b"GET /web/home HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_all(&mut client);
    assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"), "{}", String::from_utf8_lossy(&response));
}

#[test]
fn backend_dial_refusal_yields_502() {
    let refusing_port = unused_port();
    let proxy_addr = start_proxy(&format!("/ 127.0.0.1 {refusing_port}\n"));

    let mut client = TcpStream::connect(proxy_addr).unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_all(&mut client);
    assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"), "{}", String::from_utf8_lossy(&response));
}

#[test]
fn split_request_in_slow_chunks_still_forwards() {
    let backend_port = spawn_one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec());
    let proxy_addr = start_proxy(&format!("/api 127.0.0.1 {backend_port}\n"));

    let mut client = TcpStream::connect(proxy_addr).unwrap();
    let request = b"GET /api/slow HTTP/1.1\r\nHost: proxy\r\n\r\n";
    for chunk in request.chunks(5) {
        client.write_all(chunk).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    let response = read_all(&mut client);
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(b"OK"));
}

#[test]
fn large_response_is_forwarded_byte_exact() {
    let body: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 256) as u8).collect();
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    response.extend_from_slice(&body);

    let backend_port = spawn_one_shot_backend(response.clone());
    let proxy_addr = start_proxy(&format!("/big 127.0.0.1 {backend_port}\n"));

    let mut client = TcpStream::connect(proxy_addr).unwrap();
    client.write_all(b"GET /big/file HTTP/1.1\r\nHost: proxy\r\n\r\n").unwrap();

    let received = read_all(&mut client);
    assert_eq!(received, response);
}

#[test]
fn client_abort_mid_response_does_not_take_down_the_listener() {
    let body = vec![b'x'; 1024 * 1024];
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    response.extend_from_slice(&body);

    let backend_port = spawn_one_shot_backend(response);
    let proxy_addr = start_proxy(&format!("/stream 127.0.0.1 {backend_port}\n"));

    {
        let mut client = TcpStream::connect(proxy_addr).unwrap();
        client.write_all(b"GET /stream/x HTTP/1.1\r\nHost: proxy\r\n\r\n").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut small = [0u8; 1024];
        client.read_exact(&mut small).unwrap();
        // Dropping here closes the client socket mid-response; the proxy
        // must observe EPIPE/ECONNRESET on its next write without taking
        // the process down.
    }

    thread::sleep(Duration::from_millis(100));

    // The listener must still accept new connections afterward.
    let backend_port2 = spawn_one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec());
    let proxy_addr2 = start_proxy(&format!("/api 127.0.0.1 {backend_port2}\n"));
    let mut client2 = TcpStream::connect(proxy_addr2).unwrap();
    client2.write_all(b"GET /api/ping HTTP/1.1\r\nHost: proxy\r\n\r\n").unwrap();
    let response = read_all(&mut client2);
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
}
