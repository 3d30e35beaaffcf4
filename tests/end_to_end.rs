#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests over loopback sockets
//! Handshake, echo on both channels, rejection, timeouts and admission control

use double_socket::{
    Authentication, BitBuffer, ClientConnection, ClientHandler, ConnectionId, ConnectionState,
    DoubleClient, DoubleServer, NetworkConfig, ProtocolError, ServerClient, ServerHandler,
    ServerRegistry,
};
use serial_test::serial;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

const KEY: [u8; 16] = *b"0123456789abcdef";
const AUTH_DATA: &[u8; 16] = b"let-me-in-please";
const PAYLOAD_LEN: usize = 16;

fn payload_bytes(i: u32) -> Vec<u8> {
    (0..PAYLOAD_LEN as u8)
        .map(|k| (i as u8).wrapping_mul(31).wrapping_add(k))
        .collect()
}

fn write_payload(buffer: &mut BitBuffer, i: u32) {
    buffer.write_u32(i);
    buffer.write_bytes(&payload_bytes(i));
}

fn write_echo(buffer: &mut BitBuffer, i: u32, bytes: &[u8]) {
    buffer.write_u32(i);
    buffer.write_bytes(bytes);
}

/// Payloads carry no length; the body runs to the end of the packet
fn read_payload(buffer: &mut BitBuffer) -> (u32, Vec<u8>) {
    let i = buffer.read_u32();
    (i, buffer.read_remaining_bytes())
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Debug, PartialEq)]
enum Note {
    Authenticated,
    Tcp(u32, Vec<u8>),
    Udp(u32, Vec<u8>),
    ConnectFailed,
    Rejected(u8),
    TimedOut(ConnectionState),
    Lost(ConnectionState),
}

struct RecordingClient {
    notes: UnboundedSender<Note>,
}

impl ClientHandler for RecordingClient {
    fn on_connection_failure(&mut self, _: &mut ClientConnection, _: ProtocolError) {
        let _ = self.notes.send(Note::ConnectFailed);
    }

    fn on_tcp_authentication_failure(&mut self, _: &mut ClientConnection, error_code: u8) {
        let _ = self.notes.send(Note::Rejected(error_code));
    }

    fn on_authentication_timeout(&mut self, _: &mut ClientConnection, state: ConnectionState) {
        let _ = self.notes.send(Note::TimedOut(state));
    }

    fn on_full_authentication(&mut self, _: &mut ClientConnection, _: &mut BitBuffer) {
        let _ = self.notes.send(Note::Authenticated);
    }

    fn on_tcp_received(&mut self, _: &mut ClientConnection, payload: &mut BitBuffer) {
        let (i, bytes) = read_payload(payload);
        let _ = self.notes.send(Note::Tcp(i, bytes));
    }

    fn on_udp_received(&mut self, _: &mut ClientConnection, payload: &mut BitBuffer, _: u32) {
        let (i, bytes) = read_payload(payload);
        let _ = self.notes.send(Note::Udp(i, bytes));
    }

    fn on_connection_lost(&mut self, _: &mut ClientConnection, state: ConnectionState) {
        let _ = self.notes.send(Note::Lost(state));
    }
}

#[derive(Debug, PartialEq)]
enum ServerNote {
    Authenticated(ConnectionId),
    Lost(ConnectionId, ConnectionState),
}

struct EchoServer {
    notes: UnboundedSender<ServerNote>,
}

impl ServerHandler for EchoServer {
    fn authenticate(
        &mut self,
        _: &mut ServerRegistry,
        _: ConnectionId,
        payload: &mut BitBuffer,
    ) -> Authentication {
        if payload.read_remaining_bytes() == AUTH_DATA {
            Authentication::Accepted { encryption_key: KEY }
        } else {
            Authentication::Rejected {
                encryption_key: KEY,
                error_code: 7,
            }
        }
    }

    fn on_full_authentication(&mut self, _: &mut ServerRegistry, id: ConnectionId, _: &mut BitBuffer) {
        let _ = self.notes.send(ServerNote::Authenticated(id));
    }

    fn on_tcp_received(&mut self, server: &mut ServerRegistry, id: ConnectionId, payload: &mut BitBuffer) {
        let (i, bytes) = read_payload(payload);
        server.send_tcp(id, |b| write_echo(b, i, &bytes)).unwrap();
    }

    fn on_udp_received(
        &mut self,
        server: &mut ServerRegistry,
        id: ConnectionId,
        payload: &mut BitBuffer,
        _: u32,
    ) {
        let (i, bytes) = read_payload(payload);
        server.send_udp(id, |b| write_echo(b, i, &bytes));
    }

    fn on_lost_connection(&mut self, _: &mut ServerRegistry, client: ServerClient, state: ConnectionState) {
        let _ = self.notes.send(ServerNote::Lost(client.id(), state));
    }
}

async fn start_server(max_authenticated: usize) -> (DoubleServer<EchoServer>, UnboundedReceiver<ServerNote>) {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.server.max_authenticated = max_authenticated;
    });
    let (notes, rx) = unbounded_channel();
    let server = DoubleServer::bind(&config, EchoServer { notes }).await.unwrap();
    (server, rx)
}

fn client_config(server: &str, tcp_auth_timeout: Duration) -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.client.address = server.to_string();
        c.client.tcp_auth_timeout = tcp_auth_timeout;
    })
}

fn new_client(
    config: &NetworkConfig,
    auth_data: &[u8],
) -> (DoubleClient<RecordingClient>, UnboundedReceiver<Note>) {
    let (notes, rx) = unbounded_channel();
    let client = DoubleClient::new(config, KEY, auth_data.to_vec(), RecordingClient { notes }).unwrap();
    (client, rx)
}

/// Start a client against `server` and wait until both ends report authentication
async fn connected_client(
    server: &DoubleServer<EchoServer>,
    server_notes: &mut UnboundedReceiver<ServerNote>,
    config: &NetworkConfig,
) -> (DoubleClient<RecordingClient>, UnboundedReceiver<Note>, ConnectionId) {
    let (client, mut notes) = new_client(config, AUTH_DATA);
    client.start().unwrap();
    assert_eq!(next_note(&mut notes, Duration::from_secs(1)).await, Note::Authenticated);
    let id = match next_note(server_notes, Duration::from_secs(1)).await {
        ServerNote::Authenticated(id) => id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(server.with_registry(|r| r.authenticated_count()).unwrap(), 1);
    (client, notes, id)
}

async fn next_note<T>(notes: &mut UnboundedReceiver<T>, within: Duration) -> T {
    timeout(within, notes.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

/// Wait for the echo of UDP packet `i`; earlier echoes arriving late are skipped
async fn wait_for_udp(notes: &mut UnboundedReceiver<Note>, i: u32) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(250);
    loop {
        match tokio::time::timeout_at(deadline, notes.recv()).await {
            Ok(Some(Note::Udp(j, bytes))) if j == i => {
                assert_eq!(bytes, payload_bytes(i));
                return true;
            }
            Ok(Some(Note::Udp(j, _))) => assert!(j < i, "echo {j} arrived before {i} was sent"),
            Ok(Some(other)) => panic!("unexpected notification {other:?}"),
            Ok(None) => panic!("notification channel closed"),
            Err(_) => return false,
        }
    }
}

// ============================================================================
// ECHO
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_echo_thousand_packets_on_each_channel() {
    let (server, mut server_notes) = start_server(8).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    let (client, mut notes) = new_client(&config, AUTH_DATA);
    client.start().unwrap();

    assert_eq!(next_note(&mut notes, Duration::from_secs(1)).await, Note::Authenticated);
    let id = match next_note(&mut server_notes, Duration::from_secs(1)).await {
        ServerNote::Authenticated(id) => id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(client.state().unwrap(), ConnectionState::Authenticated);
    assert_eq!(
        server.with_registry(|r| r.client(id).map(ServerClient::state)).unwrap(),
        Some(ConnectionState::Authenticated)
    );

    for i in 0..1000 {
        client.send_tcp(|b| write_payload(b, i)).unwrap();
    }
    for i in 0..1000 {
        assert_eq!(
            next_note(&mut notes, Duration::from_secs(5)).await,
            Note::Tcp(i, payload_bytes(i))
        );
    }

    for i in 0..1000 {
        let mut echoed = false;
        for _ in 0..10 {
            client.send_udp(|b| write_payload(b, i)).unwrap();
            if wait_for_udp(&mut notes, i).await {
                echoed = true;
                break;
            }
        }
        assert!(echoed, "UDP packet {i} was never echoed");
    }

    let client_metrics = client.metrics().snapshot();
    assert_eq!(client_metrics.tcp_packets_received, 1002);
    assert_eq!(client_metrics.handshakes_success, 1);
    assert_eq!(server.metrics().snapshot().handshakes_success, 1);

    client.close().unwrap();
    assert_eq!(
        next_note(&mut server_notes, Duration::from_secs(2)).await,
        ServerNote::Lost(id, ConnectionState::Authenticated)
    );
    assert_eq!(server.with_registry(|r| r.authenticated_count()).unwrap(), 0);
}

// ============================================================================
// HANDSHAKE FAILURES
// ============================================================================

#[tokio::test]
#[serial]
async fn test_wrong_auth_data_is_rejected() {
    let (server, mut server_notes) = start_server(8).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    let (client, mut notes) = new_client(&config, b"wrong");
    client.start().unwrap();

    assert_eq!(next_note(&mut notes, Duration::from_secs(2)).await, Note::Rejected(7));
    assert_eq!(client.state().unwrap(), ConnectionState::Disconnected);
    assert!(timeout(Duration::from_millis(200), server_notes.recv()).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_unanswered_tcp_authentication_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let config = client_config(&address.to_string(), Duration::from_millis(300));
    let (client, mut notes) = new_client(&config, AUTH_DATA);
    client.start().unwrap();

    assert_eq!(
        next_note(&mut notes, Duration::from_secs(2)).await,
        Note::TimedOut(ConnectionState::TcpAuthenticating)
    );
    assert_eq!(client.state().unwrap(), ConnectionState::Disconnected);
    hold.abort();
}

#[tokio::test]
#[serial]
async fn test_refused_connection_reports_failure() {
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = client_config(&address.to_string(), Duration::from_secs(3));
    let (client, mut notes) = new_client(&config, AUTH_DATA);
    client.start().unwrap();

    assert_eq!(next_note(&mut notes, Duration::from_secs(2)).await, Note::ConnectFailed);
    assert!(client.start().is_ok(), "a failed client can start again");
}

#[tokio::test]
#[serial]
async fn test_start_twice_fails() {
    let (server, _server_notes) = start_server(8).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    let (client, _notes) = new_client(&config, AUTH_DATA);
    client.start().unwrap();
    assert!(client.start().is_err());
}

// ============================================================================
// ADMISSION CONTROL
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_single_slot_admits_one_client() {
    let (server, mut server_notes) = start_server(1).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(1));
    let (first, mut first_notes) = new_client(&config, AUTH_DATA);
    let (second, mut second_notes) = new_client(&config, AUTH_DATA);
    first.start().unwrap();
    second.start().unwrap();

    let a = next_note(&mut first_notes, Duration::from_secs(3)).await;
    let b = next_note(&mut second_notes, Duration::from_secs(3)).await;
    let (winner, loser, mut loser_notes, loser_outcome) = match (a, b) {
        (Note::Authenticated, other) => (first, second, second_notes, other),
        (other, Note::Authenticated) => (second, first, first_notes, other),
        other => panic!("nobody was admitted: {other:?}"),
    };
    assert!(
        matches!(
            loser_outcome,
            Note::Lost(ConnectionState::TcpAuthenticating)
                | Note::TimedOut(ConnectionState::TcpAuthenticating)
        ),
        "unexpected outcome for the second client: {loser_outcome:?}"
    );
    assert_eq!(winner.state().unwrap(), ConnectionState::Authenticated);
    assert_eq!(loser.state().unwrap(), ConnectionState::Disconnected);
    assert!(!server.with_registry(|r| r.is_accepting()).unwrap());

    let winner_id = loop {
        if let ServerNote::Authenticated(id) = next_note(&mut server_notes, Duration::from_secs(1)).await {
            break id;
        }
    };
    winner.close().unwrap();
    loop {
        if next_note(&mut server_notes, Duration::from_secs(2)).await
            == ServerNote::Lost(winner_id, ConnectionState::Authenticated)
        {
            break;
        }
    }

    // A connection left in the backlog while paused may briefly take the freed slot
    let mut admitted = false;
    for _ in 0..3 {
        loser.start().unwrap();
        match next_note(&mut loser_notes, Duration::from_secs(3)).await {
            Note::Authenticated => {
                admitted = true;
                break;
            }
            Note::Lost(_) | Note::TimedOut(_) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(admitted, "the freed slot was never handed to the second client");
}

// ============================================================================
// PAYLOAD LIMITS AND LOST CONNECTIONS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_udp_payloads_of_any_length_echo_exactly() {
    let (server, mut server_notes) = start_server(8).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    let (client, mut notes, id) = connected_client(&server, &mut server_notes, &config).await;

    for len in 0..=40u32 {
        let bytes: Vec<u8> = (0..len as u8).map(|k| k.wrapping_mul(7).wrapping_add(0xF0)).collect();
        let mut echoed = None;
        for _ in 0..10 {
            client.send_udp(|b| write_echo(b, len, &bytes)).unwrap();
            match timeout(Duration::from_millis(250), notes.recv()).await {
                Ok(Some(Note::Udp(j, got))) if j == len => {
                    echoed = Some(got);
                    break;
                }
                Ok(Some(Note::Udp(j, _))) => assert!(j < len),
                Ok(other) => panic!("unexpected {other:?}"),
                Err(_) => continue,
            }
        }
        assert_eq!(echoed, Some(bytes), "UDP payload of {len} bytes");
    }

    // The server is still serving the same client on both channels
    client.send_tcp(|b| write_payload(b, 9)).unwrap();
    assert_eq!(next_note(&mut notes, Duration::from_secs(2)).await, Note::Tcp(9, payload_bytes(9)));
    assert_eq!(
        server.with_registry(|r| r.client(id).map(ServerClient::state)).unwrap(),
        Some(ConnectionState::Authenticated)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_oversized_tcp_send_leaves_connection_usable() {
    let (server, mut server_notes) = start_server(8).await;
    let mut config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    config.transport.max_tcp_packet_size = 1024;
    let (client, mut notes, _) = connected_client(&server, &mut server_notes, &config).await;

    let result = client.send_tcp(|b| write_echo(b, 1, &[0xAB; 2000]));
    assert!(matches!(result, Err(ProtocolError::OversizedPacket(_))), "{result:?}");

    for i in 2..5 {
        client.send_tcp(|b| write_payload(b, i)).unwrap();
        assert_eq!(next_note(&mut notes, Duration::from_secs(2)).await, Note::Tcp(i, payload_bytes(i)));
    }
    assert_eq!(client.state().unwrap(), ConnectionState::Authenticated);
    assert!(timeout(Duration::from_millis(200), server_notes.recv()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_server_disconnect_is_reported_to_client() {
    let (server, mut server_notes) = start_server(8).await;
    let config = client_config(&server.local_addr().to_string(), Duration::from_secs(3));
    let (client, mut notes, id) = connected_client(&server, &mut server_notes, &config).await;

    assert!(server.disconnect(id).unwrap());
    assert_eq!(
        next_note(&mut notes, Duration::from_secs(2)).await,
        Note::Lost(ConnectionState::Authenticated)
    );
    assert_eq!(client.state().unwrap(), ConnectionState::Disconnected);
    assert!(client.send_tcp(|b| write_payload(b, 0)).is_ok(), "sends after a loss are skipped");
}
