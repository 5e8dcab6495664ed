//! End-to-end scenarios exercised over a real TLS socket, mirroring §8's S1-S5 from the
//! spec this crate implements. Each test spins up a full `Server` on an ephemeral port with
//! a freshly generated self-signed certificate and talks to it with the same codec the
//! server uses, exactly as a real client would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use embercast::codec::{read_frame, write_frame};
use embercast::config::ServerConfig;
use embercast::protocol::{Message, MessageKind, Priority};
use embercast::server::Server;
use serde_json::json;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsConnector, rustls::ClientConfig};

const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Accepts any server certificate. Only ever used against the self-signed cert this test
/// harness generates for itself, never a real deployment.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Writes a freshly generated self-signed "localhost" cert/key pair to `dir` and returns
/// their paths, the way a deployment would point `CHAT_CERT_PATH`/`CHAT_KEY_PATH` at files
/// on disk. Certificate *acquisition* is out of scope (§1); this only needs something to load.
fn write_test_cert(dir: &std::path::Path) -> (String, String) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    (
        cert_path.to_str().unwrap().to_string(),
        key_path.to_str().unwrap().to_string(),
    )
}

/// Boots a real server on an ephemeral port and returns its address plus a shutdown handle.
/// Dropping the returned `oneshot::Sender` (or calling `.send(())`) triggers the same
/// shutdown sequencing `Server::run` uses: stop accepting, then drain the scheduler.
async fn spawn_server() -> (SocketAddr, tempfile::TempDir, oneshot::Sender<()>) {
    let dir = tempfile::tempdir().unwrap();
    let (cert_path, key_path) = write_test_cert(dir.path());
    let user_db_path = dir.path().join("users.json").to_str().unwrap().to_string();

    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        cert_path,
        key_path,
        user_db_path,
        max_concurrent: 10,
        heartbeat_timeout_secs: 60,
        reaper_interval_secs: 30,
        max_frame_size: MAX_FRAME,
        log_dir: None,
    };

    let server = Arc::new(Server::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = server
            .serve(listener, async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (addr, dir, shutdown_tx)
}

struct TestClient {
    reader: ReadHalf<TlsStream<TcpStream>>,
    writer: WriteHalf<TlsStream<TcpStream>>,
    next_id: u64,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        let tls = connector.connect(server_name, tcp).await.unwrap();
        let (reader, writer) = tokio::io::split(tls);
        TestClient {
            reader,
            writer,
            next_id: 1,
        }
    }

    async fn send(&mut self, kind: MessageKind, data: serde_json::Value, priority: Priority) {
        let message = Message {
            id: self.next_id,
            kind_str: kind.as_str().to_string(),
            data,
            priority: priority as u8,
            room_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.next_id += 1;
        write_frame(&mut self.writer, &message).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.reader, MAX_FRAME))
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed before a frame arrived")
    }

    async fn register(&mut self, username: &str, password: &str) {
        self.send(
            MessageKind::RegisterRequest,
            json!({ "username": username, "password": password }),
            Priority::Normal,
        )
        .await;
        let reply = self.recv().await;
        assert_eq!(reply.kind_str, "register_response");
        assert_eq!(reply.data["success"], true);
    }

    async fn login(&mut self, username: &str, password: &str) -> Message {
        self.send(
            MessageKind::AuthRequest,
            json!({ "username": username, "password": password }),
            Priority::Normal,
        )
        .await;
        self.recv().await
    }
}

#[tokio::test]
async fn register_then_login_enforces_single_session() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "pw").await;

    let reply = alice.login("alice", "pw").await;
    assert_eq!(reply.kind_str, "auth_response");
    assert_eq!(reply.data["success"], true);
    assert_eq!(reply.data["username"], "alice");

    // A second connection authenticating as alice before logout must fail (§8 property 2).
    let mut alice_again = TestClient::connect(addr).await;
    let reply = alice_again.login("alice", "pw").await;
    assert_eq!(reply.data["success"], false);
    assert_eq!(reply.data["error"], "Invalid credentials");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut client = TestClient::connect(addr).await;
    client.register("bob", "correct-horse").await;

    let reply = client.login("bob", "wrong").await;
    assert_eq!(reply.data["success"], false);
    assert_eq!(reply.data["error"], "Invalid credentials");
}

#[tokio::test]
async fn create_join_chat_excludes_the_sender_from_fanout() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "pw").await;
    alice.login("alice", "pw").await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", "pw").await;
    bob.login("bob", "pw").await;

    alice
        .send(MessageKind::CreateRoom, json!({ "name": "g1" }), Priority::Normal)
        .await;
    let created = alice.recv().await;
    assert_eq!(created.kind_str, "success");
    let room_id = created.data["room_id"].as_str().unwrap().to_string();

    alice
        .send(
            MessageKind::JoinRoom,
            json!({ "room_id": room_id }),
            Priority::Normal,
        )
        .await;
    let joined = alice.recv().await;
    assert_eq!(joined.kind_str, "success");

    bob.send(
        MessageKind::JoinRoom,
        json!({ "room_id": room_id }),
        Priority::Normal,
    )
    .await;
    let joined = bob.recv().await;
    assert_eq!(joined.kind_str, "success");

    // alice observes bob's join before her own reply to anything else she sent.
    let event = alice.recv().await;
    assert_eq!(event.kind_str, "user_list");
    assert_eq!(event.data["action"], "join");
    assert_eq!(event.data["username"], "bob");

    bob.send(
        MessageKind::TextMessage,
        json!({ "text": "hi" }),
        Priority::Normal,
    )
    .await;

    let received = alice.recv().await;
    assert_eq!(received.kind_str, "text_message");
    assert_eq!(received.data["username"], "bob");
    assert_eq!(received.data["text"], "hi");

    // bob must not receive his own message back; the next frame he sees answers a heartbeat
    // he sends right after, proving no text_message was queued ahead of it (§8 property 4).
    bob.send(MessageKind::Heartbeat, json!({}), Priority::Critical)
        .await;
    let next = bob.recv().await;
    assert_eq!(next.kind_str, "heartbeat");
}

#[tokio::test]
async fn text_message_outside_a_room_is_an_error() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut charlie = TestClient::connect(addr).await;
    charlie.register("charlie", "pw").await;
    charlie.login("charlie", "pw").await;

    charlie
        .send(
            MessageKind::TextMessage,
            json!({ "text": "hello" }),
            Priority::Normal,
        )
        .await;
    let reply = charlie.recv().await;
    assert_eq!(reply.kind_str, "error");
    assert_eq!(reply.data["error"], "Not in a room");
}

#[tokio::test]
async fn room_is_garbage_collected_once_every_member_leaves() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "pw").await;
    alice.login("alice", "pw").await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", "pw").await;
    bob.login("bob", "pw").await;

    alice
        .send(MessageKind::CreateRoom, json!({ "name": "g1" }), Priority::Normal)
        .await;
    let created = alice.recv().await;
    let room_id = created.data["room_id"].as_str().unwrap().to_string();

    alice
        .send(
            MessageKind::JoinRoom,
            json!({ "room_id": room_id }),
            Priority::Normal,
        )
        .await;
    alice.recv().await;

    bob.send(
        MessageKind::JoinRoom,
        json!({ "room_id": room_id.clone() }),
        Priority::Normal,
    )
    .await;
    bob.recv().await;
    alice.recv().await; // bob's join event

    alice.send(MessageKind::LeaveRoom, json!({}), Priority::Normal).await;
    alice.recv().await; // success

    alice
        .send(MessageKind::ListRooms, json!({}), Priority::Normal)
        .await;
    let rooms = alice.recv().await;
    let still_present = rooms.data["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["id"] == room_id);
    assert!(still_present, "room must still exist while bob remains a member");

    bob.send(MessageKind::LeaveRoom, json!({}), Priority::Normal).await;
    bob.recv().await; // success

    alice
        .send(MessageKind::ListRooms, json!({}), Priority::Normal)
        .await;
    let rooms = alice.recv().await;
    let still_present = rooms.data["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["id"] == room_id);
    assert!(!still_present, "room must be gone once its last member leaves");
}

#[tokio::test]
async fn disconnecting_a_room_member_evicts_them_via_teardown() {
    let (addr, _dir, _shutdown) = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", "pw").await;
    alice.login("alice", "pw").await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", "pw").await;
    bob.login("bob", "pw").await;

    alice
        .send(MessageKind::CreateRoom, json!({ "name": "g1" }), Priority::Normal)
        .await;
    let created = alice.recv().await;
    let room_id = created.data["room_id"].as_str().unwrap().to_string();

    alice
        .send(
            MessageKind::JoinRoom,
            json!({ "room_id": room_id.clone() }),
            Priority::Normal,
        )
        .await;
    alice.recv().await;

    bob.send(
        MessageKind::JoinRoom,
        json!({ "room_id": room_id }),
        Priority::Normal,
    )
    .await;
    bob.recv().await;
    alice.recv().await; // bob's join event

    // Dropping bob's socket is an ungraceful disconnect; the read loop sees EOF/error and
    // runs teardown, which removes bob from the room and notifies alice (§4.5.1).
    drop(bob);

    let event = alice.recv().await;
    assert_eq!(event.kind_str, "user_list");
    assert_eq!(event.data["action"], "leave");
    assert_eq!(event.data["username"], "bob");
}
