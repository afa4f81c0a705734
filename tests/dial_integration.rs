//! End-to-end dial tests against local TLS servers and a fake HTTP proxy.
//!
//! Certificates are generated per test with rcgen; nothing leaves the loopback interface.
//! Set `RUST_LOG=tlsdial=debug` to see dial stages.

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::Digest;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tlsdial::connection::{TunnelError, VerifyError};
use tlsdial::{DialConfig, Dialer, Error, Network, TlsConfig, Verification};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Server identity: certificate chain (leaf first) and key.
struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivatePkcs8KeyDer<'static>,
}

impl Identity {
    fn leaf(&self) -> CertificateDer<'static> {
        self.chain[0].clone()
    }
}

fn self_signed(names: &[&str]) -> Identity {
    let params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .expect("cert params");
    let key = KeyPair::generate().expect("generate key");
    let cert = params.self_signed(&key).expect("self-sign");
    Identity {
        chain: vec![cert.der().clone()],
        key: PrivatePkcs8KeyDer::from(key.serialize_der()),
    }
}

/// A test CA and a leaf for `names` issued by it.
fn ca_issued(names: &[&str]) -> (CertificateDer<'static>, Identity) {
    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "tlsdial integration CA");
    let ca_key = KeyPair::generate().expect("generate CA key");
    let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");
    let issuer = Issuer::new(ca_params, ca_key);

    let leaf_params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .expect("leaf params");
    let leaf_key = KeyPair::generate().expect("generate leaf key");
    let leaf_cert = leaf_params
        .signed_by(&leaf_key, &issuer)
        .expect("sign leaf");

    (
        ca_cert.der().clone(),
        Identity {
            chain: vec![leaf_cert.der().clone()],
            key: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        },
    )
}

fn roots(ca: CertificateDer<'static>) -> TlsConfig {
    TlsConfig::builder()
        .root_certificates([ca])
        .build()
        .expect("tls config")
}

/// TLS server answering every connection with `hello`.
struct TlsTestServer {
    addr: SocketAddr,
    /// SNI seen per accepted handshake
    sni: mpsc::UnboundedReceiver<Option<String>>,
    /// Signalled when a client closes its side after the handshake
    closed: mpsc::UnboundedReceiver<()>,
}

async fn spawn_tls_server(identity: &Identity) -> TlsTestServer {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(
            identity.chain.clone(),
            PrivateKeyDer::Pkcs8(identity.key.clone_key()),
        )
        .expect("server config");
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (sni_tx, sni) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            let sni_tx = sni_tx.clone();
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let _ = sni_tx.send(tls.get_ref().1.server_name().map(str::to_string));
                let _ = tls.write_all(b"hello").await;
                let _ = tls.flush().await;
                let mut rest = Vec::new();
                let _ = tls.read_to_end(&mut rest).await;
                let _ = closed_tx.send(());
            });
        }
    });

    TlsTestServer { addr, sni, closed }
}

/// Fake HTTP proxy handling one CONNECT.
///
/// Answers with `response`; when `target` is set the connection is then spliced to it.
/// Resolves to the request head and any bytes the client sent after it.
async fn spawn_proxy(
    response: &'static [u8],
    target: Option<SocketAddr>,
) -> (SocketAddr, JoinHandle<(Vec<u8>, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");

    let handle = tokio::spawn(async move {
        let (mut client, _) = listener.accept().await.expect("proxy accept");
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.ends_with(b"\r\n\r\n") {
            let n = client.read(&mut buf).await.expect("proxy read");
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }

        client.write_all(response).await.expect("proxy write");

        match target {
            Some(target) => {
                let mut upstream = TcpStream::connect(target).await.expect("proxy upstream");
                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                (head, Vec::new())
            }
            None => {
                let _ = client.shutdown().await;
                let mut rest = Vec::new();
                let _ = client.read_to_end(&mut rest).await;
                (head, rest)
            }
        }
    });

    (addr, handle)
}

async fn read_greeting(conn: &mut tlsdial::VerifiedConnection) -> Vec<u8> {
    let mut greeting = vec![0u8; 5];
    conn.read_exact(&mut greeting).await.expect("read greeting");
    greeting
}

#[tokio::test]
async fn test_legacy_certificate_match_succeeds_without_sni() {
    init_tracing();
    let identity = self_signed(&["legacy.invalid"]);
    let mut server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .legacy_certificate(identity.leaf())
        .build();

    let mut conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");

    assert_eq!(read_greeting(&mut conn).await, b"hello");
    assert_eq!(conn.verification(), &Verification::Legacy(identity.leaf()));
    assert_eq!(conn.proxy(), None);
    assert_eq!(conn.peer_certificates()[0], identity.leaf());
    assert_eq!(conn.server_name(), "127.0.0.1");
    assert_eq!(
        conn.peer_fingerprint().unwrap(),
        sha2::Sha256::digest(identity.leaf().as_ref()).to_vec()
    );

    // No server name was sent
    assert_eq!(server.sni.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_legacy_certificate_mismatch_fails_and_closes() {
    init_tracing();
    let identity = self_signed(&["legacy.invalid"]);
    let pinned = self_signed(&["legacy.invalid"]).leaf();
    let mut server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .legacy_certificate(pinned)
        .build();

    let result = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config).await;
    assert!(matches!(
        result,
        Err(Error::Verify(VerifyError::UnexpectedCertificate))
    ));

    // The transport was closed, so the server sees end of stream
    tokio::time::timeout(Duration::from_secs(5), server.closed.recv())
        .await
        .expect("transport should be closed")
        .expect("server alive");
}

#[tokio::test]
async fn test_legacy_certificate_with_ip_only_address() {
    // Self-signed with no IP SAN: standard verification would reject it
    let identity = self_signed(&["some.other.name"]);
    let server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .legacy_certificate(identity.leaf())
        .build();

    let dialer = Dialer::new().timeout(Duration::from_secs(10));
    let conn = dialer
        .dial(Network::Tcp4, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert_eq!(conn.verification().label(), "legacy");
}

#[tokio::test]
async fn test_manual_chain_verification_succeeds() {
    init_tracing();
    let (ca, identity) = ca_issued(&["server.test"]);
    let mut server = spawn_tls_server(&identity).await;

    let tls = TlsConfig::builder()
        .root_certificates([ca])
        .server_name("server.test")
        .build()
        .expect("tls config");
    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(tls)
        .build();

    let mut conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert_eq!(read_greeting(&mut conn).await, b"hello");
    assert_eq!(conn.verification(), &Verification::Chain);
    assert_eq!(conn.server_name(), "server.test");

    // SNI suppressed even though a server name was configured
    assert_eq!(server.sni.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_manual_chain_verification_derives_name_from_address() {
    let (ca, identity) = ca_issued(&["127.0.0.1"]);
    let server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(roots(ca))
        .build();

    let conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert_eq!(conn.server_name(), "127.0.0.1");
}

#[tokio::test]
async fn test_manual_chain_verification_untrusted_root_fails() {
    let (_, identity) = ca_issued(&["127.0.0.1"]);
    let (other_ca, _) = ca_issued(&["127.0.0.1"]);
    let mut server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(roots(other_ca))
        .build();

    let result = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config).await;
    assert!(matches!(result, Err(Error::Verify(VerifyError::Chain(_)))));

    tokio::time::timeout(Duration::from_secs(5), server.closed.recv())
        .await
        .expect("transport should be closed")
        .expect("server alive");
}

#[tokio::test]
async fn test_manual_chain_verification_wrong_name_fails() {
    let (ca, identity) = ca_issued(&["server.test"]);
    let server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(roots(ca))
        .build();

    // Name derived from the address is 127.0.0.1, not in the certificate
    let result = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config).await;
    assert!(matches!(result, Err(Error::Verify(VerifyError::Chain(_)))));
}

#[tokio::test]
async fn test_send_server_name_uses_builtin_verification() {
    let (ca, identity) = ca_issued(&["server.test"]);
    let mut server = spawn_tls_server(&identity).await;

    let tls = TlsConfig::builder()
        .root_certificates([ca])
        .server_name("server.test")
        .build()
        .expect("tls config");
    let config = DialConfig::builder()
        .send_server_name(true)
        .tls_config(tls)
        .build();

    let mut conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert_eq!(read_greeting(&mut conn).await, b"hello");
    assert_eq!(conn.verification(), &Verification::BuiltIn);
    assert_eq!(
        server.sni.recv().await.unwrap().as_deref(),
        Some("server.test")
    );
}

#[tokio::test]
async fn test_send_server_name_untrusted_root_fails_handshake() {
    let (_, identity) = ca_issued(&["server.test"]);
    let (other_ca, _) = ca_issued(&["server.test"]);
    let server = spawn_tls_server(&identity).await;

    let tls = TlsConfig::builder()
        .root_certificates([other_ca])
        .server_name("server.test")
        .build()
        .expect("tls config");
    let config = DialConfig::builder()
        .send_server_name(true)
        .tls_config(tls)
        .build();

    let result = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config).await;
    assert!(matches!(result, Err(Error::Handshake(_))));
}

#[tokio::test]
async fn test_insecure_skip_verify_accepts_any_certificate() {
    let identity = self_signed(&["anything.invalid"]);
    let server = spawn_tls_server(&identity).await;

    let (unrelated_ca, _) = ca_issued(&["x.test"]);
    let tls = TlsConfig::builder()
        .root_certificates([unrelated_ca])
        .insecure_skip_verify(true)
        .build()
        .expect("tls config");
    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(tls)
        .build();

    let conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert_eq!(conn.verification(), &Verification::Skipped);
}

#[tokio::test]
async fn test_slow_handshake_times_out() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    // Accepts and never answers the ClientHello
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = closed_tx.send(());
    });

    let identity = self_signed(&["slow.invalid"]);
    let config = DialConfig::builder()
        .send_server_name(false)
        .legacy_certificate(identity.leaf())
        .build();

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let result = Dialer::new()
        .timeout(timeout)
        .dial(Network::Tcp, &addr.to_string(), &config)
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(e) => {
            assert!(e.is_timeout(), "expected timeout, got {:?}", e);
            assert!(e.is_temporary());
        }
        Ok(conn) => panic!("expected timeout, got {:?}", conn),
    }
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);

    // The abandoned handshake's socket gets closed
    tokio::time::timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .expect("socket should be closed after timeout")
        .expect("server alive");
}

#[tokio::test]
async fn test_deadline_bounds_dial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = DialConfig::builder()
        .legacy_certificate(self_signed(&["slow.invalid"]).leaf())
        .build();

    let started = Instant::now();
    let result = Dialer::new()
        .timeout(Duration::from_secs(60))
        .deadline(Instant::now() + Duration::from_millis(200))
        .dial(Network::Tcp, &addr.to_string(), &config)
        .await;

    assert!(matches!(result, Err(Error::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_deadline_covers_default_root_loading() {
    // Silent server: the handshake never completes
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    // No TlsConfig and SNI on: the dial has to obtain system roots itself
    let config = DialConfig::builder().send_server_name(true).build();

    let deadline = Instant::now() + Duration::from_millis(100);
    let result = Dialer::new()
        .deadline(deadline)
        .dial(Network::Tcp, &addr.to_string(), &config)
        .await;
    let returned = Instant::now();

    assert!(result.is_err());
    assert!(
        returned <= deadline + Duration::from_millis(20),
        "returned {:?} past the deadline",
        returned.saturating_duration_since(deadline)
    );
}

#[tokio::test]
async fn test_fast_dial_with_timeout_succeeds() {
    let identity = self_signed(&["fast.invalid"]);
    let server = spawn_tls_server(&identity).await;

    let config = DialConfig::builder()
        .legacy_certificate(identity.leaf())
        .build();

    let conn = Dialer::new()
        .timeout(Duration::from_secs(10))
        .nodelay(true)
        .dial(Network::Tcp, &server.addr.to_string(), &config)
        .await
        .expect("dial");
    assert!(conn.get_ref().get_ref().0.nodelay().unwrap());
}

#[tokio::test]
async fn test_proxy_tunnel_success() {
    init_tracing();
    let identity = self_signed(&["tunneled.invalid"]);
    let mut server = spawn_tls_server(&identity).await;
    let (proxy_addr, proxy) = spawn_proxy(b"HTTP/1.1 200 OK\r\n\r\n", Some(server.addr)).await;

    let config = DialConfig::builder()
        .http_proxy_address(proxy_addr.to_string())
        .send_server_name(false)
        .legacy_certificate(identity.leaf())
        .build();

    let target = "tunneled.invalid:443";
    let mut conn = Dialer::new()
        .timeout(Duration::from_secs(10))
        .dial(Network::Tcp, target, &config)
        .await
        .expect("dial through proxy");
    assert_eq!(read_greeting(&mut conn).await, b"hello");
    assert_eq!(conn.server_name(), "tunneled.invalid");
    assert_eq!(conn.proxy(), Some(proxy_addr.to_string().as_str()));
    assert_eq!(server.sni.recv().await.unwrap(), None);

    conn.shutdown().await.expect("shutdown");
    drop(conn);
    let (head, _) = proxy.await.expect("proxy task");
    assert_eq!(
        head,
        b"CONNECT tunneled.invalid:443 HTTP/1.1\r\nHost: tunneled.invalid\r\nConnection: Keep-Alive\r\n\r\n"
    );
}

#[tokio::test]
async fn test_proxy_rejection_fails_before_handshake() {
    let (proxy_addr, proxy) =
        spawn_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n", None).await;

    let config = DialConfig::builder()
        .http_proxy_address(proxy_addr.to_string())
        .legacy_certificate(self_signed(&["x.invalid"]).leaf())
        .build();

    let result = Dialer::new()
        .timeout(Duration::from_secs(10))
        .dial(Network::Tcp, "target.invalid:443", &config)
        .await;
    match result {
        Err(Error::Tunnel(TunnelError::UnexpectedResponse(response))) => {
            assert!(response.starts_with("HTTP/1.1 407"));
        }
        other => panic!("expected tunnel rejection, got {:?}", other),
    }

    let (_, after_head) = proxy.await.expect("proxy task");
    assert!(after_head.is_empty(), "handshake bytes were sent");
}

#[tokio::test]
async fn test_proxy_truncated_response_fails() {
    let (proxy_addr, proxy) = spawn_proxy(b"HTTP/1.1 200 OK\r\n", None).await;

    let config = DialConfig::builder()
        .http_proxy_address(proxy_addr.to_string())
        .legacy_certificate(self_signed(&["x.invalid"]).leaf())
        .build();

    let result =
        tlsdial::custom_tls_dial(Network::Tcp, "target.invalid:443", &config).await;
    assert!(matches!(result, Err(Error::Tunnel(TunnelError::Read(_)))));

    let (_, after_head) = proxy.await.expect("proxy task");
    assert!(after_head.is_empty(), "handshake bytes were sent");
}

#[tokio::test]
async fn test_repeated_dials_leave_config_unmodified() {
    let (ca, identity) = ca_issued(&["server.test"]);
    let server = spawn_tls_server(&identity).await;

    let tls = TlsConfig::builder()
        .root_certificates([ca])
        .server_name("server.test")
        .alpn_protocols(vec![b"http/1.1".to_vec()])
        .build()
        .expect("tls config");
    let config = DialConfig::builder()
        .send_server_name(false)
        .tls_config(tls)
        .build();
    let before = format!("{:?}", config);

    for _ in 0..2 {
        let conn = tlsdial::custom_tls_dial(Network::Tcp, &server.addr.to_string(), &config)
            .await
            .expect("dial");
        assert_eq!(conn.verification(), &Verification::Chain);
        assert_eq!(format!("{:?}", config), before);

        let tls = config.tls_config().unwrap();
        assert_eq!(tls.server_name(), Some("server.test"));
        assert!(!tls.insecure_skip_verify());
        assert_eq!(tls.alpn_protocols(), &[b"http/1.1".to_vec()]);
    }
    assert!(!config.send_server_name());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = DialConfig::builder()
        .legacy_certificate(self_signed(&["x.invalid"]).leaf())
        .build();
    let result = tlsdial::custom_tls_dial(Network::Tcp, &addr.to_string(), &config).await;
    assert!(matches!(result, Err(Error::Io(_))));
}
