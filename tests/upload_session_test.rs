//! Integration tests for upload sessions against mocked gateway, pinner and
//! signing agent endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use w3files::catalog::{Catalog, CatalogStore, JsonFileCatalogStore};
use w3files::signer::{
    AgentRegistry, IdentitySelector, IdentityState, KdfParams, Keyring, ResolvedIdentity, Signature,
};
use w3files::upload::gateway::CHUNK_SIZE;
use w3files::upload::{
    CancelToken, CredentialToken, GatewayClient, UploadFile, UploadProgress, UploadSession, MAX_UPLOAD_BYTES,
};
use w3files::{UploadEndpoints, UploadError};

/// Cheap key derivation so tests don't spend seconds in Argon2
const TEST_KDF: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

const PASSPHRASE: &str = "correct horse";

fn local_identity() -> ResolvedIdentity {
    let mut keyring = Keyring::in_memory();
    keyring.generate_local("tester", PASSPHRASE, TEST_KDF).unwrap();
    keyring
        .resolve(&IdentitySelector::Default, &AgentRegistry::new())
        .unwrap()
}

fn delegated_identity(address: &str, agent_url: &str) -> ResolvedIdentity {
    let mut keyring = Keyring::in_memory();
    keyring.add_delegated("extension", address, agent_url).unwrap();
    keyring
        .resolve(&IdentitySelector::Default, &AgentRegistry::new())
        .unwrap()
}

fn session() -> Arc<UploadSession> {
    Arc::new(UploadSession::new(GatewayClient::new()))
}

fn endpoints(server: &MockServer) -> UploadEndpoints {
    UploadEndpoints::new(server.uri(), server.uri())
}

async fn mount_add(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/v0/add"))
        .and(query_param("pin", "true"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_pin(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/psa/pins"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn add_ok(hash: &str, name: &str, size: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"Hash": hash, "Name": name, "Size": size}))
}

fn pin_ok() -> ResponseTemplate {
    ResponseTemplate::new(202).set_body_json(json!({"requestid": "req-1", "status": "queued"}))
}

async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

fn authorization(request: &Request) -> String {
    request
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_upload_and_pin_success() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmHello", "hello.txt", "11")).await;
    Mock::given(method("POST"))
        .and(path("/psa/pins"))
        .and(body_partial_json(json!({"cid": "QmHello", "name": "hello.txt"})))
        .respond_with(pin_ok())
        .expect(1)
        .mount(&server)
        .await;

    let session = session();
    let mut identity = local_identity();
    let file = UploadFile::from_bytes("hello.txt", &b"hello world"[..]);

    let entry = session
        .start(&mut identity, &file, &endpoints(&server), Some(PASSPHRASE))
        .await
        .unwrap();

    assert_eq!(entry.content_hash, "QmHello");
    assert_eq!(entry.name, "hello.txt");
    assert_eq!(entry.size_bytes, 11);
    assert_eq!(entry.upload_endpoint, server.uri());
    assert_eq!(entry.pin_endpoint, server.uri());
    assert_eq!(
        session.progress(),
        UploadProgress {
            in_progress: false,
            percent_complete: 100
        }
    );
    assert!(!session.is_busy());
    assert_eq!(identity.state(), IdentityState::Unlocked);

    // A late cancel cannot undo a finished upload
    assert!(!session.cancel());
    assert_eq!(session.progress().percent_complete, 100);
}

#[tokio::test]
async fn test_credential_is_signed_address_for_both_calls() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmCred", "a.bin", "3")).await;
    mount_pin(&server, pin_ok()).await;

    let mut identity = local_identity();
    let address = identity.address().to_string();
    session()
        .start(
            &mut identity,
            &UploadFile::from_bytes("a.bin", vec![1u8, 2, 3]),
            &endpoints(&server),
            Some(PASSPHRASE),
        )
        .await
        .unwrap();

    let basic = authorization(&requests_to(&server, "/api/v0/add").await[0]);
    let bearer = authorization(&requests_to(&server, "/psa/pins").await[0]);
    let token = basic.strip_prefix("Basic ").unwrap();
    assert_eq!(bearer, format!("Bearer {token}"));

    let decoded = String::from_utf8(BASE64.decode(token).unwrap()).unwrap();
    let (signed_address, signature_hex) = decoded.split_once(':').unwrap();
    assert_eq!(signed_address, address);
    assert!(signature_hex.starts_with("0x"));

    // The signature covers the address and verifies under the address's key
    let public_key: [u8; 32] = bs58::decode(&address).into_vec().unwrap().try_into().unwrap();
    let public_key = VerifyingKey::from_bytes(&public_key).unwrap();
    let signature = Ed25519Signature::from_slice(&hex::decode(&signature_hex[2..]).unwrap()).unwrap();
    assert!(public_key.verify(address.as_bytes(), &signature).is_ok());
}

#[tokio::test]
async fn test_upload_body_is_multipart_file_field() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmBody", "report.csv", "9")).await;
    mount_pin(&server, pin_ok()).await;

    session()
        .start(
            &mut local_identity(),
            &UploadFile::from_bytes("report.csv", &b"a,b\n1,2\n"[..]),
            &endpoints(&server),
            Some(PASSPHRASE),
        )
        .await
        .unwrap();

    let request = &requests_to(&server, "/api/v0/add").await[0];
    let content_type = request.headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(r#"name="file""#));
    assert!(body.contains(r#"filename="report.csv""#));
    assert!(body.contains("a,b\n1,2\n"));
}

#[tokio::test]
async fn test_oversized_file_rejected_before_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::File::create(&path)
        .unwrap()
        .set_len(MAX_UPLOAD_BYTES + 1)
        .unwrap();

    let file = UploadFile::from_path(&path).await.unwrap();
    let session = session();
    let err = session
        .start(&mut local_identity(), &file, &endpoints(&server), Some(PASSPHRASE))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(session.progress(), UploadProgress::idle());
}

#[tokio::test]
async fn test_file_at_limit_passes_size_check() {
    let server = MockServer::start().await;
    mount_add(&server, ResponseTemplate::new(500).set_body_string("disk full")).await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edge.bin");
    std::fs::File::create(&path)
        .unwrap()
        .set_len(MAX_UPLOAD_BYTES)
        .unwrap();

    let file = UploadFile::from_path(&path).await.unwrap();
    let err = session()
        .start(&mut local_identity(), &file, &endpoints(&server), Some(PASSPHRASE))
        .await
        .unwrap_err();

    // Reached the gateway, so the size precondition held
    match err {
        UploadError::Network(message) => assert_eq!(message, "disk full"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_or_missing_passphrase_is_authentication_error() {
    let server = MockServer::start().await;
    let session = session();
    let file = UploadFile::from_bytes("a.txt", &b"a"[..]);
    let mut identity = local_identity();

    let err = session
        .start(&mut identity, &file, &endpoints(&server), Some("wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Authentication(_)));
    assert_eq!(identity.state(), IdentityState::Locked);

    let err = session
        .start(&mut identity, &file, &endpoints(&server), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Authentication(_)));

    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(session.progress(), UploadProgress::idle());
}

#[tokio::test]
async fn test_cancel_during_transfer_leaves_catalog_unchanged() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        add_ok("QmSlow", "slow.txt", "4").set_delay(Duration::from_secs(30)),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/psa/pins"))
        .respond_with(pin_ok())
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = JsonFileCatalogStore::in_dir(dir.path());
    let mut catalog = Catalog::new();
    catalog.record_upload(w3files::CatalogEntry {
        content_hash: "QmOld".into(),
        name: "old.txt".into(),
        size_bytes: 1,
        upload_endpoint: "https://gw.example".into(),
        pin_endpoint: "https://pin.example".into(),
    });
    store.save(&catalog).unwrap();
    let before = std::fs::read(store.path()).unwrap();

    let session = session();
    let task_session = session.clone();
    let task_endpoints = endpoints(&server);
    let upload = tokio::spawn(async move {
        let mut identity = local_identity();
        let file = UploadFile::from_bytes("slow.txt", &b"slow"[..]);
        task_session
            .start(&mut identity, &file, &task_endpoints, Some(PASSPHRASE))
            .await
    });

    // Cancel is a no-op until the transfer starts, so keep trying
    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.cancel() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), upload)
        .await
        .unwrap()
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancellation());

    // Only a successful session is recorded
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
    assert_eq!(store.load(), catalog);
    assert_eq!(session.progress(), UploadProgress::idle());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_cancel_stops_body_between_chunks() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmBig", "big.bin", "0")).await;

    let total = 8 * 1024 * 1024;
    let file = UploadFile::from_bytes("big.bin", vec![1u8; total]);
    let credential = CredentialToken::new("5Addr", &Signature::from_bytes(vec![1, 2]));
    let token = CancelToken::new();

    let sent = Arc::new(AtomicU64::new(0));
    let cancel_after = 4 * CHUNK_SIZE as u64;
    let on_progress = {
        let sent = sent.clone();
        let token = token.clone();
        move |so_far: u64, _total: u64| {
            sent.store(so_far, Ordering::SeqCst);
            if so_far >= cancel_after {
                token.cancel();
            }
        }
    };

    let err = GatewayClient::new()
        .add(&server.uri(), &credential, &file, &token, on_progress)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());

    // No chunk is handed over once the token is cancelled
    assert_eq!(sent.load(Ordering::SeqCst), cancel_after);
    assert!(server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .all(|r| r.body.len() < total));
}

#[tokio::test]
async fn test_cancel_during_pin_abandons_pin() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmPinSlow", "pin.txt", "4")).await;
    mount_pin(&server, pin_ok().set_delay(Duration::from_secs(30))).await;

    let session = session();
    let task_session = session.clone();
    let task_endpoints = endpoints(&server);
    let upload = tokio::spawn(async move {
        let mut identity = local_identity();
        let file = UploadFile::from_bytes("pin.txt", &b"data"[..]);
        task_session
            .start(&mut identity, &file, &task_endpoints, Some(PASSPHRASE))
            .await
    });

    // The pinner holds the request for 30s; cancel once it has arrived
    tokio::time::timeout(Duration::from_secs(5), async {
        while requests_to(&server, "/psa/pins").await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(session.cancel());

    let result = tokio::time::timeout(Duration::from_secs(5), upload)
        .await
        .unwrap()
        .unwrap();
    assert!(result.unwrap_err().is_cancellation());
    assert_eq!(session.progress(), UploadProgress::idle());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_progress_below_100_until_pin_completes() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmProg", "p.bin", "200000")).await;
    mount_pin(&server, pin_ok().set_delay(Duration::from_millis(500))).await;

    let session = session();
    let mut observed = session.subscribe_progress();
    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while observed.changed().await.is_ok() {
            let state = *observed.borrow_and_update();
            seen.push(state);
            if state.percent_complete == 100 {
                break;
            }
        }
        seen
    });

    let task_session = session.clone();
    let task_endpoints = endpoints(&server);
    let upload = tokio::spawn(async move {
        let mut identity = local_identity();
        let file = UploadFile::from_bytes("p.bin", vec![0u8; 200_000]);
        task_session
            .start(&mut identity, &file, &task_endpoints, Some(PASSPHRASE))
            .await
    });

    // While the pin request is outstanding the transfer has finished but
    // progress must not yet report completion
    tokio::time::timeout(Duration::from_secs(5), async {
        while requests_to(&server, "/psa/pins").await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let mid_pin = session.progress();
    assert!(mid_pin.in_progress);
    assert!(mid_pin.percent_complete <= 99);

    upload.await.unwrap().unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();

    let (last, earlier) = seen.split_last().unwrap();
    assert_eq!(last.percent_complete, 100);
    assert!(!last.in_progress);
    assert!(earlier.iter().all(|p| p.in_progress && p.percent_complete <= 99));
}

#[tokio::test]
async fn test_pin_failure_surfaces_server_message() {
    let server = MockServer::start().await;
    mount_add(&server, add_ok("QmPin", "x.txt", "1")).await;
    mount_pin(
        &server,
        ResponseTemplate::new(403).set_body_json(json!({"error": "pin quota exceeded"})),
    )
    .await;

    let session = session();
    let err = session
        .start(
            &mut local_identity(),
            &UploadFile::from_bytes("x.txt", &b"x"[..]),
            &endpoints(&server),
            Some(PASSPHRASE),
        )
        .await
        .unwrap_err();

    match &err {
        UploadError::Network(message) => assert_eq!(message, "pin quota exceeded"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_message(), "pin quota exceeded");
    assert_eq!(session.progress(), UploadProgress::idle());
}

#[tokio::test]
async fn test_gateway_rejection_skips_pin() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({"Message": "invalid signature", "Code": 0})),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/psa/pins"))
        .respond_with(pin_ok())
        .expect(0)
        .mount(&server)
        .await;

    let err = session()
        .start(
            &mut local_identity(),
            &UploadFile::from_bytes("x.txt", &b"x"[..]),
            &endpoints(&server),
            Some(PASSPHRASE),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Network(ref m) if m == "invalid signature"));
}

#[tokio::test]
async fn test_concurrent_start_is_rejected() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        add_ok("QmBusy", "busy.txt", "4").set_delay(Duration::from_secs(30)),
    )
    .await;

    let session = session();
    let task_session = session.clone();
    let task_endpoints = endpoints(&server);
    let first = tokio::spawn(async move {
        let mut identity = local_identity();
        let file = UploadFile::from_bytes("busy.txt", &b"busy"[..]);
        task_session
            .start(&mut identity, &file, &task_endpoints, Some(PASSPHRASE))
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = session
        .start(
            &mut local_identity(),
            &UploadFile::from_bytes("other.txt", &b"other"[..]),
            &endpoints(&server),
            Some(PASSPHRASE),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert!(session.is_busy());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.cancel() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(first.await.unwrap().unwrap_err().is_cancellation());
}

#[tokio::test]
async fn test_delegated_without_raw_signing_fails_authentication() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"signRaw": false})))
        .mount(&agent)
        .await;
    Mock::given(method("POST"))
        .and(path("/sign-raw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"signature": "0x00"})))
        .expect(0)
        .mount(&agent)
        .await;

    let gateway = MockServer::start().await;
    let mut identity = delegated_identity("5Delegated", &agent.uri());
    assert_eq!(identity.state(), IdentityState::DelegatedPending);

    let err = session()
        .start(
            &mut identity,
            &UploadFile::from_bytes("x.txt", &b"x"[..]),
            &endpoints(&gateway),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Authentication(_)));
    assert_eq!(identity.state(), IdentityState::Unusable);
    assert!(gateway.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delegated_signature_used_in_credential() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"signRaw": true})))
        .mount(&agent)
        .await;
    Mock::given(method("POST"))
        .and(path("/sign-raw"))
        .and(body_partial_json(json!({
            "address": "5Delegated",
            "data": format!("0x{}", hex::encode("5Delegated")),
            "type": "bytes"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "signature": "0xDEADBEEF"})))
        .expect(1)
        .mount(&agent)
        .await;

    let gateway = MockServer::start().await;
    mount_add(&gateway, add_ok("QmDel", "d.txt", "1")).await;
    mount_pin(&gateway, pin_ok()).await;

    let mut identity = delegated_identity("5Delegated", &agent.uri());
    session()
        .start(
            &mut identity,
            &UploadFile::from_bytes("d.txt", &b"d"[..]),
            &endpoints(&gateway),
            None,
        )
        .await
        .unwrap();

    assert_eq!(identity.state(), IdentityState::DelegatedReady);
    let basic = authorization(&requests_to(&gateway, "/api/v0/add").await[0]);
    let token = basic.strip_prefix("Basic ").unwrap();
    assert_eq!(BASE64.decode(token).unwrap(), b"5Delegated:0xdeadbeef");
}

#[tokio::test]
async fn test_hardware_identity_blocks_upload() {
    let gateway = MockServer::start().await;
    let mut keyring = Keyring::in_memory();
    keyring.add_hardware("ledger", "5Ledger").unwrap();
    let mut identity = keyring
        .resolve(&IdentitySelector::Default, &AgentRegistry::new())
        .unwrap();

    let err = session()
        .start(
            &mut identity,
            &UploadFile::from_bytes("x.txt", &b"x"[..]),
            &endpoints(&gateway),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Authentication(_)));
    assert!(gateway.received_requests().await.unwrap().is_empty());
}
