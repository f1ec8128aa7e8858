use ring::digest;

use crate::file_store::FileStore;
use crate::model::Endpoint;
use crate::model::EndpointId;
use crate::model::Enrollments;
use crate::model::Issuer;
use crate::model::IssuerId;
use crate::model::ReaderKey;
use crate::model::StoreSnapshot;
use crate::store::KeyMaterialStore;

fn sample_endpoint(byte: u8) -> Endpoint {
    let public_key = vec![byte; 65];
    Endpoint {
        id: EndpointId::derive(&public_key),
        public_key,
        persistent_key: [byte; 32],
        counter: 0,
        last_used_at: 0,
        key_type: 0x01,
        enrollments: Enrollments::default(),
    }
}

#[test]
fn group_identifier_is_deterministic_and_length_8() {
    let key = ReaderKey([0x01; 32]);
    let expected = {
        let mut input = b"key-identifier".to_vec();
        input.extend_from_slice(&[0x01; 32]);
        let digest = digest::digest(&digest::SHA256, &input);
        digest.as_ref()[..8].to_vec()
    };

    let group_id = key.group_identifier();
    assert_eq!(group_id.len(), 8);
    assert_eq!(group_id.to_vec(), expected);
    // deterministic: repeated calls agree
    assert_eq!(group_id, key.group_identifier());
}

#[test]
fn zero_key_is_unconfigured() {
    assert!(!ReaderKey::ZERO.is_configured());
    assert!(ReaderKey([0x01; 32]).is_configured());
}

#[test]
fn snapshot_json_round_trip_is_identity() {
    let issuer_id = IssuerId([0x42; 32]);
    let mut issuer = Issuer::new(issuer_id, vec![0x04; 65]);
    issuer.endpoints.push(sample_endpoint(0xAA));

    let snapshot = StoreSnapshot::from_parts(ReaderKey([0x09; 32]), crate::model::ReaderIdentifier([0x10; 8]), vec![issuer]);

    let bytes = serde_json::to_vec(&snapshot).unwrap();
    let roundtripped: StoreSnapshot = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(roundtripped.reader_private_key, snapshot.reader_private_key);
    assert_eq!(roundtripped.reader_identifier, snapshot.reader_identifier);
    assert_eq!(roundtripped.issuer_list(), snapshot.issuer_list());
}

#[tokio::test]
async fn upsert_issuer_is_idempotent_on_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

    let id = IssuerId([0x07; 32]);
    store.upsert_issuer(Issuer::new(id, vec![0x04; 65])).await.unwrap();
    store.upsert_issuer(Issuer::new(id, vec![0x05; 65])).await.unwrap();

    let issuers = store.get_all_issuers().await;
    assert_eq!(issuers.len(), 1);
    assert_eq!(issuers[0].public_key, vec![0x05; 65]);
}

#[tokio::test]
async fn remove_issuer_is_a_no_op_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

    store.remove_issuer(IssuerId([0xFF; 32])).await.unwrap();
    assert!(store.get_all_issuers().await.is_empty());
}

#[tokio::test]
async fn reads_return_defensive_copies() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();
    let id = IssuerId([0x11; 32]);
    store.upsert_issuer(Issuer::new(id, vec![0x04; 65])).await.unwrap();

    let mut copy = store.get_issuer_by_id(id).await.unwrap();
    copy.public_key = vec![0xFF; 65];

    let fresh = store.get_issuer_by_id(id).await.unwrap();
    assert_eq!(fresh.public_key, vec![0x04; 65]);
}

#[tokio::test]
async fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("homekey.json");

    {
        let store = FileStore::open(&path).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x02; 32])).await.unwrap();
        store.upsert_issuer(Issuer::new(IssuerId([0x03; 32]), vec![0x04; 65])).await.unwrap();
    }

    let reopened = FileStore::open(&path).await.unwrap();
    assert_eq!(reopened.get_reader_private_key().await, ReaderKey([0x02; 32]));
    assert_eq!(reopened.get_all_issuers().await.len(), 1);
}

#[tokio::test]
async fn sync_issuers_adds_and_removes_by_public_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("homekey.json")).await.unwrap();

    let stale = Issuer::new(IssuerId([0x01; 32]), vec![0xAA; 65]);
    store.upsert_issuer(stale).await.unwrap();

    store.sync_issuers(vec![vec![0xBB; 65]]).await.unwrap();

    let issuers = store.get_all_issuers().await;
    assert_eq!(issuers.len(), 1);
    assert_eq!(issuers[0].public_key, vec![0xBB; 65]);
    assert!(issuers[0].endpoints.is_empty());
}

mod rest {
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use crate::model::ReaderIdentifier;
    use crate::model::ReaderKey;
    use crate::model::StoreSnapshot;
    use crate::rest_store::RestStore;
    use crate::store::KeyMaterialStore;

    #[tokio::test]
    async fn loads_initial_state_from_the_oracle() {
        let server = MockServer::start().await;
        let snapshot = StoreSnapshot::from_parts(ReaderKey([0x0A; 32]), ReaderIdentifier([0x0B; 8]), vec![]);

        Mock::given(method("POST"))
            .and(path("/_r/homekey_state_requested"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_r/homekey_state_updated"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = RestStore::connect(server.uri(), None).await.unwrap();
        assert_eq!(store.get_reader_private_key().await, ReaderKey([0x0A; 32]));
    }

    #[tokio::test]
    async fn write_failure_keeps_in_memory_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_r/homekey_state_requested"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&StoreSnapshot::default()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_r/homekey_state_updated"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = RestStore::connect(server.uri(), None).await.unwrap();
        store.set_reader_private_key(ReaderKey([0x42; 32])).await.unwrap();

        // the flush failed (500), but the mutation is retained in memory
        assert_eq!(store.get_reader_private_key().await, ReaderKey([0x42; 32]));
    }
}
