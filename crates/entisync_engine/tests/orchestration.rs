//! Save, fetch and destroy orchestration against a scripted transport.

use entisync_core::{FileRef, Method, SyncError, TrackedObject, Value};
use entisync_engine::{
    Client, ClientConfig, DestroyOptions, FetchOptions, MockTransport, RequestTask, SaveOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Client, Arc<MockTransport>) {
    setup_with(ClientConfig::default())
}

fn setup_with(config: ClientConfig) -> (Client, Arc<MockTransport>) {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let client = Client::new(config, transport.clone());
    (client, transport)
}

fn updated() -> serde_json::Value {
    json!({"updatedAt": "2026-01-02T00:00:00.000Z"})
}

fn score(client: &Client, points: i64) -> TrackedObject {
    let obj = client.object("Score");
    obj.set("points", points).unwrap();
    obj
}

fn created(id: &str) -> serde_json::Value {
    json!({"objectId": id, "createdAt": "2026-01-01T00:00:00.000Z"})
}

#[tokio::test]
async fn failed_batch_slot_keeps_its_edits() {
    let (client, transport) = setup();
    let a = score(&client, 1);
    let b = score(&client, 2);
    let c = score(&client, 3);
    transport.push_response(json!([
        {"success": created("a1")},
        {"error": {"code": 137, "error": "duplicate value"}},
        {"success": created("c1")},
    ]));

    let err = client
        .save_all(&[a.clone(), b.clone(), c.clone()], &SaveOptions::default())
        .await
        .unwrap_err();

    let SyncError::Aggregate(errors) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].object.same_as(&b));
    assert_eq!(errors[0].error.code(), 137);

    assert_eq!(a.id().as_deref(), Some("a1"));
    assert_eq!(c.id().as_deref(), Some("c1"));
    assert!(!a.dirty());
    assert!(!c.dirty());
    assert!(b.id().is_none());
    assert!(b.dirty_key("points"));
    assert_eq!(b.get("points"), Some(Value::Integer(2)));

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[0].path, "batch");
    let requests = calls[0].body["requests"].as_array().unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0]["path"], json!("/1/classes/Score"));
    assert_eq!(requests[1]["body"], json!({"points": 2}));
}

#[tokio::test]
async fn concurrent_saves_of_one_object_run_in_order() {
    let (client, transport) = setup();
    transport.set_delay(Duration::from_millis(30));
    transport.set_handler(|request| match request.method {
        Method::Post => Ok(created("s1")),
        _ => Ok(json!({"updatedAt": "2026-01-02T00:00:00.000Z"})),
    });

    let obj = score(&client, 1);
    let first = tokio::spawn({
        let client = client.clone();
        let obj = obj.clone();
        async move { client.save(&obj, &SaveOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    obj.set("points", 2).unwrap();
    let second = tokio::spawn({
        let client = client.clone();
        let obj = obj.clone();
        async move { client.save(&obj, &SaveOptions::default()).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[0].body, json!({"points": 1}));
    assert_eq!(calls[1].method, Method::Put);
    assert_eq!(calls[1].path, "classes/Score/s1");
    assert_eq!(calls[1].body, json!({"points": 2}));

    assert_eq!(obj.id().as_deref(), Some("s1"));
    assert_eq!(obj.get("points"), Some(Value::Integer(2)));
    assert!(!obj.dirty());
}

#[tokio::test]
async fn cyclic_new_objects_cannot_be_saved() {
    let (client, transport) = setup();
    let a = client.object("Node");
    let b = client.object("Node");
    a.set("next", b.clone()).unwrap();
    b.set("next", a.clone()).unwrap();

    let err = client
        .save_all(&[a], &SaveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Tried to save a batch with a cycle.");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn pointers_are_saved_in_later_rounds() {
    let (client, transport) = setup();
    let parent = score(&client, 1);
    let child = client.object("Player");
    child.set("name", "ada").unwrap();
    parent.set("player", child.clone()).unwrap();

    transport.push_response(json!([{"success": created("p1")}]));
    transport.push_response(json!([{"success": created("s1")}]));

    client
        .save_all(&[parent.clone()], &SaveOptions::default())
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].body["requests"][0]["path"], json!("/1/classes/Player"));
    assert_eq!(
        calls[1].body["requests"][0]["body"]["player"],
        json!({"__type": "Pointer", "className": "Player", "objectId": "p1"})
    );
    assert_eq!(parent.id().as_deref(), Some("s1"));
}

#[tokio::test]
async fn transaction_and_batch_size_are_exclusive() {
    let (client, transport) = setup();
    let options = SaveOptions::default()
        .with_transaction(true)
        .with_batch_size(5);

    let err = client
        .save_all(&[score(&client, 1)], &options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("transaction and batchSize"));

    let err = client
        .destroy_all(
            &[client.object_with_id("Score", "s1")],
            &DestroyOptions::default().with_transaction(true).with_batch_size(5),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("transaction and batchSize"));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn batch_size_splits_rounds() {
    let (client, transport) = setup();
    transport.set_handler(|request| {
        let count = request.body["requests"].as_array().map_or(0, Vec::len);
        let slots: Vec<_> = (0..count)
            .map(|i| json!({"success": {"objectId": format!("id{i}")}}))
            .collect();
        Ok(json!(slots))
    });
    let objects: Vec<_> = (0..5).map(|i| score(&client, i)).collect();

    client
        .save_all(&objects, &SaveOptions::default().with_batch_size(2))
        .await
        .unwrap();

    let sizes: Vec<usize> = transport
        .calls()
        .iter()
        .map(|call| call.body["requests"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn custom_object_ids_must_be_set() {
    let transport = Arc::new(MockTransport::new());
    let client = Client::new(
        ClientConfig::default().with_allow_custom_object_id(true),
        transport.clone(),
    );

    let err = client
        .save(&score(&client, 1), &SaveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MissingObjectId(_)));

    let custom = client.object_with_id("Score", "mine");
    custom.set("points", 4).unwrap();
    transport.push_response(json!({"createdAt": "2026-01-01T00:00:00.000Z"}));
    client.save(&custom, &SaveOptions::default()).await.unwrap();

    let call = &transport.calls()[0];
    assert_eq!(call.method, Method::Post);
    assert_eq!(call.path, "classes/Score");
    assert_eq!(call.body, json!({"objectId": "mine", "points": 4}));
}

#[tokio::test]
async fn aborted_save_restores_edits() {
    let (client, transport) = setup();
    let obj = client.object_with_id("Score", "s1");
    obj.increment("points", 3).unwrap();
    let task = RequestTask::new();
    task.abort();

    let err = client
        .save(&obj, &SaveOptions::default().with_task(task))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Aborted));
    assert_eq!(transport.call_count(), 0);
    assert!(obj.dirty_key("points"));
    assert_eq!(obj.get("points"), Some(Value::Integer(3)));
}

#[tokio::test]
async fn connection_failures_are_flagged() {
    let (client, transport) = setup();
    transport.push_error(SyncError::ConnectionFailed("offline".into()));
    let obj = score(&client, 9);

    let err = client.save(&obj, &SaveOptions::default()).await.unwrap_err();
    assert!(err.is_connection_failure());
    assert!(obj.dirty_key("points"));
}

#[tokio::test]
async fn files_upload_before_their_owner() {
    let (client, transport) = setup();
    transport.push_response(json!({
        "name": "tfss-photo.png",
        "url": "https://files.example.com/tfss-photo.png",
    }));
    transport.push_response(created("s1"));

    let obj = client.object("Score");
    let photo = FileRef::new("photo.png", b"hi".to_vec(), Some("image/png".into()));
    obj.set("photo", photo.clone()).unwrap();
    client.save(&obj, &SaveOptions::default()).await.unwrap();

    assert!(photo.is_saved());
    let calls = transport.calls();
    assert_eq!(calls[0].path, "files/photo.png");
    assert_eq!(
        calls[0].body,
        json!({"base64": "aGk=", "_ContentType": "image/png"})
    );
    assert_eq!(calls[1].path, "classes/Score");
    assert_eq!(calls[1].body["photo"]["name"], json!("tfss-photo.png"));
}

#[tokio::test]
async fn partial_fetch_replaces_only_selected_keys() {
    let (client, transport) = setup();
    let obj = client.object_with_id("Score", "s1");
    transport.push_response(json!({"objectId": "s1", "points": 5, "player": "ada"}));
    client.fetch(&obj, &FetchOptions::default()).await.unwrap();

    obj.set("player", "grace").unwrap();
    transport.push_response(json!({"objectId": "s1", "points": 7}));
    client
        .fetch(&obj, &FetchOptions::default().with_keys(&["points"]))
        .await
        .unwrap();

    assert_eq!(transport.calls()[1].body, json!({"keys": "points"}));
    assert_eq!(obj.get("points"), Some(Value::Integer(7)));
    assert_eq!(obj.get("player"), Some(Value::String("grace".into())));
    assert!(obj.dirty_key("player"));
}

#[tokio::test]
async fn fetch_all_requires_every_object_when_forced() {
    let (client, transport) = setup();
    let found = client.object_with_id("Score", "s1");
    let missing = client.object_with_id("Score", "s2");
    transport.push_response(json!({"results": [{"objectId": "s1", "points": 1}]}));

    let err = client
        .fetch_all(&[found.clone(), missing.clone()], &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ObjectNotFound(_)));

    transport.push_response(json!({"results": [{"objectId": "s1", "points": 1}]}));
    client
        .fetch_all(
            &[found.clone(), missing.clone()],
            &FetchOptions::default().with_force(false),
        )
        .await
        .unwrap();
    assert_eq!(found.get("points"), Some(Value::Integer(1)));
    assert!(!missing.is_data_available());

    let mixed = client.object_with_id("Player", "p1");
    let err = client
        .fetch_all(&[found, mixed], &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidClassName(_)));
}

#[tokio::test]
async fn destroy_all_aggregates_slot_failures() {
    let (client, transport) = setup();
    let gone = client.object_with_id("Score", "s1");
    let stuck = client.object_with_id("Score", "s2");
    let unsaved = client.object("Score");
    transport.push_response(json!([
        {"success": {}},
        {"error": {"code": 119, "error": "permission denied"}},
    ]));

    let err = client
        .destroy_all(&[gone, stuck.clone(), unsaved], &DestroyOptions::default())
        .await
        .unwrap_err();
    let SyncError::Aggregate(errors) = err else {
        panic!("expected an aggregate error");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].object.same_as(&stuck));

    let requests = transport.calls()[0].body["requests"].clone();
    assert_eq!(
        requests,
        json!([
            {"method": "DELETE", "path": "/1/classes/Score/s1"},
            {"method": "DELETE", "path": "/1/classes/Score/s2"},
        ])
    );
}

#[tokio::test]
async fn destroy_skips_unsaved_objects() {
    let (client, transport) = setup();
    client
        .destroy(&client.object("Score"), &DestroyOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 0);

    transport.push_response(json!({}));
    client
        .destroy(&client.object_with_id("Score", "s1"), &DestroyOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.calls()[0].method, Method::Delete);
    assert_eq!(transport.calls()[0].path, "classes/Score/s1");
}

#[tokio::test]
async fn save_abandoned_by_a_timeout_still_commits() {
    let (client, transport) = setup();
    transport.set_delay(Duration::from_millis(100));
    transport.set_handler(|_| Ok(updated()));

    let obj = client.object_with_id("Score", "s1");
    obj.set("points", 1).unwrap();
    let waited =
        tokio::time::timeout(Duration::from_millis(10), client.save(&obj, &SaveOptions::default()))
            .await;
    assert!(waited.is_err());

    obj.set("name", "ada").unwrap();
    client.save(&obj, &SaveOptions::default()).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].body, json!({"points": 1}));
    assert_eq!(calls[1].body, json!({"name": "ada"}));
    assert!(!obj.dirty());
    assert_eq!(obj.get("points"), Some(Value::Integer(1)));
    assert_eq!(obj.get("name"), Some(Value::from("ada")));
}

#[tokio::test]
async fn save_all_abandoned_by_a_timeout_still_commits() {
    let (client, transport) = setup();
    transport.set_delay(Duration::from_millis(100));
    transport.set_handler(|request| {
        if request.path == "batch" {
            let count = request.body["requests"].as_array().map_or(0, Vec::len);
            Ok(json!(vec![json!({"success": updated()}); count]))
        } else {
            Ok(updated())
        }
    });

    let a = client.object_with_id("Score", "a1");
    let b = client.object_with_id("Score", "b1");
    a.set("points", 1).unwrap();
    b.set("points", 2).unwrap();
    let waited = tokio::time::timeout(
        Duration::from_millis(10),
        client.save_all(&[a.clone(), b.clone()], &SaveOptions::default()),
    )
    .await;
    assert!(waited.is_err());

    b.increment("points", 3).unwrap();
    client.save(&b, &SaveOptions::default()).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].path, "batch");
    assert_eq!(
        calls[1].body,
        json!({"points": {"__op": "Increment", "amount": 3}})
    );
    assert!(!a.dirty());
    assert!(!b.dirty());
    assert_eq!(b.get("points"), Some(Value::Integer(5)));
}

#[tokio::test]
async fn edits_before_the_first_poll_join_that_save() {
    let (client, transport) = setup();
    transport.set_handler(|_| Ok(created("s1")));

    let obj = score(&client, 1);
    let options = SaveOptions::default();
    let pending = client.save(&obj, &options);
    obj.set("points", 4).unwrap();
    pending.await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, json!({"points": 4}));
    assert!(!obj.dirty());
}

#[tokio::test]
async fn single_instance_saves_move_the_record_to_the_server_id() {
    let (client, transport) = setup_with(ClientConfig::default().with_single_instance(true));
    transport.set_delay(Duration::from_millis(30));
    transport.set_handler(|request| match request.method {
        Method::Post => Ok(created("s1")),
        _ => Ok(updated()),
    });

    let obj = score(&client, 1);
    let first = tokio::spawn({
        let client = client.clone();
        let obj = obj.clone();
        async move { client.save(&obj, &SaveOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    obj.set("points", 2).unwrap();
    let second = tokio::spawn({
        let client = client.clone();
        let obj = obj.clone();
        async move { client.save(&obj, &SaveOptions::default()).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[1].method, Method::Put);
    assert_eq!(calls[1].path, "classes/Score/s1");
    assert_eq!(calls[1].body, json!({"points": 2}));
    assert!(!obj.dirty());

    let other = client.object_with_id("Score", "s1");
    assert!(other.is_data_available());
    assert!(!other.dirty());
    assert_eq!(other.get("points"), Some(Value::Integer(2)));
    assert_eq!(other.created_at(), obj.created_at());
}
