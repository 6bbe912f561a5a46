//! In-process REST server.
//!
//! [`MemoryServer`] answers the requests the engine sends from in-memory
//! tables. It implements [`Transport`] directly, so a client can be pointed
//! at it without any I/O.
//!
//! | Method | Path               | Effect                                          |
//! |--------|--------------------|-------------------------------------------------|
//! | POST   | `classes/<C>`      | create; answers `objectId` and `createdAt`      |
//! | GET    | `classes/<C>`      | query with `where`, `order`, `skip`, `limit`, `keys` |
//! | GET    | `classes/<C>/<id>` | fetch one object, optionally only `keys`        |
//! | PUT    | `classes/<C>/<id>` | apply a save payload; answers `updatedAt`       |
//! | DELETE | `classes/<C>/<id>` | delete                                          |
//! | POST   | `batch`            | run sub-requests, optionally as a transaction   |
//! | POST   | `files/<name>`     | store base64 contents; answers `name` and `url` |
//!
//! Ids and timestamps are deterministic: ids count up from `o000000001` and
//! every write advances a one-second clock starting at 2026-01-01.

use async_trait::async_trait;
use base64::Engine;
use entisync_core::codec::{self, JsonMap, JsonValue, PointerMode};
use entisync_core::{Context, Method, Op, SyncError, SyncResult};
use entisync_engine::{RequestOptions, Transport};
use entisync_store::Query;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, trace};

/// Base URL of uploaded files.
pub const FILE_URL_BASE: &str = "https://files.entisync.test/";

/// Code for malformed request bodies.
pub const INVALID_JSON: i32 = 107;
/// Code for a custom object id that is already taken.
pub const DUPLICATE_VALUE: i32 = 137;

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Decoded contents.
    pub data: Vec<u8>,
    /// Content type sent with the upload.
    pub content_type: Option<String>,
}

type Table = BTreeMap<String, JsonMap>;

#[derive(Debug, Default)]
struct ServerState {
    classes: BTreeMap<String, Table>,
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
    clock: u64,
    offline: bool,
    rejected: HashMap<String, (i32, String)>,
    requests: usize,
}

impl ServerState {
    fn next_object_id(&mut self) -> String {
        self.next_id += 1;
        format!("o{:09}", self.next_id)
    }

    fn tick(&mut self) -> String {
        self.clock += 1;
        let secs = self.clock;
        format!(
            "2026-01-01T{:02}:{:02}:{:02}.000Z",
            (secs / 3600) % 24,
            (secs / 60) % 60,
            secs % 60
        )
    }

    fn check_writable(&self, class_name: &str) -> SyncResult<()> {
        match self.rejected.get(class_name) {
            Some((code, message)) => Err(SyncError::from_server(*code, message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    requests: Vec<BatchEntry>,
    #[serde(default)]
    transaction: bool,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    method: String,
    path: String,
    #[serde(default)]
    body: JsonValue,
}

enum Route<'a> {
    Class(&'a str),
    Object(&'a str, &'a str),
    Batch,
    File(&'a str),
}

fn route(path: &str) -> SyncResult<Route<'_>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["classes", class_name] => Ok(Route::Class(*class_name)),
        ["classes", class_name, id] => Ok(Route::Object(*class_name, *id)),
        ["batch"] => Ok(Route::Batch),
        ["files", name] => Ok(Route::File(*name)),
        _ => Err(SyncError::from_server(INVALID_JSON, format!("unknown path {path}"))),
    }
}

fn object_body(body: JsonValue) -> SyncResult<JsonMap> {
    match body {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(JsonMap::new()),
        other => Err(SyncError::from_server(
            INVALID_JSON,
            format!("request body must be an object, got {other}"),
        )),
    }
}

fn not_found() -> SyncError {
    SyncError::ObjectNotFound("Object not found.".into())
}

fn error_message(err: &SyncError) -> String {
    match err {
        SyncError::Server { message, .. }
        | SyncError::Other { message }
        | SyncError::ConnectionFailed(message)
        | SyncError::ObjectNotFound(message)
        | SyncError::InvalidQuery(message)
        | SyncError::InvalidKeyName(message)
        | SyncError::IncorrectType(message) => message.clone(),
        other => other.to_string(),
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, "objectId" | "createdAt" | "updatedAt")
}

/// An in-memory server speaking the engine's REST dialect.
pub struct MemoryServer {
    ctx: Context,
    server_path: String,
    state: Mutex<ServerState>,
}

impl MemoryServer {
    /// Creates an empty server expecting batch paths under `/1/`.
    pub fn new() -> Self {
        Self::with_server_path("/1/")
    }

    /// Creates an empty server expecting batch paths under `server_path`.
    pub fn with_server_path(server_path: impl Into<String>) -> Self {
        Self {
            ctx: Context::new(),
            server_path: server_path.into(),
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Makes every request fail with a connection failure while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fails every write to `class_name` with `code`.
    pub fn reject_writes(&self, class_name: &str, code: i32, message: &str) {
        self.state
            .lock()
            .rejected
            .insert(class_name.to_string(), (code, message.to_string()));
    }

    /// Lifts a [`MemoryServer::reject_writes`].
    pub fn accept_writes(&self, class_name: &str) {
        self.state.lock().rejected.remove(class_name);
    }

    /// Stores `attributes` as a new object and returns its id.
    pub fn insert_object(&self, class_name: &str, attributes: JsonMap) -> String {
        let mut state = self.state.lock();
        let id = state.next_object_id();
        let now = state.tick();
        let mut row = attributes;
        row.insert("objectId".into(), JsonValue::String(id.clone()));
        row.insert("createdAt".into(), JsonValue::String(now.clone()));
        row.insert("updatedAt".into(), JsonValue::String(now));
        state
            .classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id.clone(), row);
        id
    }

    /// Returns the stored row of `class_name:id`.
    pub fn object(&self, class_name: &str, id: &str) -> Option<JsonMap> {
        self.state.lock().classes.get(class_name)?.get(id).cloned()
    }

    /// Returns the number of stored objects of `class_name`.
    pub fn object_count(&self, class_name: &str) -> usize {
        self.state
            .lock()
            .classes
            .get(class_name)
            .map_or(0, BTreeMap::len)
    }

    /// Returns an uploaded file by its stored name.
    pub fn file(&self, name: &str) -> Option<StoredFile> {
        self.state.lock().files.get(name).cloned()
    }

    /// Returns the number of requests received, batches counting once.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests
    }

    /// Drops every object and file and resets ids and the clock.
    pub fn reset(&self) {
        *self.state.lock() = ServerState::default();
    }

    fn handle(
        &self,
        state: &mut ServerState,
        method: Method,
        path: &str,
        body: JsonValue,
    ) -> SyncResult<JsonValue> {
        match (method, route(path)?) {
            (Method::Post, Route::Class(class_name)) => self.create(state, class_name, body),
            (Method::Get, Route::Class(class_name)) => self.find(state, class_name, body),
            (Method::Get, Route::Object(class_name, id)) => get(state, class_name, id, body),
            (Method::Put, Route::Object(class_name, id)) => self.update(state, class_name, id, body),
            (Method::Delete, Route::Object(class_name, id)) => delete(state, class_name, id),
            (Method::Post, Route::Batch) => self.batch(state, body),
            (Method::Post, Route::File(name)) => upload(state, name, body),
            (method, _) => Err(SyncError::from_server(
                INVALID_JSON,
                format!("{method} is not supported on {path}"),
            )),
        }
    }

    fn create(&self, state: &mut ServerState, class_name: &str, body: JsonValue) -> SyncResult<JsonValue> {
        state.check_writable(class_name)?;
        let payload = object_body(body)?;
        let id = match payload.get("objectId") {
            Some(JsonValue::String(id)) => {
                let taken = state
                    .classes
                    .get(class_name)
                    .is_some_and(|table| table.contains_key(id));
                if taken {
                    return Err(SyncError::from_server(
                        DUPLICATE_VALUE,
                        "A duplicate value for a field with unique values was provided",
                    ));
                }
                id.clone()
            }
            Some(other) => {
                return Err(SyncError::incorrect_type(format!(
                    "objectId must be a string, got {other}"
                )))
            }
            None => state.next_object_id(),
        };

        let mut row = JsonMap::new();
        let mut response = JsonMap::new();
        self.apply_payload(&mut row, &payload, &mut response)?;

        let now = state.tick();
        row.insert("objectId".into(), JsonValue::String(id.clone()));
        row.insert("createdAt".into(), JsonValue::String(now.clone()));
        row.insert("updatedAt".into(), JsonValue::String(now.clone()));
        state
            .classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id.clone(), row);
        debug!(class = class_name, %id, "created object");

        response.insert("objectId".into(), JsonValue::String(id));
        response.insert("createdAt".into(), JsonValue::String(now));
        Ok(JsonValue::Object(response))
    }

    fn update(
        &self,
        state: &mut ServerState,
        class_name: &str,
        id: &str,
        body: JsonValue,
    ) -> SyncResult<JsonValue> {
        state.check_writable(class_name)?;
        let payload = object_body(body)?;
        let mut row = state
            .classes
            .get(class_name)
            .and_then(|table| table.get(id))
            .cloned()
            .ok_or_else(not_found)?;

        let mut response = JsonMap::new();
        self.apply_payload(&mut row, &payload, &mut response)?;
        let now = state.tick();
        row.insert("updatedAt".into(), JsonValue::String(now.clone()));
        state
            .classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id.to_string(), row);
        trace!(class = class_name, id, "updated object");

        response.insert("updatedAt".into(), JsonValue::String(now));
        Ok(JsonValue::Object(response))
    }

    fn find(&self, state: &ServerState, class_name: &str, body: JsonValue) -> SyncResult<JsonValue> {
        let params = object_body(body)?;
        let where_clause = params
            .get("where")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        let mut query = Query::with_where(class_name, where_clause);
        if let Some(order) = params.get("order").and_then(JsonValue::as_str) {
            for key in order.split(',').filter(|key| !key.is_empty()) {
                query = match key.strip_prefix('-') {
                    Some(key) => query.add_descending(&[key]),
                    None => query.add_ascending(&[key]),
                };
            }
        }
        if let Some(skip) = params.get("skip").and_then(JsonValue::as_u64) {
            query = query.skip(usize::try_from(skip).unwrap_or(usize::MAX));
        }
        if let Some(limit) = params.get("limit").and_then(JsonValue::as_u64) {
            query = query.limit(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        if let Some(keys) = params.get("keys").and_then(JsonValue::as_str) {
            let keys: Vec<&str> = keys.split(',').collect();
            query = query.select(&keys);
        }

        let rows: Vec<JsonMap> = state
            .classes
            .get(class_name)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();
        let results = query.evaluate(rows)?;
        trace!(class = class_name, found = results.len(), "ran query");
        Ok(json!({"results": results}))
    }

    fn batch(&self, state: &mut ServerState, body: JsonValue) -> SyncResult<JsonValue> {
        let request: BatchRequest = serde_json::from_value(body)
            .map_err(|err| SyncError::from_server(INVALID_JSON, format!("malformed batch: {err}")))?;
        let mut snapshot = request.transaction.then(|| state.classes.clone());

        let mut slots = Vec::with_capacity(request.requests.len());
        for entry in request.requests {
            match self.batch_entry(state, entry) {
                Ok(success) => slots.push(json!({"success": success})),
                Err(err) => {
                    if let Some(snapshot) = snapshot.take() {
                        state.classes = snapshot;
                        debug!(error = %err, "rolled back transactional batch");
                        return Err(err);
                    }
                    slots.push(json!({
                        "error": {"code": err.code(), "error": error_message(&err)},
                    }));
                }
            }
        }
        Ok(JsonValue::Array(slots))
    }

    fn batch_entry(&self, state: &mut ServerState, entry: BatchEntry) -> SyncResult<JsonValue> {
        let method = Method::parse(&entry.method).ok_or_else(|| {
            SyncError::from_server(INVALID_JSON, format!("unknown method {}", entry.method))
        })?;
        let path = entry.path.strip_prefix(&self.server_path).ok_or_else(|| {
            SyncError::from_server(
                INVALID_JSON,
                format!("batch path {} is outside {}", entry.path, self.server_path),
            )
        })?;
        if matches!(route(path)?, Route::Batch) {
            return Err(SyncError::from_server(INVALID_JSON, "batches cannot be nested"));
        }
        self.handle(state, method, path, entry.body)
    }

    fn apply_payload(&self, row: &mut JsonMap, payload: &JsonMap, response: &mut JsonMap) -> SyncResult<()> {
        for (key, json) in payload {
            if is_reserved(key) {
                continue;
            }
            if key.is_empty() || key.starts_with('$') || key.split('.').any(str::is_empty) {
                return Err(SyncError::InvalidKeyName(format!("invalid field name: {key}")));
            }
            let path: Vec<&str> = key.split('.').collect();
            if let Some(result) = self.apply_field(row, &path, json)? {
                response.insert(key.clone(), result);
            }
        }
        Ok(())
    }

    /// Applies one save payload entry. Returns the new value for operations
    /// the server computes.
    fn apply_field(&self, row: &mut JsonMap, path: &[&str], json: &JsonValue) -> SyncResult<Option<JsonValue>> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(None);
        };
        let mut target = row;
        for segment in parents {
            target = match target
                .entry(segment.to_string())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()))
            {
                JsonValue::Object(map) => map,
                _ => {
                    return Err(SyncError::incorrect_type(format!(
                        "{segment} is not an object"
                    )))
                }
            };
        }

        match Op::from_json(&self.ctx, json)? {
            Op::Set(_) => {
                target.insert(last.to_string(), json.clone());
                Ok(None)
            }
            Op::Unset => {
                target.remove(*last);
                Ok(None)
            }
            Op::Relation(relation) => {
                if let (false, Some(target_class)) = (target.contains_key(*last), relation.target_class()) {
                    target.insert(
                        last.to_string(),
                        json!({"__type": "Relation", "className": target_class}),
                    );
                }
                Ok(None)
            }
            op => {
                let current = target.get(*last).map(|value| codec::decode(&self.ctx, value));
                match op.apply_to(current.as_ref(), None)? {
                    Some(value) => {
                        let encoded = codec::encode(&value, PointerMode::Offline)?;
                        target.insert(last.to_string(), encoded.clone());
                        Ok(Some(encoded))
                    }
                    None => {
                        target.remove(*last);
                        Ok(None)
                    }
                }
            }
        }
    }
}

fn get(state: &ServerState, class_name: &str, id: &str, body: JsonValue) -> SyncResult<JsonValue> {
    let row = state
        .classes
        .get(class_name)
        .and_then(|table| table.get(id))
        .cloned()
        .ok_or_else(not_found)?;
    let params = object_body(body)?;
    let row = match params.get("keys").and_then(JsonValue::as_str) {
        Some(keys) => {
            let keys: Vec<&str> = keys.split(',').collect();
            row.into_iter()
                .filter(|(key, _)| is_reserved(key) || keys.contains(&key.as_str()))
                .collect()
        }
        None => row,
    };
    Ok(JsonValue::Object(row))
}

fn delete(state: &mut ServerState, class_name: &str, id: &str) -> SyncResult<JsonValue> {
    state.check_writable(class_name)?;
    state
        .classes
        .get_mut(class_name)
        .and_then(|table| table.remove(id))
        .ok_or_else(not_found)?;
    debug!(class = class_name, id, "deleted object");
    Ok(json!({}))
}

fn upload(state: &mut ServerState, name: &str, body: JsonValue) -> SyncResult<JsonValue> {
    let payload = object_body(body)?;
    let encoded = payload
        .get("base64")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| SyncError::from_server(INVALID_JSON, "file upload requires base64 contents"))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| SyncError::from_server(INVALID_JSON, format!("invalid base64: {err}")))?;
    let content_type = payload
        .get("_ContentType")
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    state.next_id += 1;
    let stored_name = format!("tfss-{:04}-{name}", state.next_id);
    let url = format!("{FILE_URL_BASE}{stored_name}");
    state
        .files
        .insert(stored_name.clone(), StoredFile { data, content_type });
    debug!(name = %stored_name, "stored file");
    Ok(json!({"name": stored_name, "url": url}))
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryServer")
            .field("server_path", &self.server_path)
            .field("classes", &state.classes.len())
            .field("files", &state.files.len())
            .field("offline", &state.offline)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MemoryServer {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: JsonValue,
        _options: &RequestOptions,
    ) -> SyncResult<JsonValue> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.requests += 1;
        if state.offline {
            return Err(SyncError::ConnectionFailed("server is offline".into()));
        }
        trace!(%method, path, "handling request");
        let result = self.handle(&mut state, method, path, body);
        if let Err(err) = &result {
            debug!(%method, path, error = %err, "request failed");
        }
        result
    }
}
