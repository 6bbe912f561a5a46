//! The client ties a context, a transport and an optional local datastore
//! together.

use crate::config::ClientConfig;
use crate::transport::{RequestOptions, RequestTask, Transport};
use entisync_core::codec::{JsonMap, JsonValue};
use entisync_core::{Context, Method, SyncError, SyncResult, TrackedObject};
use entisync_store::{LocalDatastore, Query, Storage};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client for saving, fetching and destroying tracked objects.
///
/// Clones share the context, the transport and the local datastore.
#[derive(Clone)]
pub struct Client {
    pub(crate) ctx: Context,
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) datastore: Option<Arc<LocalDatastore>>,
}

impl Client {
    /// Creates a client over `transport`.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let ctx = Context::with_single_instance(config.single_instance);
        Self::with_context(ctx, config, transport)
    }

    /// Creates a client over an existing context.
    pub fn with_context(ctx: Context, config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx,
            config,
            transport,
            datastore: None,
        }
    }

    /// Enables the local datastore over `storage`.
    ///
    /// Saved objects that are pinned are rewritten after each save, and
    /// destroyed objects are removed from it.
    pub fn with_local_datastore(mut self, storage: Arc<dyn Storage>) -> Self {
        self.datastore = Some(Arc::new(LocalDatastore::new(self.ctx.clone(), storage)));
        self
    }

    /// Returns the object context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the local datastore, if enabled.
    pub fn local_datastore(&self) -> Option<&Arc<LocalDatastore>> {
        self.datastore.as_ref()
    }

    /// Creates a new, unsaved object.
    pub fn object(&self, class_name: &str) -> TrackedObject {
        self.ctx.object(class_name)
    }

    /// Returns a handle to the saved object `class_name:id`.
    pub fn object_with_id(&self, class_name: &str, id: &str) -> TrackedObject {
        self.ctx.object_with_id(class_name, id)
    }

    /// Sends one request through the transport.
    ///
    /// The request fails with `ConnectionFailed` once the configured timeout
    /// elapses and with `Aborted` once `task` is aborted.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or a timeout or abort error.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: JsonValue,
        task: Option<&RequestTask>,
    ) -> SyncResult<JsonValue> {
        if task.is_some_and(RequestTask::is_aborted) {
            return Err(SyncError::Aborted);
        }
        let options = RequestOptions {
            timeout: self.config.timeout,
            task: task.cloned(),
        };
        debug!(%method, path, "sending request");

        let call = async {
            match tokio::time::timeout(
                options.timeout,
                self.transport.request(method, path, body, &options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::ConnectionFailed(format!(
                    "{method} {path} timed out after {:?}",
                    options.timeout
                ))),
            }
        };
        match task {
            Some(task) => tokio::select! {
                result = call => result,
                _ = task.aborted() => Err(SyncError::Aborted),
            },
            None => call.await,
        }
    }

    /// Runs `query` against the server.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or `InvalidQuery` if the query uses an
    /// unsupported operator.
    pub async fn find(&self, query: &Query) -> SyncResult<Vec<TrackedObject>> {
        query.validate()?;
        let path = format!("classes/{}", query.class_name());
        let response = self.request(Method::Get, &path, query.to_json(), None).await?;
        results_of(&response)?
            .iter()
            .map(|json| self.ctx.object_from_json(query.class_name(), json, false))
            .collect()
    }

    /// Runs `query` against the local datastore.
    ///
    /// # Errors
    ///
    /// Returns an error if the local datastore is not enabled or the query
    /// fails.
    pub fn find_local(&self, query: &Query) -> SyncResult<Vec<TrackedObject>> {
        Ok(self.require_datastore()?.find_local(query)?)
    }

    /// Pins `objects` under the default pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the local datastore is not enabled or fails.
    pub fn pin(&self, objects: &[TrackedObject]) -> SyncResult<()> {
        Ok(self.require_datastore()?.pin(objects)?)
    }

    /// Unpins `objects` from the default pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the local datastore is not enabled or fails.
    pub fn unpin(&self, objects: &[TrackedObject]) -> SyncResult<()> {
        Ok(self.require_datastore()?.unpin(objects)?)
    }

    fn require_datastore(&self) -> SyncResult<&Arc<LocalDatastore>> {
        self.datastore
            .as_ref()
            .ok_or_else(|| SyncError::other("the local datastore is not enabled"))
    }

    /// Refreshes the pinned copy of a saved object.
    pub(crate) fn after_save(&self, obj: &TrackedObject, previous_local_id: Option<String>) {
        let Some(datastore) = &self.datastore else {
            return;
        };
        if let (Some(local_id), Some(_)) = (previous_local_id, obj.id()) {
            if let Err(err) = datastore.update_local_id(&local_id, obj) {
                warn!(object = %obj.key(), error = %err, "could not move pinned object to its server id");
            }
        }
        if let Err(err) = datastore.update_object_if_pinned(obj) {
            warn!(object = %obj.key(), error = %err, "could not refresh pinned object");
        }
    }

    /// Refreshes the pinned copy of a fetched object.
    pub(crate) fn after_fetch(&self, obj: &TrackedObject) {
        if let Some(datastore) = &self.datastore {
            if let Err(err) = datastore.update_object_if_pinned(obj) {
                warn!(object = %obj.key(), error = %err, "could not refresh pinned object");
            }
        }
    }

    /// Removes a destroyed object from the local datastore.
    pub(crate) fn after_destroy(&self, obj: &TrackedObject) {
        if let Some(datastore) = &self.datastore {
            if let Err(err) = datastore.destroy_object_if_pinned(obj) {
                warn!(object = %obj.key(), error = %err, "could not remove pinned object");
            }
        }
    }

    /// Joins the server path and a relative path for batch sub-requests.
    pub(crate) fn batch_path(&self, path: &str) -> String {
        format!("{}{}", self.config.server_path, path)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("ctx", &self.ctx)
            .field("config", &self.config)
            .field("local_datastore", &self.datastore.is_some())
            .finish_non_exhaustive()
    }
}

/// Returns the JSON object of a response.
pub(crate) fn expect_object(response: JsonValue) -> SyncResult<JsonMap> {
    match response {
        JsonValue::Object(map) => Ok(map),
        other => Err(SyncError::Codec(format!(
            "expected an object response, got {other}"
        ))),
    }
}

/// Returns the `results` array of a find response.
pub(crate) fn results_of(response: &JsonValue) -> SyncResult<Vec<JsonMap>> {
    let results = response
        .get("results")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SyncError::Codec("find response has no results array".into()))?;
    Ok(results
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect())
}

/// Decodes a batch response slot.
pub(crate) fn slot_result(slot: Option<&JsonValue>) -> SyncResult<JsonMap> {
    let Some(slot) = slot else {
        return Err(SyncError::Codec("batch response is missing an entry".into()));
    };
    if let Some(success) = slot.get("success") {
        return Ok(success.as_object().cloned().unwrap_or_default());
    }
    match slot.get("error") {
        Some(error) => {
            let code = error
                .get("code")
                .and_then(JsonValue::as_i64)
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or(entisync_core::codes::OTHER_CAUSE);
            let message = error
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown server error");
            Err(SyncError::from_server(code, message))
        }
        None => Err(SyncError::Codec(format!("malformed batch entry {slot}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    fn client(transport: Arc<MockTransport>) -> Client {
        Client::new(ClientConfig::default(), transport)
    }

    #[test]
    fn slots_decode_success_and_error() {
        let ok = slot_result(Some(&json!({"success": {"objectId": "a"}}))).unwrap();
        assert_eq!(ok.get("objectId"), Some(&json!("a")));

        let err = slot_result(Some(&json!({"error": {"code": 137, "error": "duplicate"}})))
            .unwrap_err();
        assert_eq!(err.code(), 137);

        assert!(matches!(slot_result(None), Err(SyncError::Codec(_))));
        assert!(matches!(
            slot_result(Some(&json!({"weird": true}))),
            Err(SyncError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn requests_time_out() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(Duration::from_millis(200));
        transport.push_response(json!({}));
        let client = Client::new(
            ClientConfig::default().with_timeout(Duration::from_millis(20)),
            transport,
        );

        let err = client
            .request(Method::Get, "classes/Score", JsonValue::Null, None)
            .await
            .unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn aborted_tasks_fail_requests() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let task = RequestTask::new();
        task.abort();

        let err = client
            .request(Method::Get, "classes/Score", JsonValue::Null, Some(&task))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Aborted));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn find_decodes_results() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(json!({"results": [{"objectId": "s1", "points": 3}]}));
        let client = client(transport.clone());

        let found = client
            .find(&Query::new("Score").greater_than("points", 1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().as_deref(), Some("s1"));
        assert_eq!(
            transport.calls()[0].body,
            json!({"where": {"points": {"$gt": 1}}})
        );
    }

    #[test]
    fn local_queries_need_a_datastore() {
        let client = client(Arc::new(MockTransport::new()));
        assert!(client.find_local(&Query::new("Score")).is_err());

        let client = client.with_local_datastore(Arc::new(entisync_store::MemoryStorage::new()));
        assert!(client.find_local(&Query::new("Score")).unwrap().is_empty());
    }
}
