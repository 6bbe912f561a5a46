//! Fetch orchestration.

use crate::client::{expect_object, results_of, Client};
use crate::config::FetchOptions;
use entisync_core::codec::{JsonMap, JsonValue};
use entisync_core::{Method, SyncError, SyncResult, TrackedObject};
use entisync_store::Query;
use futures::future::join_all;
use std::collections::HashMap;
use tracing::debug;

impl Client {
    /// Fetches the server state of `obj`.
    ///
    /// A full fetch drops the latest generation's pending ops and all server
    /// data before committing the response; with `keys` only those keys are
    /// dropped and committed. The fetch runs on the object's task queue.
    ///
    /// # Errors
    ///
    /// Returns `MissingObjectId` if the object was never saved, or the
    /// transport's error.
    pub async fn fetch(&self, obj: &TrackedObject, options: &FetchOptions) -> SyncResult<TrackedObject> {
        let id = obj
            .id()
            .ok_or_else(|| SyncError::MissingObjectId("Object does not have an ID".into()))?;
        let path = format!("classes/{}/{id}", obj.class_name());
        let body = fetch_params(options);

        let client = self.clone();
        let target = obj.clone();
        let keys = options.keys.clone();
        let task = options.task.clone();
        obj.enqueue_task(move || async move {
            let response = expect_object(
                client
                    .request(Method::Get, &path, body, task.as_ref())
                    .await?,
            )?;
            commit_fetch(&client, &target, keys.as_deref(), &response);
            Ok::<_, SyncError>(target)
        })
        .await
    }

    /// Fetches several objects of one class in a single query.
    ///
    /// With `force`, every object is refetched and a missing one fails the
    /// call with `ObjectNotFound`. Without it only objects whose data is not
    /// available yet are fetched, and missing ones are left alone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClassName` for mixed classes, `MissingObjectId` for
    /// unsaved objects, `ObjectNotFound` as described, or the transport's
    /// error.
    pub async fn fetch_all(
        &self,
        objects: &[TrackedObject],
        options: &FetchOptions,
    ) -> SyncResult<Vec<TrackedObject>> {
        let Some(first) = objects.first() else {
            return Ok(Vec::new());
        };
        let class_name = first.class_name().to_string();
        if objects.iter().any(|obj| obj.class_name() != class_name) {
            return Err(SyncError::InvalidClassName(
                "All objects should be of the same class".into(),
            ));
        }
        let mut ids = Vec::new();
        for obj in objects {
            let id = obj
                .id()
                .ok_or_else(|| SyncError::MissingObjectId("All objects must have an ID".into()))?;
            if (options.force || !obj.is_data_available()) && !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Ok(objects.to_vec());
        }

        let mut query = Query::new(&class_name)
            .contained_in("objectId", ids.iter().cloned().map(JsonValue::String).collect())
            .limit(ids.len());
        if let Some(keys) = &options.keys {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            query = query.select(&keys);
        }
        if !options.include.is_empty() {
            let include: Vec<&str> = options.include.iter().map(String::as_str).collect();
            query = query.include(&include);
        }

        let path = format!("classes/{class_name}");
        let response = self
            .request(Method::Get, &path, query.to_json(), options.task.as_ref())
            .await?;
        let results: HashMap<String, JsonMap> = results_of(&response)?
            .into_iter()
            .filter_map(|json| {
                let id = json.get("objectId")?.as_str()?.to_string();
                Some((id, json))
            })
            .collect();
        debug!(class = %class_name, requested = ids.len(), found = results.len(), "fetched objects");

        if options.force && ids.iter().any(|id| !results.contains_key(id)) {
            return Err(SyncError::ObjectNotFound("All objects must exist".into()));
        }

        let commits = objects.iter().filter_map(|obj| {
            let response = results.get(&obj.id()?)?.clone();
            let client = self.clone();
            let target = obj.clone();
            let keys = options.keys.clone();
            Some(obj.enqueue_task(move || async move {
                commit_fetch(&client, &target, keys.as_deref(), &response);
            }))
        });
        join_all(commits.collect::<Vec<_>>()).await;
        Ok(objects.to_vec())
    }

    /// Fetches `obj` unless its data is already available.
    ///
    /// # Errors
    ///
    /// Same as [`Client::fetch`].
    pub async fn fetch_if_needed(
        &self,
        obj: &TrackedObject,
        options: &FetchOptions,
    ) -> SyncResult<TrackedObject> {
        if obj.is_data_available() {
            return Ok(obj.clone());
        }
        self.fetch(obj, options).await
    }

    /// Replaces the server data of `obj` with its pinned snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the local datastore is not enabled or does not
    /// hold the object.
    pub fn fetch_from_local_datastore(&self, obj: &TrackedObject) -> SyncResult<TrackedObject> {
        let datastore = self
            .local_datastore()
            .ok_or_else(|| SyncError::other("the local datastore is not enabled"))?;
        Ok(datastore.fetch_local(obj)?)
    }
}

fn fetch_params(options: &FetchOptions) -> JsonValue {
    let mut body = JsonMap::new();
    if let Some(keys) = &options.keys {
        body.insert("keys".into(), JsonValue::String(keys.join(",")));
    }
    if !options.include.is_empty() {
        body.insert("include".into(), JsonValue::String(options.include.join(",")));
    }
    JsonValue::Object(body)
}

fn commit_fetch(client: &Client, target: &TrackedObject, keys: Option<&[String]>, response: &JsonMap) {
    target.clear_pending_ops(keys);
    target.clear_server_data(keys);
    target.finish_fetch(&client.ctx, response);
    client.after_fetch(target);
}
