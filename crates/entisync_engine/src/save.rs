//! Save orchestration.
//!
//! A save of many objects proceeds in rounds. Each round picks the pending
//! objects whose pointers all have server ids, sends them in one `batch`
//! request and commits each response slot to its object. Objects pointing at
//! objects saved in this round wait for a later one.
//!
//! Every object of a round pushes a pending generation and enqueues a task on
//! its own queue. The batch request is only sent once every task has reached
//! the front of its queue, so earlier saves of the same object have already
//! committed their responses by then.

use crate::client::{expect_object, slot_result, Client};
use crate::config::{effective_batch_size, SaveOptions};
use crate::transport::RequestTask;
use base64::Engine;
use entisync_core::codec::{JsonMap, JsonValue};
use entisync_core::{
    can_be_serialized, unsaved_children, FileRef, Method, ObjectError, SaveParams, SyncError,
    SyncResult, TrackedObject, Unsaved,
};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// The objects and files one save has to write.
#[derive(Default)]
struct SaveGraph {
    seen: HashSet<String>,
    objects: Vec<TrackedObject>,
    files: Vec<FileRef>,
}

impl SaveGraph {
    fn add(&mut self, item: Unsaved) {
        match item {
            Unsaved::Object(obj) => self.add_object(obj),
            Unsaved::File(file) => {
                if !self.files.iter().any(|f| f.same_as(&file)) {
                    self.files.push(file);
                }
            }
        }
    }

    fn add_object(&mut self, obj: TrackedObject) {
        if self.seen.insert(obj.key()) {
            self.objects.push(obj);
        }
    }
}

impl Client {
    /// Saves `obj`.
    ///
    /// With `cascade_save`, unsaved children are saved first. Direct children
    /// may be new; deeper new objects fail with `PointerToUnsavedObject`.
    ///
    /// The object's edits are captured when the returned future is first
    /// polled, so edits made before that belong to this save. Two saves of
    /// one object are ordered by their first polls. Once captured, the edits
    /// are committed or restored on a detached task even if the future is
    /// dropped; use a [`RequestTask`] to cancel the request itself.
    ///
    /// # Errors
    ///
    /// Returns the failure of the child save or of the object's own request.
    /// On failure the object's edits are restored.
    pub async fn save(&self, obj: &TrackedObject, options: &SaveOptions) -> SyncResult<TrackedObject> {
        if options.cascade_save {
            let mut graph = SaveGraph::default();
            graph.seen.insert(obj.key());
            for child in unsaved_children(obj, false)? {
                graph.add(child);
            }
            if !graph.objects.is_empty() || !graph.files.is_empty() {
                debug!(object = %obj.key(), children = graph.objects.len(), files = graph.files.len(), "saving unsaved children first");
                self.save_graph(graph, options).await?;
            }
        }
        self.save_one(obj, options).await?;
        Ok(obj.clone())
    }

    /// Saves `objects` and every unsaved object or file reachable from them.
    ///
    /// As with [`Client::save`], each round captures its objects' edits when
    /// it starts and runs to completion even if the future is dropped.
    ///
    /// # Errors
    ///
    /// Fails before any request when `transaction` is combined with an
    /// explicit batch size, when a transactional save holds an object that
    /// cannot be serialized, or when a custom-id object has no id. Fails with
    /// "Tried to save a batch with a cycle." when no pending object can be
    /// serialized. Per-object failures are reported as one aggregate error;
    /// the failed objects keep their edits.
    pub async fn save_all(
        &self,
        objects: &[TrackedObject],
        options: &SaveOptions,
    ) -> SyncResult<Vec<TrackedObject>> {
        if options.transaction && options.batch_size.is_some() {
            return Err(SyncError::other(
                "You cannot use both transaction and batchSize options simultaneously.",
            ));
        }
        let mut graph = SaveGraph::default();
        for obj in objects {
            graph.add_object(obj.clone());
            for child in unsaved_children(obj, true)? {
                graph.add(child);
            }
        }
        self.save_graph(graph, options).await?;
        Ok(objects.to_vec())
    }

    /// Uploads `file` unless it already has a URL.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or `IncorrectType` if the file has no
    /// contents to upload.
    pub async fn save_file(&self, file: &FileRef, task: Option<&RequestTask>) -> SyncResult<FileRef> {
        if file.is_saved() {
            return Ok(file.clone());
        }
        let data = file
            .data()
            .ok_or_else(|| SyncError::incorrect_type("cannot upload a file without contents"))?;
        let mut body = JsonMap::new();
        body.insert(
            "base64".into(),
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(data)),
        );
        if let Some(content_type) = file.content_type() {
            body.insert("_ContentType".into(), JsonValue::String(content_type));
        }

        let path = format!("files/{}", file.name());
        let response = expect_object(
            self.request(Method::Post, &path, JsonValue::Object(body), task)
                .await?,
        )?;
        let name = response.get("name").and_then(JsonValue::as_str);
        let url = response.get("url").and_then(JsonValue::as_str);
        match (name, url) {
            (Some(name), Some(url)) => {
                file.mark_saved(name, url);
                debug!(name, "uploaded file");
                Ok(file.clone())
            }
            _ => Err(SyncError::Codec("file upload response lacks name or url".into())),
        }
    }

    async fn save_graph(&self, graph: SaveGraph, options: &SaveOptions) -> SyncResult<()> {
        for file in &graph.files {
            self.save_file(file, options.task.as_ref()).await?;
        }

        let mut pending: Vec<TrackedObject> =
            graph.objects.into_iter().filter(TrackedObject::dirty).collect();
        if pending.is_empty() {
            return Ok(());
        }
        if options.transaction && pending.len() > 1 && !pending.iter().all(can_be_serialized) {
            return Err(SyncError::other(
                "Tried to save a transactional batch containing an object with unserializable attributes.",
            ));
        }
        if self.config.allow_custom_object_id && pending.iter().any(|obj| obj.id().is_none()) {
            return Err(SyncError::MissingObjectId(
                "objectId must not be empty or null".into(),
            ));
        }

        let batch_size = effective_batch_size(
            options.batch_size,
            self.config.batch_size,
            options.transaction,
        )
        .unwrap_or(usize::MAX);

        let mut errors = Vec::new();
        while !pending.is_empty() {
            let mut batch = Vec::new();
            let mut deferred = Vec::new();
            for obj in pending {
                if batch.len() < batch_size && can_be_serialized(&obj) {
                    batch.push(obj);
                } else {
                    deferred.push(obj);
                }
            }
            pending = deferred;
            if batch.is_empty() {
                return Err(SyncError::other("Tried to save a batch with a cycle."));
            }

            errors.extend(self.save_batch(batch, options).await);
            if !errors.is_empty() {
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Aggregate(errors))
        }
    }

    /// Saves one round. Returns the per-object failures.
    async fn save_batch(&self, batch: Vec<TrackedObject>, options: &SaveOptions) -> Vec<ObjectError> {
        let objects = batch.clone();
        let round = self.start_round(batch, options);
        match tokio::spawn(round).await {
            Ok(errors) => errors,
            Err(err) => {
                let error = SyncError::other(format!("save round did not finish: {err}"));
                objects
                    .into_iter()
                    .map(|object| ObjectError { object, error: error.clone() })
                    .collect()
            }
        }
    }

    /// Pushes a generation for every object of `batch` and enqueues its
    /// commit task. The returned future owns those generations: it commits
    /// or restores each of them once polled to completion.
    fn start_round(
        &self,
        batch: Vec<TrackedObject>,
        options: &SaveOptions,
    ) -> impl Future<Output = Vec<ObjectError>> + Send + 'static {
        let allow_custom_object_id = self.config.allow_custom_object_id;
        let mut ready = Vec::with_capacity(batch.len());
        let mut slots = Vec::with_capacity(batch.len());
        let mut tasks = Vec::with_capacity(batch.len());

        for obj in &batch {
            obj.push_pending_state();
            let (ready_tx, ready_rx) = oneshot::channel::<SyncResult<SaveParams>>();
            let (slot_tx, slot_rx) = oneshot::channel::<SyncResult<JsonMap>>();
            let client = self.clone();
            let target = obj.clone();

            tasks.push(obj.enqueue_task(move || async move {
                let params = target.save_params(allow_custom_object_id);
                let created = matches!(&params, Ok(p) if p.method == Method::Post);
                let local_id = target.local_id();
                let _ = ready_tx.send(params);

                let outcome = slot_rx.await.unwrap_or_else(|_| {
                    Err(SyncError::other("batch was abandoned before it responded"))
                });
                match outcome {
                    Ok(response) => {
                        target.handle_save_response(&client.ctx, &response, created);
                        client.after_save(&target, local_id);
                        Ok(())
                    }
                    Err(err) => {
                        target.handle_save_error();
                        Err(err)
                    }
                }
            }));
            ready.push(ready_rx);
            slots.push(slot_tx);
        }

        let client = self.clone();
        let options = options.clone();
        async move {
            let dispatch = async {
                let params: Vec<SyncResult<SaveParams>> = join_all(ready)
                    .await
                    .into_iter()
                    .map(|received| {
                        received.unwrap_or_else(|_| Err(SyncError::other("save task was dropped")))
                    })
                    .collect();
                let outcomes = client.dispatch_batch(params, &options).await;
                for (slot, outcome) in slots.into_iter().zip(outcomes) {
                    let _ = slot.send(outcome);
                }
            };

            let (results, ()) = futures::join!(join_all(tasks), dispatch);
            batch
                .into_iter()
                .zip(results)
                .filter_map(|(object, result)| result.err().map(|error| ObjectError { object, error }))
                .collect()
        }
    }

    /// Sends the requests of one round and splits the response into one
    /// outcome per object, in batch order.
    async fn dispatch_batch(
        &self,
        params: Vec<SyncResult<SaveParams>>,
        options: &SaveOptions,
    ) -> Vec<SyncResult<JsonMap>> {
        let mut outcomes: Vec<Option<SyncResult<JsonMap>>> = Vec::with_capacity(params.len());
        let mut sent = Vec::new();
        let mut requests = Vec::new();
        for (index, param) in params.into_iter().enumerate() {
            match param {
                Ok(SaveParams { method, path, body }) => {
                    requests.push(json!({
                        "method": method.as_str(),
                        "path": self.batch_path(&path),
                        "body": body,
                    }));
                    sent.push(index);
                    outcomes.push(None);
                }
                Err(err) => outcomes.push(Some(Err(err))),
            }
        }

        if !requests.is_empty() {
            let mut body = JsonMap::new();
            body.insert("requests".into(), JsonValue::Array(requests));
            if options.transaction {
                body.insert("transaction".into(), JsonValue::Bool(true));
            }
            debug!(requests = sent.len(), transaction = options.transaction, "dispatching batch");

            let response = self
                .request(Method::Post, "batch", JsonValue::Object(body), options.task.as_ref())
                .await;
            match response {
                Ok(JsonValue::Array(entries)) => {
                    for (position, index) in sent.iter().enumerate() {
                        outcomes[*index] = Some(slot_result(entries.get(position)));
                    }
                }
                Ok(other) => {
                    let err = SyncError::Codec(format!("batch response is not an array: {other}"));
                    for index in &sent {
                        outcomes[*index] = Some(Err(err.clone()));
                    }
                }
                Err(err) => {
                    for index in &sent {
                        outcomes[*index] = Some(Err(err.clone()));
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| Err(SyncError::other("batch entry was not sent"))))
            .collect()
    }

    /// Saves one object through its task queue.
    async fn save_one(&self, obj: &TrackedObject, options: &SaveOptions) -> SyncResult<()> {
        let allow_custom_object_id = self.config.allow_custom_object_id;
        if allow_custom_object_id && obj.id().is_none() {
            return Err(SyncError::MissingObjectId(
                "objectId must not be empty or null".into(),
            ));
        }

        obj.push_pending_state();
        let client = self.clone();
        let target = obj.clone();
        let task = options.task.clone();
        let queued = obj.enqueue_task(move || async move {
            let local_id = target.local_id();
            let sent = async {
                let params = target.save_params(allow_custom_object_id)?;
                trace!(object = %target.key(), method = %params.method, "saving object");
                let response = client
                    .request(
                        params.method,
                        &params.path,
                        JsonValue::Object(params.body),
                        task.as_ref(),
                    )
                    .await?;
                Ok::<_, SyncError>((params.method, expect_object(response)?))
            }
            .await;

            match sent {
                Ok((method, response)) => {
                    target.handle_save_response(&client.ctx, &response, method == Method::Post);
                    client.after_save(&target, local_id);
                    Ok(())
                }
                Err(err) => {
                    target.handle_save_error();
                    Err(err)
                }
            }
        });

        // Detached so the pushed generation is committed or restored even if
        // the caller stops waiting.
        tokio::spawn(queued)
            .await
            .unwrap_or_else(|err| Err(SyncError::other(format!("save did not finish: {err}"))))
    }
}
