//! Destroy orchestration.

use crate::client::{slot_result, Client};
use crate::config::{effective_batch_size, DestroyOptions};
use entisync_core::codec::{JsonMap, JsonValue};
use entisync_core::{Method, ObjectError, SyncError, SyncResult, TrackedObject};
use serde_json::json;
use tracing::debug;

impl Client {
    /// Deletes `obj` on the server. Unsaved objects are left alone.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn destroy(&self, obj: &TrackedObject, options: &DestroyOptions) -> SyncResult<()> {
        let Some(id) = obj.id() else {
            return Ok(());
        };
        let path = format!("classes/{}/{id}", obj.class_name());
        self.request(Method::Delete, &path, JsonValue::Null, options.task.as_ref())
            .await?;
        self.after_destroy(obj);
        debug!(object = %obj.key(), "destroyed object");
        Ok(())
    }

    /// Deletes `objects` in batches. Unsaved objects are skipped.
    ///
    /// Per-object failures accumulate into one aggregate error while the
    /// remaining batches continue, unless `transaction` is set.
    ///
    /// # Errors
    ///
    /// Fails before any request when `transaction` is combined with an
    /// explicit batch size. Otherwise returns an aggregate of every object
    /// that could not be deleted.
    pub async fn destroy_all(&self, objects: &[TrackedObject], options: &DestroyOptions) -> SyncResult<()> {
        if options.transaction && options.batch_size.is_some() {
            return Err(SyncError::other(
                "You cannot use both transaction and batchSize options simultaneously.",
            ));
        }
        let targets: Vec<(TrackedObject, String)> = objects
            .iter()
            .filter_map(|obj| obj.id().map(|id| (obj.clone(), id)))
            .collect();
        let batch_size = effective_batch_size(
            options.batch_size,
            self.config.batch_size,
            options.transaction,
        )
        .unwrap_or(usize::MAX);

        let mut errors = Vec::new();
        for chunk in targets.chunks(batch_size) {
            let requests: Vec<JsonValue> = chunk
                .iter()
                .map(|(obj, id)| {
                    json!({
                        "method": Method::Delete.as_str(),
                        "path": self.batch_path(&format!("classes/{}/{id}", obj.class_name())),
                    })
                })
                .collect();
            let mut body = JsonMap::new();
            body.insert("requests".into(), JsonValue::Array(requests));
            if options.transaction {
                body.insert("transaction".into(), JsonValue::Bool(true));
            }

            let response = self
                .request(Method::Post, "batch", JsonValue::Object(body), options.task.as_ref())
                .await;
            for (position, (obj, _)) in chunk.iter().enumerate() {
                let outcome = match &response {
                    Ok(JsonValue::Array(entries)) => slot_result(entries.get(position)).map(|_| ()),
                    Ok(other) => Err(SyncError::Codec(format!(
                        "batch response is not an array: {other}"
                    ))),
                    Err(err) => Err(err.clone()),
                };
                match outcome {
                    Ok(()) => self.after_destroy(obj),
                    Err(error) => errors.push(ObjectError {
                        object: obj.clone(),
                        error,
                    }),
                }
            }
            debug!(objects = chunk.len(), failed = errors.len(), "destroyed batch");
            if options.transaction && !errors.is_empty() {
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Aggregate(errors))
        }
    }
}
