//! Unsaved-children traversal.
//!
//! Before an object can be saved, every dirty object it points to and every
//! file it references without a URL has to be saved first or alongside it.

use crate::error::{SyncError, SyncResult};
use crate::object::TrackedObject;
use crate::value::{FileRef, Value};
use std::collections::HashSet;

/// Something that has to be saved before its parent.
#[derive(Debug, Clone)]
pub enum Unsaved {
    /// A dirty object.
    Object(TrackedObject),
    /// A file that has not been uploaded.
    File(FileRef),
}

#[derive(Default)]
struct Encountered {
    seen: HashSet<String>,
    objects: Vec<TrackedObject>,
    files: Vec<FileRef>,
}

/// Collects the unsaved children of `root`.
///
/// Walks attributes through maps and arrays, never into relations. Each
/// object identity is visited once. Direct children of `root` may be unsaved;
/// deeper objects without an id fail with `PointerToUnsavedObject` unless
/// `allow_deep_unsaved` is set.
///
/// Returns dirty objects in discovery order, then files. `root` itself is
/// never included.
pub fn unsaved_children(root: &TrackedObject, allow_deep_unsaved: bool) -> SyncResult<Vec<Unsaved>> {
    let mut encountered = Encountered::default();
    encountered.seen.insert(root.key());

    for value in root.attributes().values() {
        traverse(value, &mut encountered, false, allow_deep_unsaved)?;
    }

    Ok(encountered
        .objects
        .into_iter()
        .map(Unsaved::Object)
        .chain(encountered.files.into_iter().map(Unsaved::File))
        .collect())
}

fn traverse(
    value: &Value,
    encountered: &mut Encountered,
    should_throw: bool,
    allow_deep_unsaved: bool,
) -> SyncResult<()> {
    match value {
        Value::Object(obj) => {
            if should_throw && obj.is_new() {
                return Err(SyncError::PointerToUnsavedObject);
            }
            if !encountered.seen.insert(obj.key()) {
                return Ok(());
            }
            if obj.dirty() {
                encountered.objects.push(obj.clone());
            }
            for child in obj.attributes().values() {
                traverse(child, encountered, !allow_deep_unsaved, allow_deep_unsaved)?;
            }
            Ok(())
        }
        Value::File(file) => {
            if !file.is_saved() && !encountered.files.iter().any(|f| f.same_as(file)) {
                encountered.files.push(file.clone());
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| traverse(item, encountered, should_throw, allow_deep_unsaved)),
        Value::Map(map) => map
            .values()
            .try_for_each(|item| traverse(item, encountered, should_throw, allow_deep_unsaved)),
        _ => Ok(()),
    }
}

/// Returns true if every pointer in `obj`'s attributes has a server id and
/// every file has been uploaded.
pub fn can_be_serialized(obj: &TrackedObject) -> bool {
    obj.attributes().values().all(serializable)
}

fn serializable(value: &Value) -> bool {
    match value {
        Value::Object(obj) => !obj.is_new(),
        Value::File(file) => file.is_saved(),
        Value::Array(items) => items.iter().all(serializable),
        Value::Map(map) => map.values().all(serializable),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn saved_dirty(ctx: &Context, class_name: &str, id: &str) -> TrackedObject {
        let obj = ctx.object_with_id(class_name, id);
        obj.set("touched", true).unwrap();
        obj
    }

    fn keys(unsaved: &[Unsaved]) -> Vec<String> {
        unsaved
            .iter()
            .map(|u| match u {
                Unsaved::Object(obj) => obj.key(),
                Unsaved::File(file) => format!("file:{}", file.name()),
            })
            .collect()
    }

    #[test]
    fn deep_unsaved_pointer_is_rejected_unless_allowed() {
        let ctx = Context::new();
        let root = ctx.object("Root");
        let a = saved_dirty(&ctx, "A", "a1");
        let b = ctx.object("B");
        b.set("name", "b").unwrap();
        a.set("child", b.clone()).unwrap();
        root.set("a", a.clone()).unwrap();

        assert!(matches!(
            unsaved_children(&root, false),
            Err(SyncError::PointerToUnsavedObject)
        ));

        let found = unsaved_children(&root, true).unwrap();
        assert_eq!(keys(&found), vec!["A:a1".to_string(), b.key()]);
    }

    #[test]
    fn direct_unsaved_children_are_allowed() {
        let ctx = Context::new();
        let root = ctx.object("Root");
        let child = ctx.object("Child");
        root.set("child", child.clone()).unwrap();

        let found = unsaved_children(&root, false).unwrap();
        assert_eq!(keys(&found), vec![child.key()]);
    }

    #[test]
    fn clean_objects_are_skipped_and_cycles_terminate() {
        let ctx = Context::new();
        let root = ctx.object_with_id("Root", "r1");
        let clean = ctx.object_with_id("Clean", "c1");
        let dirty = saved_dirty(&ctx, "Dirty", "d1");
        dirty.set("back", root.clone()).unwrap();
        root.set("items", vec![Value::from(&clean), Value::from(&dirty)]).unwrap();

        let found = unsaved_children(&root, false).unwrap();
        assert_eq!(keys(&found), vec!["Dirty:d1".to_string()]);
    }

    #[test]
    fn files_come_after_objects_and_relations_are_not_walked() {
        let ctx = Context::new();
        let root = ctx.object("Root");
        let photo = FileRef::new("photo.png", vec![1], None);
        let uploaded = FileRef::from_url("done.png", "https://files.example.com/done.png");
        let child = saved_dirty(&ctx, "Child", "c1");

        let mut nested = std::collections::BTreeMap::new();
        nested.insert("photo".to_string(), Value::from(photo.clone()));
        nested.insert("again".to_string(), Value::from(photo.clone()));
        root.set("album", Value::Map(nested)).unwrap();
        root.set("cover", uploaded).unwrap();
        root.set("zchild", child).unwrap();
        root.set("likes", crate::value::RelationRef::targeting("User")).unwrap();

        let found = unsaved_children(&root, false).unwrap();
        assert_eq!(keys(&found), vec!["Child:c1".to_string(), "file:photo.png".to_string()]);
    }

    #[test]
    fn serializable_requires_saved_pointers_and_files() {
        let ctx = Context::new();
        let obj = ctx.object("Root");
        obj.set("score", 1).unwrap();
        assert!(can_be_serialized(&obj));

        let pending = ctx.object("Child");
        obj.set("list", vec![Value::from(&pending)]).unwrap();
        assert!(!can_be_serialized(&obj));

        pending.set_id("c1");
        assert!(can_be_serialized(&obj));

        obj.set("file", FileRef::new("a.txt", Vec::new(), None)).unwrap();
        assert!(!can_be_serialized(&obj));
    }
}
