//! Dynamic attribute values.

use crate::object::TrackedObject;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A dynamic attribute value.
///
/// Objects are schema-less: each attribute holds one of these. The absence of
/// a value is expressed as `Option::None` by the APIs that read attributes.
///
/// Equality is value equality, except that numbers compare numerically across
/// `Integer`/`Float` and objects compare by identity (same instance, or same
/// class and server id).
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    String(String),
    /// Date, as an ISO-8601 string.
    Date(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested plain object.
    Map(BTreeMap<String, Value>),
    /// Pointer to another tracked object.
    Object(TrackedObject),
    /// Reference to a stored file.
    File(FileRef),
    /// Relation to a set of objects of one class.
    Relation(RelationRef),
}

impl Value {
    /// Returns a short name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Map(_) => "object",
            Value::Object(_) => "pointer",
            Value::File(_) => "file",
            Value::Relation(_) => "relation",
        }
    }

    /// Returns true if this is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this is an integer or float.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Returns true if this is an array or a nested plain object.
    ///
    /// Compound values are the ones tracked through the object cache.
    pub fn is_compound(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Map(_))
    }

    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value as a float, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text, if this is a string or a date.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries, if this is a nested plain object.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the pointed-to object, if this is a pointer.
    pub fn as_object(&self) -> Option<&TrackedObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the file, if this is a file reference.
    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            Value::File(file) => Some(file),
            _ => None,
        }
    }

    /// Returns the relation, if this is a relation.
    pub fn as_relation(&self) -> Option<&RelationRef> {
        match self {
            Value::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    /// Adds two numbers.
    ///
    /// Integer addition stays integral unless it overflows. Returns `None` if
    /// either side is not a number.
    pub fn add_numeric(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(
                a.checked_add(*b)
                    .map(Value::Integer)
                    .unwrap_or(Value::Float(*a as f64 + *b as f64)),
            ),
            _ => Some(Value::Float(self.as_f64()? + other.as_f64()?)),
        }
    }

    /// Returns true if `items` holds a value equal to `self`.
    pub fn is_in(&self, items: &[Value]) -> bool {
        items.iter().any(|item| item == self)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.same_as(b),
            (Value::File(a), Value::File(b)) => a.same_as(b),
            (Value::Relation(a), Value::Relation(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<TrackedObject> for Value {
    fn from(obj: TrackedObject) -> Self {
        Value::Object(obj)
    }
}

impl From<&TrackedObject> for Value {
    fn from(obj: &TrackedObject) -> Self {
        Value::Object(obj.clone())
    }
}

impl From<FileRef> for Value {
    fn from(file: FileRef) -> Self {
        Value::File(file)
    }
}

impl From<RelationRef> for Value {
    fn from(relation: RelationRef) -> Self {
        Value::Relation(relation)
    }
}

#[derive(Debug)]
struct FileState {
    name: String,
    url: Option<String>,
    data: Option<Vec<u8>>,
    content_type: Option<String>,
}

/// A reference to a stored file.
///
/// Clones share state: once one handle is uploaded, every handle sees the
/// committed URL. A file without a URL has not been uploaded yet.
#[derive(Clone)]
pub struct FileRef {
    inner: Arc<RwLock<FileState>>,
}

impl FileRef {
    /// Creates a file that still has to be uploaded.
    pub fn new(name: impl Into<String>, data: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FileState {
                name: name.into(),
                url: None,
                data: Some(data),
                content_type,
            })),
        }
    }

    /// Creates a reference to an already uploaded file.
    pub fn from_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FileState {
                name: name.into(),
                url: Some(url.into()),
                data: None,
                content_type: None,
            })),
        }
    }

    /// Returns the file name.
    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// Returns the committed URL, if the file has been uploaded.
    pub fn url(&self) -> Option<String> {
        self.inner.read().url.clone()
    }

    /// Returns the local contents, if any.
    pub fn data(&self) -> Option<Vec<u8>> {
        self.inner.read().data.clone()
    }

    /// Returns the content type, if known.
    pub fn content_type(&self) -> Option<String> {
        self.inner.read().content_type.clone()
    }

    /// Returns true once the file has a committed URL.
    pub fn is_saved(&self) -> bool {
        self.inner.read().url.is_some()
    }

    /// Records the server-assigned name and URL after an upload.
    pub fn mark_saved(&self, name: impl Into<String>, url: impl Into<String>) {
        let mut state = self.inner.write();
        state.name = name.into();
        state.url = Some(url.into());
    }

    /// Returns true if both handles refer to the same file.
    pub fn same_as(&self, other: &FileRef) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (self.url(), other.url()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("FileRef")
            .field("name", &state.name)
            .field("url", &state.url)
            .finish()
    }
}

/// The saved object a relation hangs off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationParent {
    /// Parent class name.
    pub class_name: String,
    /// Parent server id.
    pub object_id: String,
}

/// The object and attribute an operation is applied to.
///
/// Only relation operations need it; they bind the resulting relation to its
/// parent and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrOwner {
    /// The parent object.
    pub parent: RelationParent,
    /// The attribute key.
    pub key: String,
}

/// A relation attribute.
///
/// Relations are never materialized locally: the value only records where the
/// relation lives and which class it targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationRef {
    /// The object owning the relation, once known.
    pub parent: Option<RelationParent>,
    /// The attribute holding the relation, once known.
    pub key: Option<String>,
    /// Class of the related objects, once known.
    pub target_class: Option<String>,
}

impl RelationRef {
    /// Creates a relation bound to an owner.
    pub fn for_owner(owner: &AttrOwner) -> Self {
        Self {
            parent: Some(owner.parent.clone()),
            key: Some(owner.key.clone()),
            target_class: None,
        }
    }

    /// Creates an unbound relation targeting `target_class`.
    pub fn targeting(target_class: impl Into<String>) -> Self {
        Self {
            parent: None,
            key: None,
            target_class: Some(target_class.into()),
        }
    }

    /// Binds the relation to its owner if it is not bound yet.
    pub fn ensure_owner(&mut self, owner: &AttrOwner) {
        if self.parent.is_none() {
            self.parent = Some(owner.parent.clone());
        }
        if self.key.is_none() {
            self.key = Some(owner.key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(3), Value::Float(3.5));
        assert_ne!(Value::Integer(1), Value::String("1".into()));
    }

    #[test]
    fn add_numeric_keeps_integers() {
        assert_eq!(
            Value::Integer(2).add_numeric(&Value::Integer(3)),
            Some(Value::Integer(5))
        );
        assert!(matches!(
            Value::Integer(2).add_numeric(&Value::Float(0.5)),
            Some(Value::Float(f)) if (f - 2.5).abs() < f64::EPSILON
        ));
        assert!(matches!(
            Value::Integer(i64::MAX).add_numeric(&Value::Integer(1)),
            Some(Value::Float(_))
        ));
        assert_eq!(Value::String("a".into()).add_numeric(&Value::Integer(1)), None);
    }

    #[test]
    fn file_handles_share_upload_state() {
        let file = FileRef::new("photo.png", vec![1, 2, 3], Some("image/png".into()));
        let other = file.clone();
        assert!(!other.is_saved());

        file.mark_saved("tfss-photo.png", "https://files.example.com/tfss-photo.png");
        assert!(other.is_saved());
        assert_eq!(other.name(), "tfss-photo.png");
        assert!(file.same_as(&other));
    }

    #[test]
    fn files_with_same_url_are_same() {
        let a = FileRef::from_url("a.txt", "https://files.example.com/a.txt");
        let b = FileRef::from_url("a.txt", "https://files.example.com/a.txt");
        let c = FileRef::new("a.txt", Vec::new(), None);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn relation_binding() {
        let owner = AttrOwner {
            parent: RelationParent {
                class_name: "Post".into(),
                object_id: "p1".into(),
            },
            key: "likes".into(),
        };
        let mut relation = RelationRef::targeting("User");
        relation.ensure_owner(&owner);
        assert_eq!(relation.key.as_deref(), Some("likes"));
        assert_eq!(relation.target_class.as_deref(), Some("User"));
        assert_eq!(RelationRef::for_owner(&owner).parent, Some(owner.parent));
    }
}
