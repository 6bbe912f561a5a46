//! Identity types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifier of one in-memory `TrackedObject` instance.
///
/// Instance ids are process-unique and never reused. Unique-instance state
/// controllers key their records by instance id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Allocates the next instance id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

/// Generates a local id for an object that has no server id yet.
///
/// Local ids are `local` followed by 16 hex characters.
#[must_use]
pub fn generate_local_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("local{}", &hex[..16])
}

/// The identity a state controller uses to find an object's record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    /// Class name.
    pub class_name: String,
    /// Server-assigned id, once known.
    pub object_id: Option<String>,
    /// Local id standing in before the server id is known.
    pub local_id: Option<String>,
    /// The in-memory instance.
    pub instance: InstanceId,
}

impl ObjectIdentity {
    /// Returns the server id, or the local id before one is assigned.
    pub fn id(&self) -> &str {
        self.object_id
            .as_deref()
            .or(self.local_id.as_deref())
            .unwrap_or_default()
    }

    /// Returns the stable `class:id` key of this identity.
    pub fn key(&self) -> String {
        format!("{}:{}", self.class_name, self.id())
    }
}

/// HTTP method of a request sent through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create, or call an endpoint such as `batch`.
    Post,
    /// Update.
    Put,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Parses a wire method name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_unique() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn local_id_shape() {
        let id = generate_local_id();
        assert!(id.starts_with("local"));
        assert_eq!(id.len(), 21);
        assert_ne!(id, generate_local_id());
    }

    #[test]
    fn identity_key_prefers_server_id() {
        let mut identity = ObjectIdentity {
            class_name: "Score".into(),
            object_id: None,
            local_id: Some("local0001".into()),
            instance: InstanceId::next(),
        };
        assert_eq!(identity.key(), "Score:local0001");

        identity.object_id = Some("abc".into());
        assert_eq!(identity.key(), "Score:abc");
    }

    #[test]
    fn method_names() {
        for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
            assert_eq!(Method::parse(method.as_str()), Some(method));
        }
        assert_eq!(Method::parse("PATCH"), None);
    }
}
