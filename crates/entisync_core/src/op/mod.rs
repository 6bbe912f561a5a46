//! The operation algebra.
//!
//! An [`Op`] is a pending mutation of one attribute. Operations are immutable
//! values: [`Op::apply_to`] computes the attribute value the operation
//! produces, and [`Op::merge_with`] folds a newer operation onto an older one
//! pending on the same attribute, producing a new operation.
//!
//! # Merge table
//!
//! | new \ previous | none | Set(v) | Unset | same kind |
//! |---|---|---|---|---|
//! | Set(x) | Set(x) | Set(x) | Set(x) | Set(x) |
//! | Unset | Unset | Unset | Unset | Unset |
//! | Increment(a) | Increment(a) | Set(v + a) | Set(a) | Increment(b + a) |
//! | Add(xs) | Add(xs) | Set(v ++ xs) | Set(xs) | Add(prev ++ xs) |
//! | AddUnique(xs) | AddUnique(xs) | Set(v ∪ xs) | Set(xs) | AddUnique(prev ∪ xs) |
//! | Remove(xs) | Remove(xs) | Set(v − xs) | Unset | Remove(prev ∪ xs) |
//! | Relation | Relation | Relation if v is a relation | error | union rules |
//!
//! Every other pair is an error.

mod json;

use crate::error::{SyncError, SyncResult};
use crate::object::TrackedObject;
use crate::value::{AttrOwner, RelationRef, Value};

/// A pending mutation of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Replace the value.
    Set(Value),
    /// Delete the attribute.
    Unset,
    /// Add a numeric delta.
    Increment(Value),
    /// Append items to an array.
    Add(Vec<Value>),
    /// Append items to an array unless already present.
    AddUnique(Vec<Value>),
    /// Remove every matching item from an array.
    Remove(Vec<Value>),
    /// Add objects to and remove objects from a relation.
    Relation(RelationOp),
}

impl Op {
    /// Creates a set operation.
    pub fn set(value: impl Into<Value>) -> Self {
        Op::Set(value.into())
    }

    /// Creates an increment operation.
    ///
    /// # Errors
    ///
    /// Returns `IncorrectType` if `amount` is not a number.
    pub fn increment(amount: impl Into<Value>) -> SyncResult<Self> {
        let amount = amount.into();
        if !amount.is_numeric() {
            return Err(SyncError::incorrect_type(
                "increment must be initialized with a numeric amount",
            ));
        }
        Ok(Op::Increment(amount))
    }

    /// Creates an add operation.
    pub fn add(items: Vec<Value>) -> Self {
        Op::Add(items)
    }

    /// Creates an add-unique operation.
    pub fn add_unique(items: Vec<Value>) -> Self {
        Op::AddUnique(items)
    }

    /// Creates a remove operation.
    pub fn remove(items: Vec<Value>) -> Self {
        Op::Remove(items)
    }

    /// Creates a relation operation from saved objects.
    pub fn relation(adds: &[TrackedObject], removes: &[TrackedObject]) -> SyncResult<Self> {
        RelationOp::new(adds, removes).map(Op::Relation)
    }

    /// Returns the wire name of this operation's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Set(_) => "Set",
            Op::Unset => "Delete",
            Op::Increment(_) => "Increment",
            Op::Add(_) => "Add",
            Op::AddUnique(_) => "AddUnique",
            Op::Remove(_) => "Remove",
            Op::Relation(_) => "Relation",
        }
    }

    /// Returns true for relation operations.
    pub fn is_relation(&self) -> bool {
        matches!(self, Op::Relation(_))
    }

    /// Computes the value this operation produces from `value`.
    ///
    /// `None` stands for an absent attribute, both as input and output.
    /// `owner` is only consulted by relation operations.
    ///
    /// # Errors
    ///
    /// Fails when the base value has the wrong type: incrementing a
    /// non-number, array operations on a non-array, or a relation operation on
    /// a non-relation.
    pub fn apply_to(
        &self,
        value: Option<&Value>,
        owner: Option<&AttrOwner>,
    ) -> SyncResult<Option<Value>> {
        match self {
            Op::Set(v) => Ok(Some(v.clone())),
            Op::Unset => Ok(None),
            Op::Increment(amount) => match value {
                None => Ok(Some(amount.clone())),
                Some(base) => base.add_numeric(amount).map(Some).ok_or_else(|| {
                    SyncError::incorrect_type(format!(
                        "cannot increment a non-numeric value ({})",
                        base.type_name()
                    ))
                }),
            },
            Op::Add(items) => match value {
                None => Ok(Some(Value::Array(items.clone()))),
                Some(Value::Array(base)) => {
                    let mut out = base.clone();
                    out.extend(items.iter().cloned());
                    Ok(Some(Value::Array(out)))
                }
                Some(other) => Err(non_array("add elements to", other)),
            },
            Op::AddUnique(items) => {
                let mut out = match value {
                    None => Vec::new(),
                    Some(Value::Array(base)) => base.clone(),
                    Some(other) => return Err(non_array("add elements to", other)),
                };
                for item in items {
                    if !item.is_in(&out) {
                        out.push(item.clone());
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Op::Remove(items) => match value {
                None => Ok(Some(Value::Array(Vec::new()))),
                Some(Value::Array(base)) => Ok(Some(Value::Array(
                    base.iter().filter(|v| !v.is_in(items)).cloned().collect(),
                ))),
                Some(other) => Err(non_array("remove elements from", other)),
            },
            Op::Relation(op) => op.apply_to(value, owner).map(Some),
        }
    }

    /// Folds this (newer) operation onto `previous`, the older operation
    /// pending on the same attribute.
    ///
    /// # Errors
    ///
    /// Returns an error for combinations that have no meaning, such as adding
    /// to a pending increment or editing a relation after unsetting it.
    pub fn merge_with(&self, previous: Option<&Op>) -> SyncResult<Op> {
        let Some(previous) = previous else {
            return Ok(self.clone());
        };

        match (self, previous) {
            (Op::Set(_), _) | (Op::Unset, _) => Ok(self.clone()),

            (Op::Increment(amount), Op::Set(base)) => {
                base.add_numeric(amount).map(Op::Set).ok_or_else(|| {
                    SyncError::incorrect_type("cannot increment a non-numeric value")
                })
            }
            (Op::Increment(amount), Op::Increment(prev)) => prev
                .add_numeric(amount)
                .map(Op::Increment)
                .ok_or_else(|| SyncError::incorrect_type("increment amounts must be numeric")),
            (Op::Increment(amount), Op::Unset) => Ok(Op::Set(amount.clone())),

            (Op::Add(_) | Op::AddUnique(_) | Op::Remove(_), Op::Set(base)) => {
                Ok(match self.apply_to(Some(base), None)? {
                    Some(value) => Op::Set(value),
                    None => Op::Unset,
                })
            }
            (Op::Add(items) | Op::AddUnique(items), Op::Unset) => {
                Ok(Op::Set(Value::Array(items.clone())))
            }
            (Op::Remove(_), Op::Unset) => Ok(Op::Unset),
            (Op::Add(items), Op::Add(prev)) => {
                let mut merged = prev.clone();
                merged.extend(items.iter().cloned());
                Ok(Op::Add(merged))
            }
            (Op::AddUnique(_), Op::AddUnique(prev)) => {
                match self.apply_to(Some(&Value::Array(prev.clone())), None)? {
                    Some(Value::Array(merged)) => Ok(Op::AddUnique(merged)),
                    _ => Err(cannot_merge(self, previous)),
                }
            }
            (Op::Remove(items), Op::Remove(prev)) => {
                let mut merged: Vec<Value> = Vec::with_capacity(prev.len() + items.len());
                for item in prev.iter().chain(items) {
                    if !item.is_in(&merged) {
                        merged.push(item.clone());
                    }
                }
                Ok(Op::Remove(merged))
            }

            (Op::Relation(_), Op::Unset) => Err(SyncError::incorrect_type(
                "you cannot modify a relation after deleting it",
            )),
            (Op::Relation(_), Op::Set(Value::Relation(_))) => Ok(self.clone()),
            (Op::Relation(op), Op::Relation(prev)) => op.merge_with(prev).map(Op::Relation),

            _ => Err(cannot_merge(self, previous)),
        }
    }
}

fn non_array(action: &str, value: &Value) -> SyncError {
    SyncError::incorrect_type(format!(
        "cannot {action} a non-array value ({})",
        value.type_name()
    ))
}

fn cannot_merge(op: &Op, previous: &Op) -> SyncError {
    SyncError::incorrect_type(format!(
        "cannot merge {} op with the previous {} op",
        op.kind(),
        previous.kind()
    ))
}

/// Additions to and removals from a relation, by object id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationOp {
    target_class: Option<String>,
    adds: Vec<String>,
    removes: Vec<String>,
}

impl RelationOp {
    /// Creates a relation operation from saved objects of one class.
    ///
    /// # Errors
    ///
    /// Fails if any object has no server id or the objects span more than one
    /// class.
    pub fn new(adds: &[TrackedObject], removes: &[TrackedObject]) -> SyncResult<Self> {
        let mut target_class: Option<String> = None;
        let mut collect = |objects: &[TrackedObject]| -> SyncResult<Vec<String>> {
            let mut ids = Vec::with_capacity(objects.len());
            for obj in objects {
                let id = obj.id().ok_or_else(|| {
                    SyncError::incorrect_type(
                        "you cannot add or remove an unsaved object from a relation",
                    )
                })?;
                match &target_class {
                    Some(class_name) if class_name != obj.class_name() => {
                        return Err(SyncError::InvalidClassName(
                            "tried to create a relation with 2 different object types".into(),
                        ))
                    }
                    Some(_) => {}
                    None => target_class = Some(obj.class_name().to_string()),
                }
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Ok(ids)
        };

        let adds = collect(adds)?;
        let removes = collect(removes)?;
        Ok(Self {
            target_class,
            adds,
            removes,
        })
    }

    /// Creates a relation operation from raw ids.
    pub fn from_ids(
        target_class: Option<String>,
        adds: Vec<String>,
        removes: Vec<String>,
    ) -> Self {
        Self {
            target_class,
            adds,
            removes,
        }
    }

    /// Returns the class of the related objects.
    pub fn target_class(&self) -> Option<&str> {
        self.target_class.as_deref()
    }

    /// Returns the ids being added.
    pub fn adds(&self) -> &[String] {
        &self.adds
    }

    /// Returns the ids being removed.
    pub fn removes(&self) -> &[String] {
        &self.removes
    }

    fn apply_to(&self, value: Option<&Value>, owner: Option<&AttrOwner>) -> SyncResult<Value> {
        let mut relation = match value {
            None => owner.map(RelationRef::for_owner).unwrap_or_default(),
            Some(Value::Relation(existing)) => {
                if let (Some(ours), Some(theirs)) = (&self.target_class, &existing.target_class) {
                    if ours != theirs {
                        return Err(SyncError::InvalidClassName(format!(
                            "related object must be of class {theirs}, but {ours} was passed in"
                        )));
                    }
                }
                existing.clone()
            }
            Some(other) => {
                return Err(SyncError::incorrect_type(format!(
                    "relation cannot be applied to a non-relation field ({})",
                    other.type_name()
                )))
            }
        };

        if let Some(owner) = owner {
            relation.ensure_owner(owner);
        }
        if self.target_class.is_some() {
            relation.target_class = self.target_class.clone();
        }
        Ok(Value::Relation(relation))
    }

    fn merge_with(&self, previous: &RelationOp) -> SyncResult<RelationOp> {
        if let (Some(ours), Some(theirs)) = (&self.target_class, &previous.target_class) {
            if ours != theirs {
                return Err(SyncError::InvalidClassName(format!(
                    "related object must be of class {theirs}, but {ours} was passed in"
                )));
            }
        }

        let mut adds: Vec<String> = previous
            .adds
            .iter()
            .filter(|id| !self.removes.contains(id))
            .cloned()
            .collect();
        for id in &self.adds {
            if !adds.contains(id) {
                adds.push(id.clone());
            }
        }

        let mut removes: Vec<String> = previous
            .removes
            .iter()
            .filter(|id| !self.adds.contains(id))
            .cloned()
            .collect();
        for id in &self.removes {
            if !removes.contains(id) {
                removes.push(id.clone());
            }
        }

        Ok(RelationOp {
            target_class: self
                .target_class
                .clone()
                .or_else(|| previous.target_class.clone()),
            adds,
            removes,
        })
    }
}
