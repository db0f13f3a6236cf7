//! # Types
//!
//! Core types shared by the queue, dispatcher, strategies and finalizer manager.

use std::fmt;

use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

/// `namespace/name` of one object in one kind's queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub namespace: String,
    pub name: String,
}

impl QueueKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_object<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for QueueKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!("invalid key '{s}', expected namespace/name")),
        }
    }
}

/// Id of a finalization: `<plural>/<namespace>/<name>`
pub fn resource_id<K: Resource<DynamicType = ()>>(key: &QueueKey) -> String {
    format!("{}/{}", K::plural(&()), key)
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A reconcile step failed; `reason` is the condition reason reported for it
    #[error("{reason}: {source}")]
    Step {
        reason: String,
        #[source]
        source: BackendError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// Error annotated with the `kind namespace/name` it happened for
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub fn step(reason: &str, source: BackendError) -> Self {
        Self::Step {
            reason: reason.to_string(),
            source,
        }
    }

    /// Wrap with `kind namespace/name`
    #[must_use]
    pub fn for_resource(self, kind: &str, key: &QueueKey) -> Self {
        Self::Context {
            context: format!("{kind} {key}"),
            source: Box::new(self),
        }
    }

    /// Condition reason of the failed step, looking through context wrappers
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Step { reason, .. } => Some(reason),
            Self::Context { source, .. } => source.reason(),
            _ => None,
        }
    }
}
