//! Persisted long-running operation handles.
//!
//! A handle is created when the cloud accepts a mutating call that does not
//! finish within the bounded wait. It is stored in the owning resource's
//! status, survives restarts, and is removed once its result has been read.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::types::ResourceRef;

/// Kind of a long-running operation. Handles of different kinds decode
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Put => "PUT",
            OperationKind::Delete => "DELETE",
        }
    }
}

/// Opaque reference to an in-progress operation, as stored in status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHandle {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub service_name: String,
    pub resource_group: String,
    #[serde(rename = "name")]
    pub resource_name: String,
    /// Base64 of the client's poller state. Never interpreted here.
    pub data: String,
}

impl OperationHandle {
    pub fn new(
        kind: OperationKind,
        service_name: impl Into<String>,
        resource: &ResourceRef,
        poller_state: &[u8],
    ) -> Self {
        Self {
            kind,
            service_name: service_name.into(),
            resource_group: resource.resource_group.clone(),
            resource_name: resource.name.clone(),
            data: STANDARD.encode(poller_state),
        }
    }

    /// Decode the stored poller state into the variant matching `kind`.
    pub fn poller(&self) -> Result<Poller, CloudError> {
        let state = STANDARD.decode(&self.data).map_err(|e| {
            CloudError::InvalidOperation(format!(
                "failed to decode {} operation data for {}: {}",
                self.kind.as_str(),
                self.resource_name,
                e
            ))
        })?;
        Ok(match self.kind {
            OperationKind::Put => Poller::Put(state),
            OperationKind::Delete => Poller::Delete(state),
        })
    }

    fn matches(&self, resource_name: &str, service_name: &str, kind: OperationKind) -> bool {
        self.resource_name == resource_name && self.service_name == service_name && self.kind == kind
    }
}

/// Decoded poller state, tagged by operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poller {
    Put(Vec<u8>),
    Delete(Vec<u8>),
}

impl Poller {
    pub fn kind(&self) -> OperationKind {
        match self {
            Poller::Put(_) => OperationKind::Put,
            Poller::Delete(_) => OperationKind::Delete,
        }
    }

    pub fn state(&self) -> &[u8] {
        match self {
            Poller::Put(state) | Poller::Delete(state) => state,
        }
    }
}

/// Status accessors for persisted operation handles, implemented by scopes.
pub trait AsyncStatusUpdater: Send + Sync {
    fn long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) -> Option<OperationHandle>;

    fn set_long_running_operation_state(&self, handle: OperationHandle);

    fn delete_long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    );
}

/// Handle list as stored in a status subresource. At most one handle per
/// (resource, service, kind).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationStates(Vec<OperationHandle>);

impl OperationStates {
    pub fn get(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) -> Option<&OperationHandle> {
        self.0
            .iter()
            .find(|h| h.matches(resource_name, service_name, kind))
    }

    /// Insert `handle`, replacing any handle with the same key.
    pub fn set(&mut self, handle: OperationHandle) {
        self.0
            .retain(|h| !h.matches(&handle.resource_name, &handle.service_name, handle.kind));
        self.0.push(handle);
    }

    pub fn delete(&mut self, resource_name: &str, service_name: &str, kind: OperationKind) {
        self.0
            .retain(|h| !h.matches(resource_name, service_name, kind));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationHandle> {
        self.0.iter()
    }
}
