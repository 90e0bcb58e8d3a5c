//! Backend gateways and the logic that coordinates them.

pub mod blob_store;
pub mod catalog_index;
#[cfg(test)]
pub(crate) mod mock_backends;
pub mod reconciler;
pub mod upload_coordinator;

use serde::Serialize;

/// Outcome of one readiness check against a backend.
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    #[serde(skip)]
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

impl Probe {
    pub fn ok(name: &'static str) -> Self {
        Self {
            name,
            ok: true,
            error: None,
        }
    }

    pub fn failed(name: &'static str, error: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            error: Some(error.into()),
        }
    }
}
