//! Versioning mode selection.

use std::fmt;
use std::sync::Arc;

use registry_types::{
    VersioningMode, DB_VERSIONING_FLAG, ENABLE_NEW_VERSIONING, INITIALIZE_NEW_VERSIONING,
};
use serde_json::Value;

use crate::error::FlagError;
use crate::flags::FlagSource;

/// Decides the versioning mode from the `db-versioning` flag value.
///
/// Returns [`VersioningMode::New`] only when both the global
/// `initialize-new-versioning` switch and `enable-new-versioning.<service>`
/// are JSON `true`. Missing fields and non-boolean values count as false.
pub fn resolve_mode(flag: &Value, service: &str) -> VersioningMode {
    let initialized = flag
        .get(INITIALIZE_NEW_VERSIONING)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let enabled = flag
        .get(ENABLE_NEW_VERSIONING)
        .and_then(|services| services.get(service))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if initialized && enabled {
        VersioningMode::New
    } else {
        VersioningMode::Old
    }
}

/// Reads the versioning flag for one consumer service.
///
/// Holds no cached mode: every call to [`ModeSelector::resolve`] reads the
/// flag source again.
#[derive(Clone)]
pub struct ModeSelector {
    flags: Arc<dyn FlagSource>,
    service: String,
}

impl ModeSelector {
    /// Creates a selector for `service` backed by `flags`.
    pub fn new(flags: Arc<dyn FlagSource>, service: impl Into<String>) -> Self {
        Self {
            flags,
            service: service.into(),
        }
    }

    /// The consumer service name used to look up the per-service switch.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Reads the flag and resolves the mode for this service.
    ///
    /// # Errors
    ///
    /// Returns `FlagError` if the flag source cannot answer.
    pub fn resolve(&self) -> Result<VersioningMode, FlagError> {
        let flag = self.flags.value(DB_VERSIONING_FLAG)?;
        let mode = resolve_mode(&flag, &self.service);
        tracing::trace!(service = %self.service, %mode, "resolved versioning mode");
        Ok(mode)
    }
}

impl fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeSelector")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
