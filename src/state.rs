//! Process-wide service state: the status record and the once-installed engine.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ServiceConfig;
use crate::engine::InferenceEngine;
use crate::model::DeviceInfo;

/// Lifecycle of the service; only the startup hook moves it forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Initializing,
    LoadingModel,
    Ready,
    Error,
}

/// Immutable view of the service state. Replaced wholesale on every change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: ServiceStatus,
    pub model_loaded: bool,
    pub last_request_time: Option<f64>,
    pub request_count: u64,
    pub error: Option<String>,
    pub device: Option<DeviceInfo>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Initializing,
            model_loaded: false,
            last_request_time: None,
            request_count: 0,
            error: None,
            device: None,
        }
    }
}

/// Shared state for the service.
pub struct AppState {
    pub config: ServiceConfig,
    snapshot: RwLock<Arc<StatusSnapshot>>,
    engine: OnceLock<InferenceEngine>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(Arc::new(StatusSnapshot::default())),
            engine: OnceLock::new(),
        }
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.snapshot.read().clone()
    }

    /// The engine, present only once the model is fully loaded.
    pub fn engine(&self) -> Option<&InferenceEngine> {
        self.engine.get()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut slot = self.snapshot.write();
        let mut next = StatusSnapshot::clone(&slot);
        f(&mut next);
        *slot = Arc::new(next);
    }

    pub fn set_loading(&self) {
        self.update(|s| s.status = ServiceStatus::LoadingModel);
    }

    /// Installs the engine and marks the service ready.
    ///
    /// Returns the engine back if one is already installed.
    pub fn install_engine(&self, engine: InferenceEngine) -> Result<(), InferenceEngine> {
        let device = engine.device();
        self.engine.set(engine)?;
        self.update(|s| {
            s.status = ServiceStatus::Ready;
            s.model_loaded = true;
            s.device = Some(device);
            s.error = None;
        });
        Ok(())
    }

    /// Marks the load as permanently failed.
    pub fn set_load_failed(&self, message: String) {
        self.update(|s| {
            s.status = ServiceStatus::Error;
            s.model_loaded = false;
            s.error = Some(message);
        });
    }

    /// Counts an accepted processing request and returns the new total.
    pub fn record_request(&self) -> u64 {
        let mut count = 0;
        self.update(|s| {
            s.request_count += 1;
            s.last_request_time = Some(unix_timestamp());
            count = s.request_count;
        });
        count
    }

    /// Remembers the most recent request failure without changing readiness.
    pub fn record_failure(&self, message: String) {
        self.update(|s| s.error = Some(message));
    }
}

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::model::{
        Device, GenerationOutput, GenerationRequest, VisionLanguageModel,
    };
    use crate::prompt::PromptFormat;

    struct NullModel;

    impl VisionLanguageModel for NullModel {
        type Error = InferenceError;

        fn prompt_format(&self) -> PromptFormat {
            PromptFormat::Plain
        }

        fn generate(&mut self, _: GenerationRequest<'_>) -> Result<GenerationOutput, InferenceError> {
            Err(InferenceError::EmptyOutput)
        }
    }

    fn engine() -> InferenceEngine {
        InferenceEngine::new(NullModel, DeviceInfo::new(Device::Cpu))
    }

    #[test]
    fn test_initial_snapshot() {
        let state = AppState::new(ServiceConfig::default());
        let snap = state.snapshot();
        assert_eq!(snap.status, ServiceStatus::Initializing);
        assert!(!snap.model_loaded);
        assert!(state.engine().is_none());
    }

    #[test]
    fn test_successful_load_transitions() {
        let state = AppState::new(ServiceConfig::default());
        state.set_loading();
        assert_eq!(state.snapshot().status, ServiceStatus::LoadingModel);
        assert!(state.engine().is_none());

        state.install_engine(engine()).unwrap();
        let snap = state.snapshot();
        assert_eq!(snap.status, ServiceStatus::Ready);
        assert!(snap.model_loaded);
        assert_eq!(snap.device, Some(DeviceInfo::new(Device::Cpu)));
        assert!(state.engine().is_some());

        assert!(state.install_engine(engine()).is_err());
    }

    #[test]
    fn test_failed_load_is_error() {
        let state = AppState::new(ServiceConfig::default());
        state.set_loading();
        state.set_load_failed("401 Unauthorized".to_string());
        let snap = state.snapshot();
        assert_eq!(snap.status, ServiceStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("401 Unauthorized"));
        assert!(state.engine().is_none());
    }

    #[test]
    fn test_request_counter_is_monotonic() {
        let state = AppState::new(ServiceConfig::default());
        let counts: Vec<u64> = (0..5).map(|_| state.record_request()).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert!(state.snapshot().last_request_time.is_some());
    }

    #[test]
    fn test_request_failure_keeps_ready() {
        let state = AppState::new(ServiceConfig::default());
        state.install_engine(engine()).unwrap();
        state.record_failure("bad image".to_string());
        let snap = state.snapshot();
        assert_eq!(snap.status, ServiceStatus::Ready);
        assert_eq!(snap.error.as_deref(), Some("bad image"));
    }

    #[test]
    fn test_old_snapshots_are_unchanged() {
        let state = AppState::new(ServiceConfig::default());
        let before = state.snapshot();
        state.record_request();
        assert_eq!(before.request_count, 0);
        assert_eq!(state.snapshot().request_count, 1);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            serde_json::to_value(ServiceStatus::LoadingModel).unwrap(),
            "loading_model"
        );
        assert_eq!(serde_json::to_value(ServiceStatus::Ready).unwrap(), "ready");
    }
}
