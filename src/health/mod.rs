//! Health Monitor
//!
//! Sondeo de disponibilidad del backend:
//! - Contador de fallos consecutivos (se reinicia con cualquier éxito)
//! - Un único sondeo periódico por monitor
//! - [`StartupGate`] traduce el contador a pantallas de la aplicación

mod gate;

pub use gate::{AppScreen, StartupGate};

use crate::api::{ApiError, TaskBackend};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Motivo de un sondeo fallido
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthCheckFailure {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend unhealthy (status {0})")]
    Unhealthy(u16),
}

impl From<ApiError> for HealthCheckFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, .. } => HealthCheckFailure::Unhealthy(status),
            other => HealthCheckFailure::Unreachable(other.to_string()),
        }
    }
}

/// Resultado de un sondeo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub consecutive_failures: u32,
    /// Causa del fallo, si lo hubo
    pub failure: Option<HealthCheckFailure>,
}

struct PeriodicCheck {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Monitor de salud del backend
pub struct HealthMonitor {
    backend: Arc<dyn TaskBackend>,
    failures: Arc<AtomicU32>,
    periodic: Mutex<Option<PeriodicCheck>>,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self {
            backend,
            failures: Arc::new(AtomicU32::new(0)),
            periodic: Mutex::new(None),
        }
    }

    /// Sondea el backend una vez y actualiza el contador
    pub async fn check_once(&self) -> HealthStatus {
        run_check(self.backend.as_ref(), &self.failures).await
    }

    /// Arranca el sondeo periódico. Devuelve `false` si ya estaba activo.
    ///
    /// El primer sondeo se hace inmediatamente; el callback recibe cada resultado.
    pub fn start_periodic<F>(&self, interval: Duration, callback: F) -> bool
    where
        F: Fn(HealthStatus) + Send + Sync + 'static,
    {
        let mut periodic = self.lock_periodic();
        if let Some(existing) = periodic.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Periodic health check already running");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let backend = self.backend.clone();
        let failures = self.failures.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = tokio::select! {
                            _ = token.cancelled() => break,
                            status = run_check(backend.as_ref(), &failures) => status,
                        };
                        callback(status);
                    }
                }
            }
            debug!("Periodic health check stopped");
        });

        info!("Health check every {:?}", interval);
        *periodic = Some(PeriodicCheck { cancel, handle });
        true
    }

    /// Detiene el sondeo periódico (idempotente)
    pub fn stop_periodic(&self) {
        if let Some(check) = self.lock_periodic().take() {
            check.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_periodic()
            .as_ref()
            .is_some_and(|check| !check.handle.is_finished())
    }

    pub fn reset_failure_count(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn lock_periodic(&self) -> std::sync::MutexGuard<'_, Option<PeriodicCheck>> {
        self.periodic.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}

async fn run_check(backend: &dyn TaskBackend, failures: &AtomicU32) -> HealthStatus {
    match backend.check_health().await {
        Ok(()) => {
            failures.store(0, Ordering::SeqCst);
            HealthStatus {
                healthy: true,
                consecutive_failures: 0,
                failure: None,
            }
        }
        Err(err) => {
            let failure = HealthCheckFailure::from(err);
            let count = failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            warn!("Health check failed ({} in a row): {}", count, failure);
            HealthStatus {
                healthy: false,
                consecutive_failures: count,
                failure: Some(failure),
            }
        }
    }
}
