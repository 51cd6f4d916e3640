//! Startup gate: coarse screen state driven by health results

use super::HealthStatus;
use serde::Serialize;

/// Pantalla de alto nivel de la aplicación
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppScreen {
    /// Waiting for the first successful health check
    Startup,
    /// Startup gave up after too many consecutive failures
    ConnectionFailed,
    Ready,
    /// Was ready, the latest health check failed
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct StartupGate {
    threshold: u32,
    screen: AppScreen,
    was_ready: bool,
}

impl StartupGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            screen: AppScreen::Startup,
            was_ready: false,
        }
    }

    pub fn screen(&self) -> AppScreen {
        self.screen
    }

    /// Fold a health check result into the current screen
    pub fn observe(&mut self, status: &HealthStatus) -> AppScreen {
        self.screen = if status.healthy {
            self.was_ready = true;
            AppScreen::Ready
        } else if self.was_ready {
            AppScreen::Reconnecting
        } else if status.consecutive_failures >= self.threshold {
            AppScreen::ConnectionFailed
        } else {
            AppScreen::Startup
        };
        self.screen
    }

    /// Leave the failure screen for another startup attempt.
    /// The caller resets the monitor's failure count alongside.
    pub fn retry(&mut self) {
        if self.screen == AppScreen::ConnectionFailed {
            self.screen = AppScreen::Startup;
        }
    }
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new(3)
    }
}
