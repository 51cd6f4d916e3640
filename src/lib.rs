//! AgentDock - cliente para lanzar agentes de código y seguir su progreso
//!
//! AgentDock lanza agentes contra un issue o pull request y sigue el progreso
//! de la tarea paso a paso hasta que se produce un pull request.
//!
//! # Arquitectura
//!
//! - **Step Catalog**: traduce etiquetas de fase/paso a nombres legibles
//! - **Progress Store**: estado por tarea con contadores incrementales e idempotentes
//! - **Realtime Channel**: websocket por tarea con reconexión exponencial
//! - **Completion Reconciler**: obtiene los detalles finales una sola vez por tarea
//! - **Health Monitor**: sondeo periódico que decide cuándo la aplicación está lista
//!
//! # Módulos Principales
//!
//! - [`progress`] - Catálogo, modelo y store de progreso
//! - [`realtime`] - Canal websocket y política de reconexión
//! - [`api`] - Contrato HTTP con el backend de tareas
//! - [`tracker`] - Orquesta plan, canal y reconciliación para una tarea
//! - [`health`] - Monitor de salud y pantalla de arranque
//!
//! # Ejemplo de Uso
//!
//! ```rust,no_run
//! use agentdock::{AppConfig, TaskTracker};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load(None)?;
//! let tracker = TaskTracker::from_config(&config)?;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//! let record = tracker.watch("task-123", tx).await?;
//! println!("{:?}", record);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod health;
pub mod logging;
pub mod progress;
pub mod realtime;
pub mod reconcile;
pub mod tasks;
pub mod tracker;

pub use api::{ApiClient, ApiError, TaskBackend};
pub use config::AppConfig;
pub use health::{AppScreen, HealthMonitor, HealthStatus, StartupGate};
pub use progress::{ProgressError, ProgressStore, TaskProgress};
pub use realtime::{ChannelEvent, RealtimeChannel};
pub use reconcile::CompletionReconciler;
pub use tasks::{TaskBook, TaskRecord, TaskState};
pub use tracker::{TaskTracker, TrackerEvent};
