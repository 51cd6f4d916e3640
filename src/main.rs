//! AgentDock - launch coding agents and follow their progress from the terminal
//!
//! Talks to the task backend over HTTP and follows task progress over a
//! websocket channel.

use agentdock::{
    api::{AgentContext, CreateTaskRequest},
    config::AppConfig,
    health::{AppScreen, HealthMonitor, StartupGate},
    log_debug, log_error, log_info, log_warn,
    logging::{self, Level},
    progress::TaskProgress,
    tasks::TaskRecord,
    tracker::{TaskTracker, TrackerEvent},
};
use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Check backend health once
    Health,
    /// Follow the progress of an existing task
    Watch {
        /// Task id
        task_id: String,
    },
    /// Launch agents against an issue or pull request, then watch the task
    Launch {
        /// Repository as owner/name
        repo: String,
        /// Issue number
        #[arg(long, conflicts_with = "pr")]
        issue: Option<u64>,
        /// Pull request number
        #[arg(long)]
        pr: Option<u64>,
        /// Agent as name[:surface[:model]], repeatable
        #[arg(long = "agent", required = true)]
        agents: Vec<String>,
    },
    /// Delete a task
    Delete {
        /// Task id
        task_id: String,
    },
}

#[derive(Parser, Debug)]
#[command(name = "agentdock")]
#[command(author = "MadKoding")]
#[command(version)]
#[command(about = "Launch coding agents and follow their progress", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Mirror the session log to stderr
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.debug |= args.debug;
    init_logging(args.verbose, config.debug, config.log_level);
    config.validate()?;

    // Config is loaded before any subscriber exists, so report it here
    tracing::info!("{}", config.describe_source());
    log_info!("{}", config.describe_source());
    log_info!("Backend at {} (realtime {})", config.api_url, config.ws_url);
    let tracker = Arc::new(TaskTracker::from_config(&config)?);
    let monitor = HealthMonitor::new(tracker.backend());

    match args.command {
        Command::Health => {
            let status = monitor.check_once().await;
            if status.healthy {
                println!("✓ Backend is healthy ({})", config.api_url);
            } else {
                let reason = status
                    .failure
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                bail!("Backend is not healthy: {}", reason);
            }
        }
        Command::Watch { task_id } => {
            wait_until_ready(&monitor, &config).await?;
            follow(tracker, &monitor, &config, &task_id).await?;
        }
        Command::Launch {
            repo,
            issue,
            pr,
            agents,
        } => {
            if issue.is_none() && pr.is_none() {
                bail!("Pass --issue or --pr");
            }
            let agents = agents
                .iter()
                .map(|spec| parse_agent(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;

            wait_until_ready(&monitor, &config).await?;
            let request = CreateTaskRequest {
                repository: repo,
                issue_number: issue,
                pull_request_number: pr,
                agents,
            };
            let task_id = tracker
                .launch(&request)
                .await
                .context("Failed to launch task")?;
            println!("🚀 Task {} launched", task_id);
            follow(tracker, &monitor, &config, &task_id).await?;
        }
        Command::Delete { task_id } => {
            tracker
                .delete(&task_id)
                .await
                .with_context(|| format!("Failed to delete task {}", task_id))?;
            println!("🗑  Task {} deleted", task_id);
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(verbose: bool, debug_mode: bool, log_level: Level) {
    logging::set_min_level(if verbose || debug_mode {
        Level::Debug
    } else {
        log_level
    });
    if let Err(e) = logging::init_logger() {
        eprintln!("Session log unavailable: {}", e);
    }
    logging::set_debug_mode(debug_mode);

    let filter = if verbose || debug_mode {
        "agentdock=debug,info"
    } else {
        "agentdock=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Block until the backend answers, or give up after the startup threshold
async fn wait_until_ready(monitor: &HealthMonitor, config: &AppConfig) -> anyhow::Result<()> {
    let mut gate = StartupGate::new(config.health.startup_failure_threshold);
    loop {
        let status = monitor.check_once().await;
        match gate.observe(&status) {
            AppScreen::Ready => return Ok(()),
            AppScreen::ConnectionFailed => {
                log_error!(
                    "❌ Backend at {} unreachable after {} attempts",
                    config.api_url,
                    status.consecutive_failures
                );
                bail!("Cannot connect to {}", config.api_url);
            }
            _ => {
                eprintln!(
                    "… waiting for backend ({}/{})",
                    status.consecutive_failures, config.health.startup_failure_threshold
                );
                tokio::time::sleep(config.health.startup_retry()).await;
            }
        }
    }
}

/// Watch a task, rendering events until it finishes or Ctrl-C
async fn follow(
    tracker: Arc<TaskTracker>,
    monitor: &HealthMonitor,
    config: &AppConfig,
    task_id: &str,
) -> anyhow::Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(render_events(task_id.to_string(), events_rx));

    // Ready already; later failures are transient blips
    let mut gate = StartupGate::new(config.health.startup_failure_threshold);
    gate.observe(&monitor.check_once().await);
    let gate = std::sync::Mutex::new(gate);
    monitor.start_periodic(config.health.interval(), move |status| {
        let mut gate = gate.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = gate.screen();
        let after = gate.observe(&status);
        if before != after {
            match after {
                AppScreen::Reconnecting => eprintln!("⚠ Backend health check failing"),
                AppScreen::Ready => eprintln!("✓ Backend reachable again"),
                _ => {}
            }
        }
    });

    let outcome = tokio::select! {
        result = tracker.watch(task_id, events_tx) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    monitor.stop_periodic();

    match outcome {
        Some(Ok(record)) => {
            let _ = printer.await;
            if let Some(record) = record {
                print_summary(&record);
            }
            Ok(())
        }
        Some(Err(e)) => {
            printer.abort();
            log_error!(task = task_id; "Watching failed: {}", e);
            Err(e.into())
        }
        None => {
            log_warn!(task = task_id; "Interrupted while watching");
            tracker.clear().await;
            printer.abort();
            Ok(())
        }
    }
}

async fn render_events(task_id: String, mut events: mpsc::UnboundedReceiver<TrackerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TrackerEvent::Snapshot(progress) => {
                log_debug!(
                    task = task_id;
                    "{}/{} done, {} failed",
                    progress.completed_steps,
                    progress.total_steps,
                    progress.failed_steps
                );
                print_progress(&progress)
            }
            TrackerEvent::Reconnecting { attempt, delay } => {
                log_warn!(task = task_id; "Reconnecting (attempt {}) in {:?}", attempt, delay);
                eprintln!("↻ Reconnecting (attempt {}) in {:?}", attempt, delay)
            }
            TrackerEvent::Failed(message) => {
                log_error!(task = task_id; "Failed: {}", message);
                eprintln!("✗ Task failed: {}", message)
            }
            TrackerEvent::Completed(_) => {
                log_info!(task = task_id; "Completed");
                println!("🏁 Task completed")
            }
            TrackerEvent::DetailsPending(task_id) => {
                log_info!(task = task_id; "Completed, details pending");
                println!("🏁 Task {} completed, details not available yet", task_id)
            }
            TrackerEvent::Closed => break,
        }
    }
}

fn print_progress(progress: &TaskProgress) {
    let current = progress
        .current_step()
        .map(|step| step.title.as_str())
        .unwrap_or("-");
    println!(
        "[{:>3}%] {}/{} done, {} failed · {}",
        progress.percentage(),
        progress.completed_steps,
        progress.total_steps,
        progress.failed_steps,
        current
    );
    for phase in &progress.phases {
        println!(
            "  {} {} {} ({}/{})",
            phase.status().marker(),
            phase.icon,
            phase.name,
            phase.completed_count(),
            phase.steps.len()
        );
    }
}

fn print_summary(record: &TaskRecord) {
    println!("Task {}: {:?}", record.task_id, record.state);
    if let Some(issue) = record.issue_number {
        println!("  Issue #{}", issue);
    }
    if let Some(pr) = &record.pull_request {
        println!("  {} ({})", pr.title, pr.url);
        println!(
            "  {} → {} files, +{} -{}",
            pr.branch, pr.files_changed, pr.additions, pr.deletions
        );
    }
    if let Some(error) = &record.error {
        println!("  Error: {}", error);
    }
}

/// Parse `name[:surface[:model]]`
fn parse_agent(spec: &str) -> anyhow::Result<AgentContext> {
    let mut parts = spec.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        bail!("Empty agent name in '{}'", spec);
    }

    let mut agent = AgentContext::new(name);
    if let Some(surface) = parts.next().filter(|s| !s.is_empty()) {
        agent = agent.with_surface(surface);
    }
    if let Some(model) = parts.next().filter(|s| !s.is_empty()) {
        agent = agent.with_model(model);
    }
    Ok(agent)
}
