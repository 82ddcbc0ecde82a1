//! Review sync client (dqr-sync) - Main entry point
//!
//! Headless front end for the review engine: lists the queues, watches them
//! live over the push channel, approves and rejects files, and uploads new
//! files for review.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dqr_common::config::{
    ClientConfig, ConfigOverrides, ENV_API_URL, ENV_CONFIG_FILE, ENV_EVENTS_URL, ENV_IDENTITY,
    ENV_TOKEN,
};
use dqr_common::events::ReviewEvent;
use dqr_common::{FileRecord, QueueName};
use dqr_sync::ReviewEngine;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dqr-sync
#[derive(Parser, Debug)]
#[command(name = "dqr-sync")]
#[command(about = "Review queue client for the data upload dashboard")]
#[command(version)]
struct Args {
    /// Base URL of the review backend
    #[arg(long, global = true, env = ENV_API_URL)]
    api_url: Option<String>,

    /// Push channel URL (defaults to <api-url>/events)
    #[arg(long, global = true, env = ENV_EVENTS_URL)]
    events_url: Option<String>,

    /// Reviewer identity recorded on approvals, rejections and uploads
    #[arg(long, global = true, env = ENV_IDENTITY)]
    identity: Option<String>,

    /// Bearer token for mutating calls
    #[arg(long, global = true, env = ENV_TOKEN, hide_env_values = true)]
    token: Option<String>,

    /// Configuration file
    #[arg(long, global = true, env = ENV_CONFIG_FILE)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the queues once
    List {
        /// Only this queue (pending, approved, rejected)
        #[arg(long)]
        queue: Option<QueueName>,

        /// Project substring filter
        #[arg(long, default_value = "")]
        project: String,

        /// Uploader substring filter
        #[arg(long, default_value = "")]
        uploader: String,
    },

    /// Keep the queues on screen, updating on every remote change
    Watch {
        #[arg(long, default_value = "")]
        project: String,

        #[arg(long, default_value = "")]
        uploader: String,
    },

    /// Approve a pending file
    Approve {
        object_id: String,
    },

    /// Reject a pending file with feedback
    Reject {
        object_id: String,

        #[arg(long)]
        feedback: String,
    },

    /// Upload a file into the pending queue
    Upload {
        path: PathBuf,

        #[arg(long)]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so queue listings stay clean on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dqr_sync=info,dqr_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    info!(
        "Starting dqr-sync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let overrides = ConfigOverrides {
        api_url: args.api_url.clone(),
        events_url: args.events_url.clone(),
        identity: args.identity.clone(),
        token: args.token.clone(),
        config_file: args.config.clone(),
    };
    let config = ClientConfig::resolve(&overrides).context("Failed to resolve configuration")?;
    info!(api_url = %config.api_url, identity = %config.identity, "Configuration resolved");

    let engine = ReviewEngine::from_config(&config).context("Failed to initialize review engine")?;

    match args.command {
        Command::List {
            queue,
            project,
            uploader,
        } => {
            engine.set_filter(&project, &uploader);
            engine.refresh().await;
            let queues = match queue {
                Some(queue) => vec![queue],
                None => QueueName::ALL.to_vec(),
            };
            print_queues(&engine, &queues);
        }

        Command::Watch { project, uploader } => {
            engine.set_filter(&project, &uploader);
            watch(&engine).await;
        }

        Command::Approve { object_id } => {
            engine.refresh().await;
            engine
                .approve(&object_id)
                .await
                .with_context(|| format!("Failed to approve {}", object_id))?;
            println!("approved {}", object_id);
        }

        Command::Reject {
            object_id,
            feedback,
        } => {
            engine.refresh().await;
            engine
                .reject(&object_id, &feedback)
                .await
                .with_context(|| format!("Failed to reject {}", object_id))?;
            println!("rejected {}", object_id);
        }

        Command::Upload { path, project } => {
            let reply = engine
                .upload(&path, &project)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            if !reply.is_null() {
                println!("{}", reply);
            }

            engine.refresh().await;
            print_queues(&engine, &[QueueName::Pending]);
        }
    }

    Ok(())
}

async fn watch(engine: &ReviewEngine) {
    let mut events = engine.subscribe();
    engine.start().await;
    print_queues(engine, &QueueName::ALL);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(ReviewEvent::SyncFailed { .. }) => print_queues(engine, &QueueName::ALL),
                Ok(event) if event.affected_queues().is_empty() => {}
                Ok(_) => print_queues(engine, &QueueName::ALL),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                    print_queues(engine, &QueueName::ALL);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
}

fn print_queues(engine: &ReviewEngine, queues: &[QueueName]) {
    for &queue in queues {
        let status = engine.status(queue);
        let visible = engine.visible(queue);

        let state = match (&status.error, status.loading) {
            (Some(e), _) => format!(" (error: {})", e),
            (None, true) => " (loading)".to_string(),
            (None, false) => String::new(),
        };
        println!("== {} [{}]{}", queue, visible.len(), state);

        for record in visible.iter() {
            println!("{}", format_record(record));
        }
    }
}

fn format_record(record: &FileRecord) -> String {
    let updated = record
        .last_modified
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut line = format!(
        "  {}  {}  project={}  uploader={}  {:.2} KB  {}",
        record.object_id,
        record.display_name(),
        record.project_id,
        record.uploader,
        record.size as f64 / 1024.0,
        updated
    );
    if let Some(feedback) = &record.feedback {
        line.push_str(&format!("  feedback={:?}", feedback));
    }
    line
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
