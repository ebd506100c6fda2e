//! anet-engine - command-line front end to the report engine
//!
//! Operates on the database in the resolved root folder. Lifecycle commands
//! act as the given person; `sweep-future` acts as the system.

use std::path::PathBuf;
use std::sync::Arc;

use anet_common::config::{resolve_root_folder, EngineConfig, ROOT_FOLDER_ENV};
use anet_common::db::{init_database, migrations};
use anet_common::events::EventBus;
use anet_engine::authz::Actor;
use anet_engine::db::subscriptions;
use anet_engine::notify::EmailQueue;
use anet_engine::{EngineContext, ReportLifecycle, TransitionOutcome};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command-line arguments for anet-engine
#[derive(Parser, Debug)]
#[command(name = "anet-engine")]
#[command(about = "ANET engagement report engine")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Configuration file (defaults to the platform config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database
    Init,
    /// Submit a report into its approval chain
    Submit {
        report: Uuid,
        #[arg(long)]
        as_person: Uuid,
    },
    /// Approve the step a report is pending on
    Approve {
        report: Uuid,
        #[arg(long)]
        step: Uuid,
        #[arg(long)]
        as_person: Uuid,
    },
    /// Return a report to its authors
    Reject {
        report: Uuid,
        #[arg(long)]
        as_person: Uuid,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Publish an approved report
    Publish {
        report: Uuid,
        #[arg(long)]
        as_person: Uuid,
    },
    /// Return planned reports whose engagement has passed to draft
    SweepFuture,
    /// List subscriptions of a position with unseen updates
    PendingSubscriptions { position: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting anet-engine v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&config));
    let db_path = config.database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let (mailer, mut outbox) = EmailQueue::new();
    let ctx = EngineContext::new(
        pool.clone(),
        config.dictionary.clone(),
        Arc::new(EventBus::new(config.event_bus_capacity)),
        Arc::new(mailer),
    );

    match args.command {
        Command::Init => {
            let version = migrations::get_schema_version(&pool).await?;
            info!("Database ready at schema version {}", version);
        }
        Command::Submit { report, as_person } => {
            let lifecycle = ReportLifecycle::new(&ctx);
            let actor = Actor::load(lifecycle.resolver(), as_person).await?;
            print_outcome(&lifecycle.submit(report, &actor).await?)?;
        }
        Command::Approve {
            report,
            step,
            as_person,
        } => {
            let lifecycle = ReportLifecycle::new(&ctx);
            let actor = Actor::load(lifecycle.resolver(), as_person).await?;
            print_outcome(&lifecycle.approve(report, &actor, step).await?)?;
        }
        Command::Reject {
            report,
            as_person,
            reason,
        } => {
            let lifecycle = ReportLifecycle::new(&ctx);
            let actor = Actor::load(lifecycle.resolver(), as_person).await?;
            print_outcome(&lifecycle.reject(report, &actor, &reason).await?)?;
        }
        Command::Publish { report, as_person } => {
            let lifecycle = ReportLifecycle::new(&ctx);
            let actor = Actor::load(lifecycle.resolver(), as_person).await?;
            print_outcome(&lifecycle.publish(report, &actor).await?)?;
        }
        Command::SweepFuture => {
            let lifecycle = ReportLifecycle::new(&ctx);
            let outcomes = lifecycle
                .future_engagements_to_draft(anet_common::time::now())
                .await?;
            info!("Returned {} reports to draft", outcomes.len());
            for outcome in &outcomes {
                print_outcome(outcome)?;
            }
        }
        Command::PendingSubscriptions { position } => {
            for subscription in subscriptions::pending_for_subscriber(&pool, position).await? {
                println!(
                    "{}\t{}\t{}",
                    subscription.uuid,
                    subscription.subscribed,
                    anet_common::time::to_db(&subscription.updated_at)
                );
            }
        }
    }

    // No mail transport here: report what would have been sent
    while let Ok(email) = outbox.try_recv() {
        info!(
            "Email {:?} for report {} to {}",
            email.action,
            email.report_uuid,
            email.to_addresses.join(", ")
        );
    }

    pool.close().await;
    Ok(())
}

fn print_outcome(outcome: &TransitionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}
