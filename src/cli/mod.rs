//! CLI interface module
//!
//! Operator control surface over the delivery plane: run the daemon,
//! manage rules, inspect and retry logs, work the DLQ, and manage
//! scheduled deliveries.

pub mod commands;
pub mod table;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fluxgate", about = "Multi-tenant integration gateway", version)]
pub struct Cli {
    /// Path to a config file (defaults to fluxgate.yaml + environment)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway: sources, pipeline, retry worker, scheduler
    Serve,
    /// Manage integration rules
    #[command(subcommand)]
    Rule(RuleCommands),
    /// Inspect and retry execution logs
    #[command(subcommand)]
    Logs(LogCommands),
    /// Work the dead-letter queue
    #[command(subcommand)]
    Dlq(DlqCommands),
    /// Manage scheduled deliveries
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// List rules
    List {
        #[arg(long)]
        tenant: Option<String>,
        /// Include soft-deleted rules
        #[arg(long)]
        deleted: bool,
    },
    /// Pause a rule (stops matching; logs are kept)
    Pause { id: Uuid },
    /// Resume a paused rule
    Resume { id: Uuid },
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// List execution logs
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        rule: Option<Uuid>,
        /// Filter by status (PENDING, SUCCESS, FAILED, RETRYING, ABANDONED, SKIPPED, DUPLICATE)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Re-queue one log for the retry worker
    Retry { id: Uuid },
    /// Re-queue every failed/abandoned log of a rule
    BulkRetry {
        #[arg(long)]
        rule: Uuid,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Mark a log abandoned
    Abandon { id: Uuid },
    /// Backfill rule metadata (org unit anchor) onto historical logs
    BackfillMeta {
        #[arg(long)]
        rule: Uuid,
        #[arg(long, default_value_t = 1000)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum DlqCommands {
    /// List dead-letter entries
    List {
        #[arg(long)]
        tenant: Option<String>,
        /// Include resolved entries
        #[arg(long)]
        all: bool,
    },
    /// Resolve an entry and re-queue its log for delivery
    Promote { id: Uuid },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// List scheduled deliveries
    List {
        #[arg(long)]
        tenant: Option<String>,
        /// Filter by status (pending, processing, done, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
    },
    /// Cancel a pending scheduled delivery
    Cancel { id: Uuid },
    /// Cancel pending deliveries past due plus the grace window
    CleanupOverdue {
        /// Override the configured grace window
        #[arg(long)]
        grace_hours: Option<u32>,
    },
}
