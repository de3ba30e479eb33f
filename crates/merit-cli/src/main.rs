//! merit - reputation ledger operator CLI.
//!
//! Drives an engine instance persisted as a JSON snapshot file: register
//! agents, open analysis requests, confirm settlement payments, write
//! scores, and inspect records and credentials. Each invocation loads the
//! snapshot, applies one operation, and writes the snapshot back
//! atomically.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use merit_core::identity::AgentRole;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// merit - reputation ledger operator CLI
#[derive(Parser, Debug)]
#[command(name = "merit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the engine snapshot file
    #[arg(short, long, default_value = "merit-state.json")]
    state: PathBuf,

    /// Caller identity for the operation
    #[arg(short, long)]
    caller: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Setup ===
    /// Create a new engine state file with a bootstrap orchestrator
    Init {
        /// The fixed bootstrap orchestrator identity
        orchestrator: String,
    },

    /// Grant a role to an agent (caller must be an orchestrator)
    RegisterAgent {
        /// The identity to grant the role to
        identity: String,
        /// The role to grant
        #[arg(value_parser = parse_role)]
        role: AgentRole,
    },

    /// Revoke a role from an agent (caller must be an orchestrator)
    RevokeRole {
        /// The identity to revoke the role from
        identity: String,
        /// The role to revoke
        #[arg(value_parser = parse_role)]
        role: AgentRole,
    },

    /// Configure the audit log destination (JSONL file, set-once)
    SetAuditLog {
        /// Path the audit trail is appended to
        path: PathBuf,
    },

    /// Record the external token service binding (set-once)
    SetTokenBinding {
        /// Opaque handle, e.g. a token ID on an external ledger
        handle: String,
    },

    // === Request lifecycle ===
    /// Open a self-service score update request for a subject
    RequestUpdate {
        /// The subject to analyze
        subject: String,
    },

    /// Open a capped, unpaid request on a subject's behalf (marketplace)
    RequestViaSettlement {
        /// The subject to analyze
        subject: String,
        /// Maximum payment the requester commits to
        cap: u64,
    },

    /// Confirm payment against an open request (marketplace/settlement)
    ConfirmPayment {
        /// The request handle from request-via-settlement
        request_id: String,
        /// Invoice identifier
        invoice_id: String,
        /// Amount paid
        amount: u64,
    },

    // === Scoring ===
    /// Write a score for a subject (analyzer)
    UpdateScore {
        /// The subject
        subject: String,
        /// Score in [0, 1000]
        score: u16,
        /// Reasoning fingerprint, 64 hex chars
        fingerprint: String,
        /// Diagnostic signed adjustment
        #[arg(default_value_t = 0)]
        adjustment: i64,
    },

    /// Apply a batch of score writes from a JSON file (analyzer)
    BatchUpdate {
        /// JSON array of {subject, score, fingerprint} entries
        file: PathBuf,
    },

    // === Reads ===
    /// Show the reputation record for a subject
    Reputation {
        /// The subject
        subject: String,
    },

    /// Show the credential for a subject
    Credential {
        /// The subject
        subject: String,
    },

    /// Print the credential metadata document for a subject
    Metadata {
        /// The subject
        subject: String,
    },

    /// Show engine-wide counters
    Stats,
}

fn parse_role(value: &str) -> Result<AgentRole, String> {
    value.parse()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    commands::run(cli)
}
