//! Command implementations: snapshot load, one engine operation, atomic
//! snapshot write-back.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use merit_core::audit::JsonlSink;
use merit_core::engine::{CallContext, Engine, EngineSnapshot};
use merit_core::identity::AgentId;
use merit_core::score::Fingerprint;
use serde::Deserialize;

use crate::{Cli, Commands};

/// One entry in a batch-update input file.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    subject: String,
    score: u16,
    /// 64 hex chars.
    fingerprint: String,
}

pub fn run(cli: Cli) -> Result<()> {
    let Cli {
        state,
        caller,
        command,
        ..
    } = cli;

    if let Commands::Init { orchestrator } = &command {
        return init(&state, orchestrator);
    }

    let mut engine = load_engine(&state)?;
    let read_only = is_read_only(&command);
    // Mutating commands need a caller identity; reads do not.
    let ctx = call_context(caller.as_deref());

    match command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::RegisterAgent { identity, role } => {
            let ctx = ctx?;
            let events = engine.register_agent(&ctx, AgentId::from(identity), role)?;
            if events.is_empty() {
                println!("role already held, nothing to do");
            } else {
                println!("granted {role}");
            }
        }
        Commands::RevokeRole { identity, role } => {
            let ctx = ctx?;
            let identity = AgentId::from(identity);
            let events = engine.revoke_agent_role(&ctx, &identity, role)?;
            if events.is_empty() {
                println!("{identity} did not hold {role}");
            } else {
                println!("revoked {role} from {identity}");
            }
        }
        Commands::SetAuditLog { path } => {
            let ctx = ctx?;
            engine.set_audit_sink(&ctx, Arc::new(JsonlSink::new(&path)))?;
            println!("audit log destination set to {}", path.display());
        }
        Commands::SetTokenBinding { handle } => {
            let ctx = ctx?;
            engine.set_external_token_binding(&ctx, handle.clone())?;
            println!("external token binding set to {handle}");
        }

        Commands::RequestUpdate { subject } => {
            let ctx = ctx?;
            let subject = AgentId::from(subject);
            let events = engine.request_score_update(&ctx, subject)?;
            if let merit_core::EngineEvent::RequestOpened { request_id, .. } = &events[0] {
                println!("request opened: {request_id}");
            }
        }
        Commands::RequestViaSettlement { subject, cap } => {
            let ctx = ctx?;
            let subject = AgentId::from(subject);
            let events = engine.request_via_settlement(&ctx, subject, cap)?;
            if let merit_core::EngineEvent::RequestOpened { request_id, .. } = &events[0] {
                println!("settlement request opened (cap {cap}): {request_id}");
            }
        }
        Commands::ConfirmPayment {
            request_id,
            invoice_id,
            amount,
        } => {
            let ctx = ctx?;
            engine.confirm_payment(&ctx, &request_id, invoice_id, amount)?;
            println!("payment of {amount} confirmed for {request_id}");
        }

        Commands::UpdateScore {
            subject,
            score,
            fingerprint,
            adjustment,
        } => {
            let ctx = ctx?;
            let subject = AgentId::from(subject);
            let fingerprint = parse_fingerprint(&fingerprint)?;
            let update = engine.update_score(&ctx, subject, score, fingerprint, adjustment)?;
            println!(
                "score {} written at version {} (token {})",
                update.record.score, update.record.version, update.token_id
            );
            for event in &update.events {
                tracing::info!(kind = event.kind(), "event emitted");
            }
        }
        Commands::BatchUpdate { file } => {
            let ctx = ctx?;
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read batch file {}", file.display()))?;
            let entries: Vec<BatchEntry> =
                serde_json::from_str(&content).context("invalid batch file")?;

            let subjects: Vec<AgentId> = entries
                .iter()
                .map(|e| AgentId::from(e.subject.as_str()))
                .collect();
            let scores: Vec<u16> = entries.iter().map(|e| e.score).collect();
            let fingerprints: Vec<Fingerprint> = entries
                .iter()
                .map(|e| parse_fingerprint(&e.fingerprint))
                .collect::<Result<_>>()?;

            let batch = engine.batch_update_scores(&ctx, &subjects, &scores, &fingerprints)?;
            println!("batch of {} entries applied", batch.count);
        }

        Commands::Reputation { subject } => {
            let record = engine.get_reputation(&AgentId::from(subject));
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Credential { subject } => {
            let subject = AgentId::from(subject);
            let token_id = engine.get_token_id(&subject);
            if token_id == 0 {
                bail!("no credential minted for {subject}");
            }
            let credential = engine.get_credential(token_id)?;
            println!("{}", serde_json::to_string_pretty(credential)?);
        }
        Commands::Metadata { subject } => {
            let subject = AgentId::from(subject);
            let token_id = engine.get_token_id(&subject);
            if token_id == 0 {
                bail!("no credential minted for {subject}");
            }
            println!("{}", engine.credential_metadata(token_id)?);
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.statistics())?);
        }
    }

    // Reads leave the state file untouched.
    if read_only {
        return Ok(());
    }
    save_engine(&state, &engine)
}

/// True for commands that never mutate engine state.
fn is_read_only(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Reputation { .. }
            | Commands::Credential { .. }
            | Commands::Metadata { .. }
            | Commands::Stats
    )
}

fn init(state: &Path, orchestrator: &str) -> Result<()> {
    if state.exists() {
        bail!("state file {} already exists", state.display());
    }
    let engine = Engine::new(AgentId::from(orchestrator));
    save_engine(state, &engine)?;
    println!(
        "engine initialized with orchestrator {orchestrator} at {}",
        state.display()
    );
    Ok(())
}

fn call_context(caller: Option<&str>) -> Result<CallContext> {
    let caller = caller.context("--caller is required for this command")?;
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    Ok(CallContext::new(AgentId::from(caller), now))
}

fn parse_fingerprint(hex_str: &str) -> Result<Fingerprint> {
    let bytes = hex::decode(hex_str).context("fingerprint must be hex")?;
    let fingerprint: Fingerprint = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("fingerprint must be exactly 32 bytes (64 hex chars)"))?;
    Ok(fingerprint)
}

fn load_engine(state: &Path) -> Result<Engine> {
    let content = fs::read_to_string(state).with_context(|| {
        format!(
            "failed to read state file {} (run `merit init` first)",
            state.display()
        )
    })?;
    let snapshot: EngineSnapshot =
        serde_json::from_str(&content).context("state file is not a valid engine snapshot")?;
    Ok(Engine::restore(snapshot))
}

/// Atomic write: temp file in the same directory, then rename.
fn save_engine(state: &Path, engine: &Engine) -> Result<()> {
    let snapshot = engine.snapshot();
    let content = serde_json::to_string_pretty(&snapshot)?;

    let tmp = state.with_extension("json.tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, state)
        .with_context(|| format!("failed to replace {}", state.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_parsing() {
        let hex64 = "ab".repeat(32);
        assert_eq!(parse_fingerprint(&hex64).unwrap(), [0xABu8; 32]);
        assert!(parse_fingerprint("abcd").is_err());
        assert!(parse_fingerprint("not-hex").is_err());
    }

    #[test]
    fn init_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");

        init(&state, "orch").unwrap();
        let engine = load_engine(&state).unwrap();
        assert!(engine.has_role(
            &AgentId::from("orch"),
            merit_core::identity::AgentRole::Orchestrator
        ));

        // Re-init refuses to clobber.
        assert!(init(&state, "other").is_err());
    }

    #[test]
    fn read_commands_are_classified() {
        assert!(is_read_only(&Commands::Stats));
        assert!(is_read_only(&Commands::Reputation {
            subject: "s".to_string()
        }));
        assert!(is_read_only(&Commands::Credential {
            subject: "s".to_string()
        }));
        assert!(is_read_only(&Commands::Metadata {
            subject: "s".to_string()
        }));

        assert!(!is_read_only(&Commands::Init {
            orchestrator: "o".to_string()
        }));
        assert!(!is_read_only(&Commands::RequestUpdate {
            subject: "s".to_string()
        }));
        assert!(!is_read_only(&Commands::UpdateScore {
            subject: "s".to_string(),
            score: 500,
            fingerprint: "ab".repeat(32),
            adjustment: 0,
        }));
    }

    #[test]
    fn stats_does_not_rewrite_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        init(&state, "orch").unwrap();

        // Re-save compactly so any write-back (pretty) would change bytes.
        let snapshot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&state).unwrap()).unwrap();
        fs::write(&state, serde_json::to_string(&snapshot).unwrap()).unwrap();
        let before = fs::read_to_string(&state).unwrap();

        run(Cli {
            state: state.clone(),
            caller: None,
            log_level: "warn".to_string(),
            command: Commands::Stats,
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&state).unwrap(), before);
    }
}
