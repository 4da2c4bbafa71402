//! Subcommand implementations
//!
//! Everything except `run` is a short blocking call into the library.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use quickbooks::intuit::QueryClient;
use quickbooks::{
    CycleReport, Database, EntityRepository, IntuitCredentials, OAuthClient, ObjectType,
    QuickBooksClient, Scheduler, Settings, ShutdownSignal, SyncHistoryLog, SyncStateStore, Token,
    TokenManager, TokenStore, build_engines,
};
use std::sync::Arc;

fn open_database(settings: &Settings) -> Result<Database> {
    let path = settings.resolved_database_path()?;
    info!("Using database {}", path.display());
    Database::open(&path)
}

fn oauth_client(settings: &Settings) -> Result<OAuthClient> {
    let credentials = IntuitCredentials::load().map_err(|e| {
        if let Some(path) = IntuitCredentials::default_credentials_path() {
            warn!(
                "To configure QuickBooks access, either:\n\
                 1. Place your Intuit app credentials at: {}\n\
                 2. Or set environment variables: INTUIT_CLIENT_ID and INTUIT_CLIENT_SECRET",
                path.display()
            );
        }
        e
    })?;
    Ok(OAuthClient::new(&credentials, settings.redirect_uri.clone()))
}

/// The company the worker syncs: the most recently authorized one
fn active_token(db: &Database) -> Result<Token> {
    TokenStore::new(db.clone())
        .most_recent()?
        .context("No QuickBooks company connected; run `tally authorize` first")
}

fn build_scheduler(settings: &Settings, db: &Database, object_types: &[ObjectType]) -> Result<Scheduler> {
    let oauth = Arc::new(oauth_client(settings)?);
    let tokens = Arc::new(TokenManager::new(
        TokenStore::new(db.clone()),
        oauth,
        settings.refresh_buffer(),
    ));
    let client: Arc<dyn QueryClient> = Arc::new(QuickBooksClient::new(
        tokens,
        settings.environment,
        settings.minor_version,
    ));

    Ok(Scheduler::new(
        build_engines(object_types, client, db, settings.max_results),
        TokenStore::new(db.clone()),
        SyncStateStore::new(db.clone()),
        settings.sync_interval(),
    ))
}

pub fn authorize(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let oauth = oauth_client(settings)?;
    let token = oauth.authorize_interactive(&TokenStore::new(db))?;

    println!("Connected QuickBooks company {}", token.realm_id);
    println!("Access token valid until {}", token.expires_at.to_rfc3339());
    if let Some(refresh_expires_at) = token.refresh_expires_at {
        println!("Re-authorization required by {}", refresh_expires_at.to_rfc3339());
    }
    Ok(())
}

/// Long-running worker: scheduler on a blocking thread, Ctrl+C to stop
pub async fn run_worker(settings: Settings) -> Result<()> {
    let db = open_database(&settings)?;
    let scheduler = build_scheduler(&settings, &db, &ObjectType::ALL)?;
    let shutdown = ShutdownSignal::new();

    let mut worker = tokio::task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || scheduler.run(&shutdown)
    });

    tokio::select! {
        joined = &mut worker => {
            joined.context("Scheduler thread panicked")?;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
        }
    }

    let timeout = settings.shutdown_timeout();
    warn!(
        "Shutdown requested, waiting up to {}s for the current cycle (Ctrl+C again to force quit)",
        timeout.as_secs()
    );
    shutdown.trigger();

    tokio::select! {
        joined = tokio::time::timeout(timeout, &mut worker) => match joined {
            Ok(joined) => {
                joined.context("Scheduler thread panicked")?;
                info!("Worker stopped cleanly");
                Ok(())
            }
            Err(_) => {
                // The interrupted cycle stays in_progress and is redone on next start
                warn!("Cycle still running after {}s; exiting anyway", timeout.as_secs());
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Force quit");
            std::process::exit(130);
        }
    }
}

pub fn sync_once(settings: &Settings, object_type: Option<ObjectType>) -> Result<CycleReport> {
    let db = open_database(settings)?;
    active_token(&db)?;

    let object_types = match object_type {
        Some(object_type) => vec![object_type],
        None => ObjectType::ALL.to_vec(),
    };
    let scheduler = build_scheduler(settings, &db, &object_types)?;
    let report = scheduler.run_cycle()?;

    for result in &report.results {
        let outcome = if result.skipped {
            "skipped"
        } else if result.errors > 0 {
            "failed"
        } else {
            "ok"
        };
        println!(
            "{:<10} {:<8} {} records",
            result.object_type.remote_name(),
            outcome,
            result.synced
        );
    }
    Ok(report)
}

pub fn status(settings: &Settings, json: bool) -> Result<()> {
    let db = open_database(settings)?;
    let token = active_token(&db)?;
    let states = SyncStateStore::new(db.clone());

    let rows = ObjectType::ALL
        .iter()
        .map(|&object_type| states.get(&token.realm_id, object_type))
        .collect::<Result<Vec<_>>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Company {}", token.realm_id);
    let now = Utc::now();
    if token.expires_at > now {
        println!("  access token expires {}", token.expires_at.to_rfc3339());
    } else {
        println!("  access token expired (refreshed on next sync)");
    }
    if let Some(refresh_expires_at) = token.refresh_expires_at {
        println!("  refresh token expires {}", refresh_expires_at.to_rfc3339());
    }
    println!();

    for state in &rows {
        let count = EntityRepository::new(db.clone(), state.object_type).count(&token.realm_id)?;
        println!("{} ({} stored)", state.object_type.remote_name(), count);
        println!("  status:       {}", state.status);
        println!("  cursor:       {}", state.cursor.as_deref().unwrap_or("-"));
        println!(
            "  last attempt: {}",
            state.last_sync_attempt.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        );
        println!(
            "  last success: {}",
            state.last_sync_success.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        );
        if let Some(message) = &state.error_message {
            println!("  error:        {}", message);
        }
        if state.looks_interrupted() {
            println!("  note:         previous cycle was interrupted; next cycle restarts it");
        }
    }
    Ok(())
}

pub fn history(settings: &Settings, object_type: Option<ObjectType>, limit: usize) -> Result<()> {
    let db = open_database(settings)?;
    let token = active_token(&db)?;
    let records = SyncHistoryLog::new(db).recent(&token.realm_id, object_type, limit)?;

    if records.is_empty() {
        println!("No sync history yet");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<9} {:<8} {:>5} synced {:>6}ms  {} -> {}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.object_type.remote_name(),
            record.outcome.as_str(),
            record.records_synced,
            record.duration_ms,
            record.cursor_before.as_deref().unwrap_or("-"),
            record.cursor_after.as_deref().unwrap_or("-"),
        );
        if let Some(message) = &record.error_message {
            let kind = record.failure_kind.map(|k| k.as_str()).unwrap_or("other");
            println!("    [{}] {}", kind, message);
        }
    }
    Ok(())
}

pub fn reset(settings: &Settings, object_type: ObjectType) -> Result<()> {
    let db = open_database(settings)?;
    let token = active_token(&db)?;
    SyncStateStore::new(db).reset(&token.realm_id, object_type)?;
    println!(
        "{} will be fully resynced on the next cycle",
        object_type.remote_name()
    );
    Ok(())
}

pub fn logout(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let token = active_token(&db)?;

    // Revocation is best effort; the local token is removed regardless
    match oauth_client(settings).and_then(|oauth| oauth.revoke(&token.refresh_token)) {
        Ok(()) => info!("Revoked token for realm {}", token.realm_id),
        Err(e) => warn!("Could not revoke token remotely: {:#}", e),
    }

    TokenStore::new(db).delete(&token.realm_id)?;
    println!("Disconnected QuickBooks company {}", token.realm_id);
    Ok(())
}
