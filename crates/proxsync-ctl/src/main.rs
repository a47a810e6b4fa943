// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! proxsync - reconcile Proxmox VE inventory into NetBox.
//!
//! Configuration comes from the environment (optionally a `.env` file):
//! `NETBOX_*` and `PROXSYNC_*` for the sink and the engine, and one
//! `PROXMOX_NODE_<ID>_*` group per node.
//!
//! ```text
//! proxsync nodes
//! proxsync list pve1
//! proxsync sync pve1 --vmid 100 --vmid 101 --json
//! proxsync sync-node pve1
//! ```

mod config;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use proxsync_core::{Selection, SyncConfig, SyncEngine, SyncReport};
use proxsync_sink::NetboxClient;
use proxsync_source::{ProxmoxClient, SourceClient};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{NodeProfile, configured_node_ids, find_profile};

const DEFAULT_FILTER: &str = "warn,proxsync=info";

/// Exit status when the batch ran but some entity failed.
const EXIT_ENTITY_FAILURES: u8 = 2;

#[derive(Parser)]
#[command(name = "proxsync")]
#[command(author, version, about = "Reconcile Proxmox VE inventory into NetBox", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level or filter directives (e.g. `debug`, `proxsync_sink=trace`)
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured Proxmox nodes
    Nodes {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the guests a node reports, without touching NetBox
    List {
        /// Node id or node name
        node: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile a node's guests into NetBox
    Sync(SyncArgs),

    /// Reconcile the node itself as a NetBox device
    SyncNode {
        /// Node id or node name
        node: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Node id or node name
    node: String,

    /// Only sync these guests (repeatable). Orphan detection still uses the full node listing.
    #[arg(long = "vmid", value_name = "VMID")]
    vmids: Vec<u32>,

    /// Do not mark records of vanished guests
    #[arg(long)]
    no_orphans: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads env-backed arguments.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    if let Err(err) = dotenv {
        warn!(error = %err, "No usable .env file, using the process environment only");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// A bare level applies to proxsync's own crates; anything else is a filter.
fn log_filter(level: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::new(DEFAULT_FILTER);
    match level.map(str::trim).filter(|l| !l.is_empty()) {
        Some(level) => match level.parse::<LevelFilter>() {
            Ok(level) => EnvFilter::new(format!("warn,proxsync={}", level)),
            Err(_) => EnvFilter::try_new(level).unwrap_or_else(|_| fallback()),
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
    }
}

fn init_tracing(level: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Nodes { json } => nodes(json),
        Command::List { node, json } => list(&node, json).await,
        Command::Sync(args) => sync(args).await,
        Command::SyncNode { node, json } => sync_node(&node, json).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Serialize)]
struct NodeRow {
    id: String,
    node: Option<String>,
    host: Option<String>,
    cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn nodes(json: bool) -> anyhow::Result<ExitCode> {
    let rows: Vec<NodeRow> = configured_node_ids()
        .into_iter()
        .map(|id| match NodeProfile::from_env(&id) {
            Ok(profile) => NodeRow {
                id,
                node: Some(profile.scope.node),
                host: Some(profile.source.host),
                cluster: Some(profile.scope.cluster_name),
                error: None,
            },
            Err(err) => NodeRow {
                id,
                node: None,
                host: None,
                cluster: None,
                error: Some(err.to_string()),
            },
        })
        .collect();

    if json {
        output::print_json(&rows)?;
    } else if rows.is_empty() {
        println!("No nodes configured (set PROXMOX_NODE_<ID>_* variables).");
    } else {
        for row in &rows {
            match &row.error {
                None => println!(
                    "{:<10}  {:<16}  {:<24}  cluster {}",
                    row.id,
                    row.node.as_deref().unwrap_or("-"),
                    row.host.as_deref().unwrap_or("-"),
                    row.cluster.as_deref().unwrap_or("-"),
                ),
                Some(err) => println!("{:<10}  incomplete: {}", row.id, err),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(node: &str, json: bool) -> anyhow::Result<ExitCode> {
    let profile = find_profile(node)?;
    let client = ProxmoxClient::new(profile.source.clone()).context("creating Proxmox client")?;
    let instances = client
        .list_instances(&profile.scope.node)
        .await
        .with_context(|| format!("listing guests of {}", profile.scope.node))?;

    if json {
        output::print_json(&instances)?;
    } else {
        for line in output::instance_table(&instances) {
            println!("{}", line);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn sync(args: SyncArgs) -> anyhow::Result<ExitCode> {
    let profile = find_profile(&args.node)?;
    let mut config = SyncConfig::from_env()?;
    if args.no_orphans {
        config = config.with_mark_orphans(false);
    }
    let engine = build_engine(&profile, config)?;

    let selection = if args.vmids.is_empty() {
        Selection::All
    } else {
        Selection::ids(args.vmids)
    };
    info!(node = %profile.scope.node, ?selection, "Starting guest sync");
    let report = engine
        .sync_instances(&profile.scope, selection)
        .await
        .context("guest sync aborted")?;
    finish(&report, args.json)
}

async fn sync_node(node: &str, json: bool) -> anyhow::Result<ExitCode> {
    let profile = find_profile(node)?;
    let engine = build_engine(&profile, SyncConfig::from_env()?)?;
    let report = engine
        .sync_node(&profile.scope)
        .await
        .context("node sync aborted")?;
    finish(&report, json)
}

fn build_engine(profile: &NodeProfile, config: SyncConfig) -> anyhow::Result<SyncEngine> {
    let source = ProxmoxClient::new(profile.source.clone()).context("creating Proxmox client")?;
    let sink = NetboxClient::from_env().context("creating NetBox client")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current entity");
            on_interrupt.cancel();
        }
    });

    Ok(SyncEngine::builder()
        .source(Arc::new(source))
        .sink(Arc::new(sink))
        .config(config)
        .cancel_token(cancel)
        .build()?)
}

fn finish(report: &SyncReport, json: bool) -> anyhow::Result<ExitCode> {
    if json {
        output::print_json(report)?;
    } else {
        for line in output::report_lines(report) {
            println!("{}", line);
        }
    }
    if report.has_failures() || report.cancelled {
        return Ok(ExitCode::from(EXIT_ENTITY_FAILURES));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_args() {
        let cli = Cli::try_parse_from([
            "proxsync", "sync", "pve1", "--vmid", "100", "--vmid", "101", "--no-orphans",
        ])
        .unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.node, "pve1");
                assert_eq!(args.vmids, vec![100, 101]);
                assert!(args.no_orphans);
                assert!(!args.json);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_log_filter_accepts_levels_and_directives() {
        assert!(log_filter(Some("DEBUG")).to_string().contains("proxsync=debug"));
        assert!(log_filter(Some("proxsync_sink=trace")).to_string().contains("proxsync_sink=trace"));
    }
}
