//! Demo CLI: loads a registry directory and a policy file from disk and
//! runs one planner decision, printing the result and its trace as JSON.
//!
//! This is not the HTTP surface — it exists to exercise the library
//! end-to-end from a terminal.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use router_executor::{ScriptedExecutor, ToolExecutor};
use router_planner::{PlanContext, Planner};
use router_policy::PolicyService;
use router_registry::RegistryService;
use router_trace_store::{TraceStore, TraceStoreConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use telemetry::MetricsRegistry;

#[derive(Debug, Parser)]
#[command(name = "router-cli", about = "Runs the capability router's planner over an on-disk registry and policy")]
struct Cli {
    /// Directory of tool definition YAML files.
    #[arg(long, global = true)]
    registry_dir: Option<PathBuf>,
    /// Policy document (YAML).
    #[arg(long, global = true)]
    policy_file: Option<PathBuf>,
    /// TOML config file with defaults for the above.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every tool currently loaded in the registry.
    Registry,
    /// Run one planning decision for a capability.
    Plan {
        capability: String,
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        plan_only: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Overrides loaded from a TOML config file, merged under whatever the CLI
/// flags provide. Mirrors the way `DevJadhav-Rustant`'s `policy::load_policies`
/// reads a TOML file into a typed struct.
#[derive(Debug, Deserialize, Default)]
struct RouterConfig {
    registry_dir: Option<PathBuf>,
    policy_file: Option<PathBuf>,
    #[serde(default)]
    trace_max_traces: Option<usize>,
    #[serde(default)]
    trace_ttl_ms: Option<u64>,
}

impl RouterConfig {
    fn load_from_toml_path(path: &std::path::Path) -> Result<Self, Box<dyn Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

fn resolve_paths(cli: &Cli) -> Result<(PathBuf, PathBuf, TraceStoreConfig), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => RouterConfig::load_from_toml_path(path)?,
        None => RouterConfig::default(),
    };

    let registry_dir = cli
        .registry_dir
        .clone()
        .or(config.registry_dir)
        .ok_or("no --registry-dir given and no registry_dir in --config")?;
    let policy_file = cli
        .policy_file
        .clone()
        .or(config.policy_file)
        .ok_or("no --policy-file given and no policy_file in --config")?;

    let mut trace_config = TraceStoreConfig::default();
    if let Some(max_traces) = config.trace_max_traces {
        trace_config.max_traces = max_traces;
    }
    if let Some(ttl_ms) = config.trace_ttl_ms {
        trace_config.ttl_ms = ttl_ms;
    }

    Ok((registry_dir, policy_file, trace_config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    telemetry::init_json_logging();
    let cli = Cli::parse();
    let (registry_dir, policy_file, trace_config) = resolve_paths(&cli)?;

    // Installed before the first load so that the initial load (not just
    // later reloads) is reflected in `tools_loaded`/`tool_load_errors`.
    let metrics = Arc::new(MetricsRegistry::new());
    router_registry::set_observer(Arc::new(telemetry::DefaultRegistryObserver::new(metrics.clone())));

    let registry = RegistryService::load(registry_dir)?;
    let policy = Arc::new(PolicyService::load_from_yaml_path(&policy_file)?);

    match cli.command {
        Command::Registry => {
            println!("{}", serde_json::to_string_pretty(&registry.get_registry())?);
        }
        Command::Plan { capability, input, tenant, plan_only, timeout_ms } => {
            let input: Value = serde_json::from_str(&input)?;

            // Real HTTP/RPA transport is out of scope here; the only
            // concrete executor available to this demo binary is the
            // scripted test double. Wire a real one in to drive this
            // against live tools.
            let executor: Arc<dyn ToolExecutor> = Arc::new(scripted_passthrough_executor());
            let trace_store = Arc::new(TraceStore::new(trace_config));
            let planner = Planner::new(registry, policy, executor, trace_store.clone(), metrics);

            let mut ctx = PlanContext::new(capability, input);
            if let Some(t) = tenant {
                ctx = ctx.with_tenant(t);
            }
            if plan_only {
                ctx = ctx.plan_only();
            }
            if let Some(ms) = timeout_ms {
                ctx = ctx.with_timeout_ms(ms);
            }

            let result = planner.plan(ctx).await;
            let trace = trace_store.get(&result.trace_id);
            println!("{}", serde_json::to_string_pretty(&json!({ "result": result, "trace": trace }))?);
        }
    }

    Ok(())
}

/// A `ScriptedExecutor` with no scripted tools: every candidate fails with
/// `NO_SCRIPT`, since this binary has no real transport to fall back on.
/// Useful for exercising the planner's state machine and trace output
/// against a real registry/policy without a live backend.
fn scripted_passthrough_executor() -> ScriptedExecutor {
    ScriptedExecutor::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn resolve_paths_prefers_cli_flags_over_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("router.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, r#"registry_dir = "/from/config/registry""#).unwrap();
        writeln!(f, r#"policy_file = "/from/config/policy.yaml""#).unwrap();

        let cli = Cli {
            registry_dir: Some(PathBuf::from("/from/cli/registry")),
            policy_file: None,
            config: Some(config_path),
            command: Command::Registry,
        };

        let (registry_dir, policy_file, _trace_config) = resolve_paths(&cli).unwrap();
        assert_eq!(registry_dir, PathBuf::from("/from/cli/registry"));
        assert_eq!(policy_file, PathBuf::from("/from/config/policy.yaml"));
    }

    #[test]
    fn resolve_paths_errors_without_registry_dir() {
        let cli = Cli {
            registry_dir: None,
            policy_file: Some(PathBuf::from("/policy.yaml")),
            config: None,
            command: Command::Registry,
        };
        assert!(resolve_paths(&cli).is_err());
    }

    #[test]
    fn trace_store_overrides_apply_from_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("router.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, r#"registry_dir = "/r""#).unwrap();
        writeln!(f, r#"policy_file = "/p.yaml""#).unwrap();
        writeln!(f, "trace_max_traces = 7").unwrap();
        writeln!(f, "trace_ttl_ms = 1000").unwrap();

        let cli = Cli { registry_dir: None, policy_file: None, config: Some(config_path), command: Command::Registry };
        let (_, _, trace_config) = resolve_paths(&cli).unwrap();
        assert_eq!(trace_config.max_traces, 7);
        assert_eq!(trace_config.ttl_ms, 1000);
    }
}
