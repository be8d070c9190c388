//! mvirt-infra: inspect and exercise the agent pool reconciler.
//!
//! - `diff` prints what an update would change
//! - `validate` runs admission defaulting and validation
//! - `simulate` runs reconcile passes against an in-memory cloud

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_infra::api::ManagedMachinePool;
use mvirt_infra::config::{ReconcileConfig, ReconcileConfigFile};
use mvirt_infra::diff::{Compare, Normalize};
use mvirt_infra::services::agentpools::{AgentPool, AgentPoolService, AgentPoolSpec};
use mvirt_infra::test_util::{FakeCloud, MemoryAgentPoolScope, RecordedCall};
use mvirt_infra::{CallContext, Orchestrator, ReconcileStatus};

/// mvirt infrastructure reconciler
#[derive(Parser, Debug)]
#[command(name = "mvirt-infra", version, about)]
struct Args {
    #[command(flatten)]
    timing: TimingArgs,

    #[command(subcommand)]
    command: Command,
}

/// Timing overrides. Flags win over `--config`, which wins over defaults.
#[derive(ClapArgs, Debug)]
struct TimingArgs {
    /// JSON file with `call_timeout_ms`, `poll_interval_ms`, `retry_after_ms`, `operation_requeue_ms`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bounded wait for an operation within one call
    #[arg(long, global = true)]
    call_timeout_ms: Option<u64>,

    /// Poll interval during the bounded wait
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Requeue hint for non-terminal states and missing dependencies
    #[arg(long, global = true)]
    retry_after_ms: Option<u64>,

    /// Requeue hint while an operation is outstanding
    #[arg(long, global = true)]
    operation_requeue_ms: Option<u64>,
}

impl TimingArgs {
    fn resolve(&self) -> Result<ReconcileConfig> {
        let base = match &self.config {
            Some(path) => ReconcileConfigFile::load(path)?.apply(ReconcileConfig::default()),
            None => ReconcileConfig::default(),
        };
        let flags = ReconcileConfigFile {
            call_timeout_ms: self.call_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            retry_after_ms: self.retry_after_ms,
            operation_requeue_ms: self.operation_requeue_ms,
        };
        Ok(flags.apply(base))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the agent pool fields an update would change
    Diff {
        /// Desired agent pool spec (JSON)
        #[arg(long)]
        desired: PathBuf,

        /// Agent pool as reported by the cloud (JSON)
        #[arg(long)]
        existing: PathBuf,
    },

    /// Default and validate a managed machine pool
    Validate {
        /// New object (JSON)
        #[arg(long)]
        new: PathBuf,

        /// Previous object (JSON); validates an update when given
        #[arg(long)]
        old: Option<PathBuf>,
    },

    /// Run reconcile passes against an in-memory cloud
    Simulate {
        /// Desired agent pool spec (JSON)
        #[arg(long)]
        desired: PathBuf,

        /// Number of passes
        #[arg(long, default_value = "3")]
        passes: u32,

        /// Polls an accepted operation answers "not done"
        #[arg(long, default_value = "0")]
        complete_after_polls: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_infra=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.timing.resolve()?;

    match args.command {
        Command::Diff { desired, existing } => diff(&desired, &existing),
        Command::Validate { new, old } => validate(&new, old.as_deref()),
        Command::Simulate {
            desired,
            passes,
            complete_after_polls,
        } => simulate(&desired, passes, complete_after_polls, config).await,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn diff(desired: &Path, existing: &Path) -> Result<()> {
    let desired: AgentPoolSpec = read_json(desired)?;
    let existing: AgentPool = read_json(existing)?;

    let diff = desired
        .to_agent_pool()
        .normalize()
        .diff(&existing.normalize());
    if diff.is_empty() {
        println!("no update needed");
    } else {
        println!("update required (+new -old):\n{}", diff);
    }
    Ok(())
}

fn validate(new: &Path, old: Option<&Path>) -> Result<()> {
    let mut pool: ManagedMachinePool = read_json(new)?;
    pool.apply_defaults();

    let result = match old {
        Some(old) => {
            let old: ManagedMachinePool = read_json(old)?;
            pool.validate_update(&old)
        }
        None => pool.validate_create(),
    };

    match result {
        Ok(()) => {
            println!("{} is valid", pool.name);
            Ok(())
        }
        Err(errs) => {
            for e in errs.iter() {
                println!("{}", e);
            }
            bail!("{} rejected with {} error(s)", pool.name, errs.len())
        }
    }
}

async fn simulate(
    desired: &Path,
    passes: u32,
    complete_after_polls: u32,
    config: ReconcileConfig,
) -> Result<()> {
    let spec: AgentPoolSpec = read_json(desired)?;
    info!("Simulating {} passes for agent pool {}", passes, spec.name);

    let cloud = FakeCloud::<AgentPool>::new();
    cloud.set_complete_after_polls(Some(complete_after_polls));
    let scope = Arc::new(MemoryAgentPoolScope::new(spec));
    let orchestrator = Orchestrator::new(vec![Box::new(AgentPoolService::new(
        Arc::clone(&scope),
        cloud.clone(),
        config,
    ))]);

    for pass in 1..=passes {
        let result = orchestrator.reconcile(&CallContext::new()).await;
        let status = ReconcileStatus::from_service_result(&result);
        println!("pass {}: {}", pass, status);
        for call in cloud.calls() {
            println!("  {}", describe(&call));
        }
        cloud.clear_calls();

        if status == ReconcileStatus::Ready {
            break;
        }
        if let ReconcileStatus::Pending { retry_after } = status {
            // Passes run back to back; the hint is only reported.
            println!("  requeue after {:?}", retry_after);
        }
    }

    let status = scope.status();
    println!(
        "ready={} replicas={} providerIDs={}",
        status.ready,
        status.replicas,
        status.provider_ids.len()
    );
    Ok(())
}

fn describe(call: &RecordedCall<AgentPool>) -> String {
    match call {
        RecordedCall::Get(id) => format!("GET {}", id),
        RecordedCall::CreateOrUpdate { id, headers, .. } => {
            format!("PUT {} ({} custom headers)", id, headers.len())
        }
        RecordedCall::Delete { id, .. } => format!("DELETE {}", id),
        RecordedCall::Poll(kind) => format!("POLL {}", kind.as_str()),
    }
}
