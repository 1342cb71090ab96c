//! Subcommand handlers. Each returns the process exit code.

use anyhow::{bail, Context};
use nf_core::context::ContextMap;
use nf_core::graph::{parse, validate as validate_graph};
use nf_runner::config::CacheBackend;
use nf_runner::runtime::{open_cache, Runtime};
use nf_runner::EngineConfig;
use nf_trace::TraceStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub async fn run(
    workflow: &Path,
    context: Option<&Path>,
    config: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let mut config = EngineConfig::load(config)?;
    if config.trace.path.is_none() {
        config.trace.path = data_dir.as_ref().map(|d| d.join("traces.db"));
    }
    let runtime = Runtime::from_config(&config, data_dir.as_deref())?;

    let raw = read(workflow)?;
    let initial = match context {
        Some(path) => read_context(&read(path)?)?,
        None => ContextMap::new(),
    };

    let result = runtime.engine.run_definition(&raw, initial).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn validate(workflow: &Path) -> anyhow::Result<ExitCode> {
    let violations = check(&read(workflow)?);
    if violations.is_empty() {
        println!("{}: ok", workflow.display());
        return Ok(ExitCode::SUCCESS);
    }
    for violation in &violations {
        println!("{}: {violation}", workflow.display());
    }
    Ok(ExitCode::FAILURE)
}

/// Every structural problem in a definition; empty when it is runnable.
fn check(raw: &str) -> Vec<String> {
    match parse(raw).and_then(|graph| validate_graph(&graph)) {
        Ok(()) => Vec::new(),
        Err(e) => e.violations,
    }
}

pub fn cache_stats(config: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let stats = sqlite_cache(config, data_dir)?.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::SUCCESS)
}

pub fn cache_clear(config: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let cache = sqlite_cache(config, data_dir)?;
    let removed = cache.stats()?.entries;
    cache.clear()?;
    println!("removed {removed} cache entries");
    Ok(ExitCode::SUCCESS)
}

pub fn trace_export(
    execution_id: uuid::Uuid,
    config: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let store = trace_store(config, data_dir)?;
    println!("{}", nf_trace::export_run_json(&store, execution_id)?);
    Ok(ExitCode::SUCCESS)
}

pub fn trace_runs(
    limit: u32,
    config: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let store = trace_store(config, data_dir)?;
    for run in store.recent_runs(limit)? {
        println!(
            "{}  {:<7}  {:>3} nodes  {}{}",
            run.execution_id,
            format!("{:?}", run.status).to_lowercase(),
            run.nodes_executed,
            run.started_at.to_rfc3339(),
            run.failed_at_node
                .map(|n| format!("  failed at {n}"))
                .unwrap_or_default()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// The cache subcommands always address the persistent store, whatever
/// backend the run configuration selects.
fn sqlite_cache(
    config: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<std::sync::Arc<dyn nf_cache::CodeCacheStore>> {
    let mut cache = EngineConfig::load(config)?.cache;
    cache.backend = CacheBackend::Sqlite;
    open_cache(&cache, data_dir.as_deref())
}

fn trace_store(config: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<TraceStore> {
    let path = match (EngineConfig::load(config)?.trace.path, data_dir) {
        (Some(path), _) => path,
        (None, Some(dir)) => dir.join("traces.db"),
        (None, None) => bail!("no trace database configured and no data directory available"),
    };
    if !path.exists() {
        bail!("trace database {} does not exist", path.display());
    }
    TraceStore::open(&path).with_context(|| format!("opening trace store {}", path.display()))
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_context(raw: &str) -> anyhow::Result<ContextMap> {
    match serde_json::from_str::<serde_json::Value>(raw).context("parsing context file")? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("context file must hold a JSON object, got {other}"),
    }
}
