//! CLI binary for specforge: build generated modules from spec manifests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use forge_build::cost::CostTracker;
use forge_build::scheduler::{BuildOptions, BuildScheduler};
use forge_build::stale::{detect_stale, read_artifact_digest};
use forge_build::{ArtifactWriter, BuildProgress, ResponseCache};
use forge_core::config::ForgeConfig;
use forge_core::digest::module_digest;
use forge_core::graph::{ModuleDag, build_spec_graph, find_cycles, module_dag};
use forge_core::paths::generated_relpath;
use forge_core::spec::SpecSet;
use forge_gen::{OpenAiBackend, TypeCheckValidator};

#[derive(Parser)]
#[command(name = "specforge", about = "Spec-driven incremental code generation")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Spec manifest path (defaults to .forge/specs.json under the root)
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate stale modules
    Build {
        /// Regenerate everything, ignoring digests
        #[arg(long)]
        force: bool,

        /// Concurrent generation tasks (overrides config)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Skip the response cache for this run
        #[arg(long)]
        no_cache: bool,

        /// Hard budget in USD (overrides config)
        #[arg(long)]
        max_cost: Option<f64>,

        /// Extra retry attempts when a type checker is configured
        #[arg(long)]
        type_check_retries: Option<usize>,
    },

    /// Show which modules are stale without building
    Status,

    /// Print the module dependency graph
    Graph {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Remove all generated artifacts
    Clean,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print entry count, size on disk, and cache path
    Info,
    /// Remove every cached entry
    Clear,
}

fn project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

fn manifest_path(cli: &Cli, root: &Path) -> PathBuf {
    cli.manifest
        .clone()
        .unwrap_or_else(|| ForgeConfig::config_dir(root).join("specs.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = project_root(&cli)?;
    let manifest = manifest_path(&cli, &root);

    match cli.command {
        Commands::Build {
            force,
            jobs,
            no_cache,
            max_cost,
            type_check_retries,
        } => {
            cmd_build(
                &root,
                &manifest,
                force,
                jobs,
                no_cache,
                max_cost,
                type_check_retries,
            )
            .await
        }
        Commands::Status => cmd_status(&root, &manifest),
        Commands::Graph { json } => cmd_graph(&manifest, json),
        Commands::Cache { action } => cmd_cache(&root, &action),
        Commands::Clean => cmd_clean(&root, &manifest),
    }
}

/// Load specs, derive the module DAG, and compute per-module digests.
fn load_project(manifest: &Path) -> Result<(SpecSet, ModuleDag, BTreeMap<String, String>)> {
    let specs = SpecSet::load(manifest)?;
    let spec_graph = build_spec_graph(&specs)?;
    let dag = module_dag(&spec_graph);
    let digests = specs
        .module_names()
        .map(|m| {
            let entries = specs.module_entries(m);
            (
                m.to_string(),
                module_digest(m, &entries, &specs, &spec_graph),
            )
        })
        .collect();
    Ok((specs, dag, digests))
}

fn stale_modules(
    root: &Path,
    generated_dir: &str,
    digests: &BTreeMap<String, String>,
    force: bool,
) -> BTreeSet<String> {
    detect_stale(
        digests,
        |m| read_artifact_digest(root, generated_dir, m),
        force,
    )
}

struct BarProgress(ProgressBar);

impl BarProgress {
    fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:30.green} {pos}/{len} {msg}")
                .expect("valid template"),
        );
        Self(bar)
    }
}

impl BuildProgress for BarProgress {
    fn advance(&self, module: &str, ok: bool) {
        self.0.inc(1);
        self.0
            .set_message(format!("{} {module}", if ok { "built" } else { "FAILED" }));
    }

    fn finish(&self) {
        self.0.finish_and_clear();
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_build(
    root: &Path,
    manifest: &Path,
    force: bool,
    jobs: Option<usize>,
    no_cache: bool,
    max_cost: Option<f64>,
    type_check_retries: Option<usize>,
) -> Result<()> {
    let config = ForgeConfig::load(root)?;
    let (specs, dag, digests) = load_project(manifest)?;
    let generated_dir = config.generation.generated_dir.clone();

    let stale = stale_modules(root, &generated_dir, &digests, force);
    tracing::debug!(stale = stale.len(), total = digests.len(), "staleness computed");
    if stale.is_empty() {
        println!("All {} module(s) up to date.", digests.len());
        return Ok(());
    }

    let api_key = std::env::var("FORGE_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .context("set FORGE_API_KEY or OPENAI_API_KEY to run a build")?;
    let backend = Arc::new(OpenAiBackend::new(
        &config.generation.base_url,
        api_key,
        config.generation.model.clone(),
    )?);
    let cache = Arc::new(ResponseCache::new(
        ForgeConfig::config_dir(root).join("cache"),
        config.cache.enabled && !no_cache,
    ));
    let writer = Arc::new(ArtifactWriter::new(
        root.to_path_buf(),
        generated_dir.clone(),
    ));

    let options = BuildOptions {
        jobs: jobs.unwrap_or(config.generation.jobs).max(1),
        generated_dir,
        type_check_retries: type_check_retries
            .or(config.generation.type_check_retries)
            .unwrap_or(1),
        ..BuildOptions::default()
    };
    let mut scheduler = BuildScheduler::new(backend, cache, writer, options)
        .with_progress(Arc::new(BarProgress::new(stale.len() as u64)));
    if let Some(cmd) = config.generation.type_check_cmd.clone() {
        scheduler = scheduler
            .with_extra_validator(Arc::new(TypeCheckValidator::new(cmd, root.to_path_buf())));
    }

    let mut cost = CostTracker::new(max_cost.or(config.generation.max_cost));
    let report = scheduler
        .run_build(&specs, &dag, &stale, &digests, &mut cost)
        .await?;

    for module in &report.generated {
        println!("built   {module}");
    }
    for module in &report.skipped {
        println!("skipped {module}");
    }
    for (module, errors) in &report.failed {
        println!("FAILED  {module}");
        for error in errors {
            for line in error.lines() {
                println!("        {line}");
            }
        }
    }
    eprintln!("{}", cost.format_summary());

    if !report.is_success() {
        anyhow::bail!("{} module(s) failed", report.failed.len());
    }
    Ok(())
}

fn cmd_status(root: &Path, manifest: &Path) -> Result<()> {
    let config = ForgeConfig::load(root)?;
    let (_, _, digests) = load_project(manifest)?;
    let stale = stale_modules(root, &config.generation.generated_dir, &digests, false);

    for module in digests.keys() {
        let state = if stale.contains(module) { "stale" } else { "fresh" };
        println!("{state}  {module}");
    }
    println!("{} stale of {} module(s)", stale.len(), digests.len());
    Ok(())
}

fn cmd_graph(manifest: &Path, json: bool) -> Result<()> {
    let (_, dag, _) = load_project(manifest)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&dag)?);
        return Ok(());
    }
    for (module, deps) in &dag {
        if deps.is_empty() {
            println!("{module}");
        } else {
            println!(
                "{module} -> {}",
                deps.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }
    let cycles = find_cycles(&dag);
    for cycle in cycles {
        println!("cycle: {}", cycle.join(" -> "));
    }
    Ok(())
}

fn cmd_cache(root: &Path, action: &CacheAction) -> Result<()> {
    let cache = ResponseCache::new(ForgeConfig::config_dir(root).join("cache"), true);
    match action {
        CacheAction::Info => {
            println!("{}", serde_json::to_string_pretty(&cache.info())?);
        }
        CacheAction::Clear => {
            let removed = cache.clear();
            println!("Removed {removed} cache entr{}.", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

fn cmd_clean(root: &Path, manifest: &Path) -> Result<()> {
    let config = ForgeConfig::load(root)?;
    let (specs, _, _) = load_project(manifest)?;

    let mut removed = 0;
    for module in specs.module_names() {
        let path = root.join(generated_relpath(module, &config.generation.generated_dir));
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
            removed += 1;
        }
    }
    println!("Removed {removed} generated artifact(s).");
    Ok(())
}
