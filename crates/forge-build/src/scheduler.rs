//! The concurrent, dependency-aware build scheduler.
//!
//! One control task drives the loop: it dispatches ready modules into a
//! bounded [`JoinSet`], processes completion batches serially, propagates
//! failures through dependents, and checks the cost budget between batches.
//! All scheduler state (ready queue, memo, report) is touched only by the
//! control task; generation tasks share just the cache and the backend.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;

use tokio::task::JoinSet;

use forge_core::ForgeError;
use forge_core::graph::{ModuleDag, dependents_map, topological_order};
use forge_core::header::HeaderFields;
use forge_core::paths::generated_module_name;
use forge_core::spec::SpecSet;
use forge_gen::validate::validate_generated_source;
use forge_gen::{ContextKind, ExtraValidator, GeneratorBackend, ModuleContext, TokenUsage};

use crate::cache::{CacheEntry, ResponseCache, cache_key};
use crate::cost::CostTracker;
use crate::priority::critical_path_priorities;
use crate::progress::{BuildProgress, NoProgress};
use crate::report::BuildReport;
use crate::stale::expand_stale;
use crate::writer::ArtifactWriter;

const BUDGET_FAILURE: &str = "Budget limit exceeded.";
const BASE_ATTEMPTS: usize = 2;

/// Knobs for one build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum concurrently running generation tasks.
    pub jobs: usize,
    /// Recorded in artifact headers.
    pub tool_version: String,
    /// Name of the generated subdirectory, for generated-module naming.
    pub generated_dir: String,
    /// Free-text guidance shared by every module's context.
    pub shared_guidance: String,
    /// Extra retry attempts granted when a type-check validator is attached.
    pub type_check_retries: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_dir: "__generated__".to_string(),
            shared_guidance: String::new(),
            type_check_retries: 0,
        }
    }
}

/// Ready-queue entry: max priority first, ties broken by ascending name.
#[derive(Debug, PartialEq, Eq)]
struct ReadyModule {
    priority: usize,
    name: String,
}

impl Ord for ReadyModule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.name.cmp(&self.name))
    }
}

impl PartialOrd for ReadyModule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum ModuleResult {
    Generated {
        source: String,
        usage: Option<TokenUsage>,
    },
    CacheHit {
        source: String,
    },
    Failed {
        errors: Vec<String>,
        usage: Option<TokenUsage>,
    },
}

struct TaskOutcome {
    module: String,
    result: ModuleResult,
}

/// Orchestrates cache, backend, cost tracking, and artifact writes into one
/// dependency-respecting build run.
pub struct BuildScheduler {
    backend: Arc<dyn GeneratorBackend>,
    extra_validator: Option<Arc<dyn ExtraValidator>>,
    cache: Arc<ResponseCache>,
    writer: Arc<ArtifactWriter>,
    progress: Arc<dyn BuildProgress>,
    options: BuildOptions,
}

impl BuildScheduler {
    #[must_use]
    pub fn new(
        backend: Arc<dyn GeneratorBackend>,
        cache: Arc<ResponseCache>,
        writer: Arc<ArtifactWriter>,
        options: BuildOptions,
    ) -> Self {
        Self {
            backend,
            extra_validator: None,
            cache,
            writer,
            progress: Arc::new(NoProgress),
            options,
        }
    }

    #[must_use]
    pub fn with_extra_validator(mut self, validator: Arc<dyn ExtraValidator>) -> Self {
        self.extra_validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn BuildProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Run one build over the stale closure of `stale` within `dag`.
    ///
    /// `module_digests` supplies the freshly computed digest recorded in each
    /// artifact's header. Per-module failures land in the report; only cycle
    /// errors (upfront or residual deadlock) abort the run.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::DependencyCycle`] when the induced stale
    /// subgraph is cyclic, or when the loop exits with modules that never
    /// became ready.
    pub async fn run_build(
        &self,
        specs: &SpecSet,
        dag: &ModuleDag,
        stale: &BTreeSet<String>,
        module_digests: &BTreeMap<String, String>,
        cost: &mut CostTracker,
    ) -> Result<BuildReport, ForgeError> {
        let known: BTreeSet<String> = specs.module_names().map(str::to_string).collect();
        let effective: BTreeSet<String> = expand_stale(dag, stale)
            .intersection(&known)
            .cloned()
            .collect();

        let mut report = BuildReport {
            skipped: known.difference(&effective).cloned().collect(),
            ..BuildReport::default()
        };
        if effective.is_empty() {
            tracing::info!("nothing stale; all modules up to date");
            self.progress.finish();
            return Ok(report);
        }

        // Induced subgraph: stale modules only, edges outside dropped.
        let induced_deps: ModuleDag = effective
            .iter()
            .map(|m| {
                let deps: BTreeSet<String> = dag
                    .get(m)
                    .map(|d| d.intersection(&effective).cloned().collect())
                    .unwrap_or_default();
                (m.clone(), deps)
            })
            .collect();
        topological_order(&induced_deps)?;
        let induced_dependents = dependents_map(&induced_deps);
        let priorities = critical_path_priorities(&effective, &induced_deps);

        let mut indegree: BTreeMap<String, usize> = induced_deps
            .iter()
            .map(|(m, deps)| (m.clone(), deps.len()))
            .collect();
        let mut ready: BinaryHeap<ReadyModule> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(m, _)| ReadyModule {
                priority: priorities.get(m).copied().unwrap_or(0),
                name: m.clone(),
            })
            .collect();

        tracing::info!(
            stale = effective.len(),
            skipped = report.skipped.len(),
            jobs = self.options.jobs,
            "starting build"
        );

        let jobs = self.options.jobs.max(1);
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: BTreeMap<tokio::task::Id, String> = BTreeMap::new();
        let mut memo: BTreeMap<String, String> = BTreeMap::new();
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut budget_aborted = false;

        loop {
            while tasks.len() < jobs {
                let Some(next) = ready.pop() else { break };
                self.dispatch(
                    &mut tasks,
                    &mut in_flight,
                    next.name,
                    specs,
                    dag,
                    module_digests,
                    &memo,
                );
            }
            if tasks.is_empty() {
                break;
            }

            let mut batch: Vec<TaskOutcome> = Vec::new();
            match tasks.join_next_with_id().await {
                Some(Ok((id, outcome))) => {
                    in_flight.remove(&id);
                    batch.push(outcome);
                }
                Some(Err(join_err)) => {
                    // A panicked task settles as that module's failure so
                    // dependents still get a named upstream cause.
                    if let Some(outcome) = join_failure(&mut in_flight, &join_err) {
                        batch.push(outcome);
                    }
                }
                None => break,
            }
            while let Some(finished) = tasks.try_join_next_with_id() {
                match finished {
                    Ok((id, outcome)) => {
                        in_flight.remove(&id);
                        batch.push(outcome);
                    }
                    Err(join_err) => {
                        if let Some(outcome) = join_failure(&mut in_flight, &join_err) {
                            batch.push(outcome);
                        }
                    }
                }
            }

            for outcome in batch {
                let module = outcome.module.clone();
                self.settle(outcome, cost, &mut memo, &mut completed, &mut report);
                propagate_completions(
                    module,
                    &mut ready,
                    &mut indegree,
                    &induced_deps,
                    &induced_dependents,
                    &priorities,
                    &mut completed,
                    &mut report,
                    self.progress.as_ref(),
                );
            }

            if let Err(err) = cost.check_budget() {
                tracing::error!(%err, "stopping build");
                tasks.abort_all();
                for module in &effective {
                    if !completed.contains(module) {
                        report
                            .failed
                            .entry(module.clone())
                            .or_insert_with(|| vec![BUDGET_FAILURE.to_string()]);
                        completed.insert(module.clone());
                        self.progress.advance(module, false);
                    }
                }
                budget_aborted = true;
                break;
            }
        }
        self.progress.finish();

        if !budget_aborted {
            let remaining: BTreeSet<String> =
                effective.difference(&completed).cloned().collect();
            if !remaining.is_empty() {
                // The loop drained without scheduling these: a cycle survived
                // into the residual subgraph.
                let residual: ModuleDag = remaining
                    .iter()
                    .map(|m| {
                        let deps = induced_deps
                            .get(m)
                            .map(|d| d.intersection(&remaining).cloned().collect())
                            .unwrap_or_default();
                        (m.clone(), deps)
                    })
                    .collect();
                if let Err(err) = topological_order(&residual) {
                    return Err(err);
                }
                // Acyclic residual means a scheduler bug, not a cycle.
                return Err(ForgeError::Generation(format!(
                    "modules never became ready: {}",
                    remaining.iter().cloned().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        tracing::info!(outcome = %report.summary_line(), "build finished");
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        tasks: &mut JoinSet<TaskOutcome>,
        in_flight: &mut BTreeMap<tokio::task::Id, String>,
        module: String,
        specs: &SpecSet,
        dag: &ModuleDag,
        module_digests: &BTreeMap<String, String>,
        memo: &BTreeMap<String, String>,
    ) {
        let ctx = self.build_context(&module, specs, dag, memo);
        let header = HeaderFields {
            tool_version: self.options.tool_version.clone(),
            kind: ctx.kind.as_str().to_string(),
            source_module: module.clone(),
            module_digest: module_digests.get(&module).cloned().unwrap_or_default(),
            spec_refs: specs
                .module_entries(&module)
                .iter()
                .map(|e| e.spec_ref.to_string())
                .collect(),
        };
        let attempts = BASE_ATTEMPTS
            + if self.extra_validator.is_some() {
                self.options.type_check_retries
            } else {
                0
            };

        let backend = Arc::clone(&self.backend);
        let extra = self.extra_validator.clone();
        let cache = Arc::clone(&self.cache);
        let writer = Arc::clone(&self.writer);

        tracing::debug!(module, "dispatching generation task");
        let name = module.clone();
        let handle = tasks.spawn(async move {
            let result =
                run_module(&module, ctx, &header, attempts, &*backend, extra.as_deref(), &cache, &writer)
                    .await;
            TaskOutcome { module, result }
        });
        in_flight.insert(handle.id(), name);
    }

    fn build_context(
        &self,
        module: &str,
        specs: &SpecSet,
        dag: &ModuleDag,
        memo: &BTreeMap<String, String>,
    ) -> ModuleContext {
        let entries = specs.module_entries(module);
        let spec_sources = entries
            .iter()
            .map(|e| (e.spec_ref.clone(), e.source.clone()))
            .collect();
        let prompts = entries
            .iter()
            .filter_map(|e| e.prompt.as_ref().map(|p| (e.spec_ref.clone(), p.clone())))
            .collect();

        let mut dependency_apis = BTreeMap::new();
        let mut dependency_sources = BTreeMap::new();
        if let Some(deps) = dag.get(module) {
            for dep in deps {
                for entry in specs.module_entries(dep) {
                    dependency_apis.insert(entry.spec_ref.clone(), entry.source.clone());
                }
                let source = memo.get(dep).cloned().or_else(|| {
                    std::fs::read_to_string(self.writer.artifact_path(dep)).ok()
                });
                if let Some(source) = source {
                    dependency_sources
                        .insert(generated_module_name(dep, &self.options.generated_dir), source);
                }
            }
        }

        ModuleContext {
            kind: ContextKind::Build,
            spec_module: module.to_string(),
            generated_module: generated_module_name(module, &self.options.generated_dir),
            expected_names: specs.expected_names(module),
            spec_sources,
            prompts,
            dependency_apis,
            dependency_sources,
            shared_guidance: self.options.shared_guidance.clone(),
        }
    }

    fn settle(
        &self,
        outcome: TaskOutcome,
        cost: &mut CostTracker,
        memo: &mut BTreeMap<String, String>,
        completed: &mut BTreeSet<String>,
        report: &mut BuildReport,
    ) {
        let module = outcome.module;
        match outcome.result {
            ModuleResult::Generated { source, usage } => {
                if let Some(usage) = usage {
                    cost.record(&module, usage);
                }
                memo.insert(module.clone(), source);
                report.generated.insert(module.clone());
                self.progress.advance(&module, true);
                tracing::info!(module, "generated");
            }
            ModuleResult::CacheHit { source } => {
                cost.record_cache_hit();
                memo.insert(module.clone(), source);
                report.generated.insert(module.clone());
                self.progress.advance(&module, true);
                tracing::info!(module, "generated from cache");
            }
            ModuleResult::Failed { errors, usage } => {
                if let Some(usage) = usage {
                    cost.record(&module, usage);
                }
                tracing::warn!(module, errors = errors.len(), "module failed");
                report.failed.insert(module.clone(), errors);
                self.progress.advance(&module, false);
            }
        }
        completed.insert(module);
    }
}

/// Turns a panicked or cancelled task into a failure for the module it
/// was generating. Cancelled tasks after `abort_all` have already been
/// settled, so an unknown id yields nothing.
fn join_failure(
    in_flight: &mut BTreeMap<tokio::task::Id, String>,
    join_err: &tokio::task::JoinError,
) -> Option<TaskOutcome> {
    let module = in_flight.remove(&join_err.id())?;
    tracing::error!(module, %join_err, "generation task aborted unexpectedly");
    Some(TaskOutcome {
        module,
        result: ModuleResult::Failed {
            errors: vec![format!("Generation task failed: {join_err}")],
            usage: None,
        },
    })
}

/// The per-module generation procedure run inside a task.
#[allow(clippy::too_many_arguments)]
async fn run_module(
    module: &str,
    ctx: ModuleContext,
    header: &HeaderFields,
    attempts: usize,
    backend: &dyn GeneratorBackend,
    extra_validator: Option<&dyn ExtraValidator>,
    cache: &ResponseCache,
    writer: &ArtifactWriter,
) -> ModuleResult {
    let key = cache_key(&ctx, backend.model_name(), backend.provider_name());

    if let Some(entry) = cache.get(&key) {
        // Re-validate cached source so an upgraded validator can reject it.
        let mut errors = validate_generated_source(&entry.source, &ctx.expected_names);
        if errors.is_empty()
            && let Some(validator) = extra_validator
        {
            errors = validator.check(&entry.source, module).await;
        }
        if errors.is_empty() {
            return match writer.write_module(module, &entry.source, header) {
                Ok(_) => ModuleResult::CacheHit {
                    source: entry.source,
                },
                Err(err) => ModuleResult::Failed {
                    errors: vec![format!("Failed to write artifact: {err:#}")],
                    usage: None,
                },
            };
        }
        tracing::debug!(
            module,
            key = %ResponseCache::short_key(&key),
            "cached entry no longer validates; regenerating"
        );
    }

    let result = backend
        .generate_with_retry(&ctx, attempts, extra_validator)
        .await;
    let usage = result.usage;

    let Some(source) = result.source else {
        let mut errors = result.errors;
        if errors.is_empty() {
            errors.push("No source returned from backend.".to_string());
        }
        return ModuleResult::Failed { errors, usage };
    };
    if !result.errors.is_empty() {
        return ModuleResult::Failed {
            errors: result.errors,
            usage,
        };
    }

    cache.put(
        &key,
        CacheEntry {
            source: source.clone(),
            prompt_tokens: usage.as_ref().map_or(0, |u| u.prompt_tokens),
            completion_tokens: usage.as_ref().map_or(0, |u| u.completion_tokens),
            model: backend.model_name().to_string(),
            provider: backend.provider_name().to_string(),
            cached_at: chrono::Utc::now().timestamp(),
        },
    );

    match writer.write_module(module, &source, header) {
        Ok(_) => ModuleResult::Generated { source, usage },
        Err(err) => ModuleResult::Failed {
            errors: vec![format!("Failed to write artifact: {err:#}")],
            usage,
        },
    }
}

/// Decrement dependents of one newly completed module; cascade failures.
///
/// Iterative on purpose: failure chains can be as deep as the DAG.
#[allow(clippy::too_many_arguments)]
fn propagate_completions(
    start: String,
    ready: &mut BinaryHeap<ReadyModule>,
    indegree: &mut BTreeMap<String, usize>,
    induced_deps: &ModuleDag,
    induced_dependents: &BTreeMap<String, BTreeSet<String>>,
    priorities: &BTreeMap<String, usize>,
    completed: &mut BTreeSet<String>,
    report: &mut BuildReport,
    progress: &dyn BuildProgress,
) {
    let mut cascade: Vec<String> = vec![start];

    while let Some(done) = cascade.pop() {
        let Some(dependents) = induced_dependents.get(&done) else {
            continue;
        };
        for dependent in dependents {
            if completed.contains(dependent) {
                continue;
            }
            let Some(remaining) = indegree.get_mut(dependent) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);
            if *remaining > 0 {
                continue;
            }
            let failed_dep = induced_deps
                .get(dependent)
                .and_then(|deps| deps.iter().find(|d| report.failed.contains_key(*d)));
            if let Some(failed_dep) = failed_dep {
                report
                    .failed
                    .insert(dependent.clone(), vec![format!("Dependency failed: {failed_dep}")]);
                completed.insert(dependent.clone());
                progress.advance(dependent, false);
                cascade.push(dependent.clone());
            } else {
                ready.push(ReadyModule {
                    priority: priorities.get(dependent).copied().unwrap_or(0),
                    name: dependent.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_pops_highest_priority_then_name() {
        let mut heap = BinaryHeap::new();
        heap.push(ReadyModule {
            priority: 1,
            name: "zeta".into(),
        });
        heap.push(ReadyModule {
            priority: 2,
            name: "beta".into(),
        });
        heap.push(ReadyModule {
            priority: 2,
            name: "alpha".into(),
        });

        assert_eq!(heap.pop().unwrap().name, "alpha");
        assert_eq!(heap.pop().unwrap().name, "beta");
        assert_eq!(heap.pop().unwrap().name, "zeta");
    }

    #[test]
    fn default_options_are_sane() {
        let opts = BuildOptions::default();
        assert!(opts.jobs >= 1);
        assert_eq!(opts.generated_dir, "__generated__");
    }
}
