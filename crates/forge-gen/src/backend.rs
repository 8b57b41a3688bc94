//! The generation backend capability and its retry loop.
//!
//! Concrete providers implement [`GeneratorBackend::generate_module`] only;
//! [`GeneratorBackend::generate_with_retry`] is derived. Both methods return
//! boxed futures so the trait stays dyn-compatible and the scheduler can hold
//! a `dyn GeneratorBackend` behind an `Arc`.

use std::future::Future;
use std::pin::Pin;

use forge_core::ForgeError;

use crate::context::{ModuleContext, TokenUsage};
use crate::validate::validate_generated_source;

/// Boxed future returned by backend generation calls.
pub type GenerateFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(String, Option<TokenUsage>), ForgeError>> + Send + 'a>>;

/// Boxed future returned by the derived retry loop.
pub type RetryFuture<'a> = Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>>;

/// Boxed future returned by extra validators.
pub type ValidateFuture<'a> = Pin<Box<dyn Future<Output = Vec<String>> + Send + 'a>>;

/// Outcome of a retry loop: last attempt's source and unresolved errors.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// How many generation calls were made.
    pub attempts: usize,
    /// Source from the last attempt, if any call returned one.
    pub source: Option<String>,
    /// Validation errors still unresolved after the final attempt.
    pub errors: Vec<String>,
    /// Aggregated token usage across all attempts.
    pub usage: Option<TokenUsage>,
}

/// A second validation stage composed after the symbol validator.
///
/// Used for the external type checker; runs only when basic validation
/// already passed. An empty list means valid.
pub trait ExtraValidator: Send + Sync {
    /// Check a candidate source for the given module.
    fn check<'a>(&'a self, source: &'a str, module_name: &'a str) -> ValidateFuture<'a>;
}

/// Asynchronously turns a module context into generated source text.
pub trait GeneratorBackend: Send + Sync {
    /// Model identifier, for cache keys and cost tracking.
    fn model_name(&self) -> &str;

    /// Provider identifier, for cache keys and cost tracking.
    fn provider_name(&self) -> &str;

    /// Generate source for the context, optionally carrying error strings
    /// from previous failed attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Generation`] on unrecoverable provider failure.
    fn generate_module<'a>(
        &'a self,
        ctx: &'a ModuleContext,
        extra_error_context: &'a [String],
    ) -> GenerateFuture<'a>;

    /// Deterministic generate-validate-retry loop.
    ///
    /// Each failed validation appends `previous output errors: ...` strings
    /// to the context for the next attempt. The extra validator only runs
    /// once basic symbol validation passes. Returns the last attempt's source
    /// and errors when every attempt fails.
    fn generate_with_retry<'a>(
        &'a self,
        ctx: &'a ModuleContext,
        max_attempts: usize,
        extra_validator: Option<&'a dyn ExtraValidator>,
    ) -> RetryFuture<'a> {
        Box::pin(async move {
            let max_attempts = max_attempts.max(1);
            let mut attempts = 0;
            let mut last_source: Option<String> = None;
            let mut last_errors: Vec<String> = Vec::new();
            let mut error_context: Vec<String> = Vec::new();
            let mut total_prompt: u64 = 0;
            let mut total_completion: u64 = 0;

            while attempts < max_attempts {
                attempts += 1;
                let (source, usage) = match self.generate_module(ctx, &error_context).await {
                    Ok(out) => out,
                    Err(err) => {
                        last_errors = vec![err.to_string()];
                        break;
                    }
                };
                if let Some(usage) = usage {
                    total_prompt += usage.prompt_tokens;
                    total_completion += usage.completion_tokens;
                }

                last_errors = validate_generated_source(&source, &ctx.expected_names);
                if last_errors.is_empty() {
                    if let Some(validator) = extra_validator {
                        last_errors = validator.check(&source, &ctx.spec_module).await;
                    }
                }
                last_source = Some(source);

                if last_errors.is_empty() {
                    return GenerationResult {
                        attempts,
                        source: last_source,
                        errors: Vec::new(),
                        usage: aggregate_usage(total_prompt, total_completion, self),
                    };
                }
                if attempts >= max_attempts {
                    break;
                }
                tracing::debug!(
                    module = %ctx.spec_module,
                    attempt = attempts,
                    errors = last_errors.len(),
                    "generation attempt failed validation; retrying"
                );
                error_context
                    .extend(last_errors.iter().map(|e| format!("previous output errors: {e}")));
            }

            GenerationResult {
                attempts,
                source: last_source,
                errors: last_errors,
                usage: aggregate_usage(total_prompt, total_completion, self),
            }
        })
    }
}

fn aggregate_usage(
    prompt: u64,
    completion: u64,
    backend: &(impl GeneratorBackend + ?Sized),
) -> Option<TokenUsage> {
    if prompt == 0 && completion == 0 {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        model: backend.model_name().to_string(),
        provider: backend.provider_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn ctx(expected: &[&str]) -> ModuleContext {
        ModuleContext {
            kind: ContextKind::Build,
            spec_module: "pkg.specs".into(),
            generated_module: "pkg.__generated__.specs".into(),
            expected_names: expected.iter().map(|s| (*s).to_string()).collect(),
            spec_sources: BTreeMap::new(),
            prompts: BTreeMap::new(),
            dependency_apis: BTreeMap::new(),
            dependency_sources: BTreeMap::new(),
            shared_guidance: String::new(),
        }
    }

    /// Backend whose first attempt misses the required symbol.
    struct FlakyBackend {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl GeneratorBackend for FlakyBackend {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        fn provider_name(&self) -> &str {
            "fake"
        }

        fn generate_module<'a>(
            &'a self,
            _ctx: &'a ModuleContext,
            extra_error_context: &'a [String],
        ) -> GenerateFuture<'a> {
            Box::pin(async move {
                let mut calls = self.calls.lock().unwrap();
                calls.push(extra_error_context.to_vec());
                let source = if calls.len() == 1 {
                    "def not_it():\n    return 1\n"
                } else {
                    "def foo():\n    return 1\n"
                };
                Ok((source.to_string(), None))
            })
        }
    }

    /// Extra validator that fails exactly once.
    struct OneShotValidator {
        calls: Mutex<usize>,
    }

    impl ExtraValidator for OneShotValidator {
        fn check<'a>(&'a self, _source: &'a str, _module: &'a str) -> ValidateFuture<'a> {
            Box::pin(async move {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    vec!["type check failed: implicit None return path".to_string()]
                } else {
                    Vec::new()
                }
            })
        }
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt_with_error_context() {
        let backend = FlakyBackend::new();
        let result = backend.generate_with_retry(&ctx(&["foo"]), 2, None).await;

        assert_eq!(result.attempts, 2);
        assert!(result.errors.is_empty());
        assert!(result.source.unwrap().contains("def foo"));

        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].is_empty());
        assert!(calls[1].iter().any(|s| s.starts_with("previous output errors:")));
    }

    #[tokio::test]
    async fn retry_exhausts_attempts_and_keeps_last_errors() {
        struct AlwaysWrong;
        impl GeneratorBackend for AlwaysWrong {
            fn model_name(&self) -> &str {
                "m"
            }
            fn provider_name(&self) -> &str {
                "p"
            }
            fn generate_module<'a>(
                &'a self,
                _ctx: &'a ModuleContext,
                _extra: &'a [String],
            ) -> GenerateFuture<'a> {
                Box::pin(async { Ok(("def wrong():\n    pass\n".to_string(), None)) })
            }
        }

        let result = AlwaysWrong.generate_with_retry(&ctx(&["foo"]), 3, None).await;
        assert_eq!(result.attempts, 3);
        assert!(!result.errors.is_empty());
        assert!(result.source.is_some());
    }

    #[tokio::test]
    async fn extra_validator_feedback_drives_a_retry() {
        struct Valid;
        impl GeneratorBackend for Valid {
            fn model_name(&self) -> &str {
                "m"
            }
            fn provider_name(&self) -> &str {
                "p"
            }
            fn generate_module<'a>(
                &'a self,
                _ctx: &'a ModuleContext,
                _extra: &'a [String],
            ) -> GenerateFuture<'a> {
                Box::pin(async { Ok(("def foo():\n    return 1\n".to_string(), None)) })
            }
        }

        let validator = OneShotValidator {
            calls: Mutex::new(0),
        };
        let result = Valid
            .generate_with_retry(&ctx(&["foo"]), 3, Some(&validator))
            .await;
        assert_eq!(result.attempts, 2);
        assert!(result.errors.is_empty());
        assert_eq!(*validator.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn provider_error_surfaces_in_errors() {
        struct Broken;
        impl GeneratorBackend for Broken {
            fn model_name(&self) -> &str {
                "m"
            }
            fn provider_name(&self) -> &str {
                "p"
            }
            fn generate_module<'a>(
                &'a self,
                _ctx: &'a ModuleContext,
                _extra: &'a [String],
            ) -> GenerateFuture<'a> {
                Box::pin(async { Err(ForgeError::Generation("provider unavailable".into())) })
            }
        }

        let result = Broken.generate_with_retry(&ctx(&["foo"]), 2, None).await;
        assert_eq!(result.attempts, 1);
        assert!(result.source.is_none());
        assert!(result.errors[0].contains("provider unavailable"));
    }

    #[tokio::test]
    async fn usage_aggregates_across_attempts() {
        struct Metered {
            calls: Mutex<usize>,
        }
        impl GeneratorBackend for Metered {
            fn model_name(&self) -> &str {
                "fake-model"
            }
            fn provider_name(&self) -> &str {
                "fake"
            }
            fn generate_module<'a>(
                &'a self,
                _ctx: &'a ModuleContext,
                _extra: &'a [String],
            ) -> GenerateFuture<'a> {
                Box::pin(async move {
                    let mut calls = self.calls.lock().unwrap();
                    *calls += 1;
                    let source = if *calls == 1 {
                        "def nope():\n    pass\n"
                    } else {
                        "def foo():\n    return 1\n"
                    };
                    Ok((
                        source.to_string(),
                        Some(TokenUsage {
                            prompt_tokens: 100,
                            completion_tokens: 10,
                            model: "fake-model".into(),
                            provider: "fake".into(),
                        }),
                    ))
                })
            }
        }

        let backend = Metered {
            calls: Mutex::new(0),
        };
        let result = backend.generate_with_retry(&ctx(&["foo"]), 2, None).await;
        let usage = result.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 200);
        assert_eq!(usage.completion_tokens, 20);
    }
}
