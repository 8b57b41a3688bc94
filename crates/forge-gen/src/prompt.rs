//! Prompt assembly from module contexts.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::context::ModuleContext;

const BUILD_MODULE_TEMPLATE: &str = include_str!("prompts/build_module.md");

/// Replace `{{key}}` placeholders. Unknown placeholders are left intact so
/// a template typo shows up in the rendered prompt rather than vanishing.
#[must_use]
pub fn render_template(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Render a keyed block of sections, each introduced by a `### heading`.
#[must_use]
pub fn kv_block<K: std::fmt::Display, V: AsRef<str>>(items: &BTreeMap<K, V>) -> String {
    let mut out = String::new();
    for (key, value) in items {
        let _ = writeln!(out, "### {key}\n\n{}\n", value.as_ref().trim_end());
    }
    if out.is_empty() {
        out.push_str("(none)\n");
    }
    out
}

/// Build the full generation prompt for one module.
#[must_use]
pub fn build_module_prompt(ctx: &ModuleContext, extra_error_context: &[String]) -> String {
    let error_context = if extra_error_context.is_empty() {
        String::new()
    } else {
        format!(
            "## Problems with your previous output\n\n{}\n",
            extra_error_context.join("\n")
        )
    };

    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    values.insert("generated_module", ctx.generated_module.clone());
    values.insert("spec_module", ctx.spec_module.clone());
    values.insert("kind", ctx.kind.as_str().to_string());
    values.insert("expected_names", ctx.expected_names.join(", "));
    values.insert("spec_sources", kv_block(&ctx.spec_sources));
    values.insert("prompts", kv_block(&ctx.prompts));
    values.insert("dependency_apis", kv_block(&ctx.dependency_apis));
    values.insert("dependency_sources", kv_block(&ctx.dependency_sources));
    values.insert("shared_guidance", ctx.shared_guidance.clone());
    values.insert("error_context", error_context);
    render_template(BUILD_MODULE_TEMPLATE, &values)
}
