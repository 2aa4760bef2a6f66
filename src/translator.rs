//! Reference `Translator` (§10): deterministic keyword/heuristic
//! translation, no live model provider. Analogous in spirit to
//! `phase::get_default_phases`'s canned-plan fallback — a fixed,
//! inspectable mapping the CLI and integration tests can run against
//! without network access. The real `Translator` is an out-of-scope
//! external collaborator (§1); this stub only exists so the crate is
//! runnable end to end.

use async_trait::async_trait;
use forge_common::{CoreError, IntentIr, Reflection, Risk, Step, Translator};

pub struct ReferenceTranslator;

#[async_trait]
impl Translator for ReferenceTranslator {
    async fn translate(&self, input: &str, _context: &str) -> Result<IntentIr, CoreError> {
        let lower = input.to_lowercase();
        let steps = if let Some(path) = extract_after_keyword(input, "mkdir") {
            vec![Step::new("file_ops", "mkdir", Risk::Modify).with_arg("path", path.into())]
        } else if lower.contains("download") {
            let mut urls = extract_urls(input);
            let url = if urls.is_empty() { "https://example.com".to_string() } else { urls.remove(0) };
            let mut step = Step::new("network_ops", "download", Risk::Modify).with_arg("url", url.into());
            if !urls.is_empty() {
                step = step.with_arg("mirrors", serde_json::Value::Array(urls.into_iter().map(Into::into).collect()));
            }
            vec![step]
        } else if lower.contains("write") && lower.contains("file") {
            vec![Step::new("file_ops", "write_file", Risk::Modify)
                .with_arg("path", "output.txt".into())
                .with_arg("content", input.into())]
        } else if lower.contains("install") {
            vec![Step::new("package_manager", "install", Risk::Significant).with_arg("pkg", "unspecified".into())]
        } else if lower.contains("list") || lower.contains("show") || lower.contains("status") {
            vec![Step::new("file_ops", "list_dir", Risk::ReadOnly).with_arg("path", ".".into())]
        } else {
            return Err(CoreError::Schema {
                message: format!("reference translator has no heuristic matching input '{input}'"),
            });
        };

        let requires_confirmation = steps.iter().any(|s| s.risk >= Risk::Significant);
        let ir = IntentIr::new(input, requires_confirmation, steps);
        ir.validate()?;
        Ok(ir)
    }

    async fn reflect(&self, _goal: &str, trail: &str) -> Result<Reflection, CoreError> {
        let failed = trail.matches("\"failed\"").count() + trail.matches("error_kind").count();
        if failed == 0 {
            Ok(Reflection { achieved: true, confidence: 0.9, reasoning: "no failures observed in trail".into(), next_steps: vec![] })
        } else {
            Ok(Reflection {
                achieved: false,
                confidence: 0.3,
                reasoning: format!("{failed} failing observation(s) remain in the trail"),
                next_steps: vec!["retry the failing step with adjusted arguments".into()],
            })
        }
    }
}

/// Finds `keyword` case-insensitively but returns the following token
/// from the ORIGINAL (not lowercased) input, so case-sensitive paths
/// survive translation intact.
fn extract_after_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let idx = input.to_lowercase().find(keyword)?;
    let rest = input[idx + keyword.len()..].trim_start();
    rest.split_whitespace().next()
}

/// Every whitespace-delimited token that looks like a URL, in the order
/// they appear — first is the primary target, the rest become fallback
/// mirrors (§4.5 FallbackChain) for `network_ops.download`.
fn extract_urls(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .filter(|w| w.starts_with("http://") || w.starts_with("https://"))
        .map(str::to_string)
        .collect()
}
