//! Model catalog: canonical ids, aliases, default reasoning effort.

use courier_config::ReasoningEffort;

#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub aliases: &'static [&'static str],
    pub default_effort: Option<ReasoningEffort>,
}

/// Models the Responses backend serves to ChatGPT-for-Codex accounts.
pub const CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-5-codex",
        display_name: "GPT-5 Codex",
        aliases: &["codex", "gpt5-codex"],
        default_effort: Some(ReasoningEffort::Medium),
    },
    ModelInfo {
        id: "gpt-5",
        display_name: "GPT-5",
        aliases: &["gpt5"],
        default_effort: Some(ReasoningEffort::Medium),
    },
    ModelInfo {
        id: "codex-mini-latest",
        display_name: "Codex Mini",
        aliases: &["codex-mini"],
        default_effort: Some(ReasoningEffort::Low),
    },
];

pub fn get(id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Canonicalize a requested model through the alias map. Unknown ids pass
/// through untouched; the upstream is the authority on what exists. An
/// empty or missing model falls back to the configured default.
pub fn resolve(requested: Option<&str>, default_model: &str) -> String {
    let requested = requested.map(str::trim).filter(|m| !m.is_empty());
    let Some(requested) = requested else {
        return default_model.to_string();
    };
    for model in CATALOG {
        if model.id == requested || model.aliases.contains(&requested) {
            return model.id.to_string();
        }
    }
    requested.to_string()
}

/// Map a thinking-token budget to a reasoning effort.
pub fn effort_from_budget(budget: i64) -> ReasoningEffort {
    if budget < 2000 {
        ReasoningEffort::Low
    } else if budget < 8000 {
        ReasoningEffort::Medium
    } else if budget < 20_000 {
        ReasoningEffort::High
    } else {
        ReasoningEffort::Xhigh
    }
}

/// Effort selection order: protocol hint, then the model's catalog default,
/// then the configured default.
pub fn select_effort(
    budget_hint: Option<i64>,
    model: &str,
    config_default: ReasoningEffort,
) -> ReasoningEffort {
    if let Some(budget) = budget_hint {
        return effort_from_budget(budget);
    }
    get(model)
        .and_then(|m| m.default_effort)
        .unwrap_or(config_default)
}
