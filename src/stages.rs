//! Stage configuration: the ordered list of pipeline steps and its defaults.

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Role a stage plays in the default workflow. Informational only; the
/// executor treats every stage the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    #[default]
    Agent,
    Synthesis,
    Review,
}

/// One row of pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub id: String,
    pub label: String,
    pub enabled: bool,
    #[serde(default)]
    pub kind: StageKind,
    /// Passed verbatim to the remote API.
    pub model_id: String,
    pub system_prompt: String,
    /// Sampling temperature, expected in [0, 1].
    pub temperature: f64,
}

/// A selectable model in the catalog shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOption {
    pub id: &'static str,
    pub label: &'static str,
    pub model_id: &'static str,
}

pub const DEFAULT_AGENT_MODEL_IDS: [&str; 3] = [
    "anthropic/claude-haiku-4.5",
    "x-ai/grok-4.1-fast",
    "google/gemini-3-flash-preview",
];

pub const DEFAULT_SYNTHESIS_MODEL_ID: &str = "google/gemini-3-flash-preview";

pub const DEFAULT_REVIEW_MODEL_ID: &str = "google/gemini-3-flash-preview";

/// Models offered for quick selection.
pub fn agent_options() -> &'static [AgentOption] {
    &[
        AgentOption {
            id: "claude-haiku-45",
            label: "Claude Haiku 4.5",
            model_id: "anthropic/claude-haiku-4.5",
        },
        AgentOption {
            id: "gemini-3-flash",
            label: "Gemini 3 Flash",
            model_id: "google/gemini-3-flash-preview",
        },
        AgentOption {
            id: "gpt-4o",
            label: "GPT-4o",
            model_id: "openai/gpt-4o",
        },
    ]
}

// =============================================================================
// Defaults
// =============================================================================

/// The built-in four-stage workflow: plan, solve, synthesize, review.
pub fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig {
            id: "planning".into(),
            label: "Planning".into(),
            enabled: true,
            kind: StageKind::Agent,
            model_id: DEFAULT_AGENT_MODEL_IDS[0].into(),
            temperature: 0.4,
            system_prompt: concat!(
                "You are a strategic planning model. Carefully analyze the provided problem ",
                "statement and then develop a robust solution approach. Consider multiple ",
                "perspectives and all edge cases and potential bugs. This should be a high level ",
                "solution description with detailed implementation steps\u{2014}not the actual ",
                "implementation.",
            )
            .into(),
        },
        StageConfig {
            id: "solution".into(),
            label: "Solution".into(),
            enabled: true,
            kind: StageKind::Agent,
            model_id: DEFAULT_AGENT_MODEL_IDS[1].into(),
            temperature: 0.4,
            system_prompt: concat!(
                "You are tasked with implementing a solution to a problem statement. You are ",
                "given a detailed solution plan and the original problem statement. Analyze each ",
                "of these and then produce a detailed solution to the original problem statement, ",
                "carefully considering all details in the plan and making revisions or ",
                "improvements where needed.",
            )
            .into(),
        },
        StageConfig {
            id: "synthesis".into(),
            label: "Synthesis".into(),
            enabled: true,
            kind: StageKind::Synthesis,
            model_id: DEFAULT_SYNTHESIS_MODEL_ID.into(),
            temperature: 0.35,
            system_prompt: concat!(
                "You are provided with an original problem statement and multiple proposed ",
                "solutions crafted by other AI models. Review all of these solutions and ",
                "synthesize a new solution that combines the best aspects of all of the given ",
                "options.",
            )
            .into(),
        },
        StageConfig {
            id: "review".into(),
            label: "Review".into(),
            enabled: true,
            kind: StageKind::Review,
            model_id: DEFAULT_REVIEW_MODEL_ID.into(),
            temperature: 0.2,
            system_prompt: concat!(
                "You are provided with a problem statement and a response. Carefully review the ",
                "response for any issues, inconsistencies, logical fallacies, hallucinations, etc. ",
                "Edit and correct any issues you find and produce a new, revised solution to the ",
                "problem.",
            )
            .into(),
        },
    ]
}

// =============================================================================
// Store
// =============================================================================

/// Ordered stage configuration with point mutations.
///
/// Entries are never added or removed; every mutation replaces only the
/// matching entry and reports whether one was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageList {
    stages: Vec<StageConfig>,
}

impl Default for StageList {
    fn default() -> Self {
        Self::new(default_stages())
    }
}

impl From<Vec<StageConfig>> for StageList {
    fn from(stages: Vec<StageConfig>) -> Self {
        Self::new(stages)
    }
}

impl StageList {
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self { stages }
    }

    pub fn as_slice(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Enabled stages in configured order, cloned as an immutable plan.
    pub fn enabled(&self) -> Vec<StageConfig> {
        self.stages.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.stages.iter().filter(|s| s.enabled).count()
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        self.update(id, |s| s.enabled = !s.enabled)
    }

    pub fn set_prompt(&mut self, id: &str, prompt: impl Into<String>) -> bool {
        let prompt = prompt.into();
        self.update(id, |s| s.system_prompt = prompt)
    }

    pub fn set_model(&mut self, id: &str, model_id: impl Into<String>) -> bool {
        let model_id = model_id.into();
        self.update(id, |s| s.model_id = model_id)
    }

    pub fn set_temperature(&mut self, id: &str, temperature: f64) -> bool {
        self.update(id, |s| s.temperature = temperature)
    }

    /// Restore the built-in defaults.
    pub fn reset(&mut self) {
        self.stages = default_stages();
    }

    fn update(&mut self, id: &str, apply: impl FnOnce(&mut StageConfig)) -> bool {
        match self.stages.iter_mut().find(|s| s.id == id) {
            Some(stage) => {
                apply(stage);
                true
            }
            None => false,
        }
    }
}
