//! Message construction for stage completions.
//!
//! Pure and deterministic: the same problem and prior outputs always render
//! byte-identical messages, so a recorded request can be replayed.

use crate::gateway::{Message, StageRequest};
use crate::stages::StageConfig;

const PREVIOUS_OUTPUTS_HEADER: &str = "Previous stage outputs:";

/// Render the user message for a stage.
///
/// With no prior outputs this is exactly `"Problem:\n{problem}"`. Otherwise the
/// problem block is followed by a header and each prior output labelled with
/// its 1-based pipeline position, every block separated by a blank line.
pub fn build_user_message(problem: &str, prior_outputs: &[String]) -> String {
    let problem_block = format!("Problem:\n{problem}");
    if prior_outputs.is_empty() {
        return problem_block;
    }

    let mut blocks = Vec::with_capacity(prior_outputs.len() + 2);
    blocks.push(problem_block);
    blocks.push(PREVIOUS_OUTPUTS_HEADER.to_string());
    blocks.extend(
        prior_outputs
            .iter()
            .enumerate()
            .map(|(index, output)| format!("Stage {} output:\n{output}", index + 1)),
    );
    blocks.join("\n\n")
}

/// System prompt followed by the single user message.
pub fn build_messages(system_prompt: &str, problem: &str, prior_outputs: &[String]) -> Vec<Message> {
    vec![
        Message::system(system_prompt),
        Message::user(build_user_message(problem, prior_outputs)),
    ]
}

/// The request payload for one stage invocation.
pub fn build_stage_request(
    stage: &StageConfig,
    problem: &str,
    prior_outputs: &[String],
) -> StageRequest {
    StageRequest {
        model: stage.model_id.clone(),
        temperature: stage.temperature,
        messages: build_messages(&stage.system_prompt, problem, prior_outputs),
    }
}
