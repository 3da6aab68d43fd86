//! Result reconstruction.
//!
//! A [`RunResult`] is a view, never stored: cost is summed over per-message
//! breakdowns, the tool-usage histogram is derived by scanning tool-call
//! messages, and violations are collected from assertion metadata.

use std::collections::HashMap;

use arena_domain::message::{CostBreakdown, META_ASSERTIONS};
use arena_domain::run::{AssertionSummary, RunMetadata, RunResult, Violation};
use arena_domain::scenario::AssertionOutcome;
use arena_domain::state::ConversationState;

pub fn reconstruct(state: &ConversationState, metadata: &RunMetadata) -> RunResult {
    let mut cost = CostBreakdown::default();
    let mut tool_usage: HashMap<String, u32> = HashMap::new();
    let mut violations = Vec::new();
    let mut summary = AssertionSummary::default();

    for (index, message) in state.messages.iter().enumerate() {
        if let Some(message_cost) = message.effective_cost() {
            cost.add(&message_cost);
        }

        if let Some(calls) = &message.tool_calls {
            for call in calls {
                *tool_usage.entry(call.tool_name.clone()).or_insert(0) += 1;
            }
        }

        for outcome in message_assertions(message) {
            summary.total += 1;
            if outcome.passed {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                violations.push(Violation {
                    message_index: Some(index),
                    assertion_type: outcome.assertion_type,
                    detail: outcome.detail,
                });
            }
        }
    }

    for outcome in &metadata.conversation_assertions {
        summary.total += 1;
        if outcome.passed {
            summary.passed += 1;
        } else {
            summary.failed += 1;
            violations.push(Violation {
                message_index: None,
                assertion_type: outcome.assertion_type.clone(),
                detail: outcome.detail.clone(),
            });
        }
    }

    let failed = metadata.error.is_some() || summary.failed > 0;

    RunResult {
        run_id: metadata.run_id.clone(),
        metadata: metadata.clone(),
        message_count: state.messages.len(),
        cost,
        tool_usage,
        violations,
        media_outputs: state.media.clone(),
        assertions: summary,
        failed,
    }
}

fn message_assertions(message: &arena_domain::message::Message) -> Vec<AssertionOutcome> {
    message
        .metadata
        .get(META_ASSERTIONS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
