//! Assertion evaluation.
//!
//! Assertions are predicates over message text producing structured
//! pass/fail records. A failing assertion never aborts execution; it
//! marks the run failed and lands in the evaluated message's metadata
//! (or the run metadata for conversation-level assertions).

use std::sync::Arc;

use arena_domain::error::Result;
use arena_domain::message::{Message, META_ASSERTIONS};
use arena_domain::scenario::{AssertionConfig, AssertionKind, AssertionOutcome};
use arena_store::StateStore;

/// Evaluate one assertion against a piece of text.
pub fn evaluate(config: &AssertionConfig, text: &str) -> AssertionOutcome {
    let assertion_type = config.kind.name().to_string();
    let (passed, detail) = match config.kind {
        AssertionKind::Contains => {
            let needle = config.values.first().map(String::as_str).unwrap_or("");
            if text.contains(needle) {
                (true, None)
            } else {
                (false, Some(format!("expected text to contain {needle:?}")))
            }
        }
        AssertionKind::ContainsAny => {
            if config.values.iter().any(|v| text.contains(v.as_str())) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!("none of {:?} found in output", config.values)),
                )
            }
        }
        AssertionKind::NotContains => {
            match config.values.iter().find(|v| text.contains(v.as_str())) {
                None => (true, None),
                Some(found) => (false, Some(format!("forbidden value {found:?} present"))),
            }
        }
        AssertionKind::RegexMatch => {
            let pattern = config.values.first().map(String::as_str).unwrap_or("");
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if re.is_match(text) {
                        (true, None)
                    } else {
                        (false, Some(format!("pattern {pattern:?} did not match")))
                    }
                }
                Err(e) => (false, Some(format!("invalid pattern {pattern:?}: {e}"))),
            }
        }
        AssertionKind::MinLength => {
            let minimum = config.min_length.unwrap_or(1);
            let length = text.chars().count();
            if length >= minimum {
                (true, None)
            } else {
                (
                    false,
                    Some(format!("output length {length} below minimum {minimum}")),
                )
            }
        }
    };
    AssertionOutcome {
        assertion_type,
        passed,
        detail,
    }
}

/// Evaluate a list of assertions against the same text, one outcome per
/// config, in config order.
pub fn evaluate_all(configs: &[AssertionConfig], text: &str) -> Vec<AssertionOutcome> {
    configs.iter().map(|c| evaluate(c, text)).collect()
}

/// Merge outcomes into a message's `assertions` metadata entry.
pub fn attach_to_message(message: &mut Message, outcomes: &[AssertionOutcome]) {
    let mut existing: Vec<AssertionOutcome> = message
        .metadata
        .get(META_ASSERTIONS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    existing.extend(outcomes.iter().cloned());
    message.metadata.insert(
        META_ASSERTIONS.into(),
        serde_json::to_value(existing).unwrap_or_default(),
    );
}

/// Evaluate assertions against the latest assistant message of a
/// conversation and enrich that message in place through the store.
///
/// When the conversation has no assistant message yet, every assertion
/// fails with a descriptive detail (and nothing is attached).
pub fn apply_to_last_assistant(
    store: &Arc<StateStore>,
    conversation_id: &str,
    configs: &[AssertionConfig],
) -> Result<Vec<AssertionOutcome>> {
    if configs.is_empty() {
        return Ok(Vec::new());
    }

    let state = store.load(conversation_id)?;
    let Some(last) = state.last_assistant() else {
        return Ok(configs
            .iter()
            .map(|c| AssertionOutcome {
                assertion_type: c.kind.name().to_string(),
                passed: false,
                detail: Some("no assistant message to evaluate".into()),
            })
            .collect());
    };

    let outcomes = evaluate_all(configs, &last.content);
    let mut enriched = last.clone();
    attach_to_message(&mut enriched, &outcomes);
    store.update_last_assistant_message(conversation_id, enriched)?;
    Ok(outcomes)
}

/// Conversation-level evaluation: assertions run over the concatenated
/// text of the whole history.
pub fn apply_to_history(
    configs: &[AssertionConfig],
    messages: &[Message],
) -> Vec<AssertionOutcome> {
    if configs.is_empty() {
        return Vec::new();
    }
    let joined: String = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    evaluate_all(configs, &joined)
}
