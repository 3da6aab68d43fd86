//! In-memory state store with per-conversation serialisation.
//!
//! The outer map is guarded by an `RwLock`; each conversation slot is an
//! `Arc<Mutex<_>>` so read-modify-write sequences on one conversation
//! hold that conversation's lock while operations on distinct IDs
//! proceed in parallel. A `load` racing a `save` observes either the
//! pre- or post-image in full.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use arena_domain::error::{Error, Result};
use arena_domain::message::Message;
use arena_domain::run::{RunMetadata, RunResult};
use arena_domain::state::ConversationState;

struct Entry {
    state: ConversationState,
    metadata: Option<RunMetadata>,
}

#[derive(Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, conversation_id: &str) -> Option<Arc<Mutex<Entry>>> {
        self.entries.read().get(conversation_id).cloned()
    }

    fn slot_or_create(&self, conversation_id: &str) -> Arc<Mutex<Entry>> {
        if let Some(slot) = self.slot(conversation_id) {
            return slot;
        }
        let mut entries = self.entries.write();
        entries
            .entry(conversation_id.to_owned())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Entry {
                    state: ConversationState::new(conversation_id, ""),
                    metadata: None,
                }))
            })
            .clone()
    }

    /// Load a full snapshot of a conversation.
    pub fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        let slot = self
            .slot(conversation_id)
            .ok_or_else(|| Error::NotFound(conversation_id.to_owned()))?;
        let entry = slot.lock();
        Ok(entry.state.clone())
    }

    /// Full-state overwrite. Append is realised by load + mutate + save.
    pub fn save(&self, state: ConversationState) -> Result<()> {
        let slot = self.slot_or_create(&state.conversation_id);
        let mut entry = slot.lock();
        entry.state = state;
        Ok(())
    }

    /// Append one message under the conversation's lock (the
    /// load-append-save sequence used by the pipeline save stage and the
    /// turn executor, without releasing the per-ID lock in between).
    pub fn append_message(&self, conversation_id: &str, message: Message) -> Result<()> {
        let slot = self
            .slot(conversation_id)
            .ok_or_else(|| Error::NotFound(conversation_id.to_owned()))?;
        let mut entry = slot.lock();
        entry.state.push_message(message);
        Ok(())
    }

    /// In-place enrichment of the most recent assistant message (used to
    /// attach assertion results) without re-ordering.
    pub fn update_last_assistant_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<()> {
        let slot = self
            .slot(conversation_id)
            .ok_or_else(|| Error::NotFound(conversation_id.to_owned()))?;
        let mut entry = slot.lock();
        match entry.state.last_assistant_mut() {
            Some(last) => {
                *last = message;
                Ok(())
            }
            None => Err(Error::Store(format!(
                "no assistant message to update on {conversation_id}"
            ))),
        }
    }

    pub fn save_metadata(&self, conversation_id: &str, metadata: RunMetadata) -> Result<()> {
        let slot = self.slot_or_create(conversation_id);
        let mut entry = slot.lock();
        entry.metadata = Some(metadata);
        Ok(())
    }

    pub fn metadata(&self, conversation_id: &str) -> Result<RunMetadata> {
        let slot = self
            .slot(conversation_id)
            .ok_or_else(|| Error::NotFound(conversation_id.to_owned()))?;
        let entry = slot.lock();
        entry
            .metadata
            .clone()
            .ok_or_else(|| Error::Store(format!("no metadata saved for {conversation_id}")))
    }

    /// Reconstruct the uniform result record for a run. Conversation IDs
    /// equal run IDs for harness runs, so the lookup is direct.
    pub fn get_run_result(&self, run_id: &str) -> Result<RunResult> {
        let slot = self
            .slot(run_id)
            .ok_or_else(|| Error::NotFound(run_id.to_owned()))?;
        let entry = slot.lock();
        let metadata = entry
            .metadata
            .clone()
            .ok_or_else(|| Error::Store(format!("no metadata saved for {run_id}")))?;
        Ok(super::result::reconstruct(&entry.state, &metadata))
    }

    /// All conversation IDs with saved run metadata, sorted.
    pub fn list_run_ids(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut ids: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| slot.lock().metadata.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Serialize a conversation snapshot to JSON bytes.
    pub fn dump_json(&self, conversation_id: &str) -> Result<Vec<u8>> {
        let state = self.load(conversation_id)?;
        Ok(serde_json::to_vec_pretty(&state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_domain::error::ErrorClass;
    use arena_domain::message::CostBreakdown;
    use arena_domain::scenario::AssertionOutcome;

    fn two_turn_state(id: &str) -> ConversationState {
        let mut state = ConversationState::new(id, "tester");
        state.push_message(Message::user("hello"));
        state.push_message(Message::assistant("hi there").with_cost(CostBreakdown {
            input_tokens: 10,
            output_tokens: 5,
            cached_tokens: 0,
            input_cost: 0.001,
            output_cost: 0.0005,
            total_cost: 0.0015,
        }));
        state
    }

    #[test]
    fn load_missing_is_not_found() {
        let store = StateStore::new();
        let err = store.load("ghost").unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = StateStore::new();
        store.save(two_turn_state("c1")).unwrap();
        let loaded = store.load("c1").unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.user_id, "tester");
    }

    #[test]
    fn append_message_under_lock() {
        let store = StateStore::new();
        store.save(two_turn_state("c1")).unwrap();
        store.append_message("c1", Message::user("more")).unwrap();
        assert_eq!(store.load("c1").unwrap().messages.len(), 3);
    }

    #[test]
    fn update_last_assistant_enriches_in_place() {
        let store = StateStore::new();
        store.save(two_turn_state("c1")).unwrap();

        let mut enriched = store.load("c1").unwrap().last_assistant().unwrap().clone();
        enriched.metadata.insert(
            "assertions".into(),
            serde_json::to_value(vec![AssertionOutcome {
                assertion_type: "contains".into(),
                passed: true,
                detail: None,
            }])
            .unwrap(),
        );
        store
            .update_last_assistant_message("c1", enriched)
            .unwrap();

        let state = store.load("c1").unwrap();
        assert_eq!(state.messages.len(), 2);
        assert!(state.last_assistant().unwrap().metadata.contains_key("assertions"));
    }

    #[test]
    fn update_last_assistant_without_assistant_fails() {
        let store = StateStore::new();
        let mut state = ConversationState::new("c1", "tester");
        state.push_message(Message::user("only user"));
        store.save(state).unwrap();
        assert!(store
            .update_last_assistant_message("c1", Message::assistant("x"))
            .is_err());
    }

    #[test]
    fn run_result_requires_metadata() {
        let store = StateStore::new();
        store.save(two_turn_state("r1")).unwrap();
        assert!(store.get_run_result("r1").is_err());

        let mut meta = RunMetadata::started("r1", "us", "p1");
        meta.finish();
        store.save_metadata("r1", meta).unwrap();
        let result = store.get_run_result("r1").unwrap();
        assert_eq!(result.message_count, 2);
        assert!((result.cost.total_cost - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn list_run_ids_only_covers_runs_with_metadata() {
        let store = StateStore::new();
        store.save(two_turn_state("b-run")).unwrap();
        store.save(two_turn_state("a-run")).unwrap();
        store
            .save_metadata("a-run", RunMetadata::started("a-run", "us", "p1"))
            .unwrap();
        assert_eq!(store.list_run_ids(), vec!["a-run".to_string()]);
    }

    #[test]
    fn dump_json_round_trips() {
        let store = StateStore::new();
        store.save(two_turn_state("c1")).unwrap();
        let bytes = store.dump_json("c1").unwrap();
        let back: ConversationState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.conversation_id, "c1");
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.messages[1].content, "hi there");
    }

    #[test]
    fn concurrent_writers_on_distinct_ids() {
        let store = Arc::new(StateStore::new());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut handles = Vec::new();
            for i in 0..8 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    let id = format!("c{i}");
                    store.save(ConversationState::new(&id, "t")).unwrap();
                    for j in 0..50 {
                        store
                            .append_message(&id, Message::user(format!("m{j}")))
                            .unwrap();
                    }
                }));
            }
            for h in handles {
                h.await.unwrap();
            }
        });
        for i in 0..8 {
            assert_eq!(store.load(&format!("c{i}")).unwrap().messages.len(), 50);
        }
    }
}
