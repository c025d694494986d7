//! Rule-indexed playbook matcher.
//!
//! Two indices are built whenever the playbook set changes:
//! - `event_type -> [playbook]` for O(1) exact type lookup
//! - `lowercased keyword -> [playbook]` for free-text fallback
//!
//! The type tier always wins when it yields an eligible playbook. The keyword
//! tier is scanned in first-seen keyword order, so results are deterministic
//! for a fixed playbook set. The index is read-only while matching and is
//! only rebuilt under the write lock.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::{AutohealError, AutohealResult};
use crate::model::{Event, Playbook, PlaybookSet, PolicyUpdate};

/// Which index produced a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTier {
    /// Exact `event.type` hit
    EventType,
    /// Payload text contained this keyword
    Keyword(String),
}

/// A playbook selected for an event.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub playbook: Playbook,
    pub tier: MatchTier,
}

/// Lookup structures over an ordered playbook list.
#[derive(Debug, Default)]
struct RuleIndex {
    playbooks: Vec<Playbook>,
    by_type: HashMap<String, Vec<usize>>,
    /// Keywords in first-seen order with their owning playbooks
    by_keyword: Vec<(String, Vec<usize>)>,
}

impl RuleIndex {
    fn build(playbooks: Vec<Playbook>) -> Self {
        let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_keyword: Vec<(String, Vec<usize>)> = Vec::new();
        let mut keyword_pos: HashMap<String, usize> = HashMap::new();

        for (idx, playbook) in playbooks.iter().enumerate() {
            for event_type in &playbook.trigger.event_types {
                by_type.entry(event_type.clone()).or_default().push(idx);
            }
            for keyword in &playbook.trigger.keywords {
                let keyword = keyword.to_lowercase();
                match keyword_pos.get(&keyword) {
                    Some(&pos) => {
                        let owners = &mut by_keyword[pos].1;
                        if !owners.contains(&idx) {
                            owners.push(idx);
                        }
                    }
                    None => {
                        keyword_pos.insert(keyword.clone(), by_keyword.len());
                        by_keyword.push((keyword, vec![idx]));
                    }
                }
            }
        }

        Self {
            playbooks,
            by_type,
            by_keyword,
        }
    }

    /// Recovery signals skip the severity filter: a healthy reading is
    /// usually reported at a lower severity than the failure it clears.
    fn eligible(&self, idx: usize, event: &Event) -> bool {
        let playbook = &self.playbooks[idx];
        playbook.enabled && (event.ok || playbook.trigger.accepts(event.severity))
    }

    fn find(&self, event: &Event) -> Option<(usize, MatchTier)> {
        if let Some(candidates) = self.by_type.get(&event.event_type) {
            if let Some(&idx) = candidates.iter().find(|&&idx| self.eligible(idx, event)) {
                return Some((idx, MatchTier::EventType));
            }
        }

        if self.by_keyword.is_empty() {
            return None;
        }
        let text = event.payload_text().to_lowercase();
        for (keyword, owners) in &self.by_keyword {
            if !text.contains(keyword.as_str()) {
                continue;
            }
            if let Some(&idx) = owners.iter().find(|&&idx| self.eligible(idx, event)) {
                return Some((idx, MatchTier::Keyword(keyword.clone())));
            }
        }
        None
    }

    fn position(&self, playbook_id: &str) -> AutohealResult<usize> {
        self.playbooks
            .iter()
            .position(|p| p.id == playbook_id)
            .ok_or_else(|| AutohealError::PlaybookNotFound {
                playbook_id: playbook_id.to_string(),
            })
    }
}

/// Matches events to playbooks and owns the playbook collection.
#[derive(Debug, Default)]
pub struct Reactor {
    index: RwLock<RuleIndex>,
}

impl Reactor {
    /// Build a reactor over a validated playbook set.
    #[must_use]
    pub fn new(playbooks: PlaybookSet) -> Self {
        let index = RuleIndex::build(playbooks.into_inner());
        info!(
            "Indexed {} playbooks ({} event types, {} keywords)",
            index.playbooks.len(),
            index.by_type.len(),
            index.by_keyword.len()
        );
        Self {
            index: RwLock::new(index),
        }
    }

    /// Select the playbook for an event, if any.
    pub async fn match_event(&self, event: &Event) -> Option<RuleMatch> {
        let index = self.index.read().await;
        let (idx, tier) = index.find(event)?;
        let playbook = index.playbooks[idx].clone();
        debug!(
            "Event {} ({}) matched playbook {} via {:?}",
            event.id, event.event_type, playbook.id, tier
        );
        Some(RuleMatch { playbook, tier })
    }

    /// Replace the playbook set and re-index.
    pub async fn reload(&self, playbooks: PlaybookSet) {
        let rebuilt = RuleIndex::build(playbooks.into_inner());
        let count = rebuilt.playbooks.len();
        *self.index.write().await = rebuilt;
        info!("Re-indexed {count} playbooks after reload");
    }

    /// Enable or disable a playbook and re-index.
    pub async fn set_enabled(&self, playbook_id: &str, enabled: bool) -> AutohealResult<()> {
        self.update_policy(
            playbook_id,
            &PolicyUpdate {
                enabled: Some(enabled),
                ..PolicyUpdate::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// Apply a policy-tuning write and re-index.
    pub async fn update_policy(
        &self,
        playbook_id: &str,
        update: &PolicyUpdate,
    ) -> AutohealResult<Playbook> {
        let mut index = self.index.write().await;
        let pos = index.position(playbook_id)?;
        let mut playbooks = std::mem::take(&mut index.playbooks);
        update.apply(&mut playbooks[pos]);
        let updated = playbooks[pos].clone();
        *index = RuleIndex::build(playbooks);
        info!(
            "Policy update for playbook {playbook_id}: enabled={} cooldown={}m risk={:?}",
            updated.enabled, updated.cooldown_minutes, updated.risk
        );
        Ok(updated)
    }

    /// Bump the success or failure counter of a playbook.
    ///
    /// Counters do not affect matching, so no re-index happens.
    pub async fn record_outcome(&self, playbook_id: &str, success: bool) -> AutohealResult<()> {
        let mut index = self.index.write().await;
        let pos = index.position(playbook_id)?;
        let playbook = &mut index.playbooks[pos];
        if success {
            playbook.success_count += 1;
        } else {
            playbook.fail_count += 1;
        }
        Ok(())
    }

    /// Snapshot of a playbook.
    pub async fn get(&self, playbook_id: &str) -> Option<Playbook> {
        let index = self.index.read().await;
        index.playbooks.iter().find(|p| p.id == playbook_id).cloned()
    }

    /// Snapshot of all playbooks in order.
    pub async fn playbooks(&self) -> Vec<Playbook> {
        self.index.read().await.playbooks.clone()
    }
}
