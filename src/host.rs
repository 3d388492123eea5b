//! Seams to the surrounding host session.
//!
//! The pool core never reaches into the host directly: who is connected, what
//! an action looks like, where randomness comes from, and where narrative
//! text goes are all injected behind these traits. Stub implementations make
//! integration explicit and keep tests deterministic.

use std::collections::BTreeSet;

use rand::Rng;

use crate::state::{ActionId, ParticipantId};

/// A roll or other in-session action, as handed to us by the host. The core
/// never constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub id: ActionId,
    pub owner: ParticipantId,
    /// Monotonically increasing per owner; later actions carry larger values.
    pub recency: u64,
    /// Rolled total, when the host can resolve one for this action kind.
    pub original_total: Option<i64>,
    /// Host-system tags, consumed by tag-based classifiers.
    pub tags: Vec<String>,
    /// Free-form descriptive text, consumed by the heuristic fallback.
    pub flavor: String,
}

/// Roster query: who is connected right now.
pub trait Roster {
    fn active_participants(&self) -> BTreeSet<ParticipantId>;
    /// Whether the participant holds at least one owned game entity.
    fn owns_playable_entity(&self, participant: &ParticipantId) -> bool;
}

/// A roster that never changes. Useful for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedRoster {
    pub participants: BTreeSet<ParticipantId>,
    pub entity_owners: BTreeSet<ParticipantId>,
}

impl FixedRoster {
    pub fn of(ids: &[&str]) -> Self {
        let participants: BTreeSet<ParticipantId> =
            ids.iter().map(|id| ParticipantId::new(*id)).collect();
        Self { entity_owners: participants.clone(), participants }
    }
}

impl Roster for FixedRoster {
    fn active_participants(&self) -> BTreeSet<ParticipantId> {
        self.participants.clone()
    }

    fn owns_playable_entity(&self, participant: &ParticipantId) -> bool {
        self.entity_owners.contains(participant)
    }
}

/// Action lookup by id, resolved against the host's live session data.
pub trait ActionSource {
    fn get_action(&self, id: &ActionId) -> Option<ActionRef>;
}

/// In-memory action table for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticActions {
    pub actions: Vec<ActionRef>,
}

impl ActionSource for StaticActions {
    fn get_action(&self, id: &ActionId) -> Option<ActionRef> {
        self.actions.iter().find(|a| &a.id == id).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Augmentable,
    NotAugmentable,
    /// No confident answer. Always treated as not augmentable downstream.
    Unknown,
}

/// One classification strategy. Return `Unknown` to pass the question along.
pub trait ActionClassifier {
    fn classify(&self, action: &ActionRef) -> Classification;
}

/// Ordered fallback chain: the first confident answer wins.
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn ActionClassifier + Send>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Box<dyn ActionClassifier + Send>>) -> Self {
        Self { classifiers }
    }

    pub fn classify(&self, action: &ActionRef) -> Classification {
        for classifier in &self.classifiers {
            match classifier.classify(action) {
                Classification::Unknown => continue,
                confident => return confident,
            }
        }
        Classification::Unknown
    }
}

/// Classifies off host-system tags: an excluded tag vetoes, a known tag
/// confirms, anything else stays unknown.
#[derive(Debug, Clone, Default)]
pub struct TagClassifier {
    pub augmentable_tags: Vec<String>,
    pub excluded_tags: Vec<String>,
}

impl ActionClassifier for TagClassifier {
    fn classify(&self, action: &ActionRef) -> Classification {
        if action.tags.iter().any(|t| self.excluded_tags.contains(t)) {
            return Classification::NotAugmentable;
        }
        if action.tags.iter().any(|t| self.augmentable_tags.contains(t)) {
            return Classification::Augmentable;
        }
        Classification::Unknown
    }
}

/// Text-matching fallback for hosts whose actions carry no usable tags.
#[derive(Debug, Clone, Default)]
pub struct FlavorTextClassifier {
    pub keywords: Vec<String>,
}

impl ActionClassifier for FlavorTextClassifier {
    fn classify(&self, action: &ActionRef) -> Classification {
        let flavor = action.flavor.to_lowercase();
        if self.keywords.iter().any(|k| flavor.contains(&k.to_lowercase())) {
            return Classification::Augmentable;
        }
        Classification::Unknown
    }
}

/// External randomness for the augmentation draw.
pub trait DieSource {
    fn roll_d6(&mut self) -> u8;
}

pub struct RandDie;

impl DieSource for RandDie {
    fn roll_d6(&mut self) -> u8 {
        rand::thread_rng().gen_range(1..=6)
    }
}

/// Always rolls the same face. Tests only care about arithmetic, not luck.
pub struct FixedDie(pub u8);

impl DieSource for FixedDie {
    fn roll_d6(&mut self) -> u8 {
        self.0
    }
}

/// Chat/log sink for narrative results of an augmentation.
pub trait NarrativeSink {
    fn post_message(&mut self, text: &str, speaker: &ParticipantId);
}

/// Drops narrative output. Stub to make the integration point explicit.
pub struct NullNarrativeSink;

impl NarrativeSink for NullNarrativeSink {
    fn post_message(&mut self, _text: &str, _speaker: &ParticipantId) {}
}
