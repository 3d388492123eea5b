//! Spending a player-pool die to boost an eligible action.
//!
//! The gate runs in two places with the same code: participant-side it
//! prechecks requests against the cached snapshot, arbiter-side it is the
//! final word. The consumed-action check inside [`AugmentationGate::execute`]
//! is load-bearing rather than belt-and-braces: two requests for the same
//! action can be in flight at once, and only the arbiter-side re-validation
//! decides which one spends the die.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::error::{EligibilityCheck, PoolError};
use crate::gateway::AuthorityGateway;
use crate::host::{ActionRef, Classification, ClassifierChain, DieSource, NarrativeSink};
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::state::{ActionId, ParticipantId, PoolDelta, PoolState, Role};
use crate::transport::Envelope;

/// Result of a successful spend, returned to the arbiter-side caller. The
/// requester itself learns of it from the narrative post and the state
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentOutcome {
    pub die: u8,
    /// `original_total + die`, when the host could resolve a total.
    pub new_total: Option<i64>,
    pub state: PoolState,
}

pub struct AugmentationGate {
    classifiers: ClassifierChain,
    /// Actions already consumed by an augmentation. Append-only for the
    /// process lifetime; rebuilt empty after a restart.
    consumed: HashSet<ActionId>,
    /// Latest tracked action per participant, with its recency marker.
    latest: HashMap<ParticipantId, (ActionId, u64)>,
}

impl AugmentationGate {
    pub fn new(classifiers: ClassifierChain) -> Self {
        Self { classifiers, consumed: HashSet::new(), latest: HashMap::new() }
    }

    /// Track a newly observed action as its owner's most recent. Stale
    /// observations (smaller recency than what we already hold) are dropped,
    /// so out-of-order delivery cannot roll the history backwards.
    pub fn observe_action(&mut self, action: &ActionRef) {
        match self.latest.get(&action.owner) {
            Some((_, recency)) if *recency > action.recency => {}
            _ => {
                self.latest.insert(action.owner.clone(), (action.id.clone(), action.recency));
            }
        }
    }

    pub fn latest_action_of(&self, participant: &ParticipantId) -> Option<&ActionId> {
        self.latest.get(participant).map(|(id, _)| id)
    }

    pub fn is_consumed(&self, action: &ActionId) -> bool {
        self.consumed.contains(action)
    }

    /// Total predicate: may `requester` spend a die on `action` given the
    /// pool snapshot? Never errors, never mutates.
    pub fn can_augment(&self, action: &ActionRef, requester: &Role, state: &PoolState) -> bool {
        self.eligibility(action, requester, state).is_ok()
    }

    /// Validate a spend and produce the request envelope to route to the
    /// arbiter. The first violated condition comes back as its own error
    /// kind, so the UI can say exactly why.
    pub fn request(
        &self,
        action: &ActionRef,
        requester: &Role,
        state: &PoolState,
    ) -> Result<Envelope, PoolError> {
        self.eligibility(action, requester, state)?;
        // eligibility guarantees a participant role
        let participant = requester
            .participant()
            .ok_or(PoolError::NotEligible(EligibilityCheck::ArbiterCannotSpend))?;
        Ok(Envelope::RequestAugment {
            participant_id: participant.clone(),
            action_id: action.id.clone(),
        })
    }

    /// Arbiter-side execution: re-validate against live state, draw the die,
    /// post the narrative result, consume the action, and transfer the spent
    /// die to the arbiter pool.
    pub fn execute(
        &mut self,
        executor: &Role,
        action: &ActionRef,
        requester: &ParticipantId,
        gateway: &mut AuthorityGateway,
        die: &mut dyn DieSource,
        narrative: &mut dyn NarrativeSink,
    ) -> Result<AugmentOutcome, PoolError> {
        if !executor.is_arbiter() {
            return Err(PoolError::Authority { op: "executeAugment" });
        }
        let requester_role = Role::Participant(requester.clone());
        self.eligibility(action, &requester_role, gateway.state())?;

        // consume before committing: a racing request for the same action now
        // fails the re-validation above instead of double-spending
        self.consumed.insert(action.id.clone());

        let face = die.roll_d6();
        let new_total = action.original_total.map(|total| total + i64::from(face));

        let player = gateway.state().player_pool_count;
        let arbiter = gateway.state().arbiter_pool_count;
        let state = gateway.propose_update(
            executor,
            PoolDelta {
                player_pool_count: Some(player - 1),
                arbiter_pool_count: Some(arbiter + 1),
                ..Default::default()
            },
        )?;

        let text = match new_total {
            Some(total) => format!(
                "{requester} spends a fate die on {}: rolled {face}, new total {total}",
                action.id
            ),
            None => format!("{requester} spends a fate die on {}: rolled {face}", action.id),
        };
        narrative.post_message(&text, requester);

        logging::log(
            Level::Info,
            Domain::Augment,
            "die_spent",
            obj(&[
                ("participant", v_str(&requester.0)),
                ("action", v_str(&action.id.0)),
                ("face", json!(face)),
                ("player_pool", json!(state.player_pool_count)),
            ]),
        );

        Ok(AugmentOutcome { die: face, new_total, state })
    }

    /// The ordered checks behind every entry point. The first failure wins.
    fn eligibility(
        &self,
        action: &ActionRef,
        requester: &Role,
        state: &PoolState,
    ) -> Result<(), PoolError> {
        let participant = requester
            .participant()
            .ok_or(PoolError::NotEligible(EligibilityCheck::ArbiterCannotSpend))?;
        if action.owner != *participant {
            return Err(PoolError::NotEligible(EligibilityCheck::NotActionOwner));
        }
        if self.classifiers.classify(action) != Classification::Augmentable {
            return Err(PoolError::NotEligible(EligibilityCheck::NotAugmentable));
        }
        if self.consumed.contains(&action.id) {
            return Err(PoolError::AlreadyProcessed { action: action.id.clone() });
        }
        match self.latest.get(participant) {
            Some((latest, _)) if *latest == action.id => {}
            _ => return Err(PoolError::NotEligible(EligibilityCheck::NotMostRecent)),
        }
        if state.player_pool_count < 1 {
            return Err(PoolError::InsufficientDice {
                required: 1,
                available: state.player_pool_count,
            });
        }
        Ok(())
    }
}
