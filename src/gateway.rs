//! The single write path for the pool record.
//!
//! Exactly one process per session holds an `AuthorityGateway`; every mutation
//! funnels through it and lands in the store as one full-record write. Other
//! processes only ever see the broadcast snapshots that the committing caller
//! publishes afterwards.

use crate::error::PoolError;
use crate::host::Roster;
use crate::invariant;
use crate::state::{Config, PoolDelta, PoolState, Role};
use crate::store::PoolStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    ToArbiter,
    ToPlayer,
}

pub struct AuthorityGateway {
    store: PoolStore,
    roster: Box<dyn Roster + Send>,
    require_character_ownership: bool,
    state: PoolState,
}

impl AuthorityGateway {
    /// Loads the last committed record, so a restarted arbiter resumes from
    /// whatever the store holds. The persisted ownership flag wins over the
    /// configured default.
    pub fn new(store: PoolStore, roster: Box<dyn Roster + Send>, cfg: &Config) -> anyhow::Result<Self> {
        let state = store.load()?;
        let require_character_ownership =
            store.require_character_ownership(cfg.require_character_ownership)?;
        Ok(Self { store, roster, require_character_ownership, state })
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    /// Connected participants, optionally filtered to entity owners.
    pub fn active_participant_count(&self) -> u32 {
        let participants = self.roster.active_participants();
        if self.require_character_ownership {
            participants.iter().filter(|p| self.roster.owns_playable_entity(p)).count() as u32
        } else {
            participants.len() as u32
        }
    }

    /// Merge `delta` onto the current record, rebalance unless the merged
    /// record has the override active, persist atomically, return the result.
    pub fn propose_update(&mut self, role: &Role, delta: PoolDelta) -> Result<PoolState, PoolError> {
        require_arbiter(role, "proposeUpdate")?;
        let mut merged = delta.merged_onto(&self.state);
        if !merged.override_enabled {
            merged = invariant::rebalance(&merged, self.active_participant_count());
        }
        self.commit(merged)
    }

    /// Merge and persist without the rebalance pass. Used where the pool total
    /// is intentionally off-target: seeding accrues one die per participant,
    /// and a reset zeroes both counts outright.
    pub fn commit_unbalanced(&mut self, role: &Role, delta: PoolDelta) -> Result<PoolState, PoolError> {
        require_arbiter(role, "proposeUpdate")?;
        let merged = delta.merged_onto(&self.state);
        self.commit(merged)
    }

    /// Snap the pools back to the live roster count immediately.
    pub fn enforce_invariant_now(&mut self, role: &Role) -> Result<PoolState, PoolError> {
        require_arbiter(role, "enforceInvariantNow")?;
        let next = invariant::rebalance(&self.state, self.active_participant_count());
        self.commit(next)
    }

    /// Move `amount` dice between the pools. Rejected when the source pool is
    /// short; the record is untouched on failure. Transfers preserve the pool
    /// total, so they stay valid whether or not the invariant is active.
    pub fn move_dice(
        &mut self,
        role: &Role,
        direction: TransferDirection,
        amount: u32,
    ) -> Result<PoolState, PoolError> {
        require_arbiter(role, "moveDice")?;
        if amount == 0 {
            return Err(PoolError::Validation("transfer amount must be positive".to_string()));
        }

        let (source, source_name) = match direction {
            TransferDirection::ToArbiter => (self.state.player_pool_count, "player pool"),
            TransferDirection::ToPlayer => (self.state.arbiter_pool_count, "arbiter pool"),
        };
        if amount > source {
            return Err(PoolError::Validation(format!(
                "cannot move {amount} dice, {source_name} holds {source}"
            )));
        }

        let delta = match direction {
            TransferDirection::ToArbiter => PoolDelta {
                player_pool_count: Some(self.state.player_pool_count - amount),
                arbiter_pool_count: Some(self.state.arbiter_pool_count + amount),
                ..Default::default()
            },
            TransferDirection::ToPlayer => PoolDelta {
                player_pool_count: Some(self.state.player_pool_count + amount),
                arbiter_pool_count: Some(self.state.arbiter_pool_count - amount),
                ..Default::default()
            },
        };
        self.propose_update(role, delta)
    }

    /// Toggle the invariant override. Dropping the override rebalances right
    /// away (the merged record has `override_enabled == false`, so the
    /// rebalance pass in `propose_update` fires); raising it leaves counts
    /// untouched.
    pub fn set_override(&mut self, role: &Role, enabled: bool) -> Result<PoolState, PoolError> {
        require_arbiter(role, "setOverride")?;
        self.propose_update(
            role,
            PoolDelta { override_enabled: Some(enabled), ..Default::default() },
        )
    }

    /// Zero both pools regardless of override state. An explicit
    /// override-equivalent write: the rebalance pass is skipped so the zeroes
    /// stick until the next enforcing mutation.
    pub fn reset_pools(&mut self, role: &Role) -> Result<PoolState, PoolError> {
        require_arbiter(role, "resetPools")?;
        self.commit_unbalanced(
            role,
            PoolDelta {
                player_pool_count: Some(0),
                arbiter_pool_count: Some(0),
                ..Default::default()
            },
        )
    }

    fn commit(&mut self, next: PoolState) -> Result<PoolState, PoolError> {
        self.store.save(&next).map_err(|e| PoolError::Storage(e.to_string()))?;
        self.state = next;
        Ok(self.state.clone())
    }
}

fn require_arbiter(role: &Role, op: &'static str) -> Result<(), PoolError> {
    if role.is_arbiter() {
        Ok(())
    } else {
        Err(PoolError::Authority { op })
    }
}
