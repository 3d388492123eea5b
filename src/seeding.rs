//! The startup seeding ritual.
//!
//! Each active participant contributes one d6: low faces feed the arbiter
//! pool, high faces the player pool, so the pool total accrues one die per
//! participant instead of snapping to the roster count. The coordinator runs
//! inside the arbiter process and routes every accepted submission through
//! the gateway.

use chrono::Utc;
use serde_json::json;

use crate::error::PoolError;
use crate::gateway::AuthorityGateway;
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::state::{ParticipantId, PoolDelta, PoolState, Role};
use crate::transport::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RitualPhase {
    Idle,
    Seeding,
    /// Fully seeded, completion broadcast not yet acknowledged.
    Complete,
}

/// What a submission did. Duplicates and out-of-ritual submissions are a
/// logged no-op rather than an error: retries and broadcast jitter make them
/// an expected part of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted { state: PoolState, ritual_complete: bool },
    Ignored,
}

pub struct SeedingCoordinator {
    phase: RitualPhase,
}

impl SeedingCoordinator {
    pub fn new() -> Self {
        Self { phase: RitualPhase::Idle }
    }

    pub fn phase(&self) -> RitualPhase {
        self.phase
    }

    /// Begin (or restart) the ritual. Zeroes the pools, clears the seeded
    /// roster and timestamp, and hands back the `seedStarted` envelope for
    /// the caller to publish. Restarting mid-ritual is always allowed and
    /// replays the whole ritual from scratch.
    pub fn start(
        &mut self,
        role: &Role,
        gateway: &mut AuthorityGateway,
    ) -> Result<Envelope, PoolError> {
        if !role.is_arbiter() {
            return Err(PoolError::Authority { op: "startSeeding" });
        }

        gateway.commit_unbalanced(
            role,
            PoolDelta {
                player_pool_count: Some(0),
                arbiter_pool_count: Some(0),
                seeded_participants: Some(Default::default()),
                last_seeded_at: Some(None),
                ..Default::default()
            },
        )?;
        self.phase = RitualPhase::Seeding;

        let count = gateway.active_participant_count();
        logging::log(
            Level::Info,
            Domain::Ritual,
            "seed_started",
            obj(&[("active_participants", json!(count))]),
        );
        Ok(Envelope::SeedStarted { active_participant_count: count })
    }

    /// Apply one participant's seed. `authority` is the role of the process
    /// doing the applying; submissions only ever commit inside the arbiter.
    pub fn submit(
        &mut self,
        authority: &Role,
        participant: &ParticipantId,
        value: u8,
        gateway: &mut AuthorityGateway,
    ) -> Result<SubmitOutcome, PoolError> {
        if !(1..=6).contains(&value) {
            return Err(PoolError::Validation(format!("seed value {value} outside 1-6")));
        }

        if self.phase != RitualPhase::Seeding {
            logging::log(
                Level::Debug,
                Domain::Ritual,
                "seed_outside_ritual",
                obj(&[("participant", v_str(&participant.0))]),
            );
            return Ok(SubmitOutcome::Ignored);
        }
        if gateway.state().seeded_participants.contains(participant) {
            logging::log(
                Level::Debug,
                Domain::Ritual,
                "seed_duplicate",
                obj(&[("participant", v_str(&participant.0))]),
            );
            return Ok(SubmitOutcome::Ignored);
        }

        let current = gateway.state();
        let mut delta = PoolDelta::default();
        // 1-3 feeds the arbiter, 4-6 the players
        if value <= 3 {
            delta.arbiter_pool_count = Some(current.arbiter_pool_count + 1);
        } else {
            delta.player_pool_count = Some(current.player_pool_count + 1);
        }
        let mut seeded = current.seeded_participants.clone();
        seeded.insert(participant.clone());
        delta.seeded_participants = Some(seeded);
        delta.last_seeded_at = Some(Some(Utc::now()));

        let state = gateway.commit_unbalanced(authority, delta)?;
        logging::log(
            Level::Info,
            Domain::Ritual,
            "seed_accepted",
            obj(&[
                ("participant", v_str(&participant.0)),
                ("value", json!(value)),
                ("seeded", json!(state.seeded_participants.len())),
            ]),
        );

        let ritual_complete =
            state.seeded_participants.len() as u32 >= gateway.active_participant_count();
        if ritual_complete {
            self.phase = RitualPhase::Complete;
        }
        Ok(SubmitOutcome::Accepted { state, ritual_complete })
    }

    /// Acknowledge that the completion broadcast went out; the coordinator
    /// returns to `Idle`, ready for the next session's ritual.
    pub fn conclude(&mut self) {
        if self.phase == RitualPhase::Complete {
            self.phase = RitualPhase::Idle;
        }
    }
}

impl Default for SeedingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
