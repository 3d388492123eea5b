use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a connected, non-authoritative client. Assigned by the host
/// session's identity layer; opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of an in-session roll or action, owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is making a call. Every mutating operation takes this explicitly;
/// there is no ambient "current user" lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The single process permitted to mutate pool state.
    Arbiter,
    Participant(ParticipantId),
}

impl Role {
    pub fn is_arbiter(&self) -> bool {
        matches!(self, Role::Arbiter)
    }

    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Role::Arbiter => None,
            Role::Participant(id) => Some(id),
        }
    }
}

/// The shared pool record. One per world; exclusively written by the
/// arbiter's gateway, read everywhere else via broadcast snapshots.
///
/// Invariant while `override_enabled` is false:
/// `player_pool_count + arbiter_pool_count == active participant count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub player_pool_count: u32,
    pub arbiter_pool_count: u32,
    /// When true, the total-dice invariant is suspended.
    pub override_enabled: bool,
    /// Participants whose seed has been accepted in the current ritual.
    pub seeded_participants: BTreeSet<ParticipantId>,
    pub last_seeded_at: Option<DateTime<Utc>>,
}

impl PoolState {
    pub fn total(&self) -> u32 {
        self.player_pool_count + self.arbiter_pool_count
    }
}

impl Default for PoolState {
    fn default() -> Self {
        Self {
            player_pool_count: 0,
            arbiter_pool_count: 0,
            override_enabled: false,
            seeded_participants: BTreeSet::new(),
            last_seeded_at: None,
        }
    }
}

/// Partial update to the pool record. `None` fields keep the current value.
#[derive(Debug, Clone, Default)]
pub struct PoolDelta {
    pub player_pool_count: Option<u32>,
    pub arbiter_pool_count: Option<u32>,
    pub override_enabled: Option<bool>,
    pub seeded_participants: Option<BTreeSet<ParticipantId>>,
    pub last_seeded_at: Option<Option<DateTime<Utc>>>,
}

impl PoolDelta {
    pub fn merged_onto(&self, current: &PoolState) -> PoolState {
        PoolState {
            player_pool_count: self.player_pool_count.unwrap_or(current.player_pool_count),
            arbiter_pool_count: self.arbiter_pool_count.unwrap_or(current.arbiter_pool_count),
            override_enabled: self.override_enabled.unwrap_or(current.override_enabled),
            seeded_participants: self
                .seeded_participants
                .clone()
                .unwrap_or_else(|| current.seeded_participants.clone()),
            last_seeded_at: self.last_seeded_at.unwrap_or(current.last_seeded_at),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    /// Count only participants holding at least one owned entity when sizing
    /// the pool. The persisted flag, when present, wins over this default.
    pub require_character_ownership: bool,
    pub bus_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./fatepool.sqlite".to_string()),
            require_character_ownership: std::env::var("REQUIRE_OWNERSHIP")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            bus_capacity: std::env::var("BUS_CAPACITY").ok().and_then(|v| v.parse().ok()).unwrap_or(256),
        }
    }
}
