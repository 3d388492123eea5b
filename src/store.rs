use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::state::{ParticipantId, PoolState};

// Key names match the record layout of the original settings store; the
// arbiter pool keeps its historical key so saved worlds stay readable.
const KEY_PLAYER_POOL: &str = "playerPoolCount";
const KEY_ARBITER_POOL: &str = "gmPoolCount";
const KEY_OVERRIDE: &str = "overrideEnabled";
const KEY_SEEDED: &str = "seededPlayers";
const KEY_SEEDED_AT: &str = "lastSeededAt";
const KEY_REQUIRE_OWNERSHIP: &str = "requireCharacterOwnership";

/// Durable key-value holder for the pool record. Get, set, nothing else;
/// change notification is the broadcast the committing caller sends.
pub struct PoolStore {
    conn: Connection,
}

impl PoolStore {
    pub fn open(path: &str) -> Result<Self> {
        let store = Self { conn: Connection::open(path)? };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pool_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut stmt = self.conn.prepare("SELECT value FROM pool_state WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Read the whole record; missing keys fall back to a zeroed pool.
    pub fn load(&self) -> Result<PoolState> {
        let player = self.get(KEY_PLAYER_POOL)?.and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let arbiter = self.get(KEY_ARBITER_POOL)?.and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let override_enabled = self.get(KEY_OVERRIDE)?.and_then(|v| v.as_bool()).unwrap_or(false);

        let seeded_participants: BTreeSet<ParticipantId> = match self.get(KEY_SEEDED)? {
            Some(v) => serde_json::from_value(v)?,
            None => BTreeSet::new(),
        };
        let last_seeded_at: Option<DateTime<Utc>> = match self.get(KEY_SEEDED_AT)? {
            Some(Value::Null) | None => None,
            Some(v) => serde_json::from_value(v)?,
        };

        Ok(PoolState {
            player_pool_count: player,
            arbiter_pool_count: arbiter,
            override_enabled,
            seeded_participants,
            last_seeded_at,
        })
    }

    /// Persist the whole record in a single transaction. Callers never write
    /// individual fields; the full-record write is what keeps read-merge-write
    /// free of partial-field races.
    pub fn save(&mut self, state: &PoolState) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pool_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            stmt.execute(params![KEY_PLAYER_POOL, state.player_pool_count.to_string()])?;
            stmt.execute(params![KEY_ARBITER_POOL, state.arbiter_pool_count.to_string()])?;
            stmt.execute(params![KEY_OVERRIDE, state.override_enabled.to_string()])?;
            stmt.execute(params![
                KEY_SEEDED,
                serde_json::to_string(&state.seeded_participants)?
            ])?;
            stmt.execute(params![KEY_SEEDED_AT, serde_json::to_string(&state.last_seeded_at)?])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Configuration-only flag, read once at startup.
    pub fn require_character_ownership(&self, default: bool) -> Result<bool> {
        Ok(self.get(KEY_REQUIRE_OWNERSHIP)?.and_then(|v| v.as_bool()).unwrap_or(default))
    }

    pub fn set_require_character_ownership(&mut self, value: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pool_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![KEY_REQUIRE_OWNERSHIP, value.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_state() -> PoolState {
        let mut seeded = BTreeSet::new();
        seeded.insert(ParticipantId::new("alice"));
        seeded.insert(ParticipantId::new("bryn"));
        PoolState {
            player_pool_count: 2,
            arbiter_pool_count: 1,
            override_enabled: true,
            seeded_participants: seeded,
            last_seeded_at: Some(Utc.with_ymd_and_hms(2026, 3, 14, 20, 15, 0).unwrap()),
        }
    }

    #[test]
    fn test_empty_store_loads_zeroed_pool() {
        let store = PoolStore::open_in_memory().unwrap();
        let state = store.load().unwrap();
        assert_eq!(state, PoolState::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut store = PoolStore::open_in_memory().unwrap();
        let state = sample_state();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_save_overwrites_previous_record() {
        let mut store = PoolStore::open_in_memory().unwrap();
        store.save(&sample_state()).unwrap();

        let cleared = PoolState::default();
        store.save(&cleared).unwrap();
        assert_eq!(store.load().unwrap(), cleared);
    }

    #[test]
    fn test_arbiter_pool_uses_historical_key() {
        let mut store = PoolStore::open_in_memory().unwrap();
        store.save(&sample_state()).unwrap();

        let raw: String = store
            .conn
            .query_row(
                "SELECT value FROM pool_state WHERE key = 'gmPoolCount'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, "1");
    }

    #[test]
    fn test_ownership_flag_defaults_and_persists() {
        let mut store = PoolStore::open_in_memory().unwrap();
        assert!(!store.require_character_ownership(false).unwrap());
        assert!(store.require_character_ownership(true).unwrap());

        store.set_require_character_ownership(true).unwrap();
        assert!(store.require_character_ownership(false).unwrap());
    }

    #[test]
    fn test_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.sqlite");
        let path = path.to_str().unwrap();

        let state = sample_state();
        {
            let mut store = PoolStore::open(path).unwrap();
            store.save(&state).unwrap();
        }
        let store = PoolStore::open(path).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }
}
