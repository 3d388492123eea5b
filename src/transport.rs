//! Typed envelopes and the session message bus.
//!
//! ```text
//! participant ──propose──► bus ──► arbiter (validate + apply + persist)
//!                                      │
//! participant ◄──snapshot── bus ◄──broadcast──┘
//! ```
//!
//! The bus itself holds no state and makes no delivery-order promises beyond
//! what the underlying channel gives a single receiver. The arbiter serializes
//! whatever arrives, in receipt order.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::{ActionId, ParticipantId, PoolState};

/// Everything that crosses process boundaries, as one tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Arbiter to everyone, after any committed mutation.
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        #[serde(flatten)]
        state: PoolState,
    },
    /// Arbiter to everyone, when the seeding ritual begins.
    #[serde(rename_all = "camelCase")]
    SeedStarted { active_participant_count: u32 },
    /// Participant to arbiter: a seed submission.
    #[serde(rename_all = "camelCase")]
    SeedResult { participant_id: ParticipantId, value: u8 },
    /// Arbiter to everyone, once the roster is fully seeded.
    #[serde(rename_all = "camelCase")]
    SeedComplete { state: PoolState },
    /// Participant to arbiter: spend a player-pool die on an action.
    #[serde(rename_all = "camelCase")]
    RequestAugment { participant_id: ParticipantId, action_id: ActionId },
}

/// Broadcast fan-out shared by every process in the session. Cloning hands
/// out another publisher onto the same channel.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget publish. Returns how many receivers were subscribed;
    /// zero is not an error, a session with no listeners just drops the
    /// message.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_update_flattens_pool_fields() {
        let env = Envelope::StateUpdate { state: PoolState::default() };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "stateUpdate");
        assert_eq!(json["playerPoolCount"], 0);
        assert_eq!(json["arbiterPoolCount"], 0);
        assert_eq!(json["overrideEnabled"], false);
    }

    #[test]
    fn test_wire_tags_are_camel_case() {
        let env = Envelope::SeedStarted { active_participant_count: 3 };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "seedStarted");
        assert_eq!(json["activeParticipantCount"], 3);

        let env = Envelope::RequestAugment {
            participant_id: ParticipantId::new("alice"),
            action_id: ActionId::new("roll-9"),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "requestAugment");
        assert_eq!(json["participantId"], "alice");
        assert_eq!(json["actionId"], "roll-9");
    }

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope::SeedResult { participant_id: ParticipantId::new("bryn"), value: 5 };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[tokio::test]
    async fn test_bus_fans_out_to_every_subscriber() {
        let bus = Bus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Envelope::SeedStarted { active_participant_count: 2 });

        assert!(matches!(a.recv().await.unwrap(), Envelope::SeedStarted { .. }));
        assert!(matches!(b.recv().await.unwrap(), Envelope::SeedStarted { .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = Bus::new(8);
        assert_eq!(bus.publish(Envelope::SeedStarted { active_participant_count: 1 }), 0);
    }
}
