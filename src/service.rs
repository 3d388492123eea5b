//! Process wiring: the arbiter's dispatch loop and the participant's
//! read-only client.
//!
//! The arbiter serializes whatever the bus delivers, in receipt order; a
//! request envelope either commits (and a `stateUpdate` follows) or dies with
//! a specific validation error at this process. Participants treat "sent" and
//! "applied" as distinct events: their sends return immediately and their
//! view only changes when a broadcast comes back.

use serde_json::json;
use tokio::sync::broadcast;

use crate::augment::AugmentationGate;
use crate::error::PoolError;
use crate::gateway::{AuthorityGateway, TransferDirection};
use crate::host::{ActionRef, ActionSource, ClassifierChain, DieSource, NarrativeSink};
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::seeding::{RitualPhase, SeedingCoordinator, SubmitOutcome};
use crate::state::{ParticipantId, PoolState, Role};
use crate::transport::{Bus, Envelope};

/// The authoritative process. Owns the gateway, the ritual coordinator, and
/// the augmentation gate; everything else reaches it through the bus.
pub struct AuthorityService {
    role: Role,
    gateway: AuthorityGateway,
    seeding: SeedingCoordinator,
    gate: AugmentationGate,
    actions: Box<dyn ActionSource + Send>,
    die: Box<dyn DieSource + Send>,
    narrative: Box<dyn NarrativeSink + Send>,
    bus: Bus,
}

impl AuthorityService {
    pub fn new(
        gateway: AuthorityGateway,
        classifiers: ClassifierChain,
        actions: Box<dyn ActionSource + Send>,
        die: Box<dyn DieSource + Send>,
        narrative: Box<dyn NarrativeSink + Send>,
        bus: Bus,
    ) -> Self {
        Self {
            role: Role::Arbiter,
            gateway,
            seeding: SeedingCoordinator::new(),
            gate: AugmentationGate::new(classifiers),
            actions,
            die,
            narrative,
            bus,
        }
    }

    pub fn state(&self) -> &PoolState {
        self.gateway.state()
    }

    pub fn ritual_phase(&self) -> RitualPhase {
        self.seeding.phase()
    }

    /// Feed a host-session roll event into the arbiter-side history.
    pub fn observe_action(&mut self, action: &ActionRef) {
        self.gate.observe_action(action);
    }

    /// Begin or restart the seeding ritual and announce it.
    pub fn start_ritual(&mut self) -> Result<(), PoolError> {
        let announce = self.seeding.start(&self.role, &mut self.gateway)?;
        self.broadcast_state();
        self.bus.publish(announce);
        Ok(())
    }

    /// Direct arbiter action: transfer dice between the pools.
    pub fn move_dice(&mut self, direction: TransferDirection, amount: u32) -> Result<PoolState, PoolError> {
        let state = self.gateway.move_dice(&self.role, direction, amount)?;
        self.broadcast_state();
        Ok(state)
    }

    /// Direct arbiter action: toggle the total-dice invariant.
    pub fn set_override(&mut self, enabled: bool) -> Result<PoolState, PoolError> {
        let state = self.gateway.set_override(&self.role, enabled)?;
        self.broadcast_state();
        Ok(state)
    }

    /// Direct arbiter action: zero both pools.
    pub fn reset_pools(&mut self) -> Result<PoolState, PoolError> {
        let state = self.gateway.reset_pools(&self.role)?;
        self.broadcast_state();
        Ok(state)
    }

    /// Roster churn: restore the invariant against the new count, unless the
    /// override has it suspended.
    pub fn roster_changed(&mut self) -> Result<(), PoolError> {
        if self.gateway.state().override_enabled {
            return Ok(());
        }
        self.gateway.enforce_invariant_now(&self.role)?;
        self.broadcast_state();
        Ok(())
    }

    /// Dispatch one envelope. Request envelopes from participants are
    /// validated and applied; our own broadcast types are ignored.
    pub fn handle(&mut self, envelope: Envelope) -> Result<(), PoolError> {
        match envelope {
            Envelope::SeedResult { participant_id, value } => {
                let outcome =
                    self.seeding.submit(&self.role, &participant_id, value, &mut self.gateway)?;
                if let SubmitOutcome::Accepted { ritual_complete, .. } = outcome {
                    self.broadcast_state();
                    if ritual_complete {
                        self.bus.publish(Envelope::SeedComplete {
                            state: self.gateway.state().clone(),
                        });
                        self.seeding.conclude();
                    }
                }
                Ok(())
            }
            Envelope::RequestAugment { participant_id, action_id } => {
                let Some(action) = self.actions.get_action(&action_id) else {
                    return Err(PoolError::Validation(format!("unknown action {action_id}")));
                };
                self.gate.execute(
                    &self.role,
                    &action,
                    &participant_id,
                    &mut self.gateway,
                    self.die.as_mut(),
                    self.narrative.as_mut(),
                )?;
                self.broadcast_state();
                Ok(())
            }
            Envelope::StateUpdate { .. } | Envelope::SeedStarted { .. } | Envelope::SeedComplete { .. } => {
                Ok(())
            }
        }
    }

    /// Drive the dispatch loop until the bus closes. Validation failures are
    /// logged with their specific kind and never stop the loop.
    pub async fn run(mut self, mut inbox: broadcast::Receiver<Envelope>) {
        logging::log(Level::Info, Domain::System, "authority_started", obj(&[]));
        loop {
            match inbox.recv().await {
                Ok(envelope) => {
                    if let Err(err) = self.handle(envelope) {
                        logging::log(
                            Level::Warn,
                            Domain::Transport,
                            "request_rejected",
                            obj(&[("kind", v_str(err.kind())), ("detail", v_str(&err.to_string()))]),
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    logging::log(
                        Level::Warn,
                        Domain::Transport,
                        "inbox_lagged",
                        obj(&[("skipped", json!(skipped))]),
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        logging::log(Level::Info, Domain::System, "authority_stopped", obj(&[]));
    }

    fn broadcast_state(&self) {
        self.bus.publish(Envelope::StateUpdate { state: self.gateway.state().clone() });
    }
}

/// A participant process: a cached read-only snapshot plus fire-and-forget
/// request sends. The cache only moves on broadcasts.
pub struct ParticipantClient {
    id: ParticipantId,
    role: Role,
    view: PoolState,
    gate: AugmentationGate,
    ritual_open: bool,
    bus: Bus,
}

impl ParticipantClient {
    pub fn new(id: ParticipantId, classifiers: ClassifierChain, bus: Bus) -> Self {
        Self {
            role: Role::Participant(id.clone()),
            id,
            view: PoolState::default(),
            gate: AugmentationGate::new(classifiers),
            ritual_open: false,
            bus,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn view(&self) -> &PoolState {
        &self.view
    }

    /// Whether a seed dialog should currently be open on this process.
    pub fn ritual_open(&self) -> bool {
        self.ritual_open
    }

    /// Feed a host-session roll event into the local history.
    pub fn observe_action(&mut self, action: &ActionRef) {
        self.gate.observe_action(action);
    }

    /// Refresh the local view from a broadcast. Ritual lifecycle broadcasts
    /// open and close the local seed dialog; a restart mid-ritual simply
    /// re-opens it.
    pub fn apply_broadcast(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::StateUpdate { state } => self.view = state.clone(),
            Envelope::SeedStarted { .. } => self.ritual_open = true,
            Envelope::SeedComplete { state } => {
                self.view = state.clone();
                self.ritual_open = false;
            }
            Envelope::SeedResult { .. } | Envelope::RequestAugment { .. } => {}
        }
    }

    /// Send this participant's seed. Returns once the envelope is on the bus;
    /// acceptance arrives later as a `stateUpdate`.
    pub fn send_seed(&self, value: u8) -> Result<(), PoolError> {
        if !(1..=6).contains(&value) {
            return Err(PoolError::Validation(format!("seed value {value} outside 1-6")));
        }
        self.bus.publish(Envelope::SeedResult {
            participant_id: self.id().clone(),
            value,
        });
        Ok(())
    }

    /// Precheck against the cached snapshot.
    pub fn can_augment(&self, action: &ActionRef) -> bool {
        self.gate.can_augment(action, &self.role, &self.view)
    }

    /// Validate locally and route the spend to the arbiter. A stale cache can
    /// still let a doomed request through; the arbiter's re-validation is the
    /// final word and this process sees the result only as a broadcast.
    pub fn request_augment(&self, action: &ActionRef) -> Result<(), PoolError> {
        let envelope = self.gate.request(action, &self.role, &self.view)?;
        self.bus.publish(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FixedDie, FixedRoster, NullNarrativeSink, StaticActions, TagClassifier};
    use crate::state::{ActionId, Config, PoolDelta};
    use crate::store::PoolStore;

    fn chain() -> ClassifierChain {
        ClassifierChain::new(vec![Box::new(TagClassifier {
            augmentable_tags: vec!["skill-check".to_string()],
            excluded_tags: vec![],
        })])
    }

    fn action(id: &str, owner: &str, recency: u64) -> ActionRef {
        ActionRef {
            id: ActionId::new(id),
            owner: ParticipantId::new(owner),
            recency,
            original_total: Some(14),
            tags: vec!["skill-check".to_string()],
            flavor: String::new(),
        }
    }

    fn service(ids: &[&str], actions: Vec<ActionRef>, die: u8, bus: &Bus) -> AuthorityService {
        let cfg = Config {
            sqlite_path: String::new(),
            require_character_ownership: false,
            bus_capacity: 16,
        };
        let gateway = AuthorityGateway::new(
            PoolStore::open_in_memory().unwrap(),
            Box::new(FixedRoster::of(ids)),
            &cfg,
        )
        .unwrap();
        AuthorityService::new(
            gateway,
            chain(),
            Box::new(StaticActions { actions }),
            Box::new(FixedDie(die)),
            Box::new(NullNarrativeSink),
            bus.clone(),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            out.push(env);
        }
        out
    }

    #[tokio::test]
    async fn test_seed_dispatch_broadcasts_updates() {
        let bus = Bus::new(32);
        let mut service = service(&["alice", "bryn"], vec![], 1, &bus);
        let mut watcher = bus.subscribe();

        service.start_ritual().unwrap();
        service
            .handle(Envelope::SeedResult { participant_id: ParticipantId::new("alice"), value: 2 })
            .unwrap();
        service
            .handle(Envelope::SeedResult { participant_id: ParticipantId::new("bryn"), value: 6 })
            .unwrap();

        let seen = drain(&mut watcher);
        assert!(seen.iter().any(|e| matches!(e, Envelope::SeedStarted { active_participant_count: 2 })));
        let complete = seen.iter().find_map(|e| match e {
            Envelope::SeedComplete { state } => Some(state.clone()),
            _ => None,
        });
        let state = complete.expect("ritual must complete");
        assert_eq!(state.arbiter_pool_count, 1);
        assert_eq!(state.player_pool_count, 1);
        assert_eq!(service.ritual_phase(), RitualPhase::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_seed_broadcasts_nothing() {
        let bus = Bus::new(32);
        let mut service = service(&["alice", "bryn"], vec![], 1, &bus);
        service.start_ritual().unwrap();
        service
            .handle(Envelope::SeedResult { participant_id: ParticipantId::new("alice"), value: 2 })
            .unwrap();

        let mut watcher = bus.subscribe();
        service
            .handle(Envelope::SeedResult { participant_id: ParticipantId::new("alice"), value: 5 })
            .unwrap();
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_augment_request_round_trip() {
        let bus = Bus::new(32);
        let act = action("roll-1", "alice", 1);
        let mut service = service(&["alice"], vec![act.clone()], 4, &bus);
        service.observe_action(&act);
        service.start_ritual().unwrap();
        service
            .handle(Envelope::SeedResult { participant_id: ParticipantId::new("alice"), value: 5 })
            .unwrap();
        assert_eq!(service.state().player_pool_count, 1);

        let mut watcher = bus.subscribe();
        service
            .handle(Envelope::RequestAugment {
                participant_id: ParticipantId::new("alice"),
                action_id: act.id.clone(),
            })
            .unwrap();

        let state = service.state();
        assert_eq!((state.player_pool_count, state.arbiter_pool_count), (0, 1));
        assert!(drain(&mut watcher)
            .iter()
            .any(|e| matches!(e, Envelope::StateUpdate { .. })));

        // the same action again: rejected, nothing further broadcast
        let err = service
            .handle(Envelope::RequestAugment {
                participant_id: ParticipantId::new("alice"),
                action_id: act.id.clone(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), "already_processed");
    }

    #[tokio::test]
    async fn test_unknown_action_is_validation_error() {
        let bus = Bus::new(32);
        let mut service = service(&["alice"], vec![], 1, &bus);
        let err = service
            .handle(Envelope::RequestAugment {
                participant_id: ParticipantId::new("alice"),
                action_id: ActionId::new("missing"),
            })
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_roster_changed_reenforces_unless_overridden() {
        let bus = Bus::new(32);
        let mut service = service(&["alice", "bryn", "casse"], vec![], 1, &bus);
        service.roster_changed().unwrap();
        assert_eq!(service.state().total(), 3);

        service.set_override(true).unwrap();
        service
            .gateway
            .propose_update(
                &Role::Arbiter,
                PoolDelta { player_pool_count: Some(9), ..Default::default() },
            )
            .unwrap();
        service.roster_changed().unwrap();
        assert_eq!(service.state().player_pool_count, 9, "override suspends roster enforcement");
    }

    #[tokio::test]
    async fn test_client_view_follows_broadcasts() {
        let bus = Bus::new(32);
        let mut client = ParticipantClient::new(ParticipantId::new("alice"), chain(), bus.clone());
        assert!(!client.ritual_open());

        client.apply_broadcast(&Envelope::SeedStarted { active_participant_count: 1 });
        assert!(client.ritual_open());

        let state = PoolState { player_pool_count: 1, ..Default::default() };
        client.apply_broadcast(&Envelope::StateUpdate { state: state.clone() });
        assert_eq!(client.view(), &state);

        client.apply_broadcast(&Envelope::SeedComplete { state: state.clone() });
        assert!(!client.ritual_open());
    }

    #[tokio::test]
    async fn test_client_precheck_blocks_doomed_requests() {
        let bus = Bus::new(32);
        let mut client = ParticipantClient::new(ParticipantId::new("alice"), chain(), bus.clone());
        let act = action("roll-1", "alice", 1);
        client.observe_action(&act);

        // empty cached pool: request refused locally with the specific kind
        let err = client.request_augment(&act).unwrap_err();
        assert_eq!(err.kind(), "insufficient_dice");

        client.apply_broadcast(&Envelope::StateUpdate {
            state: PoolState { player_pool_count: 1, ..Default::default() },
        });
        assert!(client.can_augment(&act));

        let mut watcher = bus.subscribe();
        client.request_augment(&act).unwrap();
        assert!(matches!(watcher.try_recv().unwrap(), Envelope::RequestAugment { .. }));
    }

    #[tokio::test]
    async fn test_client_rejects_out_of_range_seed_locally() {
        let bus = Bus::new(32);
        let client = ParticipantClient::new(ParticipantId::new("alice"), chain(), bus);
        assert_eq!(client.send_seed(9).unwrap_err().kind(), "validation");
    }
}
