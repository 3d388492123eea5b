//! Demo host: one arbiter and three simulated participants in a single
//! process, talking over the session bus. Runs the seeding ritual, then one
//! augmentation.

use anyhow::Result;
use serde_json::json;
use tokio::time::{timeout, Duration};

use fatepool::gateway::AuthorityGateway;
use fatepool::host::{
    ActionRef, ClassifierChain, FlavorTextClassifier, FixedRoster, NullNarrativeSink, RandDie,
    StaticActions, TagClassifier,
};
use fatepool::logging::{self, obj, v_str, Domain, Level};
use fatepool::seeding::RitualPhase;
use fatepool::service::{AuthorityService, ParticipantClient};
use fatepool::state::{ActionId, Config, ParticipantId};
use fatepool::store::PoolStore;
use fatepool::transport::{Bus, Envelope};

fn classifiers() -> ClassifierChain {
    ClassifierChain::new(vec![
        Box::new(TagClassifier {
            augmentable_tags: vec!["skill-check".to_string()],
            excluded_tags: vec!["damage".to_string()],
        }),
        Box::new(FlavorTextClassifier { keywords: vec!["skill check".to_string()] }),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let bus = Bus::new(cfg.bus_capacity);

    let names = ["alice", "bryn", "casse"];
    let roster = FixedRoster::of(&names);

    let action = ActionRef {
        id: ActionId::new("roll-1"),
        owner: ParticipantId::new("alice"),
        recency: 1,
        original_total: Some(14),
        tags: vec!["skill-check".to_string()],
        flavor: "Perception skill check".to_string(),
    };

    let store = PoolStore::open(&cfg.sqlite_path)?;
    let gateway = AuthorityGateway::new(store, Box::new(roster), &cfg)?;
    let mut service = AuthorityService::new(
        gateway,
        classifiers(),
        Box::new(StaticActions { actions: vec![action.clone()] }),
        Box::new(RandDie),
        Box::new(NullNarrativeSink),
        bus.clone(),
    );

    let mut clients: Vec<ParticipantClient> = names
        .iter()
        .map(|name| ParticipantClient::new(ParticipantId::new(*name), classifiers(), bus.clone()))
        .collect();

    let mut inbox = bus.subscribe();
    let mut watcher = bus.subscribe();

    // Ritual: each participant answers the announcement with a seed.
    service.start_ritual()?;
    for (client, value) in clients.iter().zip([2u8, 5, 6]) {
        client.send_seed(value)?;
    }
    while service.ritual_phase() != RitualPhase::Idle {
        let envelope = timeout(Duration::from_secs(2), inbox.recv()).await??;
        service.handle(envelope)?;
    }
    while let Ok(envelope) = watcher.try_recv() {
        for client in &mut clients {
            client.apply_broadcast(&envelope);
        }
    }
    logging::log(
        Level::Info,
        Domain::System,
        "ritual_done",
        obj(&[
            ("player_pool", json!(clients[0].view().player_pool_count)),
            ("arbiter_pool", json!(clients[0].view().arbiter_pool_count)),
        ]),
    );

    // Augmentation: alice spends a player die on her latest roll.
    service.observe_action(&action);
    clients[0].observe_action(&action);
    clients[0].request_augment(&action)?;

    loop {
        let envelope = timeout(Duration::from_secs(2), inbox.recv()).await??;
        let was_request = matches!(envelope, Envelope::RequestAugment { .. });
        service.handle(envelope)?;
        if was_request {
            break;
        }
    }
    while let Ok(envelope) = watcher.try_recv() {
        for client in &mut clients {
            client.apply_broadcast(&envelope);
        }
    }

    let view = clients[0].view();
    logging::log(
        Level::Info,
        Domain::System,
        "session_done",
        obj(&[
            ("player_pool", json!(view.player_pool_count)),
            ("arbiter_pool", json!(view.arbiter_pool_count)),
            ("augmented", v_str(&action.id.0)),
        ]),
    );
    Ok(())
}
