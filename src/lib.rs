//! Communal fate-dice pool for tabletop sessions.
//!
//! One pool of dice, split between the arbiter and the players, sized to the
//! number of connected participants. A single authoritative process commits
//! every change; everyone else proposes over the bus and renders broadcast
//! snapshots.
//!
//! ```text
//! ┌─────────────┐ propose  ┌─────────────┐ validate ┌─────────────┐
//! │ participant │─────────►│     bus     │─────────►│   arbiter   │
//! │  (client)   │◄─────────│ (broadcast) │◄─────────│  (gateway)  │
//! └─────────────┘ snapshot └─────────────┘  commit  └──────┬──────┘
//!                                                          ▼
//!                                                   ┌─────────────┐
//!                                                   │  pool store │
//!                                                   └─────────────┘
//! ```

pub mod augment;
pub mod error;
pub mod gateway;
pub mod host;
pub mod invariant;
pub mod logging;
pub mod seeding;
pub mod service;
pub mod state;
pub mod store;
pub mod transport;
