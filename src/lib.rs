//! # Herald: deterministic simulation of heralded entanglement
//!
//! A discrete-event kernel for quantum-network link protocols. Two nodes
//! emit photons toward a midpoint detector that heralds entanglement; a
//! layered stack of cooperative protocols turns heralds into stored pairs
//! and stored pairs into teleported states. No threads and no wall-clock
//! time: every run is a pure function of its configuration and seed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  Runtime                                   │ ← protocols, waits, signals
//! │  ┌──────────────┐  ┌────────────────────┐  │
//! │  │  Protocols   │  │  Topology          │  │
//! │  │  composite   │  │  nodes + memory    │  │
//! │  │  generation  │  │  ports / channels  │  │
//! │  │  physical    │  │  detector, source  │  │
//! │  │  teleport    │  └────────────────────┘  │
//! │  └──────────────┘  ┌────────────────────┐  │
//! │                    │  Substrate         │  │ ← outcomes + latencies
//! │                    └────────────────────┘  │
//! └────────────────────┬───────────────────────┘
//!                      │ EventHandler
//! ┌────────────────────▼───────────────────────┐
//! │  Simulation  → Scheduler → Events → Trace  │ ← virtual clock, ns ticks
//! └────────────────────────────────────────────┘
//! ```
//!
//! Start with [`scenario::LinkScenario`] or [`scenario::TeleportScenario`].

pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod link;
pub mod memory;
pub mod message;
pub mod protocol;
pub mod runtime;
pub mod scenario;
pub mod scheduler;
pub mod signal;
pub mod simulation;
pub mod source;
pub mod substrate;
pub mod time;
pub mod topology;
pub mod trace;
pub mod wait;

// Re-exports for convenience.
pub use config::SimConfig;
pub use error::{HeraldError, HeraldResult};
pub use event::{Event, EventId, EventType};
pub use protocol::{Protocol, ProtocolId};
pub use runtime::{ProtocolContext, Runtime};
pub use scenario::{LinkScenario, RunSummary, TeleportScenario};
pub use scheduler::Scheduler;
pub use simulation::{EventHandler, Simulation, SimulationContext};
pub use substrate::{RandomSubstrate, ScriptedSubstrate, Substrate};
pub use time::VirtualTime;
