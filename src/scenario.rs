//! Ready-made scenarios.
//!
//! Each builder wires a topology, registers the protocols and returns a
//! simulation + runtime pair ready to run. Event traces are off; call
//! `scenario.sim.enable_trace()` before running to keep one.
//!
//! ```rust
//! use herald::config::SimConfig;
//! use herald::scenario::LinkScenario;
//! use herald::substrate::RandomSubstrate;
//!
//! let config = SimConfig { rounds: 50, ..SimConfig::link_defaults() };
//! let mut scenario = LinkScenario::build(&config, Box::new(RandomSubstrate::new(config.seed))).unwrap();
//! let summary = scenario.run().unwrap();
//! assert_eq!(summary.end_time.ticks(), 500 * 50);
//! ```

use serde::Serialize;
use tracing::info;

use crate::config::SimConfig;
use crate::error::{HeraldError, HeraldResult};
use crate::link::{HeraldedLink, LinkGeometry};
use crate::protocol::{
    BellMeasurement, CompositeProtocol, Correction, EntanglementGeneration, GenerationConfig, MidpointHeralding,
    PhysicalConfig, ProtocolId,
};
use crate::protocol::teleport::{RECEIVER_PAIR_POSITION, SENDER_PAIR_POSITION};
use crate::runtime::Runtime;
use crate::signal::{SignalLabel, SubscriptionId};
use crate::simulation::Simulation;
use crate::substrate::Substrate;
use crate::time::VirtualTime;
use crate::topology::{ChannelKind, Delay, NodeId, TopologyBuilder};

/// What a scenario run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scenario: &'static str,
    pub end_time: VirtualTime,
    pub events: u64,
    /// SUCCESS times per watched protocol, in watch order.
    pub successes: Vec<Vec<VirtualTime>>,
    pub digest: u64,
}

impl RunSummary {
    pub fn total_successes(&self) -> usize {
        self.successes.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "scenario:  {}", self.scenario)?;
        writeln!(f, "end time:  {}", self.end_time)?;
        writeln!(f, "events:    {}", self.events)?;
        for (i, times) in self.successes.iter().enumerate() {
            let shown: Vec<String> = times.iter().take(10).map(|t| t.ticks().to_string()).collect();
            let more = if times.len() > 10 { ", ..." } else { "" };
            writeln!(f, "successes[{}]: {} [{}{}]", i, times.len(), shown.join(", "), more)?;
        }
        write!(f, "digest:    {:016x}", self.digest)
    }
}

fn collect(runtime: &mut Runtime, watched: &[SubscriptionId]) -> Vec<Vec<VirtualTime>> {
    watched
        .iter()
        .map(|sub| runtime.stream(*sub).into_iter().map(|e| e.at).collect())
        .collect()
}

// ── Link layer ────────────────────────────────────────────────────────

/// Alice and Bob generating entanglement over a heralded midpoint link.
pub struct LinkScenario {
    pub sim: Simulation,
    pub runtime: Runtime,
    pub nodes: [NodeId; 2],
    pub link: HeraldedLink,
    pub physical: [ProtocolId; 2],
    pub generation: [ProtocolId; 2],
    pub composite: ProtocolId,
    horizon: VirtualTime,
    watched: Vec<SubscriptionId>,
}

impl LinkScenario {
    pub const EMIT_POSITION: usize = 0;

    pub fn build(config: &SimConfig, substrate: Box<dyn Substrate>) -> HeraldResult<Self> {
        config.validate()?;
        let periods = config.attempt_periods()?;
        let window = config.timing_window()?;

        let mut b = TopologyBuilder::new();
        let positions = config.pairs + 1;
        let nodes = [b.add_node("Alice", positions), b.add_node("Bob", positions)];
        for node in nodes {
            b.set_noise(node, config.noise())?;
        }
        let ports = [b.add_port(nodes[0], "q_link")?, b.add_port(nodes[1], "q_link")?];
        let half = config.distance_km / 2.0;
        let link = HeraldedLink::install(
            &mut b,
            "HeraldedConnection",
            ports,
            LinkGeometry::from_lengths(half, half)?,
            window,
        )?;
        let mut runtime = Runtime::new(b.build()?, substrate);

        let storage: Vec<usize> = (1..positions).collect();
        let names = [("Alice.mhp", "Alice.egp"), ("Bob.mhp", "Bob.egp")];
        let mut physical = [ProtocolId::new(0); 2];
        let mut generation = [ProtocolId::new(0); 2];
        for side in 0..2 {
            let period = if side == 0 { periods.0 } else { periods.1 };
            let reply_timeout_ns = match config.reply_timeout_ns {
                Some(t) => {
                    // A reply lands at most one round trip after emission.
                    let minimum = link.reply_timeout(side, 1);
                    let timeout = t.round() as u64;
                    if timeout < minimum {
                        return Err(HeraldError::InvalidConfig(format!(
                            "reply_timeout_ns {} is shorter than the {} ns round trip of side {}",
                            t,
                            minimum,
                            side
                        )));
                    }
                    timeout
                }
                None => link.reply_timeout(side, period),
            };
            let mhp = MidpointHeralding::new(
                names[side].0,
                PhysicalConfig {
                    port: ports[side],
                    emit_position: Self::EMIT_POSITION,
                    period_ns: period,
                    reply_timeout_ns,
                    upstream: None,
                },
            )?;
            physical[side] = runtime.register(Some(nodes[side]), Box::new(mhp))?;
            let egp = EntanglementGeneration::new(
                names[side].1,
                GenerationConfig::new(physical[side], Self::EMIT_POSITION, storage.clone()),
            )?;
            generation[side] = runtime.register(Some(nodes[side]), Box::new(egp))?;
            runtime
                .protocol_mut::<MidpointHeralding>(physical[side])?
                .set_upstream(Some(generation[side]));
        }
        let composite = runtime.register(
            None,
            Box::new(CompositeProtocol::new("SimpleLinkProtocol", generation.to_vec())),
        )?;
        let watched = generation
            .iter()
            .map(|g| runtime.subscribe(*g, SignalLabel::Success))
            .collect();

        let horizon = VirtualTime::new(
            config
                .horizon_ns
                .unwrap_or(periods.0.max(periods.1).saturating_mul(config.rounds)),
        );
        let sim = Simulation::new();

        Ok(LinkScenario {
            sim,
            runtime,
            nodes,
            link,
            physical,
            generation,
            composite,
            horizon,
            watched,
        })
    }

    pub fn horizon(&self) -> VirtualTime {
        self.horizon
    }

    /// Start the composite and run to the horizon.
    pub fn run(&mut self) -> HeraldResult<RunSummary> {
        info!(horizon = %self.horizon, "link scenario starting");
        self.runtime.start(&mut self.sim, self.composite)?;
        let events = self.sim.run_until(self.horizon, &mut self.runtime)?;
        let summary = RunSummary {
            scenario: "link",
            end_time: self.sim.current_time(),
            events,
            successes: collect(&mut self.runtime, &self.watched),
            digest: self.sim.digest(),
        };
        info!(successes = summary.total_successes(), events, "link scenario finished");
        Ok(summary)
    }
}

// ── Teleportation ─────────────────────────────────────────────────────

/// Alice teleporting a prepared state to Bob using pairs from a midpoint
/// source.
pub struct TeleportScenario {
    pub sim: Simulation,
    pub runtime: Runtime,
    pub nodes: [NodeId; 2],
    pub alice: ProtocolId,
    pub bob: ProtocolId,
    horizon: VirtualTime,
    watched: Vec<SubscriptionId>,
}

impl TeleportScenario {
    pub fn build(config: &SimConfig, substrate: Box<dyn Substrate>) -> HeraldResult<Self> {
        config.validate()?;
        let period = config.source_period()?;

        let mut b = TopologyBuilder::new();
        let alice = b.add_node("Alice", 2);
        let bob = b.add_node("Bob", 2);
        b.set_noise(alice, config.noise())?;
        b.set_noise(bob, config.noise())?;

        let alice_qin = b.add_port(alice, "qin_charlie")?;
        let bob_qin = b.add_port(bob, "qin_charlie")?;
        b.forward_to_memory(alice_qin, SENDER_PAIR_POSITION)?;
        b.forward_to_memory(bob_qin, RECEIVER_PAIR_POSITION)?;
        let cout = b.add_port(alice, "cout_bob")?;
        let cin = b.add_port(bob, "cin_alice")?;
        b.connect(cout, cin, ChannelKind::Classical, Delay::fibre(config.distance_km)?)?;

        let (_, source_ports) = b.add_source("Charlie", period)?;
        let half = Delay::fibre(config.distance_km / 2.0)?;
        b.connect(source_ports[0], alice_qin, ChannelKind::Quantum, half)?;
        b.connect(source_ports[1], bob_qin, ChannelKind::Quantum, half)?;

        let mut runtime = Runtime::new(b.build()?, substrate);
        let alice_proto = runtime.register(Some(alice), Box::new(BellMeasurement::new("Alice.bsm", alice_qin, cout)))?;
        let bob_proto = runtime.register(Some(bob), Box::new(Correction::new("Bob.correction", cin, bob_qin)))?;
        let watched = vec![runtime.subscribe(bob_proto, SignalLabel::Success)];

        let horizon = VirtualTime::new(
            config
                .horizon_ns
                .unwrap_or(period.saturating_mul(config.rounds).saturating_add(1)),
        );
        let sim = Simulation::new();

        Ok(TeleportScenario {
            sim,
            runtime,
            nodes: [alice, bob],
            alice: alice_proto,
            bob: bob_proto,
            horizon,
            watched,
        })
    }

    pub fn horizon(&self) -> VirtualTime {
        self.horizon
    }

    /// Start both sides and the source, then run to the horizon.
    pub fn run(&mut self) -> HeraldResult<RunSummary> {
        info!(horizon = %self.horizon, "teleport scenario starting");
        self.runtime.start(&mut self.sim, self.alice)?;
        self.runtime.start(&mut self.sim, self.bob)?;
        self.runtime.start_sources(&mut self.sim)?;
        let events = self.sim.run_until(self.horizon, &mut self.runtime)?;
        let summary = RunSummary {
            scenario: "teleport",
            end_time: self.sim.current_time(),
            events,
            successes: collect(&mut self.runtime, &self.watched),
            digest: self.sim.digest(),
        };
        info!(successes = summary.total_successes(), events, "teleport scenario finished");
        Ok(summary)
    }
}
