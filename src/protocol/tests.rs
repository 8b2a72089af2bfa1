//! Runtime-level protocol tests.

use super::*;
use crate::config::{AttemptPeriods, SimConfig};
use crate::detector::TimingWindow;
use crate::error::HeraldError;
use crate::event::EventType;
use crate::link::{HeraldedLink, LinkGeometry, SideDelays};
use crate::memory::{Program, QubitId};
use crate::message::{Header, HeraldOutcome, Message, Photon};
use crate::runtime::Runtime;
use crate::scenario::{LinkScenario, TeleportScenario};
use crate::signal::SignalLabel;
use crate::simulation::Simulation;
use crate::substrate::{Gate, OutcomeCode, RandomSubstrate, ScriptedSubstrate, SlotRef, SubstrateCall};
use crate::time::VirtualTime;
use crate::topology::{Delay, PortId, PortOwner, TopologyBuilder};
use crate::wait::{Condition, TimerId, WaitSet, Wake, WakePayload};

// ── Helpers ───────────────────────────────────────────────────────────

type StartFn = Box<dyn FnMut(&mut ProtocolContext) -> HeraldResult<()>>;
type ResumeFn = Box<dyn FnMut(&mut ProtocolContext, &Wake) -> HeraldResult<()>>;

/// A protocol driven by closures, recording every wake.
struct Probe {
    on_start: StartFn,
    on_resume: ResumeFn,
    wakes: Vec<Wake>,
}

impl Probe {
    fn new(on_start: impl FnMut(&mut ProtocolContext) -> HeraldResult<()> + 'static) -> Self {
        Probe {
            on_start: Box::new(on_start),
            on_resume: Box::new(|_, _| Ok(())),
            wakes: Vec::new(),
        }
    }

    fn then(mut self, on_resume: impl FnMut(&mut ProtocolContext, &Wake) -> HeraldResult<()> + 'static) -> Self {
        self.on_resume = Box::new(on_resume);
        self
    }
}

impl Protocol for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    fn start(&mut self, ctx: &mut ProtocolContext) -> HeraldResult<()> {
        (self.on_start)(ctx)
    }

    fn resume(&mut self, ctx: &mut ProtocolContext, wake: Wake) -> HeraldResult<()> {
        let result = (self.on_resume)(ctx, &wake);
        self.wakes.push(wake);
        result
    }

    fn reset(&mut self) {
        self.wakes.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One node with a single self-looped port, enough to host probes.
fn single_node_runtime(positions: usize) -> (Runtime, crate::topology::NodeId) {
    let mut b = TopologyBuilder::new();
    let node = b.add_node("Alice", positions);
    let p = b.add_port(node, "loop").unwrap();
    b.connect(p, p, crate::topology::ChannelKind::Classical, Delay::ZERO).unwrap();
    (Runtime::new(b.build().unwrap(), Box::new(ScriptedSubstrate::new())), node)
}

fn link_config(period: f64, time_window_ns: f64) -> SimConfig {
    SimConfig {
        // 2 m to the midpoint on each side: 10 ns each way.
        distance_km: 0.004,
        time_window_ns,
        dead_time_ns: 0.0,
        attempt_period_ns: AttemptPeriods { a: period, b: period },
        pairs: 2,
        horizon_ns: Some(5000),
        ..SimConfig::link_defaults()
    }
}

fn photon(id: u64) -> Message {
    Message::Qubit(Photon {
        qubit: QubitId::new(id),
        emitted_at: VirtualTime::ZERO,
    })
}

// ── Detector through the runtime ──────────────────────────────────────

/// Both endpoints wired to a 20 ns window with 5 ns reply channels;
/// photons are injected straight onto the forward channels.
fn detector_fixture() -> (Simulation, Runtime, HeraldedLink) {
    let mut b = TopologyBuilder::new();
    let alice = b.add_node("Alice", 1);
    let bob = b.add_node("Bob", 1);
    let ports = [b.add_port(alice, "q").unwrap(), b.add_port(bob, "q").unwrap()];
    let side = SideDelays {
        forward: Delay::ZERO,
        reverse: Delay::from_ns(5.0).unwrap(),
    };
    let link = HeraldedLink::install(
        &mut b,
        "midpoint",
        ports,
        LinkGeometry { a: side, b: side },
        TimingWindow::new(20.0, 0.0).unwrap(),
    )
    .unwrap();
    let substrate = ScriptedSubstrate::new().with_outcomes([OutcomeCode::CLICK_B]);
    let runtime = Runtime::new(b.build().unwrap(), Box::new(substrate));
    (Simulation::new(), runtime, link)
}

fn inject(sim: &mut Simulation, runtime: &Runtime, link: &HeraldedLink, side: usize, at: u64) {
    let inputs = runtime.detector(link.detector).unwrap().ports();
    sim.schedule(
        VirtualTime::new(at),
        EventType::Delivery {
            channel: link.forward[side],
            port: inputs[side],
            message: photon(side as u64),
        },
    )
    .unwrap();
}

fn buffered(runtime: &Runtime, port: PortId) -> Option<Message> {
    runtime.topology().port(port).unwrap().peek().cloned()
}

#[test]
fn test_arrival_inside_window_pairs_both_senders() {
    let (mut sim, mut runtime, link) = detector_fixture();
    inject(&mut sim, &runtime, &link, 0, 10);
    inject(&mut sim, &runtime, &link, 1, 25);
    sim.run(&mut runtime).unwrap();

    let [a, b] = link.endpoints;
    let expected = |port| {
        Some(Message::Herald(crate::message::HeraldMessage::outcome(port, OutcomeCode::CLICK_B)))
    };
    assert_eq!(buffered(&runtime, a), expected(a));
    assert_eq!(buffered(&runtime, b), expected(b));
    // Classified at 30, replies 5 ns later.
    assert_eq!(sim.current_time(), VirtualTime::new(35));
    let stats = runtime.detector(link.detector).unwrap().stats();
    assert_eq!((stats.cycles, stats.both_arrived, stats.single_arrivals), (1, 1, 0));
}

#[test]
fn test_arrival_after_window_is_a_separate_cycle() {
    let (mut sim, mut runtime, link) = detector_fixture();
    inject(&mut sim, &runtime, &link, 0, 10);
    inject(&mut sim, &runtime, &link, 1, 31);
    let [a, b] = link.endpoints;

    sim.run_until(VirtualTime::new(40), &mut runtime).unwrap();
    let timeout = |m: Option<Message>| match m {
        Some(Message::Herald(h)) => h.header == Header::Error && h.outcome_code == HeraldOutcome::Timeout,
        _ => false,
    };
    assert!(timeout(buffered(&runtime, a)));
    assert_eq!(buffered(&runtime, b), None);

    // B's own window closes at 51; its timeout lands at 56.
    sim.run(&mut runtime).unwrap();
    assert!(timeout(buffered(&runtime, b)));
    let stats = runtime.detector(link.detector).unwrap().stats();
    assert_eq!((stats.cycles, stats.both_arrived, stats.single_arrivals), (2, 0, 2));
    let arrivals = runtime
        .substrate::<ScriptedSubstrate>()
        .unwrap()
        .calls()
        .iter()
        .filter(|c| matches!(c, SubstrateCall::Arrivals(_)))
        .count();
    assert_eq!(arrivals, 0);
}

#[test]
fn test_arrival_exactly_at_close_is_late() {
    let (mut sim, mut runtime, link) = detector_fixture();
    inject(&mut sim, &runtime, &link, 0, 10);
    inject(&mut sim, &runtime, &link, 1, 30);
    sim.run(&mut runtime).unwrap();
    let stats = runtime.detector(link.detector).unwrap().stats();
    assert_eq!((stats.both_arrived, stats.single_arrivals), (0, 2));
}

#[test]
fn test_herald_after_deadline_is_dropped_not_reported() {
    let (mut sim, mut runtime, link) = detector_fixture();
    let port = link.endpoints[0];
    let PortOwner::Node(alice) = runtime.topology().port(port).unwrap().owner else {
        panic!("endpoint not on a node");
    };
    // Emit at x03, herald back at x28, deadline at x13.
    let mhp = MidpointHeralding::new(
        "mhp",
        PhysicalConfig {
            port,
            emit_position: 0,
            period_ns: 100,
            reply_timeout_ns: 10,
            upstream: None,
        },
    )
    .unwrap();
    let id = runtime.register(Some(alice), Box::new(mhp)).unwrap();
    let fails = runtime.subscribe(id, SignalLabel::Fail);
    let successes = runtime.subscribe(id, SignalLabel::Success);
    runtime.start(&mut sim, id).unwrap();
    sim.run_until(VirtualTime::new(1000), &mut runtime).unwrap();

    let attempts = runtime.protocol::<MidpointHeralding>(id).unwrap().attempts();
    assert_eq!(attempts, 9);
    let reported = runtime.stream(fails);
    assert_eq!(reported.len() as u64, attempts);
    assert!(reported
        .iter()
        .all(|e| matches!(e.result, crate::signal::SignalResult::NoReply { .. })));
    assert!(runtime.stream(successes).is_empty());
}

// ── Link layer ────────────────────────────────────────────────────────

#[test]
fn test_one_success_per_accepted_double_click() {
    let substrate = ScriptedSubstrate::new().with_outcomes([
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::NO_CLICK,
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::CLICK_A,
    ]);
    let mut scenario = LinkScenario::build(&link_config(500.0, 20.0), Box::new(substrate)).unwrap();
    let summary = scenario.run().unwrap();

    // Tick 500, emit 503, detector 513..533, herald 543, swap done 547.
    let times = vec![VirtualTime::new(547), VirtualTime::new(1547)];
    assert_eq!(summary.successes, vec![times.clone(), times]);

    for g in scenario.generation {
        let egp = scenario.runtime.protocol::<EntanglementGeneration>(g).unwrap();
        let slots: Vec<usize> = egp.successes().iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![1, 2]);
        assert!(egp.failures() >= 2);
    }
    // Composite fires once per pair of child successes.
    let composite = scenario.runtime.protocol::<CompositeProtocol>(scenario.composite).unwrap();
    assert_eq!(composite.round(), 2);
}

#[test]
fn test_zero_length_link_pairs_photons() {
    let substrate = ScriptedSubstrate::new().with_outcomes([
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::NO_CLICK,
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::CLICK_A,
    ]);
    let config = SimConfig {
        distance_km: 0.0,
        ..link_config(500.0, 20.0)
    };
    let mut scenario = LinkScenario::build(&config, Box::new(substrate)).unwrap();
    let summary = scenario.run().unwrap();

    // Emit 503, both photons land at once, herald 523, swap done 527.
    let times = vec![VirtualTime::new(527), VirtualTime::new(1527)];
    assert_eq!(summary.successes, vec![times.clone(), times]);
    let stats = scenario.runtime.detector(scenario.link.detector).unwrap().stats();
    assert!(stats.both_arrived >= 3);
}

#[test]
fn test_reply_timeout_shorter_than_round_trip_rejected() {
    // 10 ns out, 20 ns window, 10 ns back.
    for timeout in [0.3, 15.0, 40.0] {
        let config = SimConfig {
            reply_timeout_ns: Some(timeout),
            ..link_config(500.0, 20.0)
        };
        let err = LinkScenario::build(&config, Box::new(ScriptedSubstrate::new())).err();
        assert!(matches!(err, Some(HeraldError::InvalidConfig(_))), "timeout {} accepted", timeout);
    }
}

#[test]
fn test_tight_reply_timeout_keeps_every_double_click() {
    let substrate = ScriptedSubstrate::new().with_outcomes([
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::NO_CLICK,
        OutcomeCode::DOUBLE_CLICK,
        OutcomeCode::CLICK_A,
    ]);
    let config = SimConfig {
        reply_timeout_ns: Some(41.0),
        ..link_config(500.0, 20.0)
    };
    let mut scenario = LinkScenario::build(&config, Box::new(substrate)).unwrap();
    let summary = scenario.run().unwrap();

    let times = vec![VirtualTime::new(547), VirtualTime::new(1547)];
    assert_eq!(summary.successes, vec![times.clone(), times]);
}

#[test]
fn test_single_arrivals_never_succeed() {
    // A zero-length window can never pair two photons.
    let substrate = ScriptedSubstrate::new().with_default_outcome(OutcomeCode::DOUBLE_CLICK);
    let config = SimConfig {
        horizon_ns: Some(20_000),
        ..link_config(500.0, 0.0)
    };
    let mut scenario = LinkScenario::build(&config, Box::new(substrate)).unwrap();
    let summary = scenario.run().unwrap();

    assert_eq!(summary.total_successes(), 0);
    for g in scenario.generation {
        let egp = scenario.runtime.protocol::<EntanglementGeneration>(g).unwrap();
        assert!(egp.failures() > 10);
        assert_eq!(egp.state(), GenerationState::Attempting { slot: 1 });
    }
    let stats = scenario.runtime.detector(scenario.link.detector).unwrap().stats();
    assert_eq!(stats.both_arrived, 0);
    assert!(stats.single_arrivals > 20);
}

#[test]
fn test_mismatched_periods_reproduce_irregular_successes() {
    let config = SimConfig {
        attempt_period_ns: AttemptPeriods { a: 500.0, b: 470.0 },
        horizon_ns: Some(200_000),
        ..link_config(500.0, 20.0)
    };
    let substrate = ScriptedSubstrate::new().with_default_outcome(OutcomeCode::DOUBLE_CLICK);
    let mut scenario = LinkScenario::build(&config, Box::new(substrate)).unwrap();
    let summary = scenario.run().unwrap();

    let a = &summary.successes[0];
    assert!(!a.is_empty());
    let gaps: Vec<u64> = a.windows(2).map(|w| w[1].ticks() - w[0].ticks()).collect();
    assert!(gaps.iter().any(|g| *g != gaps[0]) || gaps.len() < 2);
    let attempts = scenario.runtime.protocol::<MidpointHeralding>(scenario.physical[0]).unwrap().attempts();
    assert!(attempts as usize > a.len());
}

#[test]
fn test_link_run_is_deterministic() {
    let config = SimConfig {
        horizon_ns: Some(100_000),
        ..link_config(500.0, 20.0)
    };
    let run = || {
        let mut s = LinkScenario::build(&config, Box::new(RandomSubstrate::new(7))).unwrap();
        s.run().unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert_ne!(first.digest, 0);
}

#[test]
fn test_stop_cancels_outstanding_timers() {
    let substrate = ScriptedSubstrate::new().with_default_outcome(OutcomeCode::DOUBLE_CLICK);
    let mut s = LinkScenario::build(&link_config(500.0, 20.0), Box::new(substrate)).unwrap();
    s.runtime.start(&mut s.sim, s.composite).unwrap();
    s.sim.run_until(VirtualTime::new(100), &mut s.runtime).unwrap();
    assert!(s.runtime.is_running(s.physical[0]));
    assert!(s.runtime.pending_timers() > 0);

    s.runtime.stop(&mut s.sim, s.composite).unwrap();
    assert_eq!(s.runtime.pending_timers(), 0);
    for id in s.physical.iter().chain(&s.generation) {
        assert!(!s.runtime.is_running(*id));
        assert!(!s.runtime.is_waiting(*id));
    }

    s.sim.run_until(VirtualTime::new(5000), &mut s.runtime).unwrap();
    assert_eq!(s.runtime.signals().count(s.generation[0], SignalLabel::Success), 0);
    let emitted = s
        .runtime
        .protocol::<MidpointHeralding>(s.physical[0])
        .unwrap()
        .attempts();
    assert_eq!(emitted, 0);
}

#[test]
fn test_long_run_signal_log_stays_bounded() {
    // Every attempt fails, so each side emits a REQUEST and a FAIL per period.
    let config = SimConfig {
        horizon_ns: Some(1_000_000),
        ..link_config(500.0, 0.0)
    };
    let mut s = LinkScenario::build(&config, Box::new(ScriptedSubstrate::new())).unwrap();
    s.run().unwrap();

    let fails = s.runtime.signals().count(s.physical[0], SignalLabel::Fail);
    assert!(fails > 1500);
    let retained = s.runtime.signals().emissions().len();
    assert!(retained < 3 * crate::signal::RECENT_EMISSIONS, "retained {}", retained);
    assert!(s.sim.trace().is_none());
    assert_eq!(s.runtime.unclaimed_completions(), 0);
}

#[test]
fn test_stop_drops_unclaimed_completions() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = runtime
        .register(
            Some(node),
            Box::new(Probe::new(|ctx| {
                // Issue a program but only ever wait on a timer.
                ctx.execute(&Program::new("init").init(0))?;
                let t = ctx.timer_after(100)?;
                ctx.wait_any(WaitSet::any([Condition::Timer(t)]))
            })),
        )
        .unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, probe).unwrap();
    sim.run_until(VirtualTime::new(10), &mut runtime).unwrap();
    assert_eq!(runtime.unclaimed_completions(), 1);

    runtime.stop(&mut sim, probe).unwrap();
    assert_eq!(runtime.unclaimed_completions(), 0);
    assert_eq!(runtime.pending_timers(), 0);
}

#[test]
fn test_completion_after_stop_is_not_kept() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = runtime
        .register(
            Some(node),
            Box::new(Probe::new(|ctx| {
                ctx.execute(&Program::new("init").init(0))?;
                Ok(())
            })),
        )
        .unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, probe).unwrap();
    // Start dispatched at 0; the init finishes at 3.
    sim.run_until(VirtualTime::new(1), &mut runtime).unwrap();
    runtime.stop(&mut sim, probe).unwrap();
    sim.run(&mut runtime).unwrap();

    assert_eq!(runtime.unclaimed_completions(), 0);
    assert_eq!(runtime.memory(node).unwrap().busy_with(0).unwrap(), None);
}

// ── Teleportation ─────────────────────────────────────────────────────

fn teleport_once(m1: u8, m2: u8) -> (TeleportScenario, Vec<(Gate, VirtualTime)>) {
    let config = SimConfig {
        rounds: 1,
        ..SimConfig::teleport_defaults()
    };
    let substrate = ScriptedSubstrate::new().with_bits([m1, m2]);
    let mut s = TeleportScenario::build(&config, Box::new(substrate)).unwrap();
    let summary = s.run().unwrap();
    assert_eq!(summary.total_successes(), 1);
    let issued = s.runtime.protocol::<Correction>(s.bob).unwrap().issued().to_vec();
    (s, issued)
}

#[test]
fn test_correction_truth_table_through_runtime() {
    let cases = [
        ((0, 0), vec![]),
        ((0, 1), vec![Gate::X]),
        ((1, 0), vec![Gate::Z]),
        ((1, 1), vec![Gate::Z, Gate::X]),
    ];
    for ((m1, m2), expected) in cases {
        let (s, issued) = teleport_once(m1, m2);
        let gates: Vec<Gate> = issued.iter().map(|(g, _)| *g).collect();
        assert_eq!(gates, expected, "bits ({}, {})", m1, m2);

        // The substrate saw exactly the same gates on Bob's qubit.
        let slot = SlotRef {
            node: s.nodes[1],
            position: teleport::RECEIVER_PAIR_POSITION,
        };
        assert_eq!(s.runtime.substrate::<ScriptedSubstrate>().unwrap().gates_on(slot), expected);
    }
}

#[test]
fn test_second_correction_waits_for_first() {
    let (_, issued) = teleport_once(1, 1);
    // Pair lands at 10, Bell measurement 10..29, bits arrive at 49.
    assert_eq!(issued, vec![(Gate::Z, VirtualTime::new(49)), (Gate::X, VirtualTime::new(50))]);
}

#[test]
fn test_teleport_rounds_and_determinism() {
    let config = SimConfig {
        rounds: 20,
        ..SimConfig::teleport_defaults()
    };
    let run = || {
        let mut s = TeleportScenario::build(&config, Box::new(RandomSubstrate::new(3))).unwrap();
        let summary = s.run().unwrap();
        let alice_rounds = s.runtime.protocol::<BellMeasurement>(s.alice).unwrap().rounds();
        (summary, alice_rounds)
    };
    let (first, alice_rounds) = run();
    assert_eq!(first.total_successes(), 20);
    assert_eq!(alice_rounds, 20);
    // Round k: pair at 100k, bits arrive at 100k + 49, at most two gates.
    for (k, at) in first.successes[0].iter().enumerate() {
        let start = 100 * k as u64 + 49;
        assert!((start..=start + 2).contains(&at.ticks()), "round {} done at {}", k, at);
    }
    assert_eq!(run().0, first);
}

// ── Waits and signals ─────────────────────────────────────────────────

#[test]
fn test_first_ready_branch_wins_and_losers_are_cancelled() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = Probe::new(|ctx| {
        let late = ctx.timer_at(VirtualTime::new(20))?;
        let early = ctx.timer_at(VirtualTime::new(10))?;
        ctx.wait_any(WaitSet::any([Condition::Timer(late), Condition::Timer(early)]))
    });
    let id = runtime.register(Some(node), Box::new(probe)).unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, id).unwrap();
    sim.run(&mut runtime).unwrap();

    let probe = runtime.protocol::<Probe>(id).unwrap();
    assert_eq!(probe.wakes.len(), 1);
    assert_eq!(probe.wakes[0].index, 1);
    assert_eq!(probe.wakes[0].at, VirtualTime::new(10));
    assert_eq!(runtime.pending_timers(), 0);
    // The cancelled timer never dispatched.
    assert_eq!(sim.current_time(), VirtualTime::new(10));
}

#[test]
fn test_already_satisfied_wait_takes_lowest_index() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = Probe::new(|ctx| {
        ctx.timer_at(VirtualTime::new(10))?;
        ctx.timer_at(VirtualTime::new(10))?;
        let gate = ctx.timer_at(VirtualTime::new(20))?;
        ctx.wait_any(WaitSet::any([Condition::Timer(gate)]))
    })
    .then(|ctx, wake| {
        // Timer ids are allocated in order: 0 and 1 fired at 10, 2 is the gate.
        let (a, b, gate) = (TimerId::new(0), TimerId::new(1), TimerId::new(2));
        if wake.payloads == vec![WakePayload::Timer(gate)] {
            ctx.wait_any(WaitSet::any([Condition::Timer(b), Condition::Timer(a)]))?;
        }
        Ok(())
    });
    let id = runtime.register(Some(node), Box::new(probe)).unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, id).unwrap();
    sim.run(&mut runtime).unwrap();

    let probe = runtime.protocol::<Probe>(id).unwrap();
    assert_eq!(probe.wakes.len(), 2);
    assert_eq!(probe.wakes[1].payloads, vec![WakePayload::Timer(TimerId::new(1))]);
    assert_eq!(probe.wakes[1].index, 0);
    assert_eq!(probe.wakes[1].at, VirtualTime::new(20));
    assert!(!runtime.is_waiting(id));
}

#[test]
fn test_signal_emitted_before_wait_is_not_lost() {
    let (mut runtime, node) = single_node_runtime(1);
    let emitter = runtime
        .register(
            Some(node),
            Box::new(Probe::new(|ctx| {
                ctx.emit_signal(SignalLabel::Success, crate::signal::SignalResult::Composite { round: 1 })?;
                Ok(())
            })),
        )
        .unwrap();
    let listener = runtime
        .register(
            None,
            Box::new(Probe::new(move |ctx| {
                // Suspend only after the emitter has already run.
                let t = ctx.timer_after(5)?;
                ctx.wait_any(WaitSet::any([Condition::Timer(t)]))
            })
            .then(move |ctx, wake| {
                if wake.is_timer() {
                    ctx.await_signal(emitter, SignalLabel::Success)?;
                }
                Ok(())
            })),
        )
        .unwrap();

    let mut sim = Simulation::new();
    runtime.start(&mut sim, listener).unwrap();
    runtime.start(&mut sim, emitter).unwrap();
    sim.run(&mut runtime).unwrap();

    let probe = runtime.protocol::<Probe>(listener).unwrap();
    assert_eq!(probe.wakes.len(), 2);
    let emission = probe.wakes[1].signal().unwrap();
    assert_eq!(emission.owner, emitter);
    assert_eq!(emission.at, VirtualTime::ZERO);
}

#[test]
fn test_port_input_wakes_waiter_with_message() {
    let (mut runtime, node) = single_node_runtime(1);
    let port = runtime.topology().find_port(node, "loop").unwrap();
    let probe = Probe::new(move |ctx| {
        ctx.send(port, Message::Corrections { m1: 1, m2: 0 })?;
        ctx.wait_any(WaitSet::any([Condition::PortInput(port)]))
    });
    let id = runtime.register(Some(node), Box::new(probe)).unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, id).unwrap();
    sim.run(&mut runtime).unwrap();

    let probe = runtime.protocol::<Probe>(id).unwrap();
    assert_eq!(probe.wakes[0].message(), Some(&Message::Corrections { m1: 1, m2: 0 }));
    // Consumed by the wake.
    assert!(!runtime.topology().port(port).unwrap().has_input());
}

// ── Preconditions ─────────────────────────────────────────────────────

#[test]
fn test_gate_on_empty_slot_aborts_run() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = Probe::new(|ctx| {
        ctx.execute(&Program::correction(Gate::X, 0))?;
        Ok(())
    });
    let id = runtime.register(Some(node), Box::new(probe)).unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, id).unwrap();
    let err = sim.run(&mut runtime).unwrap_err();
    assert_eq!(err, HeraldError::EmptySlot { node, position: 0 });
}

#[test]
fn test_concurrent_ops_on_one_slot_abort_run() {
    let (mut runtime, node) = single_node_runtime(1);
    let probe = Probe::new(|ctx| {
        ctx.execute(&Program::new("init").init(0))?;
        ctx.execute(&Program::correction(Gate::Z, 0))?;
        Ok(())
    });
    let id = runtime.register(Some(node), Box::new(probe)).unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, id).unwrap();
    assert!(matches!(
        sim.run(&mut runtime),
        Err(HeraldError::SlotBusy { position: 0, .. })
    ));
}

#[test]
fn test_double_wait_and_unbound_memory_are_rejected() {
    let (mut runtime, node) = single_node_runtime(1);
    let doubled = runtime
        .register(
            Some(node),
            Box::new(Probe::new(|ctx| {
                let t = ctx.timer_after(1)?;
                ctx.wait_any(WaitSet::any([Condition::Timer(t)]))?;
                ctx.wait_any(WaitSet::any([Condition::Timer(t)]))
            })),
        )
        .unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, doubled).unwrap();
    assert_eq!(sim.run(&mut runtime), Err(HeraldError::AlreadyWaiting(doubled)));

    let (mut runtime, _) = single_node_runtime(1);
    let unbound = runtime
        .register(
            None,
            Box::new(Probe::new(|ctx| {
                ctx.execute(&Program::new("init").init(0))?;
                Ok(())
            })),
        )
        .unwrap();
    let mut sim = Simulation::new();
    runtime.start(&mut sim, unbound).unwrap();
    assert_eq!(sim.run(&mut runtime), Err(HeraldError::NoNodeBinding(unbound)));
}

#[test]
fn test_protocol_downcast_mismatch() {
    let (mut runtime, node) = single_node_runtime(1);
    let id = runtime
        .register(Some(node), Box::new(Probe::new(|_| Ok(()))))
        .unwrap();
    assert!(matches!(
        runtime.protocol::<Correction>(id),
        Err(HeraldError::ProtocolTypeMismatch { .. })
    ));
    assert!(matches!(
        runtime.protocol::<Probe>(ProtocolId::new(9)),
        Err(HeraldError::UnknownProtocol(_))
    ));
}
