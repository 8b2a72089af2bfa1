//! `Runtime`: owns the topology, the substrate and every protocol, and
//! turns dispatched events into port deliveries, detector cycles and
//! protocol wake-ups.
//!
//! The runtime implements [`EventHandler`], so a run is simply
//! `sim.run_until(horizon, &mut runtime)`.
//!
//! Wait resolution is level-triggered. Whenever something a wait can
//! observe changes (a port buffer fills, a program completes, a signal is
//! emitted, a timer fires), every protocol whose wait mentions it is
//! re-evaluated in registration order. A branch wins once all of its
//! conditions hold against current state; only then are its resources
//! consumed.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace, warn};

use crate::detector::{ArrivalEffect, CycleReport, Detector};
use crate::error::{HeraldError, HeraldResult};
use crate::event::{Event, EventId, EventType};
use crate::memory::{OperationId, Program, QuantumMemory, QubitAllocator, QubitId, SlotState};
use crate::message::{Message, Photon};
use crate::protocol::{Protocol, ProtocolId};
use crate::signal::{Emission, SignalBus, SignalLabel, SignalResult, SubscriptionId};
use crate::simulation::{EventHandler, Simulation, SimulationContext};
use crate::substrate::Substrate;
use crate::time::VirtualTime;
use crate::topology::{ChannelId, DetectorId, NodeId, PortId, PortOwner, Topology};
use crate::wait::{Condition, TimerId, WaitSet, WaitTable, Wake, WakePayload};

// ── Fabric ────────────────────────────────────────────────────────────

/// Everything a protocol may touch through its context.
pub(crate) struct Fabric {
    topology: Topology,
    substrate: Box<dyn Substrate>,
    qubits: QubitAllocator,
    waits: WaitTable,
    signals: SignalBus,
    /// Next unconsumed seq per (listener, owner, label).
    cursors: BTreeMap<(ProtocolId, ProtocolId, SignalLabel), u64>,
    /// Bus position when each protocol was last started.
    floors: BTreeMap<ProtocolId, u64>,
    timers: BTreeMap<TimerId, (ProtocolId, EventId)>,
    fired: BTreeMap<TimerId, ProtocolId>,
    /// Issuer and measurement bits of each program, until consumed.
    in_flight: BTreeMap<OperationId, (ProtocolId, Vec<u8>)>,
    completed: BTreeMap<OperationId, (ProtocolId, Vec<u8>)>,
    running: BTreeSet<ProtocolId>,
    start_events: BTreeMap<ProtocolId, EventId>,
    stop_queue: Vec<ProtocolId>,
    next_op: u64,
    next_timer: u64,
}

impl Fabric {
    fn cursor(&self, listener: ProtocolId, owner: ProtocolId, label: SignalLabel) -> u64 {
        self.cursors
            .get(&(listener, owner, label))
            .copied()
            .unwrap_or_else(|| self.floors.get(&listener).copied().unwrap_or(0))
    }

    /// Pin a cursor for every signal `set` names, so compaction keeps
    /// what `listener` has not consumed yet.
    fn open_cursors(&mut self, listener: ProtocolId, set: &WaitSet) {
        let floor = self.floors.get(&listener).copied().unwrap_or(0);
        for condition in set.conditions() {
            if let Condition::Signal { owner, label } = *condition {
                self.cursors.entry((listener, owner, label)).or_insert(floor);
            }
        }
    }

    fn compact_signals(&mut self) {
        if !self.signals.wants_compaction() {
            return;
        }
        let cursors = &self.cursors;
        let running = &self.running;
        let dropped = self.signals.compact(|e| {
            cursors
                .iter()
                .any(|((listener, owner, label), cursor)| {
                    *owner == e.owner && *label == e.label && *cursor <= e.seq && running.contains(listener)
                })
        });
        trace!(dropped, retained = self.signals.emissions().len(), "signal log compacted");
    }

    fn holds(&self, listener: ProtocolId, condition: &Condition) -> bool {
        match *condition {
            Condition::PortInput(port) => self.topology.port(port).map(|p| p.has_input()).unwrap_or(false),
            Condition::Operation(op) => self.completed.contains_key(&op),
            Condition::Signal { owner, label } => self
                .signals
                .next_from(owner, label, self.cursor(listener, owner, label))
                .is_some(),
            Condition::Timer(timer) => self.fired.get(&timer) == Some(&listener),
        }
    }

    /// Index of the first branch of `listener`'s wait that holds.
    fn ready_branch(&self, listener: ProtocolId) -> Option<usize> {
        let set = self.waits.get(listener)?;
        set.branches()
            .iter()
            .position(|branch| !branch.is_empty() && branch.iter().all(|c| self.holds(listener, c)))
    }

    /// Resolve `listener`'s wait to `index`: consume that branch and
    /// cancel every other timer the wait named.
    fn consume(
        &mut self,
        sim: &mut SimulationContext,
        listener: ProtocolId,
        index: usize,
    ) -> HeraldResult<Wake> {
        let set = self
            .waits
            .take(listener)
            .ok_or(HeraldError::UnknownProtocol(listener))?;
        let winning = set.branches()[index].clone();

        let mut payloads = Vec::with_capacity(winning.len());
        for condition in &winning {
            let payload = match *condition {
                Condition::PortInput(port) => {
                    let message = self.topology.port_mut(port)?.take().ok_or(HeraldError::UnknownPort(port))?;
                    WakePayload::Message(message)
                }
                Condition::Operation(op) => WakePayload::Operation {
                    op,
                    bits: self.completed.remove(&op).map(|(_, bits)| bits).unwrap_or_default(),
                },
                Condition::Signal { owner, label } => {
                    let from = self.cursor(listener, owner, label);
                    let emission = self
                        .signals
                        .next_from(owner, label, from)
                        .cloned()
                        .ok_or(HeraldError::UnknownProtocol(owner))?;
                    self.cursors.insert((listener, owner, label), emission.seq + 1);
                    WakePayload::Signal(emission)
                }
                Condition::Timer(timer) => {
                    self.fired.remove(&timer);
                    WakePayload::Timer(timer)
                }
            };
            payloads.push(payload);
        }

        for condition in set.conditions() {
            if let Condition::Timer(timer) = condition {
                if !winning.contains(condition) {
                    self.cancel_timer(sim, *timer);
                }
            }
        }

        Ok(Wake {
            index,
            payloads,
            at: sim.now(),
        })
    }

    fn cancel_timer(&mut self, sim: &mut SimulationContext, timer: TimerId) {
        if let Some((_, event)) = self.timers.remove(&timer) {
            sim.cancel(event);
        }
        self.fired.remove(&timer);
    }

    fn request_start(&mut self, sim: &mut SimulationContext, id: ProtocolId) -> HeraldResult<()> {
        if !self.running.insert(id) {
            return Ok(());
        }
        self.floors.insert(id, self.signals.next_seq());
        self.cursors.retain(|(listener, _, _), _| *listener != id);
        let now = sim.now();
        let event = sim.schedule_at(now, EventType::ProtocolStart { protocol: id })?;
        self.start_events.insert(id, event);
        Ok(())
    }

    /// Drop every wait, timer and pending start of `id`.
    fn halt(&mut self, sim: &mut SimulationContext, id: ProtocolId) {
        self.waits.take(id);
        let owned: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, (owner, _))| *owner == id)
            .map(|(t, _)| *t)
            .collect();
        for timer in owned {
            self.cancel_timer(sim, timer);
        }
        self.fired.retain(|_, owner| *owner != id);
        self.completed.retain(|_, (owner, _)| *owner != id);
        self.cursors.retain(|(listener, _, _), _| *listener != id);
        self.floors.remove(&id);
        if let Some(event) = self.start_events.remove(&id) {
            sim.cancel(event);
        }
        self.running.remove(&id);
    }

    fn send(&mut self, sim: &mut SimulationContext, at: VirtualTime, port: PortId, message: Message) -> HeraldResult<()> {
        let channel = self.topology.outgoing_channel(port)?;
        let (id, to, delay) = (channel.id, channel.to, channel.delay.ticks());
        let arrive = at.plus(delay).ok_or(HeraldError::InvalidDelay {
            value_ns: delay as f64,
        })?;
        trace!(%port, channel = %id, %arrive, %message, "send");
        sim.schedule_at(
            arrive,
            EventType::Delivery {
                channel: id,
                port: to,
                message,
            },
        )?;
        Ok(())
    }
}

// ── Protocol context ──────────────────────────────────────────────────

/// A protocol's view of the world during `start`/`resume`.
pub struct ProtocolContext<'a, 's> {
    fabric: &'a mut Fabric,
    sim: &'a mut SimulationContext<'s>,
    id: ProtocolId,
    node: Option<NodeId>,
}

impl<'a, 's> ProtocolContext<'a, 's> {
    pub fn now(&self) -> VirtualTime {
        self.sim.now()
    }

    pub fn id(&self) -> ProtocolId {
        self.id
    }

    /// The node this protocol is bound to.
    pub fn node(&self) -> HeraldResult<NodeId> {
        self.node.ok_or(HeraldError::NoNodeBinding(self.id))
    }

    /// Suspend until one branch of `set` holds.
    pub fn wait_any(&mut self, set: WaitSet) -> HeraldResult<()> {
        self.fabric.open_cursors(self.id, &set);
        self.fabric.waits.register(self.id, set)?;
        if self.fabric.ready_branch(self.id).is_some() {
            let now = self.sim.now();
            self.sim.schedule_at(now, EventType::Recheck { protocol: self.id })?;
        }
        Ok(())
    }

    /// Suspend until `owner` emits an unconsumed `label` signal.
    pub fn await_signal(&mut self, owner: ProtocolId, label: SignalLabel) -> HeraldResult<()> {
        self.wait_any(WaitSet::any([Condition::Signal { owner, label }]))
    }

    pub fn is_waiting(&self) -> bool {
        self.fabric.waits.is_waiting(self.id)
    }

    /// Arm a timer at absolute time `at`.
    pub fn timer_at(&mut self, at: VirtualTime) -> HeraldResult<TimerId> {
        let timer = TimerId::new(self.fabric.next_timer);
        self.fabric.next_timer += 1;
        let event = self.sim.schedule_at(
            at,
            EventType::TimerFired {
                protocol: self.id,
                timer,
            },
        )?;
        self.fabric.timers.insert(timer, (self.id, event));
        Ok(timer)
    }

    pub fn timer_after(&mut self, delay: u64) -> HeraldResult<TimerId> {
        let at = self.now().plus(delay).ok_or(HeraldError::NonCausalEvent {
            requested: u64::MAX,
            current: self.now().ticks(),
        })?;
        self.timer_at(at)
    }

    pub fn cancel_timer(&mut self, timer: TimerId) {
        self.fabric.cancel_timer(self.sim, timer);
    }

    /// Run a program on this protocol's node memory.
    pub fn execute(&mut self, program: &Program) -> HeraldResult<OperationId> {
        let node = self.node()?;
        let op = OperationId::new(self.fabric.next_op);
        let fabric = &mut *self.fabric;
        let execution = fabric.topology.node_mut(node)?.memory.execute(
            program,
            op,
            fabric.substrate.as_mut(),
            &mut fabric.qubits,
        )?;
        fabric.next_op += 1;
        fabric.in_flight.insert(op, (self.id, execution.bits));
        self.sim
            .schedule_after(execution.duration, EventType::OperationComplete { node, op })?;
        debug!(protocol = %self.id, %node, %op, program = program.name(), "program issued");
        Ok(op)
    }

    pub fn memory(&self) -> HeraldResult<&QuantumMemory> {
        Ok(&self.fabric.topology.node(self.node()?)?.memory)
    }

    /// Send `message` out of `port` along its outgoing channel.
    pub fn send(&mut self, port: PortId, message: Message) -> HeraldResult<()> {
        let now = self.now();
        self.fabric.send(self.sim, now, port, message)
    }

    /// Emit a photon entangled with the qubit held at `position` out of
    /// `port`. The memory qubit stays in place.
    pub fn emit_photon(&mut self, port: PortId, position: usize) -> HeraldResult<QubitId> {
        let node = self.node()?;
        let memory = &self.fabric.topology.node(node)?.memory;
        if let Some(op) = memory.busy_with(position)? {
            return Err(HeraldError::SlotBusy { node, position, op });
        }
        if memory.state(position)? == SlotState::Empty {
            return Err(HeraldError::EmptySlot { node, position });
        }
        let photon = Photon {
            qubit: self.fabric.qubits.allocate(),
            emitted_at: self.now(),
        };
        self.send(port, Message::Qubit(photon))?;
        Ok(photon.qubit)
    }

    /// Drop whatever is buffered on `port`.
    pub fn discard_input(&mut self, port: PortId) -> HeraldResult<Option<Message>> {
        Ok(self.fabric.topology.port_mut(port)?.take())
    }

    pub fn peek_input(&self, port: PortId) -> HeraldResult<Option<&Message>> {
        Ok(self.fabric.topology.port(port)?.peek())
    }

    /// Emit a signal owned by this protocol.
    pub fn emit_signal(&mut self, label: SignalLabel, result: SignalResult) -> HeraldResult<u64> {
        let now = self.now();
        debug!(protocol = %self.id, %label, ?result, %now, "signal");
        let seq = self.fabric.signals.emit(self.id, label, result, now);
        self.sim.schedule_at(
            now,
            EventType::SignalRaised {
                owner: self.id,
                label,
                seq,
            },
        )?;
        Ok(seq)
    }

    pub fn latest_signal(&self, owner: ProtocolId, label: SignalLabel) -> Option<&Emission> {
        self.fabric.signals.latest(owner, label)
    }

    /// Start another protocol at the current time. No-op if it is running.
    pub fn start(&mut self, id: ProtocolId) -> HeraldResult<()> {
        self.fabric.request_start(self.sim, id)
    }

    /// Stop another protocol and its children once this call returns.
    pub fn stop(&mut self, id: ProtocolId) {
        self.fabric.stop_queue.push(id);
    }
}

// ── Runtime ───────────────────────────────────────────────────────────

struct Registered {
    node: Option<NodeId>,
    protocol: Box<dyn Protocol>,
}

pub struct Runtime {
    fabric: Fabric,
    protocols: BTreeMap<ProtocolId, Registered>,
}

impl Runtime {
    pub fn new(topology: Topology, substrate: Box<dyn Substrate>) -> Self {
        Runtime {
            fabric: Fabric {
                topology,
                substrate,
                qubits: QubitAllocator::default(),
                waits: WaitTable::default(),
                signals: SignalBus::new(),
                cursors: BTreeMap::new(),
                floors: BTreeMap::new(),
                timers: BTreeMap::new(),
                fired: BTreeMap::new(),
                in_flight: BTreeMap::new(),
                completed: BTreeMap::new(),
                running: BTreeSet::new(),
                start_events: BTreeMap::new(),
                stop_queue: Vec::new(),
                next_op: 0,
                next_timer: 0,
            },
            protocols: BTreeMap::new(),
        }
    }

    /// Register a protocol, optionally bound to a node's memory.
    pub fn register(&mut self, node: Option<NodeId>, protocol: Box<dyn Protocol>) -> HeraldResult<ProtocolId> {
        if let Some(n) = node {
            self.fabric.topology.node(n)?;
        }
        let id = ProtocolId::new(self.protocols.len() as u64);
        debug!(protocol = %id, name = protocol.name(), "registered");
        self.protocols.insert(id, Registered { node, protocol });
        Ok(id)
    }

    /// Start a protocol at the simulation's current time.
    pub fn start(&mut self, sim: &mut Simulation, id: ProtocolId) -> HeraldResult<()> {
        if !self.protocols.contains_key(&id) {
            return Err(HeraldError::UnknownProtocol(id));
        }
        info!(protocol = %id, time = %sim.current_time(), "starting");
        self.fabric.request_start(&mut sim.context(), id)
    }

    /// Stop a protocol and, recursively, its children. Outstanding waits
    /// and timers are cancelled and each protocol is reset.
    pub fn stop(&mut self, sim: &mut Simulation, id: ProtocolId) -> HeraldResult<()> {
        if !self.protocols.contains_key(&id) {
            return Err(HeraldError::UnknownProtocol(id));
        }
        info!(protocol = %id, time = %sim.current_time(), "stopping");
        self.fabric.stop_queue.push(id);
        self.drain_stops(&mut sim.context());
        Ok(())
    }

    /// Start every pair source. The first pair leaves immediately.
    pub fn start_sources(&mut self, sim: &mut Simulation) -> HeraldResult<()> {
        let mut ctx = sim.context();
        let now = ctx.now();
        for source in self.fabric.topology.sources() {
            ctx.schedule_at(now, EventType::SourceTick { source: source.id() })?;
        }
        Ok(())
    }

    pub fn is_running(&self, id: ProtocolId) -> bool {
        self.fabric.running.contains(&id)
    }

    pub fn is_waiting(&self, id: ProtocolId) -> bool {
        self.fabric.waits.is_waiting(id)
    }

    /// Number of timers armed and not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.fabric.timers.len()
    }

    /// Program completions no wait has consumed yet.
    pub fn unclaimed_completions(&self) -> usize {
        self.fabric.completed.len()
    }

    pub fn subscribe(&mut self, owner: ProtocolId, label: SignalLabel) -> SubscriptionId {
        self.fabric.signals.subscribe(owner, label)
    }

    pub fn stream(&mut self, sub: SubscriptionId) -> Vec<Emission> {
        self.fabric.signals.stream(sub)
    }

    pub fn signals(&self) -> &SignalBus {
        &self.fabric.signals
    }

    pub fn topology(&self) -> &Topology {
        &self.fabric.topology
    }

    pub fn memory(&self, node: NodeId) -> HeraldResult<&QuantumMemory> {
        Ok(&self.fabric.topology.node(node)?.memory)
    }

    pub fn detector(&self, id: DetectorId) -> Option<&Detector> {
        self.fabric.topology.detector(id)
    }

    /// Downcast a registered protocol.
    pub fn protocol<T: Protocol>(&self, id: ProtocolId) -> HeraldResult<&T> {
        self.protocols
            .get(&id)
            .ok_or(HeraldError::UnknownProtocol(id))?
            .protocol
            .as_any()
            .downcast_ref::<T>()
            .ok_or(HeraldError::ProtocolTypeMismatch {
                id,
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn protocol_mut<T: Protocol>(&mut self, id: ProtocolId) -> HeraldResult<&mut T> {
        self.protocols
            .get_mut(&id)
            .ok_or(HeraldError::UnknownProtocol(id))?
            .protocol
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(HeraldError::ProtocolTypeMismatch {
                id,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Downcast the substrate, e.g. to inspect a scripted stub after a run.
    pub fn substrate<T: Substrate + 'static>(&self) -> Option<&T> {
        self.fabric.substrate.as_any().downcast_ref::<T>()
    }

    // ── Dispatch helpers ──────────────────────────────────────────

    fn call(
        &mut self,
        sim: &mut SimulationContext,
        id: ProtocolId,
        wake: Option<Wake>,
    ) -> HeraldResult<()> {
        let reg = self
            .protocols
            .get_mut(&id)
            .ok_or(HeraldError::UnknownProtocol(id))?;
        let mut ctx = ProtocolContext {
            fabric: &mut self.fabric,
            sim: &mut *sim,
            id,
            node: reg.node,
        };
        match wake {
            None => reg.protocol.start(&mut ctx)?,
            Some(wake) => reg.protocol.resume(&mut ctx, wake)?,
        }
        self.drain_stops(sim);
        Ok(())
    }

    fn drain_stops(&mut self, sim: &mut SimulationContext) {
        while let Some(id) = self.fabric.stop_queue.pop() {
            self.fabric.halt(sim, id);
            if let Some(reg) = self.protocols.get_mut(&id) {
                let children = reg.protocol.children();
                reg.protocol.reset();
                debug!(protocol = %id, "stopped");
                self.fabric
                    .stop_queue
                    .extend(children.into_iter().filter(|c| self.fabric.running.contains(c)));
            }
        }
    }

    /// Resume `id` if its wait now holds.
    fn poll(&mut self, sim: &mut SimulationContext, id: ProtocolId) -> HeraldResult<()> {
        if let Some(index) = self.fabric.ready_branch(id) {
            let wake = self.fabric.consume(sim, id, index)?;
            self.call(sim, id, Some(wake))?;
        }
        Ok(())
    }

    fn notify(&mut self, sim: &mut SimulationContext, condition: Condition) -> HeraldResult<()> {
        for listener in self.fabric.waits.waiters_for(&condition) {
            self.poll(sim, listener)?;
        }
        Ok(())
    }

    fn deliver(
        &mut self,
        sim: &mut SimulationContext,
        channel: ChannelId,
        port: PortId,
        message: &Message,
    ) -> HeraldResult<()> {
        let now = sim.now();
        let owner = self.fabric.topology.port(port)?.owner;
        match owner {
            PortOwner::Detector { detector, index } => {
                let Message::Qubit(photon) = message else {
                    warn!(%port, %message, "non-qubit message at detector dropped");
                    return Ok(());
                };
                let sender = self
                    .fabric
                    .topology
                    .channel(channel)
                    .map(|c| c.from)
                    .ok_or(HeraldError::UnknownPort(port))?;
                let fabric = &mut self.fabric;
                let det = fabric
                    .topology
                    .detector_mut(detector)
                    .ok_or(HeraldError::UnknownPort(port))?;
                let (late, effect) = det.on_arrival(now, index, sender, *photon, fabric.substrate.as_mut());
                if let Some(report) = late {
                    self.route_heralds(sim, detector, report)?;
                }
                if let ArrivalEffect::Opened { cycle, closes_at } = effect {
                    sim.schedule_at(closes_at, EventType::DetectorWindowClosed { detector, cycle })?;
                }
                Ok(())
            }
            PortOwner::Node(node) => {
                let forward = self.fabric.topology.port(port)?.forward_to();
                if let (Some(position), Message::Qubit(photon)) = (forward, message) {
                    let memory = &mut self.fabric.topology.node_mut(node)?.memory;
                    match memory.place(position, photon.qubit) {
                        Ok(Some(old)) => debug!(%node, position, %old, "stored qubit replaced"),
                        Ok(None) => {}
                        Err(HeraldError::SlotBusy { op, .. }) => {
                            warn!(%node, position, %op, qubit = %photon.qubit, "memory busy, arriving qubit lost");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(old) = self.fabric.topology.port_mut(port)?.put(message.clone()) {
                    debug!(%port, %old, "unread input overwritten");
                }
                self.notify(sim, Condition::PortInput(port))
            }
            PortOwner::Source { .. } => {
                warn!(%port, %message, "delivery to source port dropped");
                Ok(())
            }
        }
    }

    fn route_heralds(
        &mut self,
        sim: &mut SimulationContext,
        detector: DetectorId,
        report: CycleReport,
    ) -> HeraldResult<()> {
        let ports = self
            .fabric
            .topology
            .detector(detector)
            .map(|d| d.ports())
            .ok_or_else(|| HeraldError::InvalidConfig(format!("unknown detector {}", detector)))?;
        for (index, herald) in report.heralds {
            self.fabric
                .send(sim, report.closed_at, ports[index], Message::Herald(herald))?;
        }
        Ok(())
    }
}

impl EventHandler for Runtime {
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> HeraldResult<()> {
        self.dispatch(ctx, event)?;
        self.fabric.compact_signals();
        Ok(())
    }
}

impl Runtime {
    fn dispatch(&mut self, ctx: &mut SimulationContext, event: &Event) -> HeraldResult<()> {
        match &event.payload {
            #[cfg(test)]
            EventType::Noop | EventType::Log(_) => Ok(()),
            EventType::Delivery {
                channel,
                port,
                message,
            } => self.deliver(ctx, *channel, *port, message),
            EventType::ProtocolStart { protocol } => {
                if self.fabric.start_events.get(protocol) != Some(&event.id) {
                    return Ok(());
                }
                self.fabric.start_events.remove(protocol);
                self.call(ctx, *protocol, None)
            }
            EventType::TimerFired { protocol, timer } => {
                if self.fabric.timers.remove(timer).is_none() {
                    return Ok(());
                }
                self.fabric.fired.insert(*timer, *protocol);
                self.poll(ctx, *protocol)
            }
            EventType::OperationComplete { node, op } => {
                self.fabric.topology.node_mut(*node)?.memory.complete(*op);
                match self.fabric.in_flight.remove(op) {
                    Some((issuer, bits)) if self.fabric.running.contains(&issuer) => {
                        self.fabric.completed.insert(*op, (issuer, bits));
                    }
                    Some((issuer, _)) => trace!(%op, protocol = %issuer, "completion for stopped protocol dropped"),
                    None => {}
                }
                self.notify(ctx, Condition::Operation(*op))
            }
            EventType::SignalRaised { owner, label, .. } => self.notify(
                ctx,
                Condition::Signal {
                    owner: *owner,
                    label: *label,
                },
            ),
            EventType::Recheck { protocol } => self.poll(ctx, *protocol),
            EventType::DetectorWindowClosed { detector, cycle } => {
                let now = ctx.now();
                let fabric = &mut self.fabric;
                let report = match fabric.topology.detector_mut(*detector) {
                    Some(det) => det.close_window(*cycle, now, fabric.substrate.as_mut()),
                    None => None,
                };
                match report {
                    Some(report) => self.route_heralds(ctx, *detector, report),
                    None => Ok(()),
                }
            }
            EventType::SourceTick { source } => {
                let now = ctx.now();
                let fabric = &mut self.fabric;
                let Some(src) = fabric.topology.source_mut(*source) else {
                    return Ok(());
                };
                let photons = src.emit(now, &mut fabric.qubits);
                let (ports, period) = (src.ports(), src.period());
                trace!(%source, %now, "pair emitted");
                for (port, photon) in ports.into_iter().zip(photons) {
                    self.fabric.send(ctx, now, port, Message::Qubit(photon))?;
                }
                ctx.schedule_after(period, EventType::SourceTick { source: *source })?;
                Ok(())
            }
        }
    }
}
