//! Periodic entangled-pair source.
//!
//! Emits one photon on each of its two output ports every `period` ns,
//! the first pair at the moment it is started.

use crate::error::{HeraldError, HeraldResult};
use crate::memory::QubitAllocator;
use crate::message::Photon;
use crate::time::VirtualTime;
use crate::topology::{PortId, SourceId};

#[derive(Debug, Clone)]
pub struct EntanglingSource {
    id: SourceId,
    name: String,
    period: u64,
    ports: [PortId; 2],
    emitted: u64,
}

impl EntanglingSource {
    pub fn new(id: SourceId, name: &str, period: u64, ports: [PortId; 2]) -> HeraldResult<Self> {
        if period == 0 {
            return Err(HeraldError::InvalidPeriod { value_ns: 0.0 });
        }
        Ok(EntanglingSource {
            id,
            name: name.to_string(),
            period,
            ports,
            emitted: 0,
        })
    }

    /// Period in whole ns for a source running at `frequency_hz`.
    pub fn period_for(frequency_hz: f64) -> HeraldResult<u64> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(HeraldError::InvalidFrequency {
                value_hz: frequency_hz,
            });
        }
        let period = (1e9 / frequency_hz).round();
        if period < 1.0 {
            return Err(HeraldError::InvalidFrequency {
                value_hz: frequency_hz,
            });
        }
        Ok(period as u64)
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn ports(&self) -> [PortId; 2] {
        self.ports
    }

    /// Pairs emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Produce the next pair.
    pub(crate) fn emit(&mut self, now: VirtualTime, qubits: &mut QubitAllocator) -> [Photon; 2] {
        self.emitted += 1;
        [0, 1].map(|_| Photon {
            qubit: qubits.allocate(),
            emitted_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_frequency() {
        // 4e4 / 4e-3 km = 1e7 Hz -> 100 ns
        assert_eq!(EntanglingSource::period_for(4e4 / 4e-3).unwrap(), 100);
        assert_eq!(EntanglingSource::period_for(1e6).unwrap(), 1000);
        assert!(matches!(
            EntanglingSource::period_for(0.0),
            Err(HeraldError::InvalidFrequency { .. })
        ));
        assert!(EntanglingSource::period_for(1e12).is_err());
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = EntanglingSource::new(SourceId::new(0), "s", 0, [PortId::new(0), PortId::new(1)]).unwrap_err();
        assert!(matches!(err, HeraldError::InvalidPeriod { .. }));
    }

    #[test]
    fn test_emit_pairs_distinct_qubits() {
        let mut s = EntanglingSource::new(SourceId::new(0), "s", 100, [PortId::new(0), PortId::new(1)]).unwrap();
        let mut qa = QubitAllocator::default();
        let [p, q] = s.emit(VirtualTime::new(100), &mut qa);
        assert_ne!(p.qubit, q.qubit);
        assert_eq!(p.emitted_at, VirtualTime::new(100));
        assert_eq!(s.emitted(), 1);
    }
}
