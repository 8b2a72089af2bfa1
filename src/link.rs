//! Heralded link: two forward quantum channels into a midpoint detector
//! and two reverse classical channels carrying its replies.
//!
//! ```text
//!   A.port ──fwd_a──▶ ┌──────────┐ ◀──fwd_b── B.port
//!          ◀──rev_a── │ detector │ ──rev_b──▶
//!                     └──────────┘
//! ```
//!
//! Each side's forward and reverse delay is independent, so the midpoint
//! may sit anywhere between the endpoints.

use serde::{Deserialize, Serialize};

use crate::detector::TimingWindow;
use crate::error::HeraldResult;
use crate::topology::{ChannelId, ChannelKind, Delay, DetectorId, PortId, TopologyBuilder};

/// Delays between one endpoint and the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideDelays {
    pub forward: Delay,
    pub reverse: Delay,
}

impl SideDelays {
    /// Both directions over `length_km` of fibre.
    pub fn fibre(length_km: f64) -> HeraldResult<Self> {
        let d = Delay::fibre(length_km)?;
        Ok(SideDelays {
            forward: d,
            reverse: d,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkGeometry {
    pub a: SideDelays,
    pub b: SideDelays,
}

impl LinkGeometry {
    /// Fibre lengths from each endpoint to the midpoint.
    pub fn from_lengths(length_to_a_km: f64, length_to_b_km: f64) -> HeraldResult<Self> {
        Ok(LinkGeometry {
            a: SideDelays::fibre(length_to_a_km)?,
            b: SideDelays::fibre(length_to_b_km)?,
        })
    }

    pub fn side(&self, index: usize) -> SideDelays {
        if index == 0 {
            self.a
        } else {
            self.b
        }
    }
}

/// Handles to an installed link.
#[derive(Debug, Clone, PartialEq)]
pub struct HeraldedLink {
    pub detector: DetectorId,
    /// Endpoint ports, side A then side B.
    pub endpoints: [PortId; 2],
    pub forward: [ChannelId; 2],
    pub reverse: [ChannelId; 2],
    pub geometry: LinkGeometry,
    pub window: TimingWindow,
}

impl HeraldedLink {
    /// Add a detector to `builder` and wire both endpoints to it.
    ///
    /// Each endpoint port gets the forward channel as its outgoing binding
    /// and the reverse channel as its incoming binding.
    pub fn install(
        builder: &mut TopologyBuilder,
        name: &str,
        endpoints: [PortId; 2],
        geometry: LinkGeometry,
        window: TimingWindow,
    ) -> HeraldResult<Self> {
        let (detector, inputs) = builder.add_detector(name, window);
        let mut forward = [ChannelId::new(0); 2];
        let mut reverse = [ChannelId::new(0); 2];
        for side in 0..2 {
            let delays = geometry.side(side);
            forward[side] = builder.connect(endpoints[side], inputs[side], ChannelKind::Quantum, delays.forward)?;
            reverse[side] = builder.connect(inputs[side], endpoints[side], ChannelKind::Classical, delays.reverse)?;
        }
        Ok(HeraldedLink {
            detector,
            endpoints,
            forward,
            reverse,
            geometry,
            window,
        })
    }

    /// Worst-case wait for a reply on `side` after emitting: forward
    /// flight, the window, dead time and the reply flight, plus `slack`.
    pub fn reply_timeout(&self, side: usize, slack: u64) -> u64 {
        let d = self.geometry.side(side);
        d.forward.ticks() + self.window.system_delay + self.window.dead_time + d.reverse.ticks() + slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeraldError;
    use crate::topology::Direction;

    fn endpoints(b: &mut TopologyBuilder) -> [PortId; 2] {
        let alice = b.add_node("Alice", 1);
        let bob = b.add_node("Bob", 1);
        [b.add_port(alice, "qout").unwrap(), b.add_port(bob, "qout").unwrap()]
    }

    #[test]
    fn test_install_wires_four_channels() {
        let mut b = TopologyBuilder::new();
        let ports = endpoints(&mut b);
        let geometry = LinkGeometry::from_lengths(1.0, 1.0).unwrap();
        let link = HeraldedLink::install(&mut b, "midpoint", ports, geometry, TimingWindow::new(20.0, 0.0).unwrap())
            .unwrap();
        let topo = b.build().unwrap();

        assert_eq!(topo.channels().len(), 4);
        let det = topo.detector(link.detector).unwrap();
        for side in 0..2 {
            let fwd = topo.channel(link.forward[side]).unwrap();
            assert_eq!(fwd.from, ports[side]);
            assert_eq!(fwd.to, det.ports()[side]);
            assert_eq!(fwd.kind, ChannelKind::Quantum);
            let rev = topo.channel(link.reverse[side]).unwrap();
            assert_eq!(rev.from, det.ports()[side]);
            assert_eq!(rev.to, ports[side]);
            assert_eq!(rev.delay.ticks(), 5000);
        }
        assert_eq!(link.reply_timeout(0, 500), 5000 + 20 + 5000 + 500);
    }

    #[test]
    fn test_asymmetric_geometry() {
        let mut b = TopologyBuilder::new();
        let ports = endpoints(&mut b);
        let geometry = LinkGeometry {
            a: SideDelays {
                forward: Delay::from_ns(10.0).unwrap(),
                reverse: Delay::from_ns(3.0).unwrap(),
            },
            b: SideDelays::fibre(2e-3).unwrap(),
        };
        let link = HeraldedLink::install(&mut b, "mid", ports, geometry, TimingWindow::new(5.0, 1.0).unwrap())
            .unwrap();
        let topo = b.build().unwrap();

        assert_eq!(topo.channel(link.forward[0]).unwrap().delay.ticks(), 10);
        assert_eq!(topo.channel(link.reverse[0]).unwrap().delay.ticks(), 3);
        assert_eq!(topo.channel(link.forward[1]).unwrap().delay.ticks(), 10);
        assert_eq!(link.reply_timeout(0, 0), 10 + 5 + 1 + 3);
    }

    #[test]
    fn test_endpoint_already_bound() {
        let mut b = TopologyBuilder::new();
        let ports = endpoints(&mut b);
        let geometry = LinkGeometry::from_lengths(1.0, 1.0).unwrap();
        let window = TimingWindow::new(20.0, 0.0).unwrap();
        HeraldedLink::install(&mut b, "first", ports, geometry, window).unwrap();
        let err = HeraldedLink::install(&mut b, "second", ports, geometry, window).unwrap_err();
        assert_eq!(
            err,
            HeraldError::PortAlreadyBound {
                port: ports[0],
                direction: Direction::Outgoing
            }
        );
    }
}
