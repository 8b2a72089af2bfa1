//! Payloads carried by channels.
//!
//! The heralding message has a fixed wire format shared with the link
//! endpoints:
//!
//! ```json
//! {"sender_port_id": 3, "header": "photonoutcome", "outcome_code": 3}
//! {"sender_port_id": 7, "header": "error", "outcome_code": "TIMEOUT"}
//! ```

use serde::{Deserialize, Serialize};

use crate::memory::QubitId;
use crate::substrate::OutcomeCode;
use crate::time::VirtualTime;
use crate::topology::PortId;

/// A flying qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photon {
    pub qubit: QubitId,
    pub emitted_at: VirtualTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Header {
    PhotonOutcome,
    Error,
}

/// The outcome field of a heralding message: a substrate outcome code
/// or the literal `"TIMEOUT"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OutcomeRepr", into = "OutcomeRepr")]
pub enum HeraldOutcome {
    Code(OutcomeCode),
    Timeout,
}

impl std::fmt::Display for HeraldOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeraldOutcome::Code(code) => write!(f, "{}", code),
            HeraldOutcome::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OutcomeRepr {
    Code(u8),
    Label(String),
}

impl From<HeraldOutcome> for OutcomeRepr {
    fn from(outcome: HeraldOutcome) -> Self {
        match outcome {
            HeraldOutcome::Code(code) => OutcomeRepr::Code(code.raw()),
            HeraldOutcome::Timeout => OutcomeRepr::Label("TIMEOUT".into()),
        }
    }
}

impl TryFrom<OutcomeRepr> for HeraldOutcome {
    type Error = String;

    fn try_from(repr: OutcomeRepr) -> Result<Self, Self::Error> {
        match repr {
            OutcomeRepr::Code(c) => Ok(HeraldOutcome::Code(OutcomeCode::new(c))),
            OutcomeRepr::Label(s) if s == "TIMEOUT" => Ok(HeraldOutcome::Timeout),
            OutcomeRepr::Label(s) => Err(format!("unknown outcome label {:?}", s)),
        }
    }
}

/// Detector reply to one contributing port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeraldMessage {
    /// The node port whose qubit this message reports on.
    pub sender_port_id: PortId,
    pub header: Header,
    pub outcome_code: HeraldOutcome,
}

impl HeraldMessage {
    pub fn timeout(sender_port_id: PortId) -> Self {
        HeraldMessage {
            sender_port_id,
            header: Header::Error,
            outcome_code: HeraldOutcome::Timeout,
        }
    }

    pub fn outcome(sender_port_id: PortId, code: OutcomeCode) -> Self {
        HeraldMessage {
            sender_port_id,
            header: Header::PhotonOutcome,
            outcome_code: HeraldOutcome::Code(code),
        }
    }

    /// The outcome code, if the detector saw both qubits.
    pub fn code(&self) -> Option<OutcomeCode> {
        match (self.header, self.outcome_code) {
            (Header::PhotonOutcome, HeraldOutcome::Code(code)) => Some(code),
            _ => None,
        }
    }
}

/// Anything a channel can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Qubit(Photon),
    Herald(HeraldMessage),
    /// Teleportation correction bits.
    Corrections { m1: u8, m2: u8 },
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Qubit(p) => write!(f, "qubit {}", p.qubit),
            Message::Herald(h) => write!(f, "herald {} for {}", h.outcome_code, h.sender_port_id),
            Message::Corrections { m1, m2 } => write!(f, "corrections ({}, {})", m1, m2),
        }
    }
}
