//! Deep packet inspection: content-aware rules that delay, drop, or reset
//! in-flight flows based on endpoint tuples or the TLS SNI.

mod rules;

pub use rules::{
    DropTrafficForServerEndpoint, DropTrafficForTlsSni, ResetTrafficForTlsSni,
    ThrottleTrafficForTlsSni,
};

use crate::frame::Frame;
use crate::packet::{synthesize_rst, DissectedPacket, FlowKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Direction of travel of a packet, relative to the link endpoint that
/// originated it: the link's left side is the client side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DpiDirection {
    ClientToServer,
    ServerToClient,
}

impl DpiDirection {
    pub fn reverse(self) -> Self {
        match self {
            DpiDirection::ClientToServer => DpiDirection::ServerToClient,
            DpiDirection::ServerToClient => DpiDirection::ClientToServer,
        }
    }
}

/// What a matching rule wants done with the flow beyond delay and loss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DpiFlags {
    #[default]
    None,
    /// Silently discard the packet.
    Drop,
    /// Discard the packet and inject spoofed RST segments toward both
    /// endpoints.
    SpoofRst,
    /// Divert the flow to another endpoint. No shipped rule emits this; the
    /// link treats it as [`DpiFlags::Drop`].
    Hijack,
}

/// Verdict a rule attaches to a flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct DpiPolicy {
    /// Additional one-way delay applied to each packet of the flow.
    pub delay: Duration,
    /// Extra loss probability applied on top of the link's own PLR.
    pub plr: f64,
    pub flags: DpiFlags,
}

/// A content-aware classifier inspecting one direction of one packet.
///
/// Implementations must be deterministic for a given packet and direction,
/// and must not retain references to the packet after returning. Per-flow
/// state is the engine's job, not the rule's.
pub trait DpiRule: Send + Sync {
    /// Returns the policy for the flow when the packet is offending, `None`
    /// to decline.
    fn filter(&self, direction: DpiDirection, packet: &DissectedPacket<'_>) -> Option<DpiPolicy>;
}

/// Outcome of inspecting a single frame.
pub(crate) struct DpiVerdict {
    pub(crate) policy: Option<DpiPolicy>,
    /// Frames to inject immediately, tagged with their direction of travel.
    pub(crate) injections: Vec<(DpiDirection, Frame)>,
}

impl DpiVerdict {
    fn pass() -> Self {
        Self {
            policy: None,
            injections: Vec::new(),
        }
    }
}

/// Ordered rule list plus the per-flow verdict cache shared by the two
/// workers of a link.
///
/// Rules run in insertion order and the first match wins. A match is cached
/// by 5-tuple, so every subsequent packet of the flow, in either direction,
/// receives the same policy without re-parsing. Non-matches are not cached:
/// SNI rules cannot classify a flow before its ClientHello arrives.
pub struct DpiEngine {
    rules: Mutex<Vec<Box<dyn DpiRule>>>,
    flows: Mutex<HashMap<FlowKey, DpiPolicy>>,
}

impl DpiEngine {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a rule; rules run in insertion order.
    pub fn add_rule(&self, rule: impl DpiRule + 'static) {
        self.rules.lock().push(Box::new(rule));
    }

    pub(crate) fn inspect(&self, direction: DpiDirection, frame: &Frame) -> DpiVerdict {
        let Some(packet) = DissectedPacket::parse(frame.as_ref()) else {
            return DpiVerdict::pass();
        };
        let key = packet.flow_key();

        if let Some(policy) = self.cached_policy(key) {
            // RSTs were injected at classification time; later packets of a
            // reset flow are simply suppressed.
            let policy = if policy.flags == DpiFlags::SpoofRst {
                DpiPolicy {
                    flags: DpiFlags::Drop,
                    ..policy
                }
            } else {
                policy
            };
            return DpiVerdict {
                policy: Some(policy),
                injections: Vec::new(),
            };
        }

        let rules = self.rules.lock();
        for rule in rules.iter() {
            let Some(policy) = rule.filter(direction, &packet) else {
                continue;
            };
            self.flows.lock().insert(key, policy);

            let mut injections = Vec::new();
            if policy.flags == DpiFlags::SpoofRst {
                if let Some(rst) = synthesize_rst(&packet, true) {
                    injections.push((direction.reverse(), rst));
                }
                if let Some(rst) = synthesize_rst(&packet, false) {
                    injections.push((direction, rst));
                }
            }
            return DpiVerdict {
                policy: Some(policy),
                injections,
            };
        }

        DpiVerdict::pass()
    }

    fn cached_policy(&self, key: FlowKey) -> Option<DpiPolicy> {
        let flows = self.flows.lock();
        flows
            .get(&key)
            .or_else(|| flows.get(&key.reversed()))
            .copied()
    }
}

impl Default for DpiEngine {
    fn default() -> Self {
        Self::new()
    }
}
