//! Geneva-style evasion strategies
//!
//! A strategy ([`Dna`]) is an ordered list of packet-mangling [`Action`]s.
//! Applying it folds every action over the current fragment list, the same
//! way a processing pipeline chains its stages.

mod optimizer;
mod trainer;

pub use optimizer::GenevaGeneticOptimizer;
pub use trainer::{GenerationStats, Trainer, TrainingReport};

use crate::error::Result;
use bytes::{Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a split is performed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// TCP segmentation
    Tcp,
    /// Raw byte split
    Byte,
}

/// Header field targeted by a tamper action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperField {
    /// IP time-to-live
    Ttl,
    /// TCP flag byte
    TcpFlags,
    /// TCP receive window
    WindowSize,
}

impl TamperField {
    fn code(self) -> u8 {
        match self {
            TamperField::Ttl => 0x01,
            TamperField::TcpFlags => 0x02,
            TamperField::WindowSize => 0x03,
        }
    }
}

/// One packet-mangling step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    /// Cut a packet in two at `index` (clamped to `1..len-1`)
    Split {
        /// Cut position, 1..=100
        index: usize,
        /// Wire method
        method: SplitMethod,
    },
    /// Emit `count + 1` copies of the packet
    Duplicate {
        /// Extra copies, 1..=2
        count: usize,
    },
    /// Append a 2-byte `[field, value]` marker
    Tamper {
        /// Targeted field
        field: TamperField,
        /// New value, 1..=255
        value: u8,
    },
    /// Discard the packet with `probability`
    Drop {
        /// Discard probability, 0.1..0.5
        probability: f64,
    },
}

/// What an action did to a single fragment
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// Fragment kept as-is
    Pass(Bytes),
    /// Fragment replaced by zero or more fragments
    Replace(Vec<Bytes>),
    /// Fragment removed
    Drop,
}

impl Action {
    /// Random action of a random kind
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut action = match rng.gen_range(0..4) {
            0 => Action::Split {
                index: 1,
                method: SplitMethod::Tcp,
            },
            1 => Action::Duplicate { count: 1 },
            2 => Action::Tamper {
                field: TamperField::Ttl,
                value: 1,
            },
            _ => Action::Drop { probability: 0.1 },
        };
        action.regenerate(rng);
        action
    }

    /// Redraw parameters, keeping the kind
    pub fn regenerate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        *self = match self {
            Action::Split { .. } => Action::Split {
                index: rng.gen_range(1..=100),
                method: if rng.gen_bool(0.5) {
                    SplitMethod::Tcp
                } else {
                    SplitMethod::Byte
                },
            },
            Action::Duplicate { .. } => Action::Duplicate {
                count: rng.gen_range(1..=2),
            },
            Action::Tamper { .. } => Action::Tamper {
                field: match rng.gen_range(0..3) {
                    0 => TamperField::Ttl,
                    1 => TamperField::TcpFlags,
                    _ => TamperField::WindowSize,
                },
                value: rng.gen_range(1..=255),
            },
            Action::Drop { .. } => Action::Drop {
                probability: rng.gen_range(0.1..0.5),
            },
        };
    }

    /// Kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Split { .. } => "split",
            Action::Duplicate { .. } => "duplicate",
            Action::Tamper { .. } => "tamper",
            Action::Drop { .. } => "drop",
        }
    }

    /// Apply to one fragment. Drop decisions use the OS CSPRNG.
    pub fn apply(&self, fragment: Bytes) -> ActionResult {
        match *self {
            Action::Split { index, .. } => {
                if fragment.len() < 2 {
                    return ActionResult::Pass(fragment);
                }
                let at = index.clamp(1, fragment.len() - 1);
                let mut head = fragment;
                let tail = head.split_off(at);
                ActionResult::Replace(vec![head, tail])
            }
            Action::Duplicate { count } => {
                ActionResult::Replace(std::iter::repeat(fragment).take(count + 1).collect())
            }
            Action::Tamper { field, value } => {
                let mut buf = BytesMut::with_capacity(fragment.len() + 2);
                buf.extend_from_slice(&fragment);
                buf.extend_from_slice(&[field.code(), value]);
                ActionResult::Pass(buf.freeze())
            }
            Action::Drop { probability } => {
                if OsRng.gen::<f64>() > probability {
                    ActionResult::Pass(fragment)
                } else {
                    ActionResult::Drop
                }
            }
        }
    }
}

/// An evasion strategy and its last measured fitness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dna {
    /// Actions, applied in order
    pub actions: Vec<Action>,
    /// Fitness from the last evaluation
    #[serde(default)]
    pub fitness: f64,
}

impl Dna {
    /// Empty strategy
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategy with the given actions
    pub fn with_actions(actions: Vec<Action>) -> Self {
        Self {
            actions,
            fitness: 0.0,
        }
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// No actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Mutate in place: add an action (always when empty, else 30%), redraw
    /// one action's parameters (35%), or remove one action if more than one
    /// remains (35%)
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.actions.is_empty() || rng.gen::<f64>() < 0.3 {
            self.actions.push(Action::random(rng));
        } else if rng.gen::<f64>() < 0.5 {
            let i = rng.gen_range(0..self.actions.len());
            self.actions[i].regenerate(rng);
        } else if self.actions.len() > 1 {
            let i = rng.gen_range(0..self.actions.len());
            self.actions.remove(i);
        }
    }

    /// Fold every action over `packets`
    pub fn apply(&self, packets: Vec<Bytes>) -> Vec<Bytes> {
        let mut packets = packets;
        for action in &self.actions {
            let mut next = Vec::with_capacity(packets.len());
            for pkt in packets {
                match action.apply(pkt) {
                    ActionResult::Pass(p) => next.push(p),
                    ActionResult::Replace(ps) => next.extend(ps),
                    ActionResult::Drop => {}
                }
            }
            packets = next;
            if packets.is_empty() {
                break;
            }
        }
        packets
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_mutate_empty_adds_one() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let mut dna = Dna::new();
            dna.mutate(&mut rng);
            assert_eq!(dna.len(), 1);
        }
    }

    #[test]
    fn test_random_params_in_range() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..500 {
            match Action::random(&mut rng) {
                Action::Split { index, .. } => assert!((1..=100).contains(&index)),
                Action::Duplicate { count } => assert!((1..=2).contains(&count)),
                Action::Tamper { value, .. } => assert!(value >= 1),
                Action::Drop { probability } => assert!((0.1..0.5).contains(&probability)),
            }
        }
    }

    #[test]
    fn test_split_clamps_index() {
        let dna = Dna::with_actions(vec![Action::Split {
            index: 100,
            method: SplitMethod::Byte,
        }]);
        let out = dna.apply(vec![Bytes::from_static(b"abcd")]);
        assert_eq!(out, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"d")]);
    }

    #[test]
    fn test_split_single_byte_passes() {
        let dna = Dna::with_actions(vec![Action::Split {
            index: 1,
            method: SplitMethod::Tcp,
        }]);
        assert_eq!(dna.apply(vec![Bytes::from_static(b"x")]).len(), 1);
    }

    #[test]
    fn test_duplicate_and_tamper() {
        let dna = Dna::with_actions(vec![
            Action::Duplicate { count: 2 },
            Action::Tamper {
                field: TamperField::WindowSize,
                value: 9,
            },
        ]);
        let out = dna.apply(vec![Bytes::from_static(b"pk")]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|p| p.as_ref() == [b'p', b'k', 0x03, 9]));
    }

    #[test]
    fn test_json_roundtrip() {
        let dna = Dna::with_actions(vec![
            Action::Split {
                index: 5,
                method: SplitMethod::Tcp,
            },
            Action::Drop { probability: 0.25 },
        ]);
        let json = dna.to_json().unwrap();
        assert!(json.contains("\"kind\": \"split\""));
        assert_eq!(Dna::from_json(&json).unwrap(), dna);
    }
}
