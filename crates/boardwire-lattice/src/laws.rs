//! Sampled law checking.
//!
//! A lattice is only useful to the propagation engine if its join is
//! commutative, associative and idempotent with `bottom` as identity. These
//! checks run the laws over every combination of a sample set and report
//! each counterexample found.

use serde::{Deserialize, Serialize};

use crate::lattice::Lattice;
use crate::value::{LatticeValue, PauseLevel, RateLimitPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Law {
    Commutative,
    Associative,
    Idempotent,
    Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawViolation {
    pub law: Law,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawReport {
    pub lattice: String,
    pub samples: usize,
    pub violations: Vec<LawViolation>,
}

impl LawReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check all four laws over `samples`.
pub fn check_laws(lattice: &Lattice, samples: &[LatticeValue]) -> LawReport {
    let mut violations = Vec::new();
    let join = |a: &LatticeValue, b: &LatticeValue| lattice.join(a, b).ok();
    let bottom = lattice.bottom();

    for a in samples {
        match join(a, a) {
            Some(v) if &v == a => {}
            other => violations.push(LawViolation {
                law: Law::Idempotent,
                description: format!("join({a}, {a}) = {}", render(&other)),
            }),
        }
        match join(&bottom, a) {
            Some(v) if &v == a => {}
            other => violations.push(LawViolation {
                law: Law::Identity,
                description: format!("join(bottom, {a}) = {}", render(&other)),
            }),
        }

        for b in samples {
            let ab = join(a, b);
            let ba = join(b, a);
            if ab.is_none() || ab != ba {
                violations.push(LawViolation {
                    law: Law::Commutative,
                    description: format!(
                        "join({a}, {b}) = {} but join({b}, {a}) = {}",
                        render(&ab),
                        render(&ba)
                    ),
                });
            }

            for c in samples {
                let left = ab.as_ref().and_then(|ab| join(ab, c));
                let right = join(b, c).and_then(|bc| join(a, &bc));
                if left.is_none() || left != right {
                    violations.push(LawViolation {
                        law: Law::Associative,
                        description: format!(
                            "join(join({a}, {b}), {c}) = {} but join({a}, join({b}, {c})) = {}",
                            render(&left),
                            render(&right)
                        ),
                    });
                }
            }
        }
    }

    LawReport {
        lattice: lattice.name().to_string(),
        samples: samples.len(),
        violations,
    }
}

fn render(value: &Option<LatticeValue>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<join failed>".to_string(),
    }
}

/// A small, representative sample set for each built-in lattice.
///
/// External lattices have no built-in samples; callers supply their own.
pub fn sample_values(lattice: &Lattice) -> Vec<LatticeValue> {
    use std::collections::BTreeMap;

    match lattice {
        Lattice::MaxInt | Lattice::MinInt => [-5, 0, 3, 7, 42]
            .into_iter()
            .map(LatticeValue::Int)
            .collect(),
        Lattice::BoolOr | Lattice::BoolAnd => {
            vec![LatticeValue::Bool(false), LatticeValue::Bool(true)]
        }
        Lattice::SetUnion => vec![
            LatticeValue::set(Vec::<String>::new()),
            LatticeValue::set(["a"]),
            LatticeValue::set(["b", "c"]),
            LatticeValue::set(["a", "c"]),
        ],
        Lattice::Fence => vec![
            LatticeValue::fence(["f1"]),
            LatticeValue::fence(["f2"]),
            LatticeValue::fence(["f1", "f3"]),
        ],
        Lattice::MapMerge => {
            let mut a = BTreeMap::new();
            a.insert("n".to_string(), LatticeValue::Int(1));
            let mut b = BTreeMap::new();
            b.insert("n".to_string(), LatticeValue::Int(4));
            b.insert("tags".to_string(), LatticeValue::set(["x"]));
            let mut c = BTreeMap::new();
            c.insert("tags".to_string(), LatticeValue::set(["y"]));
            c.insert("on".to_string(), LatticeValue::Bool(true));
            vec![
                LatticeValue::Map(a),
                LatticeValue::Map(b),
                LatticeValue::Map(c),
            ]
        }
        Lattice::Pause => [
            PauseLevel::Running,
            PauseLevel::Soft,
            PauseLevel::Gated,
            PauseLevel::Isolated,
        ]
        .into_iter()
        .map(LatticeValue::Pause)
        .collect(),
        Lattice::RateLimit => [(100.0, 20), (50.0, 30), (75.5, 5)]
            .into_iter()
            .filter_map(|(rps, burst)| RateLimitPolicy::new(rps, burst).ok())
            .map(LatticeValue::RateLimit)
            .collect(),
        Lattice::External(_) => Vec::new(),
    }
}
