//! Water culling strategies.
//!
//! The enumerated option lives in the settings record and is materialized
//! into a [`Culling`] strategy value at construction time.

use crate::atom::Atom;
use crate::body::Body;
use crate::error::Error;
use crate::rng;
use enum_dispatch::enum_dispatch;
use lin_alg::f64::Vec3;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Neighbourhood radius used by the outlier score.
const NEIGHBOUR_CUTOFF: f64 = 4.0;

/// The enumerated culling option.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CullingMethod {
    /// Keep every candidate.
    None,
    /// Keep every n-th candidate in placement order.
    Counter,
    /// Remove the waters with the fewest solute contacts first.
    Outlier,
    /// Counter culling with a per-body quota.
    BodyCounter,
    /// Shuffle, then counter-cull.
    Random,
}

impl CullingMethod {
    /// Materializes the strategy value for this option.
    #[must_use]
    pub fn strategy(self) -> Culling {
        match self {
            Self::None => NoCulling.into(),
            Self::Counter => CounterCulling.into(),
            Self::Outlier => OutlierCulling.into(),
            Self::BodyCounter => BodyCounterCulling.into(),
            Self::Random => RandomCulling {
                inner: Box::new(CounterCulling.into()),
            }
            .into(),
        }
    }
}

impl fmt::Display for CullingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Counter => "counter",
            Self::Outlier => "outlier",
            Self::BodyCounter => "body-counter",
            Self::Random => "random",
        })
    }
}

impl FromStr for CullingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "none" => Ok(Self::None),
            "counter" => Ok(Self::Counter),
            "outlier" => Ok(Self::Outlier),
            "body-counter" => Ok(Self::BodyCounter),
            "random" => Ok(Self::Random),
            _ => Err(Error::InvalidInput(format!(
                "unknown culling strategy `{s}`"
            ))),
        }
    }
}

/// Solute geometry the culling strategies score against.
#[derive(Clone, Debug)]
pub struct CullingContext {
    positions: Vec<Vec3>,
    body_of: Vec<usize>,
    bodies: usize,
}

impl CullingContext {
    /// Snapshots the solute atoms of `bodies`.
    #[must_use]
    pub fn new(bodies: &[Body]) -> Self {
        let mut positions = Vec::new();
        let mut body_of = Vec::new();
        for (index, body) in bodies.iter().enumerate() {
            for atom in body.atoms() {
                positions.push(atom.position);
                body_of.push(index);
            }
        }
        Self {
            positions,
            body_of,
            bodies: bodies.len(),
        }
    }

    fn solute_within(&self, p: Vec3, cutoff: f64) -> usize {
        self.positions
            .iter()
            .filter(|&&q| (q - p).magnitude_squared() < cutoff * cutoff)
            .count()
    }

    fn nearest_body(&self, p: Vec3) -> Option<usize> {
        self.positions
            .iter()
            .zip(&self.body_of)
            .min_by(|(a, _), (b, _)| {
                (**a - p)
                    .magnitude_squared()
                    .total_cmp(&(**b - p).magnitude_squared())
            })
            .map(|(_, &body)| body)
    }
}

/// A culling strategy: reduces placed candidates toward a target count.
#[enum_dispatch]
pub trait CullingStrategy {
    /// Culls `waters` toward `target` entries.
    fn cull(&self, waters: Vec<Atom>, context: &CullingContext, target: usize) -> Vec<Atom>;
}

/// Tagged strategy value dispatched behind [`CullingStrategy`].
#[enum_dispatch(CullingStrategy)]
#[derive(Clone, Debug)]
pub enum Culling {
    /// See [`NoCulling`].
    NoCulling,
    /// See [`CounterCulling`].
    CounterCulling,
    /// See [`OutlierCulling`].
    OutlierCulling,
    /// See [`BodyCounterCulling`].
    BodyCounterCulling,
    /// See [`RandomCulling`].
    RandomCulling,
}

/// Identity culling.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCulling;

impl CullingStrategy for NoCulling {
    fn cull(&self, waters: Vec<Atom>, _context: &CullingContext, _target: usize) -> Vec<Atom> {
        waters
    }
}

/// Keeps every `(placed / target)`-th water in the incoming order.
/// Deterministic given the input order.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterCulling;

fn counter_keep(count: usize, target: usize) -> Vec<bool> {
    if target == 0 {
        return vec![true; count];
    }
    let factor = count / target;
    if factor < 2 {
        return vec![true; count];
    }
    (1..=count).map(|counter| counter % factor == 0).collect()
}

impl CullingStrategy for CounterCulling {
    fn cull(&self, waters: Vec<Atom>, _context: &CullingContext, target: usize) -> Vec<Atom> {
        let keep = counter_keep(waters.len(), target);
        waters
            .into_iter()
            .zip(keep)
            .filter_map(|(water, keep)| keep.then_some(water))
            .collect()
    }
}

/// Scores each water by `#nearby-solute-atoms - 2 * #nearby-waters` and
/// removes the lowest-scoring until the target is reached.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutlierCulling;

impl CullingStrategy for OutlierCulling {
    fn cull(&self, waters: Vec<Atom>, context: &CullingContext, target: usize) -> Vec<Atom> {
        if waters.len() <= target {
            return waters;
        }

        let cutoff2 = NEIGHBOUR_CUTOFF * NEIGHBOUR_CUTOFF;
        let scores: Vec<f64> = waters
            .iter()
            .enumerate()
            .map(|(i, water)| {
                let solute = context.solute_within(water.position, NEIGHBOUR_CUTOFF);
                let neighbours = waters
                    .iter()
                    .enumerate()
                    .filter(|&(j, other)| {
                        i != j
                            && (other.position - water.position).magnitude_squared() < cutoff2
                    })
                    .count();
                crate::convert::count_f64(solute)
                    - 2.0 * crate::convert::count_f64(neighbours)
            })
            .collect();

        let mut order: Vec<usize> = (0..waters.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        let mut removed = vec![false; waters.len()];
        for &index in order.iter().take(waters.len() - target) {
            removed[index] = true;
        }

        waters
            .into_iter()
            .zip(removed)
            .filter_map(|(water, removed)| (!removed).then_some(water))
            .collect()
    }
}

/// Counter culling applied per body, with each body's quota proportional to
/// its share of the candidates.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyCounterCulling;

impl CullingStrategy for BodyCounterCulling {
    fn cull(&self, waters: Vec<Atom>, context: &CullingContext, target: usize) -> Vec<Atom> {
        if context.bodies < 2 {
            return CounterCulling.cull(waters, context, target);
        }

        let buckets: Vec<usize> = waters
            .iter()
            .map(|water| context.nearest_body(water.position).unwrap_or(0))
            .collect();
        let mut bucket_sizes = vec![0_usize; context.bodies];
        for &bucket in &buckets {
            bucket_sizes[bucket] += 1;
        }

        let total = waters.len();
        let quotas: Vec<usize> = bucket_sizes
            .iter()
            .map(|&size| {
                crate::convert::floor_index(
                    (crate::convert::count_f64(target)
                        * crate::convert::count_f64(size)
                        / crate::convert::count_f64(total.max(1)))
                    .round(),
                )
            })
            .collect();

        let keep_per_bucket: Vec<Vec<bool>> = bucket_sizes
            .iter()
            .zip(&quotas)
            .map(|(&size, &quota)| counter_keep(size, quota))
            .collect();

        let mut cursor = vec![0_usize; context.bodies];
        waters
            .into_iter()
            .zip(buckets)
            .filter_map(|(water, bucket)| {
                let keep = keep_per_bucket[bucket][cursor[bucket]];
                cursor[bucket] += 1;
                keep.then_some(water)
            })
            .collect()
    }
}

/// Shuffles the candidates with the process-wide generator, then delegates
/// to the wrapped strategy.
#[derive(Clone, Debug)]
pub struct RandomCulling {
    /// The strategy run after shuffling.
    pub inner: Box<Culling>,
}

impl CullingStrategy for RandomCulling {
    fn cull(&self, mut waters: Vec<Atom>, context: &CullingContext, target: usize) -> Vec<Atom> {
        rng::with_rng(|rng| waters.shuffle(rng));
        self.inner.cull(waters, context, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyId;
    use crate::form_factor::FormFactorType;

    fn waters(n: usize) -> Vec<Atom> {
        (0..n)
            .map(|i| Atom::water(Vec3::new(crate::convert::count_f64(i), 0.0, 0.0)))
            .collect()
    }

    fn context() -> CullingContext {
        let body = Body::new(
            BodyId(0),
            vec![Atom::new(Vec3::new_zero(), FormFactorType::Carbon)],
        );
        CullingContext::new(std::slice::from_ref(&body))
    }

    #[test]
    fn no_culling_is_identity() {
        let culled = NoCulling.cull(waters(10), &context(), 3);
        assert_eq!(culled.len(), 10);
    }

    #[test]
    fn counter_culling_is_deterministic() {
        let first = CounterCulling.cull(waters(20), &context(), 5);
        let second = CounterCulling.cull(waters(20), &context(), 5);
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }

    #[test]
    fn counter_culling_keeps_everything_below_factor_two() {
        assert_eq!(CounterCulling.cull(waters(7), &context(), 5).len(), 7);
        assert_eq!(CounterCulling.cull(waters(7), &context(), 0).len(), 7);
    }

    #[test]
    fn outlier_culling_reaches_the_target_and_prefers_contacts() {
        // one candidate sits on top of the solute atom, the rest far away
        let mut candidates = vec![Atom::water(Vec3::new(1.0, 0.0, 0.0))];
        candidates.extend(waters(9).into_iter().map(|mut w| {
            w.position.x += 100.0;
            w
        }));

        let culled = OutlierCulling.cull(candidates, &context(), 1);
        assert_eq!(culled.len(), 1);
        assert!((culled[0].position - Vec3::new(1.0, 0.0, 0.0)).magnitude() < 1e-12);
    }

    #[test]
    fn random_culling_delegates_to_the_wrapped_strategy() {
        crate::rng::seed(7);
        let strategy = CullingMethod::Random.strategy();
        let culled = strategy.cull(waters(20), &context(), 5);
        assert_eq!(culled.len(), 5);
    }

    #[test]
    fn body_counter_splits_the_quota() {
        let bodies = vec![
            Body::new(
                BodyId(0),
                vec![Atom::new(Vec3::new_zero(), FormFactorType::Carbon)],
            ),
            Body::new(
                BodyId(1),
                vec![Atom::new(Vec3::new(100.0, 0.0, 0.0), FormFactorType::Carbon)],
            ),
        ];
        let context = CullingContext::new(&bodies);

        let mut candidates = waters(10);
        candidates.extend(waters(10).into_iter().map(|mut w| {
            w.position.x += 100.0;
            w
        }));

        let culled = BodyCounterCulling.cull(candidates, &context, 10);
        let near: usize = culled.iter().filter(|w| w.position.x < 50.0).count();
        let far = culled.len() - near;
        assert!(near > 0 && far > 0);
        assert!(culled.len() <= 12);
    }

    #[test]
    fn method_names_round_trip() {
        for method in [
            CullingMethod::None,
            CullingMethod::Counter,
            CullingMethod::Outlier,
            CullingMethod::BodyCounter,
            CullingMethod::Random,
        ] {
            assert_eq!(method.to_string().parse::<CullingMethod>().unwrap(), method);
        }
    }
}
