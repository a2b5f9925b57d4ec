//! Set algebra helpers shared by the SUNION/SINTER/SDIFF command family.

use std::collections::HashSet;

use bytes::Bytes;
use rand::seq::{IteratorRandom, SliceRandom};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetOperation {
    Union,
    Intersection,
    Difference,
}

/// Combines the source sets. For difference, the first set is the base the
/// others subtract from; a missing key contributes an empty set.
pub fn combine(operation: SetOperation, sources: &[Option<&HashSet<Bytes>>]) -> HashSet<Bytes> {
    let mut result: HashSet<Bytes> = sources
        .first()
        .and_then(|source| *source)
        .cloned()
        .unwrap_or_default();

    for source in &sources[1..] {
        match operation {
            SetOperation::Union => {
                if let Some(other) = source {
                    result.extend(other.iter().cloned());
                }
            }
            SetOperation::Intersection => match source {
                Some(other) => result.retain(|member| other.contains(member)),
                None => result.clear(),
            },
            SetOperation::Difference => {
                if let Some(other) = source {
                    result.retain(|member| !other.contains(member));
                }
            }
        }
        if result.is_empty() {
            break;
        }
    }

    result
}

/// SRANDMEMBER. A non-negative count samples distinct members (capped at the
/// cardinality); a negative count samples with replacement and may repeat.
pub fn random_members(set: &HashSet<Bytes>, count: i64) -> Vec<Bytes> {
    let mut rng = rand::rng();

    if count >= 0 {
        let wanted = (count as usize).min(set.len());
        let mut chosen = set.iter().cloned().choose_multiple(&mut rng, wanted);
        chosen.shuffle(&mut rng);
        chosen
    } else {
        let wanted = count.unsigned_abs() as usize;
        (0..wanted)
            .filter_map(|_| set.iter().choose(&mut rng).cloned())
            .collect()
    }
}
