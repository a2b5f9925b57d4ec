//! Hash field helpers.

use std::collections::HashMap;

use bytes::Bytes;
use rand::seq::IteratorRandom;

/// HRANDFIELD sampling: non-negative counts are distinct fields, negative
/// counts sample with replacement.
pub fn random_fields(hash: &HashMap<Bytes, Bytes>, count: i64) -> Vec<Bytes> {
    let mut rng = rand::rng();

    if count >= 0 {
        let wanted = (count as usize).min(hash.len());
        hash.keys().cloned().choose_multiple(&mut rng, wanted)
    } else {
        let wanted = count.unsigned_abs() as usize;
        (0..wanted)
            .filter_map(|_| hash.keys().choose(&mut rng).cloned())
            .collect()
    }
}
