use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RulerError};

/// Sorted, duplicate-free set of positions in the 32-bit hash space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct Tokens(Vec<u32>);

impl Tokens {
    /// Build a token set, sorting and deduplicating the input.
    pub fn new(mut tokens: Vec<u32>) -> Self {
        tokens.sort_unstable();
        tokens.dedup();
        Self(tokens)
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokens in ascending order.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &u32> {
        self.0.iter()
    }

    /// Check membership with a binary search.
    pub fn contains(&self, token: u32) -> bool {
        self.0.binary_search(&token).is_ok()
    }

    /// Check the strictly ascending invariant.
    pub fn is_sorted(&self) -> bool {
        self.0.windows(2).all(|w| w[0] < w[1])
    }

    /// Whether any token appears in both sets.
    pub fn intersects(&self, other: &Tokens) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

impl From<Vec<u32>> for Tokens {
    fn from(tokens: Vec<u32>) -> Self {
        Self::new(tokens)
    }
}

impl From<Tokens> for Vec<u32> {
    fn from(tokens: Tokens) -> Self {
        tokens.0
    }
}

impl<'a> IntoIterator for &'a Tokens {
    type Item = &'a u32;
    type IntoIter = std::slice::Iter<'a, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Generate `count` random tokens, none of which appear in `taken`.
///
/// The result is sorted. Collisions, with `taken` or within the new set,
/// are resolved by drawing again.
pub fn generate_tokens(count: usize, taken: &HashSet<u32>) -> Result<Tokens> {
    let free = (u32::MAX as usize)
        .saturating_add(1)
        .saturating_sub(taken.len());
    if count > free {
        return Err(RulerError::TokenCollision(format!(
            "cannot place {} tokens, only {} positions free",
            count, free
        )));
    }

    let max_draws = count.saturating_mul(16).max(1024);
    let mut rng = rand::rng();
    let mut tokens = HashSet::with_capacity(count);
    let mut draws = 0usize;

    while tokens.len() < count {
        if draws == max_draws {
            return Err(RulerError::TokenCollision(format!(
                "gave up after {} draws with {} of {} tokens placed",
                draws,
                tokens.len(),
                count
            )));
        }
        draws += 1;

        let candidate: u32 = rng.random();
        if taken.contains(&candidate) {
            continue;
        }
        tokens.insert(candidate);
    }

    if draws > count {
        tracing::trace!(count, draws, "Token generation hit collisions");
    }
    Ok(Tokens::new(tokens.into_iter().collect()))
}
