//! Sorted sets.
//!
//! Members live in two structures that must stay in lockstep: a score lookup
//! map and a `BTreeSet` ordered by (score, member), which yields the command
//! ordering (score ascending, member lexicographic ascending) directly.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

/// f64 wrapper with a total order so scores can live in a `BTreeSet`. NaN is
/// rejected at argument-parse time and never stored; negative zero is
/// normalized so the member tiebreak stays lexicographic.
#[derive(Debug, Clone, Copy)]
pub struct Score(f64);

impl Score {
    fn new(value: f64) -> Self {
        if value == 0.0 {
            Score(0.0)
        } else {
            Score(value)
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One end of a score range. Parsed from `(1.5`, `-inf`, `3` style tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegativeInfinity,
    PositiveInfinity,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    pub fn parse(token: &[u8]) -> Option<ScoreBound> {
        let text = std::str::from_utf8(token).ok()?;
        match text {
            "-inf" | "-INF" => return Some(ScoreBound::NegativeInfinity),
            "+inf" | "inf" | "+INF" | "INF" => return Some(ScoreBound::PositiveInfinity),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix('(') {
            let value = rest.parse::<f64>().ok().filter(|v| !v.is_nan())?;
            return Some(match value {
                f64::NEG_INFINITY => ScoreBound::NegativeInfinity,
                f64::INFINITY => ScoreBound::PositiveInfinity,
                _ => ScoreBound::Exclusive(value),
            });
        }

        let value = text.parse::<f64>().ok().filter(|v| !v.is_nan())?;
        Some(match value {
            f64::NEG_INFINITY => ScoreBound::NegativeInfinity,
            f64::INFINITY => ScoreBound::PositiveInfinity,
            _ => ScoreBound::Inclusive(value),
        })
    }

    fn admits_low(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegativeInfinity => true,
            ScoreBound::PositiveInfinity => false,
            ScoreBound::Inclusive(bound) => score >= *bound,
            ScoreBound::Exclusive(bound) => score > *bound,
        }
    }

    fn admits_high(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegativeInfinity => false,
            ScoreBound::PositiveInfinity => true,
            ScoreBound::Inclusive(bound) => score <= *bound,
            ScoreBound::Exclusive(bound) => score < *bound,
        }
    }
}

/// One end of a lexicographic range: `-`, `+`, `[member`, `(member`.
#[derive(Debug, Clone, PartialEq)]
pub enum LexBound {
    Unbounded,
    Inclusive(Bytes),
    Exclusive(Bytes),
}

impl LexBound {
    /// `low` flips which bare token (`-` or `+`) means unbounded.
    pub fn parse(token: &[u8], low: bool) -> Option<LexBound> {
        match token {
            b"-" if low => return Some(LexBound::Unbounded),
            b"+" if !low => return Some(LexBound::Unbounded),
            _ => {}
        }
        match token.first()? {
            b'[' => Some(LexBound::Inclusive(Bytes::copy_from_slice(&token[1..]))),
            b'(' => Some(LexBound::Exclusive(Bytes::copy_from_slice(&token[1..]))),
            _ => None,
        }
    }

    fn admits_low(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Unbounded => true,
            LexBound::Inclusive(bound) => member >= bound.as_ref(),
            LexBound::Exclusive(bound) => member > bound.as_ref(),
        }
    }

    fn admits_high(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Unbounded => true,
            LexBound::Inclusive(bound) => member <= bound.as_ref(),
            LexBound::Exclusive(bound) => member < bound.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(Score, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        SortedSet::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    /// Inserts or updates a member. Returns true when the member is new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(previous) => {
                self.ordered.remove(&(Score::new(previous), member.clone()));
                self.ordered.insert((Score::new(score), member));
                false
            }
            None => {
                self.ordered.insert((Score::new(score), member));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.scores.remove(member)?;
        self.ordered
            .remove(&(Score::new(score), Bytes::copy_from_slice(member)));
        Some(score)
    }

    /// 0-based position in the requested ordering.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let score = self.score(member)?;
        let target = (Score::new(score), Bytes::copy_from_slice(member));
        let forward = self.ordered.range(..target).count();
        Some(if reverse {
            self.len() - 1 - forward
        } else {
            forward
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.ordered.iter().map(|(score, member)| (member, score.get()))
    }

    /// Inclusive rank range with negative-from-the-end indices.
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Bytes, f64)> {
        let Some((from, to)) = super::list::resolve_range(self.len(), start, stop) else {
            return Vec::new();
        };

        let mut selected: Vec<(Bytes, f64)> = if reverse {
            self.ordered
                .iter()
                .rev()
                .skip(from)
                .take(to - from + 1)
                .map(|(score, member)| (member.clone(), score.get()))
                .collect()
        } else {
            self.ordered
                .iter()
                .skip(from)
                .take(to - from + 1)
                .map(|(score, member)| (member.clone(), score.get()))
                .collect()
        };

        selected.shrink_to_fit();
        selected
    }

    pub fn range_by_score(
        &self,
        min: ScoreBound,
        max: ScoreBound,
        reverse: bool,
        offset: usize,
        count: Option<usize>,
    ) -> Vec<(Bytes, f64)> {
        let in_range = |score: f64| min.admits_low(score) && max.admits_high(score);

        let collect = |iter: &mut dyn Iterator<Item = &(Score, Bytes)>| {
            iter.filter(|(score, _)| in_range(score.get()))
                .skip(offset)
                .take(count.unwrap_or(usize::MAX))
                .map(|(score, member)| (member.clone(), score.get()))
                .collect::<Vec<_>>()
        };

        if reverse {
            collect(&mut self.ordered.iter().rev())
        } else {
            collect(&mut self.ordered.iter())
        }
    }

    pub fn count_in_score_range(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.ordered
            .iter()
            .filter(|(score, _)| min.admits_low(score.get()) && max.admits_high(score.get()))
            .count()
    }

    pub fn range_by_lex(
        &self,
        min: &LexBound,
        max: &LexBound,
        reverse: bool,
        offset: usize,
        count: Option<usize>,
    ) -> Vec<(Bytes, f64)> {
        let in_range =
            |member: &Bytes| min.admits_low(member.as_ref()) && max.admits_high(member.as_ref());

        let collect = |iter: &mut dyn Iterator<Item = &(Score, Bytes)>| {
            iter.filter(|(_, member)| in_range(member))
                .skip(offset)
                .take(count.unwrap_or(usize::MAX))
                .map(|(score, member)| (member.clone(), score.get()))
                .collect::<Vec<_>>()
        };

        if reverse {
            collect(&mut self.ordered.iter().rev())
        } else {
            collect(&mut self.ordered.iter())
        }
    }

    pub fn count_in_lex_range(&self, min: &LexBound, max: &LexBound) -> usize {
        self.ordered
            .iter()
            .filter(|(_, member)| min.admits_low(member.as_ref()) && max.admits_high(member.as_ref()))
            .count()
    }

    /// Removes and returns up to `count` members from whichever end.
    pub fn pop(&mut self, count: usize, reverse: bool) -> Vec<(Bytes, f64)> {
        let mut popped = Vec::new();
        for _ in 0..count {
            let next = if reverse {
                self.ordered.iter().next_back().cloned()
            } else {
                self.ordered.iter().next().cloned()
            };
            let Some((score, member)) = next else {
                break;
            };
            self.ordered.remove(&(score, member.clone()));
            self.scores.remove(&member);
            popped.push((member, score.get()));
        }
        popped
    }

    pub fn members(&self) -> impl Iterator<Item = &Bytes> {
        self.scores.keys()
    }
}
