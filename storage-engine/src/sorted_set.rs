use ordered_float::OrderedFloat;
use rampart::domain::ScoredMember;
use std::collections::{BTreeSet, HashMap};

/// Members ordered by `(score, member)`, like a Redis zset.
#[derive(Debug, Default)]
pub struct SortedSet {
    ordered: BTreeSet<(OrderedFloat<f64>, i64)>,
    scores: HashMap<i64, OrderedFloat<f64>>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-score `member`. Returns true when it was not present.
    pub fn add(&mut self, member: i64, score: f64) -> bool {
        let score = OrderedFloat(score);
        match self.scores.insert(member, score) {
            Some(previous) => {
                self.ordered.remove(&(previous, member));
                self.ordered.insert((score, member));
                false
            }
            None => {
                self.ordered.insert((score, member));
                true
            }
        }
    }

    /// Highest score first, positions `start..=stop`.
    pub fn rev_range(&self, start: usize, stop: Option<usize>) -> Vec<i64> {
        let take = match stop {
            Some(stop) if stop < start => return Vec::new(),
            Some(stop) => stop - start + 1,
            None => usize::MAX,
        };
        self.ordered
            .iter()
            .rev()
            .skip(start)
            .take(take)
            .map(|&(_, member)| member)
            .collect()
    }

    pub fn pop_min(&mut self, count: usize) -> Vec<ScoredMember> {
        let mut popped = Vec::with_capacity(count.min(self.len()));
        while popped.len() < count {
            let Some((score, member)) = self.ordered.pop_first() else {
                break;
            };
            self.scores.remove(&member);
            popped.push(ScoredMember::new(member, score.into_inner()));
        }
        popped
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescore_moves_member() {
        let mut set = SortedSet::new();
        assert!(set.add(1, 1.0));
        assert!(set.add(2, 2.0));
        assert!(!set.add(1, 3.0));

        assert_eq!(set.len(), 2);
        assert_eq!(set.rev_range(0, None), vec![1, 2]);
    }

    #[test]
    fn test_rev_range_bounds() {
        let mut set = SortedSet::new();
        for id in 1..=5 {
            set.add(id, id as f64);
        }

        assert_eq!(set.rev_range(0, Some(1)), vec![5, 4]);
        assert_eq!(set.rev_range(3, None), vec![2, 1]);
        assert_eq!(set.rev_range(4, Some(2)), Vec::<i64>::new());
        assert_eq!(set.rev_range(10, None), Vec::<i64>::new());
    }

    #[test]
    fn test_pop_min_takes_lowest_scores() {
        let mut set = SortedSet::new();
        for id in [30, 10, 20] {
            set.add(id, id as f64);
        }

        let popped = set.pop_min(2);
        assert_eq!(popped, vec![ScoredMember::new(10, 10.0), ScoredMember::new(20, 20.0)]);
        assert_eq!(set.rev_range(0, None), vec![30]);

        assert_eq!(set.pop_min(5).len(), 1);
        assert!(set.is_empty());
    }
}
