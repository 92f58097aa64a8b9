use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::trace;

use crate::error::{Error, Result};

/// Seeded generator owned by a single operation.
///
/// Every draw is a function of the seed and of the call order, so replaying
/// the same calls with the same seed yields the same results.
#[derive(Clone, Debug)]
pub struct Random {
    rng: ChaCha20Rng,
}

/// Size-multiset of a knapsack configuration: item size -> number of items of that size.
type Configuration = BTreeMap<usize, usize>;

impl Random {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    /// Uniform integer from the inclusive range `[min, max]`.
    pub fn range(&mut self, min: i64, max: i64) -> Result<i64> {
        if min > max {
            return Err(Error::InvalidConfig(format!(
                "invalid random range [{min}, {max}]"
            )));
        }
        Ok(self.rng.random_range(min..=max))
    }

    fn index(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    /// Fisher-Yates: for each `i` in `0..n-1` swap with a uniform `j` in `[i, n-1]`.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let n = items.len();
        if n < 2 {
            return;
        }
        for i in 0..n - 1 {
            let j = self.rng.random_range(i..n);
            items.swap(i, j);
        }
    }

    /// Picks exactly `count` items, returned with their original indices.
    ///
    /// `preselected` indices are taken first, in the given order. No two picked
    /// items form a pair listed in `exclusive`. The result is shuffled.
    pub fn select_random_subset<'a, T>(
        &mut self,
        items: &'a [T],
        count: usize,
        preselected: &[usize],
        exclusive: &[(usize, usize)],
    ) -> Result<Vec<(usize, &'a T)>> {
        if count > items.len() {
            return Err(Error::InvalidConfig(format!(
                "unable to select {count} items from a list of {}",
                items.len()
            )));
        }
        if count < preselected.len() {
            return Err(Error::InvalidConfig(format!(
                "unable to select only {count} items when {} are preselected",
                preselected.len()
            )));
        }

        let mut conflicts = conflict_index(items.len(), exclusive)?;
        let mut candidates: Vec<usize> = (0..items.len()).collect();
        let mut preselected: VecDeque<usize> = preselected.iter().copied().collect();
        let mut picked: Vec<usize> = Vec::with_capacity(count);
        prune_dead_ends(&mut candidates, &mut conflicts, count);

        while picked.len() < count {
            if candidates.len() < count - picked.len() {
                return Err(Error::InvalidConfig(
                    "mutual exclusion rules for random selection are too strict".to_string(),
                ));
            }

            let key = match preselected.pop_front() {
                Some(key) => {
                    if key >= items.len() {
                        return Err(Error::InvalidConfig(format!(
                            "preselected index {key} is out of range"
                        )));
                    }
                    if !candidates.contains(&key) {
                        return Err(Error::InvalidConfig(format!(
                            "preselected index {key} is duplicate or excluded by another preselected item"
                        )));
                    }
                    key
                }
                None => candidates[self.index(candidates.len())],
            };
            picked.push(key);
            trace!(key, picked = picked.len(), "subset item picked");

            candidates.retain(|&k| k != key && !conflicts[key].contains(&k));
            remove_conflicts_of(&mut conflicts, key);
            prune_dead_ends(&mut candidates, &mut conflicts, count - picked.len());
        }

        // preselected keys went in first, so the order still needs mixing
        self.shuffle(&mut picked);
        Ok(picked.into_iter().map(|key| (key, &items[key])).collect())
    }

    /// Picks indices of items whose summed size lies in `[min, max]`.
    ///
    /// A configuration is the multiset of sizes used. One is drawn uniformly
    /// among all feasible configurations (not among all subsets), then items of
    /// each size are drawn uniformly from the items of that size. The empty
    /// configuration is only used when nothing else fits. Returns an empty list
    /// when `max == 0` or no configuration is feasible.
    pub fn select_random_knapsack(
        &mut self,
        sizes: &[usize],
        min: usize,
        max: usize,
    ) -> Result<Vec<usize>> {
        if max == 0 || min > max {
            return Ok(vec![]);
        }
        if let Some(idx) = sizes.iter().position(|&s| s == 0) {
            return Err(Error::InvalidConfig(format!(
                "knapsack item {idx} has zero size"
            )));
        }

        let mut pools: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &size) in sizes.iter().enumerate() {
            pools.entry(size).or_default().push(idx);
        }

        // total size -> distinct configurations reaching it
        let mut reachable: BTreeMap<usize, BTreeSet<Configuration>> = BTreeMap::new();
        reachable.entry(0).or_default().insert(Configuration::new());
        for (&size, pool) in &pools {
            let mut next = reachable.clone();
            for (&total, configurations) in &reachable {
                for taken in 1..=pool.len() {
                    let new_total = total + taken * size;
                    if new_total > max {
                        break;
                    }
                    for configuration in configurations {
                        let mut extended = configuration.clone();
                        extended.insert(size, taken);
                        next.entry(new_total).or_default().insert(extended);
                    }
                }
            }
            reachable = next;
        }

        let mut feasible: Vec<Configuration> = reachable
            .range(min..=max)
            .flat_map(|(_, configurations)| configurations.iter().cloned())
            .collect();
        if feasible.len() > 1 {
            feasible.retain(|configuration| !configuration.is_empty());
        }
        trace!(configurations = feasible.len(), min, max, "knapsack configurations");
        if feasible.is_empty() {
            return Ok(vec![]);
        }

        let chosen = feasible.swap_remove(self.index(feasible.len()));
        let mut selected = vec![];
        for (size, taken) in chosen {
            let Some(pool) = pools.get(&size) else {
                continue;
            };
            for (_, &idx) in self.select_random_subset(pool, taken, &[], &[])? {
                selected.push(idx);
            }
        }
        selected.sort_unstable();
        Ok(selected)
    }
}

fn conflict_index(len: usize, exclusive: &[(usize, usize)]) -> Result<Vec<BTreeSet<usize>>> {
    let mut index = vec![BTreeSet::new(); len];
    for &(a, b) in exclusive {
        if a >= len || b >= len {
            return Err(Error::InvalidConfig(format!(
                "invalid reference in mutually exclusive list [{a}, {b}]"
            )));
        }
        if a == b {
            return Err(Error::InvalidConfig(format!(
                "item {a} cannot exclude itself"
            )));
        }
        index[a].insert(b);
        index[b].insert(a);
    }
    Ok(index)
}

fn remove_conflicts_of(conflicts: &mut [BTreeSet<usize>], key: usize) {
    let linked = std::mem::take(&mut conflicts[key]);
    for other in linked {
        conflicts[other].remove(&key);
    }
}

/// Drops candidates that could not be completed to `required` items if picked.
fn prune_dead_ends(candidates: &mut Vec<usize>, conflicts: &mut [BTreeSet<usize>], required: usize) {
    if required == 0 {
        return;
    }
    let mut alive: BTreeSet<usize> = candidates.iter().copied().collect();
    for &key in candidates.iter() {
        let blocked = conflicts[key].iter().filter(|o| alive.contains(o)).count();
        if alive.len() - blocked < required {
            alive.remove(&key);
            remove_conflicts_of(conflicts, key);
        }
    }
    candidates.retain(|key| alive.contains(key));
}
