use std::{fmt, ops::Range};

use serde::Serialize;

use crate::{
    error::ConfigError,
    replace::{lru::Lru, Replace},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u64,
    pub set: usize,
    pub tag: u64,
}

#[derive(Debug)]
pub struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    fn new(shift: u32, bits: u32) -> Self {
        let mask = if bits >= u64::BITS {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        BitSection { shift, mask }
    }

    fn apply(&self, num: u64) -> u64 {
        // A shift by the full address width leaves nothing behind
        num.checked_shr(self.shift).unwrap_or(0) & self.mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit,
    Miss,
    MissEviction,
}

/// Classification of one `access` call.
///
/// `modify` marks a combined load and store, whose store half always hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub result: AccessResult,
    pub modify: bool,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.result {
            AccessResult::Hit => "hit",
            AccessResult::Miss => "miss",
            AccessResult::MissEviction => "miss eviction",
        };
        f.write_str(text)?;
        if self.modify {
            f.write_str(" hit")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub accesses: u64,
    pub miss_rate: f64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits:{} misses:{} evictions:{}",
            self.hits, self.misses, self.evictions
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub valid: bool,
    pub tag: u64,
    /// Clock value of the last hit or fill.
    pub last_used: u64,
}

impl Line {
    fn fill(&mut self, tag: u64, now: u64) {
        self.valid = true;
        self.tag = tag;
        self.last_used = now;
    }
}

#[derive(Debug)]
pub struct Cache<R: Replace = Lru> {
    lines: Vec<Line>,
    pub n_sets: usize,
    pub n_ways: usize,
    offset_sec: BitSection,
    set_sec: BitSection,
    tag_sec: BitSection,
    repl: R,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Cache<Lru> {
    /// Builds an LRU cache of `2^s` sets with `n_ways` lines of `2^b` bytes.
    pub fn new(s: u32, n_ways: usize, b: u32) -> Result<Self, ConfigError> {
        Self::with_policy(s, n_ways, b, Lru::new())
    }
}

impl<R: Replace> Cache<R> {
    pub fn with_policy(s: u32, n_ways: usize, b: u32, repl: R) -> Result<Self, ConfigError> {
        if s == 0 {
            return Err(ConfigError::ZeroSetBits);
        }
        if n_ways == 0 {
            return Err(ConfigError::ZeroLines);
        }
        if b == 0 {
            return Err(ConfigError::ZeroBlockBits);
        }
        if s.checked_add(b).map_or(true, |width| width > u64::BITS) {
            return Err(ConfigError::AddressTooWide { s, b });
        }
        if s >= usize::BITS {
            return Err(ConfigError::TooManySets { s });
        }
        let n_sets = 1usize << s;
        let n_lines = n_sets
            .checked_mul(n_ways)
            .ok_or(ConfigError::TooManySets { s })?;
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(n_lines)
            .map_err(|_| ConfigError::TooManySets { s })?;
        lines.resize_with(n_lines, Line::default);

        Ok(Cache {
            lines,
            n_sets,
            n_ways,
            offset_sec: BitSection::new(0, b),
            set_sec: BitSection::new(b, s),
            tag_sec: BitSection::new(s + b, u64::BITS),
            repl,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        })
    }

    pub fn split_addr(&self, addr: u64) -> Addr {
        let offset = self.offset_sec.apply(addr);
        // The set mask is below 2^s and s < usize::BITS
        let set = self.set_sec.apply(addr) as usize;
        let tag = self.tag_sec.apply(addr);
        Addr { offset, set, tag }
    }

    fn get_set(&self, set: usize) -> Range<usize> {
        set * self.n_ways..(set + 1) * self.n_ways
    }

    /// Simulates one memory reference. A modify is a load followed by a store
    /// to the same block, so it scores one extra hit on top of the load.
    pub fn access(&mut self, addr: u64, is_modify: bool) -> Outcome {
        self.clock += 1;
        let now = self.clock;
        let addr = self.split_addr(addr);
        let set_range = self.get_set(addr.set);
        let set_slice = &mut self.lines[set_range];

        let hit = set_slice
            .iter_mut()
            .find(|line| line.valid && line.tag == addr.tag);

        let result = if let Some(line) = hit {
            line.last_used = now;
            self.hits += 1;
            AccessResult::Hit
        } else {
            self.misses += 1;
            let victim_way = self.repl.victim(set_slice);
            let victim = &mut set_slice[victim_way];
            let result = if victim.valid {
                self.evictions += 1;
                AccessResult::MissEviction
            } else {
                AccessResult::Miss
            };
            victim.fill(addr.tag, now);
            result
        };

        if is_modify {
            self.hits += 1;
        }

        Outcome {
            result,
            modify: is_modify,
        }
    }

    /// Tags held by the valid lines of `set`, in way order.
    pub fn resident_tags(&self, set: usize) -> Vec<u64> {
        self.lines[self.get_set(set)]
            .iter()
            .filter(|line| line.valid)
            .map(|line| line.tag)
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let miss_rate = if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        };
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            accesses: self.clock,
            miss_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const HIT: Outcome = Outcome {
        result: AccessResult::Hit,
        modify: false,
    };
    const MISS: Outcome = Outcome {
        result: AccessResult::Miss,
        modify: false,
    };
    const MISS_EVICT: Outcome = Outcome {
        result: AccessResult::MissEviction,
        modify: false,
    };

    fn totals(cache: &Cache) -> (u64, u64, u64) {
        let stats = cache.stats();
        (stats.hits, stats.misses, stats.evictions)
    }

    #[rstest]
    #[case(0x21, Addr { offset: 1, set: 2, tag: 0 })]
    #[case(0x421, Addr { offset: 1, set: 2, tag: 0x10 })]
    #[case(0x3f, Addr { offset: 0xf, set: 3, tag: 0 })]
    fn splits_address(#[case] addr: u64, #[case] expected: Addr) {
        let cache = Cache::new(2, 1, 4).unwrap();
        assert_eq!(cache.split_addr(addr), expected);
    }

    #[test]
    fn full_width_address_has_no_tag() {
        let cache = Cache::new(4, 1, 60).unwrap();
        let addr = cache.split_addr(u64::MAX);
        assert_eq!(addr.tag, 0);
        assert_eq!(addr.set, 0xf);
        assert_eq!(addr.offset, (1 << 60) - 1);
    }

    #[rstest]
    #[case(0, 1, 1)]
    #[case(1, 0, 1)]
    #[case(1, 1, 0)]
    #[case(40, 1, 25)]
    fn rejects_bad_geometry(#[case] s: u32, #[case] e: usize, #[case] b: u32) {
        assert!(Cache::new(s, e, b).is_err());
    }

    #[test]
    fn reports_which_parameter_is_bad() {
        assert!(matches!(Cache::new(0, 1, 1), Err(ConfigError::ZeroSetBits)));
        assert!(matches!(Cache::new(1, 0, 1), Err(ConfigError::ZeroLines)));
        assert!(matches!(Cache::new(1, 1, 0), Err(ConfigError::ZeroBlockBits)));
        assert!(matches!(
            Cache::new(40, 1, 25),
            Err(ConfigError::AddressTooWide { s: 40, b: 25 })
        ));
    }

    #[rstest]
    #[case(62, 1, 2)]
    #[case(60, 4, 4)]
    fn unallocatable_cache_is_an_error(#[case] s: u32, #[case] e: usize, #[case] b: u32) {
        assert!(matches!(
            Cache::new(s, e, b),
            Err(ConfigError::TooManySets { .. })
        ));
    }

    #[test]
    fn allocates_every_set() {
        let cache = Cache::new(3, 2, 4).unwrap();
        assert_eq!(cache.n_sets, 8);
        assert_eq!(cache.n_ways, 2);
        for set in 0..cache.n_sets {
            assert!(cache.resident_tags(set).is_empty());
        }
    }

    #[test]
    fn lru_evicts_least_recent() {
        // s=1, b=1: the tag starts at bit 2, set is bit 1
        let mut cache = Cache::new(1, 2, 1).unwrap();
        let [a, b, c] = [0b000u64, 0b100, 0b1000];
        let outcomes: Vec<_> = [a, b, a, c]
            .into_iter()
            .map(|addr| cache.access(addr, false))
            .collect();
        assert_eq!(outcomes, vec![MISS, MISS, HIT, MISS_EVICT]);

        let mut resident = cache.resident_tags(0);
        resident.sort();
        assert_eq!(resident, vec![0, 2]);
        assert_eq!(totals(&cache), (1, 3, 1));
    }

    #[test]
    fn direct_mapped_conflict() {
        let mut cache = Cache::new(1, 1, 1).unwrap();
        assert_eq!(cache.access(0, false), MISS);
        assert_eq!(cache.access(4, false), MISS_EVICT);
        assert_eq!(totals(&cache), (0, 2, 1));
    }

    #[test]
    fn different_sets_do_not_conflict() {
        let mut cache = Cache::new(1, 1, 1).unwrap();
        assert_eq!(cache.access(0, false), MISS);
        assert_eq!(cache.access(2, false), MISS);
        assert_eq!(cache.access(1, false), HIT);
        assert_eq!(cache.access(3, false), HIT);
        assert_eq!(totals(&cache), (2, 2, 0));
    }

    #[test]
    fn modify_counts_an_extra_hit() {
        let mut cache = Cache::new(1, 1, 1).unwrap();

        let miss = cache.access(0, true);
        assert_eq!(miss.to_string(), "miss hit");
        assert_eq!(totals(&cache), (1, 1, 0));

        let hit = cache.access(0, true);
        assert_eq!(hit.to_string(), "hit hit");
        assert_eq!(totals(&cache), (3, 1, 0));

        let evict = cache.access(4, true);
        assert_eq!(evict.to_string(), "miss eviction hit");
        assert_eq!(totals(&cache), (4, 2, 1));
    }

    #[test]
    fn plain_outcomes_display() {
        assert_eq!(HIT.to_string(), "hit");
        assert_eq!(MISS.to_string(), "miss");
        assert_eq!(MISS_EVICT.to_string(), "miss eviction");
    }

    #[test]
    fn no_eviction_before_set_is_full() {
        let mut cache = Cache::new(2, 4, 3).unwrap();
        // Four distinct tags in set 1
        for tag in 0..4u64 {
            let addr = (tag << 5) | (1 << 3);
            assert_eq!(cache.access(addr, false), MISS);
        }
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.access((4 << 5) | (1 << 3), false), MISS_EVICT);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn repeated_hits_only_touch_hits() {
        let mut cache = Cache::new(2, 2, 2).unwrap();
        cache.access(0x40, false);
        let before = cache.stats();
        for _ in 0..100 {
            assert_eq!(cache.access(0x41, false), HIT);
        }
        let after = cache.stats();
        assert_eq!(after.misses, before.misses);
        assert_eq!(after.evictions, before.evictions);
        assert_eq!(after.hits, before.hits + 100);
    }

    #[test]
    fn every_access_records_one_primary_result() {
        let mut cache = Cache::new(2, 2, 2).unwrap();
        let pattern = [(0x0, false), (0x40, true), (0x80, false), (0x0, true), (0xc0, true)];
        let mut modifies = 0;
        for &(addr, modify) in pattern.iter().cycle().take(50) {
            cache.access(addr, modify);
            modifies += modify as u64;
        }
        let stats = cache.stats();
        assert_eq!(stats.accesses, 50);
        assert_eq!(stats.hits + stats.misses, stats.accesses + modifies);
    }

    #[test]
    fn replay_is_deterministic() {
        let run = || {
            let mut cache = Cache::new(3, 2, 4).unwrap();
            let outcomes: Vec<_> = (0..500u64)
                .map(|i| cache.access(i.wrapping_mul(0x9e37_79b9) & 0xffff, i % 3 == 0))
                .collect();
            (outcomes, cache.stats())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn stats_display_and_rate() {
        let mut cache = Cache::new(1, 1, 1).unwrap();
        assert_eq!(cache.stats().miss_rate, 0.0);
        cache.access(0, false);
        cache.access(0, false);
        let stats = cache.stats();
        assert_eq!(stats.to_string(), "hits:1 misses:1 evictions:0");
        assert_eq!(stats.miss_rate, 0.5);
    }
}
