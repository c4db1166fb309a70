//! Merging of events that share a phase-space point before they are interpolated.

use super::event::Event;
use rustc_hash::FxHashMap;

/// An event whose bin has been resolved, together with its scales.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CachedEvent {
    /// Index of the observable bin.
    pub bin: usize,
    /// First scale.
    pub mu1: f64,
    /// Second scale.
    pub mu2: f64,
    /// The event, with the weights of all merged events summed up.
    pub event: Event,
}

impl CachedEvent {
    fn key(&self) -> Key {
        Key {
            bin: self.bin,
            subprocess: self.event.subprocess,
            bits: [
                self.mu1.to_bits(),
                self.mu2.to_bits(),
                self.event.x1.to_bits(),
                self.event.x2.to_bits(),
            ],
        }
    }
}

// values are compared bitwise, events only merge if they are exactly identical
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct Key {
    bin: usize,
    subprocess: usize,
    bits: [u64; 4],
}

/// Bounded list of events in insertion order; events with the same bin, subprocess, scales and
/// momentum fractions are merged by adding their weights.
#[derive(Clone, Debug, Default)]
pub struct WeightCache {
    max_size: usize,
    entries: Vec<CachedEvent>,
    positions: FxHashMap<Key, usize>,
}

impl WeightCache {
    /// Create a cache that reports being full once it holds `max_size` distinct events.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Vec::with_capacity(max_size),
            positions: FxHashMap::default(),
        }
    }

    /// Return the size at which the cache should be flushed.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Return the number of distinct events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if the cache holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `entry`, merging it with an identical one if present. Returns `true` if the cache is
    /// full afterwards.
    pub fn add(&mut self, entry: CachedEvent) -> bool {
        let key = entry.key();

        if let Some(&position) = self.positions.get(&key) {
            let cached = &mut self.entries[position].event;
            cached.weights += entry.event.weights;
            cached.sigma += entry.event.sigma;
        } else {
            self.positions.insert(key, self.entries.len());
            self.entries.push(entry);
        }

        self.entries.len() >= self.max_size
    }

    /// Remove and return all events in insertion order.
    pub fn drain(&mut self) -> Vec<CachedEvent> {
        self.positions.clear();
        std::mem::replace(&mut self.entries, Vec::with_capacity(self.max_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Weights;

    fn entry(bin: usize, x1: f64, w: f64) -> CachedEvent {
        CachedEvent {
            bin,
            mu1: 91.0,
            mu2: 91.0,
            event: Event::new(x1, 0.2, 1, Weights::central(w)),
        }
    }

    #[test]
    fn merge_identical_events() {
        let mut cache = WeightCache::new(3);

        assert!(!cache.add(entry(0, 0.1, 1.0)));
        assert!(!cache.add(entry(1, 0.1, 2.0)));
        assert!(!cache.add(entry(0, 0.1, 3.0)));
        assert_eq!(cache.len(), 2);

        let mut other = entry(0, 0.1, 1.0);
        other.event.subprocess = 2;
        assert!(cache.add(other));

        let entries = cache.drain();
        assert!(cache.is_empty());
        assert_eq!(
            entries.iter().map(|e| e.event.weights.w).collect::<Vec<_>>(),
            [4.0, 2.0, 1.0]
        );

        // the cache is usable after draining
        assert!(!cache.add(entry(0, 0.1, 1.0)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.max_size(), 3);
    }

    #[test]
    fn nearby_values_are_distinct() {
        let mut cache = WeightCache::new(10);

        cache.add(entry(0, 0.1, 1.0));
        cache.add(entry(0, 0.1 + f64::EPSILON, 1.0));

        assert_eq!(cache.len(), 2);
    }
}
