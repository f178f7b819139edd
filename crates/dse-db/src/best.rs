//! Bounded min-heap of the best results.

use dse_types::EvalResult;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A cached result with its insertion sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestEntry {
    pub quality: f64,
    pub seq: u64,
    pub key: String,
    pub result: EvalResult,
}

impl PartialEq for BestEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BestEntry {}

impl PartialOrd for BestEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BestEntry {
    /// Higher quality is greater; on equal quality the earlier insert is greater.
    fn cmp(&self, other: &Self) -> Ordering {
        self.quality
            .total_cmp(&other.quality)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Holds candidates for the best results, at most one per key. Pushing never
/// evicts other keys; the owner calls [`trim`](Self::trim) to enforce the
/// capacity.
#[derive(Debug)]
pub struct BestCache {
    capacity: usize,
    heap: BinaryHeap<Reverse<BestEntry>>,
    next_seq: u64,
}

impl BestCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts a candidate, replacing any entry already held for `key`.
    pub fn push(&mut self, key: String, result: EvalResult) {
        self.remove(&key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(BestEntry {
            quality: result.quality,
            seq,
            key,
            result,
        }));
    }

    /// Removes the entry held for `key`, if any.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| entry.key != key);
        self.heap.len() != before
    }

    /// Drops the worst entries beyond capacity and returns how many were dropped.
    pub fn trim(&mut self) -> usize {
        let mut dropped = 0;
        while self.heap.len() > self.capacity {
            self.heap.pop();
            dropped += 1;
        }
        dropped
    }

    /// Quality of the worst cached entry.
    pub fn min_quality(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(entry)| entry.quality)
    }

    /// Cached entries, best first.
    pub fn entries(&self) -> Vec<BestEntry> {
        let mut entries: Vec<BestEntry> = self.heap.iter().map(|Reverse(e)| e.clone()).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    /// Best cached entry.
    pub fn top(&self) -> Option<BestEntry> {
        self.heap.iter().map(|Reverse(e)| e).max().cloned()
    }

    /// Empties the cache, returning its entries best first.
    pub fn drain(&mut self) -> Vec<BestEntry> {
        let mut entries: Vec<BestEntry> = std::mem::take(&mut self.heap)
            .into_iter()
            .map(|Reverse(e)| e)
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    /// Replaces the contents with previously saved entries. Only the latest
    /// entry of a key survives.
    pub fn restore(&mut self, mut entries: Vec<BestEntry>) {
        self.next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        let mut seen = std::collections::HashSet::new();
        self.heap = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.key.clone()))
            .map(Reverse)
            .collect();
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }
}
