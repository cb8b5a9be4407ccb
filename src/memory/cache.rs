//! Optional write-through cache in front of a [`MemoryDevice`].
//!
//! The cache models placement only: lines track which tags are resident, and
//! every access still reaches the backing device, so the simulated contents
//! never diverge. Each access yields a [`CacheTransaction`] the host can
//! forward to a statistics display.
//!
//! Writes are write-through; write-back is deliberately not modelled.

use crate::memory::{MemResult, MemoryDevice};
use std::collections::VecDeque;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReplacementPolicy {
    Lru,
    Mru,
    Fifo,
    Random,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteAllocation {
    WriteAllocate,
    NoWriteAllocate,
}

/// Address split and policy parameters. `tag_bits + index_bits` must not
/// exceed 16; the remainder of the address is the line offset.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub tag_bits: u8,
    pub index_bits: u8,
    pub associativity: u16,
    pub replacement: ReplacementPolicy,
    pub write_allocation: WriteAllocation,
}

impl CacheConfig {
    pub fn offset_bits(&self) -> u8 {
        16 - self.tag_bits - self.index_bits
    }

    pub fn num_sets(&self) -> u16 {
        1 << self.index_bits
    }

    fn split(&self, address: u16) -> (u16, u16) {
        let tag = address >> (16 - self.tag_bits);
        let index = (address >> self.offset_bits()) & (self.num_sets() - 1);
        (tag, index)
    }
}

/// One observed access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CacheTransaction {
    pub address: u16,
    pub tag: u16,
    pub index: u16,
    pub hit: bool,
    pub write: bool,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Clone, Copy, Default)]
struct CacheLine {
    valid: bool,
    tag: u16,
    inserted: u64,
    touched: u64,
}

struct CacheSet {
    lines: Vec<CacheLine>,
}

/// A [`MemoryDevice`] decorated with a placement-tracking cache. The CPU is
/// generic over the device, so hosts enable the cache without recompiling.
pub struct CachedMemory<M> {
    inner: M,
    config: CacheConfig,
    sets: Vec<CacheSet>,
    clock: u64,
    stats: CacheStats,
    transactions: VecDeque<CacheTransaction>,
    rng: u16,
}

impl<M: MemoryDevice> CachedMemory<M> {
    pub fn new(inner: M, config: CacheConfig) -> CachedMemory<M> {
        let sets = (0..config.num_sets())
            .map(|_| CacheSet {
                lines: vec![CacheLine::default(); config.associativity as usize],
            })
            .collect();
        CachedMemory {
            inner,
            config,
            sets,
            clock: 0,
            stats: CacheStats::default(),
            transactions: VecDeque::new(),
            rng: 0xACE1,
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drains the access log accumulated since the last call.
    pub fn take_transactions(&mut self) -> Vec<CacheTransaction> {
        self.transactions.drain(..).collect()
    }

    /// Invalidates every line and resets the statistics.
    pub fn flush(&mut self) {
        for set in &mut self.sets {
            for line in &mut set.lines {
                *line = CacheLine::default();
            }
        }
        self.clock = 0;
        self.stats = CacheStats::default();
        self.transactions.clear();
    }

    // Deterministic xorshift so batch runs under the Random policy replay
    // identically.
    fn next_random(&mut self) -> u16 {
        let mut x = self.rng;
        x ^= x << 7;
        x ^= x >> 9;
        x ^= x << 8;
        self.rng = x;
        x
    }

    fn victim_index(&mut self, index: u16) -> usize {
        let assoc = self.config.associativity as usize;
        if let Some(free) = self.sets[index as usize]
            .lines
            .iter()
            .position(|l| !l.valid)
        {
            return free;
        }
        if self.config.replacement == ReplacementPolicy::Random {
            return (self.next_random() as usize) % assoc;
        }
        let lines = &self.sets[index as usize].lines;
        match self.config.replacement {
            ReplacementPolicy::Lru => lines
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.touched)
                .map(|(i, _)| i)
                .unwrap_or(0),
            ReplacementPolicy::Mru => lines
                .iter()
                .enumerate()
                .max_by_key(|(_, l)| l.touched)
                .map(|(i, _)| i)
                .unwrap_or(0),
            _ => lines
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.inserted)
                .map(|(i, _)| i)
                .unwrap_or(0),
        }
    }

    fn access(&mut self, address: u16, write: bool) {
        let (tag, index) = self.config.split(address);
        self.clock += 1;
        let clock = self.clock;

        let hit = {
            let set = &mut self.sets[index as usize];
            match set.lines.iter_mut().find(|l| l.valid && l.tag == tag) {
                Some(line) => {
                    line.touched = clock;
                    true
                }
                None => false,
            }
        };

        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let admit = !write || self.config.write_allocation == WriteAllocation::WriteAllocate;
            if admit {
                let victim = self.victim_index(index);
                let line = &mut self.sets[index as usize].lines[victim];
                if line.valid {
                    self.stats.evictions += 1;
                }
                *line = CacheLine {
                    valid: true,
                    tag,
                    inserted: clock,
                    touched: clock,
                };
            }
        }

        self.transactions.push_back(CacheTransaction {
            address,
            tag,
            index,
            hit,
            write,
        });
    }
}

impl<M: MemoryDevice> MemoryDevice for CachedMemory<M> {
    fn size(&self) -> u32 {
        self.inner.size()
    }

    fn get_byte(&self, address: u16) -> u8 {
        self.inner.get_byte(address)
    }

    fn read_byte(&mut self, address: u16) -> MemResult<u8> {
        let value = self.inner.read_byte(address)?;
        self.access(address, false);
        Ok(value)
    }

    fn write_byte(&mut self, address: u16, value: u8) -> MemResult<()> {
        self.inner.write_byte(address, value)?;
        self.access(address, true);
        Ok(())
    }

    fn load_values(&mut self, base: u16, values: &[u8]) {
        self.inner.load_values(base, values);
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.flush();
    }
}
