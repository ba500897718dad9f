//! Lane-group atomic aggregation
//!
//! Kernels hand out unique slots from shared counters (fragment slots, node
//! batches, payload slots). Call sites only see [`AtomicCounter::reserve`]
//! semantics: "reserve N units, get a base". The group-level reduction lives in
//! [`WorkGroup::reserve`] and [`WorkGroup::advance`]: lane requests are summed,
//! a single atomic add is issued for the whole group, and each lane's base is
//! the returned value plus its exclusive prefix within the group. Contention on
//! the counter drops from one atomic per lane to one per group.

use std::sync::atomic::{AtomicU32, Ordering};

use super::dispatch::WorkGroup;

/// Shared allocation counter
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU32,
}

impl AtomicCounter {
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Reserve `count` units and return the base of the reserved range.
    ///
    /// The counter is not clamped; callers compare against their capacity.
    pub fn reserve(&self, count: u32) -> u32 {
        self.value.fetch_add(count, Ordering::AcqRel)
    }

    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Counter value clamped to a buffer capacity
    pub fn clamped(&self, capacity: u32) -> u32 {
        self.load().min(capacity)
    }

    pub fn reset(&self, value: u32) {
        self.value.store(value, Ordering::Release);
    }
}

/// Outcome of one lane's request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// The lane asked for nothing
    Empty,
    /// Slots `base..base + len` belong to the lane. `len` is smaller than the
    /// request when the range runs past capacity.
    Granted { base: u32, len: u32 },
    /// Nothing of the request fits below capacity
    Exhausted,
}

impl Reservation {
    pub fn base(&self) -> Option<u32> {
        match self {
            Reservation::Granted { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// Granted length, 0 when empty or exhausted
    pub fn len(&self) -> u32 {
        match self {
            Reservation::Granted { len, .. } => *len,
            _ => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Reservation::Exhausted)
    }
}

impl WorkGroup {
    /// With-readback reservation for every lane of the group.
    ///
    /// `requests[i]` is lane i's unit count (0 allowed). The counter advances
    /// by the group total exactly once, even when part of it lies past
    /// `capacity`; lanes receive the part of their range that fits.
    pub fn reserve(&self, counter: &AtomicCounter, requests: &[u32], capacity: u32) -> Vec<Reservation> {
        let (prefix, total) = exclusive_prefix(requests);
        if total == 0 {
            return vec![Reservation::Empty; requests.len()];
        }

        let base = counter.reserve(total) as u64;
        let capacity = capacity as u64;

        requests
            .iter()
            .zip(prefix)
            .map(|(&request, offset)| {
                if request == 0 {
                    return Reservation::Empty;
                }
                let start = base + offset as u64;
                if start >= capacity {
                    Reservation::Exhausted
                } else {
                    let end = (start + request as u64).min(capacity);
                    Reservation::Granted {
                        base: start as u32,
                        len: (end - start) as u32,
                    }
                }
            })
            .collect()
    }

    /// Fire-and-forget: advance the counter by the group total, no offsets back
    pub fn advance(&self, counter: &AtomicCounter, requests: &[u32]) {
        let total = requests.iter().fold(0u32, |acc, &r| acc.wrapping_add(r));
        if total > 0 {
            counter.reserve(total);
        }
    }
}

/// Exclusive prefix sums and the group total
fn exclusive_prefix(requests: &[u32]) -> (Vec<u32>, u32) {
    let mut running = 0u32;
    let prefix = requests
        .iter()
        .map(|&r| {
            let offset = running;
            running = running.wrapping_add(r);
            offset
        })
        .collect();
    (prefix, running)
}
