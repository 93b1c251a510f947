//! Time-ordered event identifiers.
//!
//! Identifiers are UUID v7 values: 48 bits of Unix milliseconds followed by
//! 74 bits that start from a random point and count upward while the clock
//! stays on the same millisecond. Two identifiers minted by the same
//! generator therefore always sort in minting order, both as bytes and in
//! their hyphenated string form.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use uuid::Uuid;

/// Width of the counter that follows the timestamp.
const COUNTER_BITS: u32 = 74;

/// Largest counter value that fits in the random section.
const COUNTER_MAX: u128 = (1 << COUNTER_BITS) - 1;

/// Fresh counters start in the lower half so same-millisecond bursts
/// rarely overflow into the next millisecond.
const COUNTER_SEED_MASK: u128 = COUNTER_MAX >> 1;

/// Low 62 bits of the counter go after the variant bits.
const RAND_B_BITS: u32 = 62;
const RAND_B_MASK: u128 = (1 << RAND_B_BITS) - 1;

/// Unix milliseconds occupy the top 48 bits.
const TIMESTAMP_MASK: u128 = (1 << 48) - 1;

/// Monotonic identifier source owned by one emitter worker.
///
/// The entropy source is seeded once, at construction.
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
    last_millis: u64,
    counter: u128,
}

impl IdGenerator {
    /// Create a generator seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Create a generator with a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    const fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            last_millis: 0,
            counter: 0,
        }
    }

    /// Mint the next identifier as a string.
    pub fn next_id(&mut self) -> String {
        self.next_uuid().hyphenated().to_string()
    }

    /// Mint the next identifier.
    pub fn next_uuid(&mut self) -> Uuid {
        self.mint_at(unix_millis())
    }

    fn mint_at(&mut self, now_millis: u64) -> Uuid {
        if now_millis > self.last_millis {
            self.last_millis = now_millis;
            self.counter = self.fresh_counter();
        } else if self.counter >= COUNTER_MAX {
            // Counter exhausted within one millisecond: borrow the next one.
            self.last_millis = self.last_millis.saturating_add(1);
            self.counter = self.fresh_counter();
        } else {
            self.counter = self.counter.saturating_add(1);
        }
        encode_v7(self.last_millis, self.counter)
    }

    fn fresh_counter(&mut self) -> u128 {
        self.rng.random::<u128>() & COUNTER_SEED_MASK
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay out a UUID v7 from a timestamp and a 74-bit counter.
#[allow(clippy::arithmetic_side_effects)]
fn encode_v7(millis: u64, counter: u128) -> Uuid {
    let timestamp = u128::from(millis) & TIMESTAMP_MASK;
    let rand_a = (counter >> RAND_B_BITS) & 0x0FFF;
    let rand_b = counter & RAND_B_MASK;
    Uuid::from_u128((timestamp << 80) | (0x7 << 76) | (rand_a << 64) | (0b10 << 62) | rand_b)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
