//! Digit prompt generation.
//!
//! Enrollment uses a balanced schedule: five 4-digit strings where every
//! digit 0-9 appears exactly twice and no string repeats a digit back to
//! back. Verification challenges are plain uniform draws. All randomness
//! comes from the operating system.

use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

pub const NUM_SETS: usize = 5;
pub const DIGITS_PER_SET: usize = 4;
pub const OCCURRENCES_PER_DIGIT: usize = 2;

const MAX_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to generate balanced prompts after {0} attempts")]
    Exhausted(usize),
}

#[derive(Debug, Clone, Default)]
pub struct PromptGenerator;

impl PromptGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generates the balanced enrollment schedule.
    ///
    /// Draws a random permutation of the multiset [0,0,1,1,...,9,9],
    /// partitions it into five groups of four, and redraws whenever a
    /// group contains two identical adjacent digits.
    pub fn enrollment_prompts(&self) -> Result<Vec<String>, PromptError> {
        let mut pool: Vec<u8> = (0..10u8)
            .flat_map(|d| std::iter::repeat(d).take(OCCURRENCES_PER_DIGIT))
            .collect();

        for _ in 0..MAX_ATTEMPTS {
            pool.shuffle(&mut OsRng);

            let prompts: Vec<String> = pool
                .chunks(DIGITS_PER_SET)
                .map(|chunk| chunk.iter().map(|d| (b'0' + d) as char).collect())
                .collect();

            let adjacency_ok = prompts
                .iter()
                .all(|p| !p.as_bytes().windows(2).any(|w| w[0] == w[1]));
            if adjacency_ok {
                return Ok(prompts);
            }
        }

        Err(PromptError::Exhausted(MAX_ATTEMPTS))
    }

    /// Generates a verification challenge of uniform random digits with a
    /// length drawn from `[min_length, max_length]`.
    pub fn challenge(&self, min_length: usize, max_length: usize) -> String {
        let length = if max_length > min_length {
            OsRng.gen_range(min_length..=max_length)
        } else {
            min_length
        };
        (0..length)
            .map(|_| (b'0' + OsRng.gen_range(0..10u8)) as char)
            .collect()
    }
}
