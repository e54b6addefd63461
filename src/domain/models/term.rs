//! Lease terms: half-open time intervals with extension semantics.

use serde::{Deserialize, Serialize};

use crate::domain::errors::LatticeError;

use super::clock::ActorClock;

/// Time interval of a ticket or lease, in milliseconds since the Unix epoch.
///
/// `start` is the first valid millisecond and `end` the last. `new_start`
/// tracks where the current holding begins: it equals `start` on a fresh
/// term and moves past the predecessor's `end` on each extension, so a chain
/// of extended terms shares one `start` and never overlaps holdings.
///
/// Invariant: `start <= new_start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub start: i64,
    pub new_start: i64,
    pub end: i64,
}

impl Term {
    /// Fresh term covering `[start, end]`.
    pub fn new(start: i64, end: i64) -> Result<Self, LatticeError> {
        Self::with_new_start(start, start, end)
    }

    /// Term with an explicit `new_start` (extension requests).
    pub fn with_new_start(start: i64, new_start: i64, end: i64) -> Result<Self, LatticeError> {
        if start > new_start || new_start > end {
            return Err(LatticeError::InvalidArguments(format!(
                "invalid term: start={start} new_start={new_start} end={end}"
            )));
        }
        Ok(Self {
            start,
            new_start,
            end,
        })
    }

    /// Term spanning whole cycles `[first_cycle, last_cycle]` of the clock.
    pub fn for_cycles(clock: &ActorClock, first_cycle: u64, last_cycle: u64) -> Result<Self, LatticeError> {
        Self::new(
            clock.cycle_start_millis(first_cycle),
            clock.cycle_end_millis(last_cycle),
        )
    }

    /// Length of the current holding in milliseconds (inclusive).
    pub fn length(&self) -> u64 {
        (self.end - self.new_start) as u64 + 1
    }

    /// Length of the whole term chain in milliseconds (inclusive).
    pub fn full_length(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }

    /// Successor term continuing this one for the same length.
    pub fn extend(&self) -> Self {
        self.extend_by(self.length())
    }

    /// Successor term continuing this one for `length` milliseconds.
    pub fn extend_by(&self, length: u64) -> Self {
        Self {
            start: self.start,
            new_start: self.end + 1,
            end: self.end + length as i64,
        }
    }

    /// Whether this term is a valid extension of `prior`: same `start`,
    /// holding strictly after the prior `end`.
    pub fn extends(&self, prior: &Term) -> bool {
        self.start == prior.start && self.new_start > prior.end
    }

    /// Whether the instant falls within `[start, end]`.
    pub fn contains(&self, millis: i64) -> bool {
        millis >= self.start && millis <= self.end
    }

    /// Whether the whole of `other` falls within this term.
    pub fn contains_term(&self, other: &Term) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the term has expired as of the given instant.
    pub fn expired(&self, millis: i64) -> bool {
        millis > self.end
    }

    /// Cycle after which an active lease under this term must close.
    pub fn end_cycle(&self, clock: &ActorClock) -> u64 {
        clock.cycle(self.end)
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}] (new_start {})", self.start, self.end, self.new_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_enforces_ordering() {
        assert!(Term::new(1000, 2000).is_ok());
        assert!(Term::new(2000, 1000).is_err());
        assert!(Term::with_new_start(1000, 900, 2000).is_err());
        assert!(Term::with_new_start(1000, 2500, 2000).is_err());
    }

    #[test]
    fn extend_preserves_start_and_moves_new_start() {
        let t = Term::new(1000, 1999).unwrap();
        let t1 = t.extend();
        assert_eq!(t1.start, 1000);
        assert_eq!(t1.new_start, 2000);
        assert_eq!(t1.end, 2999);
        assert!(t1.extends(&t));

        let t2 = t1.extend_by(500);
        assert_eq!(t2.new_start, 3000);
        assert_eq!(t2.end, 3499);
        assert!(t2.extends(&t1));
        // a chain extension also extends the first term
        assert!(t2.extends(&t));
    }

    #[test]
    fn non_extensions_are_rejected() {
        let t = Term::new(1000, 1999).unwrap();
        // different start
        let other = Term::with_new_start(900, 2000, 2999).unwrap();
        assert!(!other.extends(&t));
        // overlapping new_start
        let overlap = Term::with_new_start(1000, 1999, 2999).unwrap();
        assert!(!overlap.extends(&t));
    }

    #[test]
    fn contains_and_expired() {
        let t = Term::new(1000, 2000).unwrap();
        assert!(t.contains(1000));
        assert!(t.contains(2000));
        assert!(!t.contains(999));
        assert!(!t.contains(2001));
        assert!(!t.expired(2000));
        assert!(t.expired(2001));
        assert!(t.contains_term(&Term::new(1200, 1800).unwrap()));
        assert!(!t.contains_term(&Term::new(900, 1800).unwrap()));
    }

    #[test]
    fn cycle_aligned_terms() {
        let clock = ActorClock::new(0, 1000, true);
        let t = Term::for_cycles(&clock, 5, 20).unwrap();
        assert_eq!(t.start, 5000);
        assert_eq!(t.end, 20999);
        assert_eq!(t.end_cycle(&clock), 20);
    }
}
