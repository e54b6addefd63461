//! Property-based checks for term arithmetic and the clock.

use lattice::domain::models::{ActorClock, Term};
use proptest::prelude::*;

proptest! {
    #[test]
    fn extension_always_extends_its_predecessor(
        start in 0i64..1_000_000,
        length in 1u64..1_000_000,
        extra in 1u64..1_000_000,
    ) {
        let term = Term::new(start, start + length as i64).unwrap();
        let extended = term.extend_by(extra);
        prop_assert!(extended.extends(&term));
        prop_assert_eq!(extended.start, term.start);
        prop_assert!(extended.new_start > term.end);
        prop_assert_eq!(extended.length(), extra);
    }

    #[test]
    fn chained_extensions_share_one_start(
        start in 0i64..1_000_000,
        length in 1u64..10_000,
        hops in 1usize..20,
    ) {
        let first = Term::new(start, start + length as i64).unwrap();
        let mut current = first;
        for _ in 0..hops {
            let next = current.extend();
            prop_assert!(next.extends(&current));
            prop_assert!(next.extends(&first));
            current = next;
        }
        prop_assert_eq!(current.start, first.start);
    }

    #[test]
    fn terms_never_contain_instants_outside_their_bounds(
        start in 0i64..1_000_000,
        length in 1u64..1_000_000,
        probe in 0i64..3_000_000,
    ) {
        let term = Term::new(start, start + length as i64).unwrap();
        let inside = probe >= term.start && probe <= term.end;
        prop_assert_eq!(term.contains(probe), inside);
        prop_assert_eq!(term.expired(probe), probe > term.end);
    }

    #[test]
    fn clock_cycle_boundaries_are_consistent(
        cycle_millis in 1u64..100_000,
        cycle in 0u64..10_000,
    ) {
        let clock = ActorClock::new(0, cycle_millis, true);
        let start = clock.cycle_start_millis(cycle);
        let end = clock.cycle_end_millis(cycle);
        prop_assert_eq!(clock.cycle(start), cycle);
        prop_assert_eq!(clock.cycle(end), cycle);
        prop_assert_eq!(clock.cycle(end + 1), cycle + 1);
    }

    #[test]
    fn cycle_aligned_terms_cover_whole_cycles(
        cycle_millis in 1u64..10_000,
        first in 0u64..1_000,
        span in 0u64..1_000,
    ) {
        let clock = ActorClock::new(0, cycle_millis, true);
        let last = first + span;
        let term = Term::for_cycles(&clock, first, last).unwrap();
        prop_assert_eq!(clock.cycle(term.start), first);
        prop_assert_eq!(clock.cycle(term.end), last);
        prop_assert_eq!(term.end_cycle(&clock), last);
    }
}
