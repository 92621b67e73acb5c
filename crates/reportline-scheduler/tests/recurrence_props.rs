//! Property tests for the recurrence calculator.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use proptest::prelude::*;
use reportline_core::Frequency;
use reportline_scheduler::next_trigger;

fn frequency_strategy() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Daily),
        Just(Frequency::Weekly),
        Just(Frequency::Monthly),
        Just(Frequency::Quarterly),
    ]
}

/// Anchors between 1990 and 2100 with second precision.
fn anchor_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (631_152_000i64..4_102_444_800i64)
        .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap())
}

proptest! {
    /// Repeatedly applying next_trigger yields a strictly increasing chain.
    #[test]
    fn chain_is_strictly_increasing(anchor in anchor_strategy(), freq in frequency_strategy()) {
        let mut current = anchor;
        for _ in 0..12 {
            let next = next_trigger(current, freq).unwrap();
            prop_assert!(next > current);
            current = next;
        }
    }

    /// Month steps land in the expected month, and never on a later day
    /// than the anchor's.
    #[test]
    fn month_steps_clamp_day(anchor in anchor_strategy()) {
        for (freq, months) in [(Frequency::Monthly, 1u32), (Frequency::Quarterly, 3u32)] {
            let next = next_trigger(anchor, freq).unwrap();
            let expected = (anchor.month0() + months) % 12;
            prop_assert_eq!(next.month0(), expected);
            prop_assert!(next.day() <= anchor.day());
            prop_assert_eq!(next.time(), anchor.time());
        }
    }

    /// Day steps keep the time of day.
    #[test]
    fn day_steps_keep_time(anchor in anchor_strategy()) {
        prop_assert_eq!((next_trigger(anchor, Frequency::Daily).unwrap() - anchor).num_days(), 1);
        prop_assert_eq!((next_trigger(anchor, Frequency::Weekly).unwrap() - anchor).num_days(), 7);
        let next = next_trigger(anchor, Frequency::Weekly).unwrap();
        prop_assert_eq!(next.weekday(), anchor.weekday());
    }
}
