//! Property tests for the missed-period counter: under any schedule of
//! clock jumps and sweep bursts, the counter never overshoots the number
//! of fully elapsed cadence periods, and enough sweeps bring it exactly
//! level.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use everkeep_core::{Cadence, CheckinLedger, Clock, Database, ManualClock, ProfileSettings};

fn ledger() -> (CheckinLedger, Arc<ManualClock>) {
    let store = Arc::new(Database::open_memory().unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
    ));
    (CheckinLedger::new(store, clock.clone(), 5), clock)
}

fn quiet_settings(cadence: Cadence) -> ProfileSettings {
    // Threshold high enough that escalation never interferes.
    ProfileSettings {
        cadence,
        threshold: 1_000_000,
        escalation_enabled: false,
        alert_time: None,
    }
}

proptest! {
    /// The counter stays at or below the fully elapsed period count no
    /// matter how sweeps and clock jumps interleave, and settles exactly
    /// on it once sweeps catch up.
    #[test]
    fn counter_tracks_elapsed_periods(
        schedule in prop::collection::vec((0u64..72, 0usize..4), 1..20),
        custom_days in 1u32..10,
    ) {
        let (ledger, clock) = ledger();
        ledger
            .register("u1", quiet_settings(Cadence::Custom { days: custom_days }))
            .unwrap();

        for (hours, sweeps) in schedule {
            clock.advance(Duration::hours(hours as i64));
            for _ in 0..sweeps {
                ledger.advance("u1").unwrap();
            }
            let profile = ledger.get("u1").unwrap().unwrap();
            prop_assert!(profile.missed_count <= profile.periods_elapsed(clock.now()));
        }

        // Skew off any exact period boundary, then sweep to convergence.
        clock.advance(Duration::minutes(1));
        while ledger.advance("u1").unwrap().is_some() {}
        let profile = ledger.get("u1").unwrap().unwrap();
        prop_assert_eq!(profile.missed_count, profile.periods_elapsed(clock.now()));
    }

    /// A confirmation resets the counter and the period arithmetic together.
    #[test]
    fn confirmation_resets_the_baseline(
        missed_hours in 25u64..200,
        later_hours in 0u64..23,
    ) {
        let (ledger, clock) = ledger();
        ledger.register("u1", quiet_settings(Cadence::Daily)).unwrap();

        clock.advance(Duration::hours(missed_hours as i64));
        while ledger.advance("u1").unwrap().is_some() {}

        let profile = ledger.confirm("u1").unwrap();
        prop_assert_eq!(profile.missed_count, 0);
        prop_assert_eq!(profile.last_checkin, clock.now());

        // Less than one full period later there is nothing to count.
        clock.advance(Duration::hours(later_hours as i64));
        prop_assert!(ledger.advance("u1").unwrap().is_none());
        prop_assert_eq!(ledger.get("u1").unwrap().unwrap().missed_count, 0);
    }
}
