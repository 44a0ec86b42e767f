//! Next-occurrence calculation for recurring tasks.
//!
//! A rule combines an optional set of qualifying dates (days of month OR
//! weekdays) with an optional set of daily time slots. Completing an
//! occurrence first tries a later slot on the same date; otherwise it rolls
//! over to the next qualifying date at the earliest slot.

use crate::domain::models::{NextRecurrence, RecurrenceRule, parse_hhmm};
use chrono::{NaiveDate, NaiveTime};

/// Number of days after the base date searched for a qualifying date.
pub const SEARCH_HORIZON_DAYS: usize = 365;

/// Computes the occurrence that follows `current_due_date` / `current_scheduled_time`.
///
/// `today` stands in for a missing due date. The result is unresolved when the
/// rule is empty or when no date within [`SEARCH_HORIZON_DAYS`] qualifies.
pub fn calculate_next_recurrence(
    rule: &RecurrenceRule,
    current_due_date: Option<NaiveDate>,
    current_scheduled_time: Option<&str>,
    today: NaiveDate,
) -> NextRecurrence {
    if !rule.is_configured() {
        return NextRecurrence::unresolved();
    }

    let base_date = current_due_date.unwrap_or(today);

    if let Some(next_slot) = current_scheduled_time
        .and_then(normalize_scheduled_time)
        .and_then(|current| rule.next_slot_after(current))
    {
        return NextRecurrence {
            due_date: Some(base_date),
            scheduled_time: Some(next_slot),
        };
    }

    let next_date = if rule.has_date_constraints() {
        find_next_recurring_date(rule, base_date)
    } else {
        base_date.succ_opt()
    };

    match next_date {
        Some(date) => NextRecurrence {
            due_date: Some(date),
            scheduled_time: rule.earliest_slot(),
        },
        None => NextRecurrence::unresolved(),
    }
}

/// First date strictly after `base_date` matching the rule's date constraints.
///
/// Each calendar date is visited once, so a date matching both a day of month
/// and a weekday is a single candidate.
pub fn find_next_recurring_date(rule: &RecurrenceRule, base_date: NaiveDate) -> Option<NaiveDate> {
    base_date
        .iter_days()
        .skip(1)
        .take(SEARCH_HORIZON_DAYS)
        .find(|candidate| rule.matches_date(*candidate))
}

/// Reduces a stored scheduled time to its time of day.
///
/// Accepts a bare `HH:mm` value or a date-time joined by `T` or a space, in
/// which case only the leading `HH:mm` of the time part is used.
pub fn normalize_scheduled_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    if let Some((_, time_part)) = value.split_once(['T', ' ']) {
        return time_part
            .get(..5)
            .filter(|candidate| is_zero_padded_hhmm(candidate))
            .and_then(parse_hhmm);
    }
    if is_zero_padded_hhmm(value) {
        return parse_hhmm(value);
    }
    None
}

fn is_zero_padded_hhmm(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 5
        && bytes[2] == b':'
        && [0, 1, 3, 4]
            .into_iter()
            .all(|index| bytes[index].is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Weekday};
    use proptest::prelude::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").expect("valid time")
    }

    fn rule(days_of_month: &[u32], days_of_week: &[Weekday], times: &[&str]) -> RecurrenceRule {
        RecurrenceRule::new(
            days_of_month.iter().copied(),
            days_of_week.iter().copied(),
            times.iter().map(|value| time(value)),
        )
    }

    fn today() -> NaiveDate {
        date("2024-06-01")
    }

    #[test]
    fn empty_rule_is_unresolved() {
        let next = calculate_next_recurrence(
            &RecurrenceRule::default(),
            Some(date("2024-03-10")),
            Some("09:00"),
            today(),
        );
        assert!(next.is_unresolved());
    }

    #[test]
    fn later_slot_on_same_day_keeps_due_date() {
        let next = calculate_next_recurrence(
            &rule(&[], &[], &["14:30", "09:00"]),
            Some(date("2024-03-10")),
            Some("09:00"),
            today(),
        );
        assert_eq!(next.due_date_string().as_deref(), Some("2024-03-10"));
        assert_eq!(next.scheduled_time_string().as_deref(), Some("14:30"));
    }

    #[test]
    fn last_slot_rolls_over_to_next_matching_weekday() {
        // 2024-03-10 is a Sunday.
        let next = calculate_next_recurrence(
            &rule(&[], &[Weekday::Mon], &["09:00", "14:30"]),
            Some(date("2024-03-10")),
            Some("14:30"),
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-03-11")));
        assert_eq!(next.scheduled_time, Some(time("09:00")));
    }

    #[test]
    fn date_only_rule_moves_to_next_day_of_month() {
        let next = calculate_next_recurrence(
            &rule(&[1, 15], &[], &[]),
            Some(date("2024-03-01")),
            None,
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-03-15")));
        assert_eq!(next.scheduled_time, None);
    }

    #[test]
    fn date_only_rule_never_returns_base_date() {
        let next = calculate_next_recurrence(
            &rule(&[15], &[], &[]),
            Some(date("2024-03-15")),
            None,
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-04-15")));
    }

    #[test]
    fn time_only_rule_rolls_over_daily() {
        let next = calculate_next_recurrence(
            &rule(&[], &[], &["08:00"]),
            Some(date("2024-03-10")),
            Some("08:00"),
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-03-11")));
        assert_eq!(next.scheduled_time, Some(time("08:00")));
    }

    #[test]
    fn unknown_current_time_skips_same_day_search() {
        let next = calculate_next_recurrence(
            &rule(&[], &[], &["08:00", "20:00"]),
            Some(date("2024-03-10")),
            None,
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-03-11")));
        assert_eq!(next.scheduled_time, Some(time("08:00")));

        let malformed = calculate_next_recurrence(
            &rule(&[], &[], &["08:00", "20:00"]),
            Some(date("2024-03-10")),
            Some("8am"),
            today(),
        );
        assert_eq!(malformed, next);
    }

    #[test]
    fn date_time_scheduled_value_uses_time_part() {
        let next = calculate_next_recurrence(
            &rule(&[], &[Weekday::Wed], &["09:00", "18:00"]),
            Some(date("2024-03-10")),
            Some("2024-03-10T12:15:00+09:00"),
            today(),
        );
        assert_eq!(next.due_date, Some(date("2024-03-10")));
        assert_eq!(next.scheduled_time, Some(time("18:00")));
    }

    #[test]
    fn missing_due_date_uses_today() {
        let next = calculate_next_recurrence(&rule(&[], &[], &["07:00"]), None, None, today());
        assert_eq!(next.due_date, Some(date("2024-06-02")));
    }

    #[test]
    fn impossible_day_of_month_exhausts_horizon() {
        let next = calculate_next_recurrence(
            &rule(&[32], &[], &["09:00"]),
            Some(date("2024-03-10")),
            Some("10:00"),
            today(),
        );
        assert!(next.is_unresolved());
    }

    #[test]
    fn day_of_month_and_weekday_are_combined_with_or() {
        // 2024-03-15 is a Friday; 2024-03-12 is a Tuesday.
        let both = rule(&[15], &[Weekday::Fri, Weekday::Tue], &[]);
        assert_eq!(
            find_next_recurring_date(&both, date("2024-03-10")),
            Some(date("2024-03-12"))
        );
        assert_eq!(
            find_next_recurring_date(&both, date("2024-03-14")),
            Some(date("2024-03-15"))
        );
    }

    #[test]
    fn date_matching_both_constraints_is_counted_once() {
        let both = rule(&[15], &[Weekday::Fri], &[]);
        let matches = date("2024-03-14")
            .iter_days()
            .skip(1)
            .take(SEARCH_HORIZON_DAYS)
            .filter(|candidate| both.matches_date(*candidate))
            .collect::<Vec<_>>();
        let unique = matches
            .iter()
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(matches.len(), unique.len());
        assert_eq!(matches.first(), Some(&date("2024-03-15")));
    }

    #[test]
    fn day_31_skips_short_months() {
        assert_eq!(
            find_next_recurring_date(&rule(&[31], &[], &[]), date("2024-03-31")),
            Some(date("2024-05-31"))
        );
    }

    #[test]
    fn normalize_scheduled_time_forms() {
        assert_eq!(normalize_scheduled_time("09:30"), Some(time("09:30")));
        assert_eq!(normalize_scheduled_time("2024-03-10T09:30"), Some(time("09:30")));
        assert_eq!(normalize_scheduled_time("2024-03-10 21:05:00"), Some(time("21:05")));
        assert_eq!(normalize_scheduled_time("9:30"), None);
        assert_eq!(normalize_scheduled_time("25:00"), None);
        assert_eq!(normalize_scheduled_time(""), None);
    }

    fn arb_weekday() -> impl Strategy<Value = Weekday> {
        (0u8..7).prop_map(|index| match index {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        })
    }

    fn arb_time() -> impl Strategy<Value = NaiveTime> {
        (0u32..24, 0u32..60).prop_map(|(hour, minute)| {
            NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
        })
    }

    fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0i64..3650).prop_map(|offset| date("2020-01-01") + Duration::days(offset))
    }

    proptest! {
        #[test]
        fn empty_rule_is_always_unresolved(
            due in proptest::option::of(arb_date()),
            current in proptest::option::of(arb_time()),
        ) {
            let current = current.map(|value| value.format("%H:%M").to_string());
            let next = calculate_next_recurrence(
                &RecurrenceRule::default(),
                due,
                current.as_deref(),
                today(),
            );
            prop_assert!(next.is_unresolved());
        }

        #[test]
        fn next_occurrence_is_strictly_later(
            days_of_month in proptest::collection::vec(1u32..=31, 0..4),
            days_of_week in proptest::collection::vec(arb_weekday(), 0..3),
            times in proptest::collection::vec(arb_time(), 0..4),
            due in arb_date(),
            current in arb_time(),
        ) {
            let rule = RecurrenceRule::new(days_of_month, days_of_week, times);
            prop_assume!(rule.is_configured());
            let current_text = current.format("%H:%M").to_string();
            let next = calculate_next_recurrence(&rule, Some(due), Some(&current_text), today());

            let next_date = next.due_date.expect("valid days always match within a year");
            if next_date == due {
                let slot = next.scheduled_time.expect("same-day result carries a slot");
                prop_assert!(slot > current);
            } else {
                prop_assert!(next_date > due);
                prop_assert_eq!(next.scheduled_time, rule.earliest_slot());
                if rule.has_date_constraints() {
                    prop_assert!(rule.matches_date(next_date));
                    let earlier_match = due
                        .iter_days()
                        .skip(1)
                        .take_while(|candidate| *candidate < next_date)
                        .any(|candidate| rule.matches_date(candidate));
                    prop_assert!(!earlier_match);
                } else {
                    prop_assert_eq!(next_date, due + Duration::days(1));
                }
            }
            if let Some(slot) = next.scheduled_time {
                prop_assert!(rule.scheduled_times().any(|candidate| candidate == slot));
            }
            prop_assert!(next_date - due <= Duration::days(SEARCH_HORIZON_DAYS as i64));
        }
    }
}
