use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::config::TierConfig;

/// Highest tier whose threshold is at or below `amount`, or `None` when the
/// amount is below every threshold.
///
/// The scan is over a stably sorted copy, so tiers sharing a threshold resolve
/// to the one configured last.
pub fn tier_for_amount(tiers: &[TierConfig], amount: f64) -> Option<TierConfig> {
    let mut sorted = tiers.to_vec();
    sorted.sort_by(|a, b| {
        a.min_amount
            .partial_cmp(&b.min_amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut matched = None;
    for tier in sorted {
        if amount >= tier.min_amount {
            matched = Some(tier);
        }
    }
    matched
}

/// Renewal date for a payment: same day one calendar month later, clamped to
/// the end of the target month when the day does not exist there. December
/// payments expire on January 1 of the following year regardless of day.
pub fn expire_date(paid_at: DateTime<Utc>) -> NaiveDate {
    let paid = paid_at.date_naive();
    if paid.month() == 12 {
        return NaiveDate::from_ymd_opt(paid.year() + 1, 1, 1)
            .unwrap_or(paid);
    }

    let month = paid.month() + 1;
    NaiveDate::from_ymd_opt(paid.year(), month, paid.day())
        .unwrap_or_else(|| last_day_of_month(paid.year(), month))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn tiers() -> Vec<TierConfig> {
        vec![
            TierConfig {
                name: "Gold".to_string(),
                min_amount: 10.0,
            },
            TierConfig {
                name: "Bronze".to_string(),
                min_amount: 1.0,
            },
            TierConfig {
                name: "Silver".to_string(),
                min_amount: 5.0,
            },
        ]
    }

    #[test_case(0.5, None; "below every threshold")]
    #[test_case(1.0, Some("Bronze"); "exactly the lowest threshold")]
    #[test_case(4.99, Some("Bronze"); "between thresholds")]
    #[test_case(5.0, Some("Silver"); "middle tier")]
    #[test_case(10.0, Some("Gold"); "exactly the highest threshold")]
    #[test_case(1000.0, Some("Gold"); "far above the highest threshold")]
    fn tier_for_amount_picks_highest_qualifying(amount: f64, expected: Option<&str>) {
        let tier = tier_for_amount(&tiers(), amount);
        assert_eq!(tier.map(|t| t.name), expected.map(str::to_string));
    }

    #[test]
    fn tier_for_amount_is_monotonic_non_decreasing() {
        let tiers = tiers();
        let mut previous_threshold = f64::MIN;
        for cents in 0..2000 {
            let amount = cents as f64 / 100.0;
            let threshold = tier_for_amount(&tiers, amount)
                .map(|t| t.min_amount)
                .unwrap_or(f64::MIN);
            assert!(threshold >= previous_threshold, "regressed at {}", amount);
            previous_threshold = threshold;
        }
    }

    #[test]
    fn duplicate_thresholds_resolve_to_last_configured() {
        let tiers = vec![
            TierConfig {
                name: "First".to_string(),
                min_amount: 5.0,
            },
            TierConfig {
                name: "Second".to_string(),
                min_amount: 5.0,
            },
        ];
        let tier = tier_for_amount(&tiers, 7.0).expect("a tier should match");
        assert_eq!(tier.name, "Second");
    }

    #[test]
    fn empty_tier_list_matches_nothing() {
        assert_eq!(tier_for_amount(&[], 100.0), None);
    }

    #[test_case(2024, 3, 15, 2024, 4, 15; "mid month rolls to next month")]
    #[test_case(2024, 1, 31, 2024, 2, 29; "jan 31 clamps to leap feb 29")]
    #[test_case(2023, 1, 31, 2023, 2, 28; "jan 31 clamps to feb 28")]
    #[test_case(2024, 10, 31, 2024, 11, 30; "oct 31 clamps to nov 30")]
    #[test_case(2024, 11, 30, 2024, 12, 30; "november keeps its day")]
    #[test_case(2024, 12, 5, 2025, 1, 1; "december expires on january first")]
    #[test_case(2024, 12, 31, 2025, 1, 1; "december end expires on january first")]
    fn expire_date_cases(py: i32, pm: u32, pd: u32, ey: i32, em: u32, ed: u32) {
        let paid_at = Utc
            .with_ymd_and_hms(py, pm, pd, 12, 30, 0)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            expire_date(paid_at),
            NaiveDate::from_ymd_opt(ey, em, ed).expect("valid expected date")
        );
    }
}
