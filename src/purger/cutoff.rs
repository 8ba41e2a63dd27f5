use chrono::{Datelike, NaiveDate};

use crate::archive::YearMonth;

/// Newest month whose archives are old enough to purge.
///
/// Archives are kept for the current month plus `older_than_months` full
/// months before it; everything up to and including the returned month goes.
pub fn purge_cutoff(today: NaiveDate, older_than_months: u32) -> YearMonth {
    let months = i64::from(today.year()) * 12 + i64::from(today.month0())
        - 1
        - i64::from(older_than_months);
    YearMonth::new(
        months.div_euclid(12) as i32,
        months.rem_euclid(12) as u32 + 1,
    )
}

/// `true` iff the archive for `year`/`month` is at or before `cutoff`.
pub fn should_period_be_purged(year: i32, month: u32, cutoff: YearMonth) -> bool {
    year < cutoff.year || (year == cutoff.year && month <= cutoff.month)
}
