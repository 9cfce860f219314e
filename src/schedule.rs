use crate::rate_calculator::AllocationError;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode};
use jiff::SignedDuration;
use jiff::civil::{self, Date, DateTime, Time, Weekday};

const SECONDS_PER_HOUR: u32 = 3_600;

/// Which calendar instants are billed at the day rate.
///
/// An instant is "day" when it falls on one of `day_weekdays` and its time of day is within
/// `[day_start, day_end)`. Everything else, including the whole weekend, is "night".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub day_weekdays: Vec<Weekday>,
    pub day_start: Time,
    pub day_end: Time,
}

impl Default for Schedule {
    /// Monday to Friday, 07:00 to 22:00.
    ///
    /// Friday from 22:00 and Monday before 07:00 are night, as is the whole weekend.
    fn default() -> Self {
        Self {
            day_weekdays: vec![
                Weekday::Monday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday,
                Weekday::Friday,
            ],
            day_start: civil::time(7, 0, 0, 0),
            day_end: civil::time(22, 0, 0, 0),
        }
    }
}

/// Day and night hours of a single interval, each rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourSplit {
    pub day_hours: BigDecimal,
    pub night_hours: BigDecimal,
}

impl HourSplit {
    pub fn total_hours(&self) -> BigDecimal {
        &self.day_hours + &self.night_hours
    }
}

impl Schedule {
    pub fn is_night(&self, instant: DateTime) -> bool {
        !self.is_day(instant)
    }

    pub fn is_day(&self, instant: DateTime) -> bool {
        let time = instant.time();
        self.day_weekdays.contains(&instant.weekday())
            && self.day_start <= time
            && time < self.day_end
    }

    /// The half-open day window on `date`, if that weekday has one.
    fn day_window(&self, date: Date) -> Option<(DateTime, DateTime)> {
        self.day_weekdays.contains(&date.weekday()).then(|| {
            (
                date.to_datetime(self.day_start),
                date.to_datetime(self.day_end),
            )
        })
    }

    /// Exact day-rate duration within `[start, end)`.
    ///
    /// Intersects the interval with the day window of every calendar day it touches, so the
    /// cost grows with the number of days rather than the number of minutes.
    pub fn day_duration(&self, start: DateTime, end: DateTime) -> SignedDuration {
        let mut total = SignedDuration::ZERO;
        let mut date = start.date();
        while date <= end.date() {
            if let Some((window_start, window_end)) = self.day_window(date) {
                let from = window_start.max(start);
                let to = window_end.min(end);
                if from < to {
                    total += to.duration_since(from);
                }
            }
            match date.tomorrow() {
                Ok(next) => date = next,
                // Reached the end of the supported calendar.
                Err(_) => break,
            }
        }
        total
    }

    /// Splits `[start, end)` into day and night hours.
    ///
    /// Rounding to two decimals happens once, on the final sums. A reversed interval is
    /// rejected rather than clamped.
    pub fn partition(&self, start: DateTime, end: DateTime) -> Result<HourSplit, AllocationError> {
        if start > end {
            return Err(AllocationError::InvalidInterval { start, end });
        }
        let elapsed = end.duration_since(start);
        let day = self.day_duration(start, end);
        Ok(HourSplit {
            day_hours: round_hours(to_hours(day)),
            night_hours: round_hours(to_hours(elapsed - day)),
        })
    }
}

pub fn to_hours(duration: SignedDuration) -> BigDecimal {
    BigDecimal::new(BigInt::from(duration.as_nanos()), 9) / BigDecimal::from(SECONDS_PER_HOUR)
}

fn round_hours(hours: BigDecimal) -> BigDecimal {
    hours.with_scale_round(2, RoundingMode::HalfEven)
}
