use crate::schedule::Schedule;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Signed};
use clap::ValueEnum;
use jiff::civil::{Time, Weekday};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TariffError {
    #[error("{name} rate must not be negative, got {rate}")]
    NegativeRate { name: &'static str, rate: BigDecimal },
    #[error("day window must start before it ends, got {start} - {end}")]
    EmptyDayWindow { start: Time, end: Time },
    #[error("`{0}` is not a weekday")]
    UnknownWeekday(String),
    #[error("`{0}` is not a time of day")]
    InvalidTime(String, #[source] jiff::Error),
    #[error("`{0}` is not a valid rate")]
    InvalidRate(f64),
    #[error("failed to read tariff file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse tariff file")]
    Toml(#[from] toml::de::Error),
}

/// Rates per kWh, in the same currency unit as the resulting costs, plus the day/night schedule.
#[derive(Debug, Clone)]
pub struct TariffConfig {
    pub day_rate: BigDecimal,
    pub night_rate: BigDecimal,
    pub schedule: Schedule,
}

impl TariffConfig {
    pub fn new(
        day_rate: BigDecimal,
        night_rate: BigDecimal,
        schedule: Schedule,
    ) -> Result<Self, TariffError> {
        if day_rate.is_negative() {
            return Err(TariffError::NegativeRate {
                name: "day",
                rate: day_rate,
            });
        }
        if night_rate.is_negative() {
            return Err(TariffError::NegativeRate {
                name: "night",
                rate: night_rate,
            });
        }
        if schedule.day_start >= schedule.day_end {
            return Err(TariffError::EmptyDayWindow {
                start: schedule.day_start,
                end: schedule.day_end,
            });
        }
        Ok(Self {
            day_rate,
            night_rate,
            schedule,
        })
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, TariffError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, TariffError> {
        let file: TariffFile = toml::from_str(contents)?;
        let schedule = match file.schedule {
            Some(schedule) => schedule.into_schedule()?,
            None => Schedule::default(),
        };
        Self::new(rate(file.day_rate)?, rate(file.night_rate)?, schedule)
    }
}

/// Built-in quarterly tariffs, in cents per kWh.
#[derive(ValueEnum, Copy, Clone, PartialEq, Eq, Debug)]
pub enum Quarter {
    Q1,
    Q2,
}

impl Quarter {
    /// `(day, night)` rates.
    pub fn rates(self) -> (BigDecimal, BigDecimal) {
        match self {
            Quarter::Q1 => (cents(4081), cents(4014)),
            Quarter::Q2 => (cents(3989), cents(3922)),
        }
    }
}

fn cents(hundredths: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(hundredths), 2)
}

/// TOML numbers are floats, so go through their shortest decimal representation to keep
/// `39.89` from turning into its binary expansion.
fn rate(value: f64) -> Result<BigDecimal, TariffError> {
    if !value.is_finite() {
        return Err(TariffError::InvalidRate(value));
    }
    BigDecimal::from_str(&value.to_string()).map_err(|_| TariffError::InvalidRate(value))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TariffFile {
    day_rate: f64,
    night_rate: f64,
    schedule: Option<ScheduleSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduleSection {
    day_start: Option<String>,
    day_end: Option<String>,
    weekdays: Option<Vec<String>>,
}

impl ScheduleSection {
    fn into_schedule(self) -> Result<Schedule, TariffError> {
        let mut schedule = Schedule::default();
        if let Some(start) = self.day_start {
            schedule.day_start = parse_time(&start)?;
        }
        if let Some(end) = self.day_end {
            schedule.day_end = parse_time(&end)?;
        }
        if let Some(weekdays) = self.weekdays {
            schedule.day_weekdays = weekdays
                .iter()
                .map(|name| parse_weekday(name))
                .collect::<Result<_, _>>()?;
        }
        Ok(schedule)
    }
}

pub fn parse_time(value: &str) -> Result<Time, TariffError> {
    Time::from_str(value.trim()).map_err(|error| TariffError::InvalidTime(value.to_string(), error))
}

pub fn parse_weekday(name: &str) -> Result<Weekday, TariffError> {
    let weekday = match name.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Weekday::Monday,
        "tuesday" | "tue" => Weekday::Tuesday,
        "wednesday" | "wed" => Weekday::Wednesday,
        "thursday" | "thu" => Weekday::Thursday,
        "friday" | "fri" => Weekday::Friday,
        "saturday" | "sat" => Weekday::Saturday,
        "sunday" | "sun" => Weekday::Sunday,
        _ => return Err(TariffError::UnknownWeekday(name.to_string())),
    };
    Ok(weekday)
}
