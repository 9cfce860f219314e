use crate::session_data::Session;
use crate::tariff::TariffConfig;
use bigdecimal::{BigDecimal, Zero};
use jiff::civil::DateTime;
use std::num::NonZeroUsize;
use std::panic;
use std::thread;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("session ends at {end} before it starts at {start}")]
    InvalidInterval { start: DateTime, end: DateTime },
    #[error("cannot split {energy} kWh over a session without any charging time")]
    ZeroDurationSession { energy: BigDecimal },
}

/// Day/night split of one session's hours, energy and cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub day_hours: BigDecimal,
    pub night_hours: BigDecimal,
    pub day_energy: BigDecimal,
    pub night_energy: BigDecimal,
    pub day_cost: BigDecimal,
    pub night_cost: BigDecimal,
    pub total_cost: BigDecimal,
}

impl Allocation {
    fn zero() -> Self {
        Self {
            day_hours: BigDecimal::zero(),
            night_hours: BigDecimal::zero(),
            day_energy: BigDecimal::zero(),
            night_energy: BigDecimal::zero(),
            day_cost: BigDecimal::zero(),
            night_cost: BigDecimal::zero(),
            total_cost: BigDecimal::zero(),
        }
    }
}

/// Splits the session's energy by its day/night hour ratio and prices both parts.
///
/// Night energy is the remainder of the total, so `day_energy + night_energy` is exactly the
/// metered energy. A session without elapsed time is only accepted when it used no energy.
pub fn allocate(session: &Session, tariff: &TariffConfig) -> Result<Allocation, AllocationError> {
    let hours = tariff.schedule.partition(session.start, session.end)?;
    let total_hours = hours.total_hours();
    if total_hours.is_zero() {
        if session.energy.is_zero() {
            return Ok(Allocation::zero());
        }
        return Err(AllocationError::ZeroDurationSession {
            energy: session.energy.clone(),
        });
    }

    let day_energy = &hours.day_hours / &total_hours * &session.energy;
    let night_energy = &session.energy - &day_energy;
    let day_cost = &day_energy * &tariff.day_rate;
    let night_cost = &night_energy * &tariff.night_rate;
    let total_cost = &day_cost + &night_cost;
    Ok(Allocation {
        day_hours: hours.day_hours,
        night_hours: hours.night_hours,
        day_energy,
        night_energy,
        day_cost,
        night_cost,
        total_cost,
    })
}

/// Allocates every session, keeping the input order.
///
/// With more than one job the sessions are cut into contiguous chunks, each handled on its own
/// scoped thread, and the chunk results are concatenated back in order.
pub fn allocate_all(
    sessions: &[Session],
    tariff: &TariffConfig,
    jobs: NonZeroUsize,
) -> Vec<Result<Allocation, AllocationError>> {
    let jobs = jobs.get().min(sessions.len());
    if jobs <= 1 {
        return sessions
            .iter()
            .map(|session| allocate(session, tariff))
            .collect();
    }
    let chunk_size = sessions.len().div_ceil(jobs);
    thread::scope(|scope| {
        let handles: Vec<_> = sessions
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|session| allocate(session, tariff))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|cause| panic::resume_unwind(cause)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use jiff::SignedDuration;
    use jiff::civil::date;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn tariff() -> TariffConfig {
        TariffConfig::new(dec("39.89"), dec("39.22"), Schedule::default()).unwrap()
    }

    fn session(start: DateTime, end: DateTime, energy: &str) -> Session {
        Session {
            start,
            end,
            energy: dec(energy),
        }
    }

    #[test]
    fn test_monday_morning() {
        let monday = date(2024, 4, 1);
        let allocation =
            allocate(&session(monday.at(6, 0, 0, 0), monday.at(8, 0, 0, 0), "4"), &tariff())
                .unwrap();
        assert_eq!(allocation.day_hours, dec("1"));
        assert_eq!(allocation.night_hours, dec("1"));
        assert_eq!(allocation.day_energy, dec("2"));
        assert_eq!(allocation.night_energy, dec("2"));
        assert_eq!(allocation.day_cost, dec("79.78"));
        assert_eq!(allocation.night_cost, dec("78.44"));
        assert_eq!(allocation.total_cost, dec("158.22"));
    }

    #[test]
    fn test_saturday() {
        let saturday = date(2024, 4, 6);
        let allocation =
            allocate(&session(saturday.at(10, 0, 0, 0), saturday.at(12, 0, 0, 0), "2"), &tariff())
                .unwrap();
        assert_eq!(allocation.day_hours, dec("0"));
        assert_eq!(allocation.night_hours, dec("2"));
        assert_eq!(allocation.day_energy, dec("0"));
        assert_eq!(allocation.night_energy, dec("2"));
        assert_eq!(allocation.total_cost, dec("78.44"));
    }

    #[test]
    fn test_friday_evening() {
        let friday = date(2024, 4, 5);
        let allocation =
            allocate(&session(friday.at(21, 0, 0, 0), friday.at(23, 0, 0, 0), "2"), &tariff())
                .unwrap();
        assert_eq!(allocation.day_energy, dec("1"));
        assert_eq!(allocation.night_energy, dec("1"));
        assert_eq!(allocation.total_cost, dec("79.11"));
    }

    #[test]
    fn test_uneven_split_keeps_exact_sums() {
        // One day hour and two night hours on a Tuesday evening.
        let tuesday = date(2024, 4, 2);
        let energy = dec("7.3");
        let allocation = allocate(
            &session(tuesday.at(21, 0, 0, 0), date(2024, 4, 3).at(0, 0, 0, 0), "7.3"),
            &tariff(),
        )
        .unwrap();
        assert_eq!(&allocation.day_energy + &allocation.night_energy, energy);
        assert_eq!(
            allocation.total_cost,
            &allocation.day_energy * dec("39.89") + &allocation.night_energy * dec("39.22")
        );
        assert!(allocation.day_energy < allocation.night_energy);
    }

    #[test]
    fn test_zero_duration_without_energy() {
        let instant = date(2024, 4, 2).at(12, 0, 0, 0);
        let allocation = allocate(&session(instant, instant, "0"), &tariff()).unwrap();
        assert_eq!(allocation, Allocation::zero());
    }

    #[test]
    fn test_zero_duration_with_energy() {
        let instant = date(2024, 4, 2).at(12, 0, 0, 0);
        assert_eq!(
            allocate(&session(instant, instant, "1.5"), &tariff()),
            Err(AllocationError::ZeroDurationSession { energy: dec("1.5") })
        );
    }

    #[test]
    fn test_reversed_session() {
        let start = date(2024, 4, 2).at(12, 0, 0, 0);
        let end = date(2024, 4, 2).at(10, 0, 0, 0);
        assert_eq!(
            allocate(&session(start, end, "1"), &tariff()),
            Err(AllocationError::InvalidInterval { start, end })
        );
    }

    #[test]
    fn test_allocate_all_keeps_order() {
        let sessions: Vec<_> = (0..23)
            .map(|offset| {
                let start = date(2024, 4, 1).at(0, 0, 0, 0) + SignedDuration::from_hours(offset * 5);
                let end = start + SignedDuration::from_mins(90 + offset * 7);
                session(start, end, &format!("{}.25", offset))
            })
            .collect();
        let tariff = tariff();
        let sequential = allocate_all(&sessions, &tariff, NonZeroUsize::MIN);
        let parallel = allocate_all(&sessions, &tariff, NonZeroUsize::new(4).unwrap());
        assert_eq!(sequential.len(), sessions.len());
        assert_eq!(sequential, parallel);
        for (session, allocation) in sessions.iter().zip(&parallel) {
            assert_eq!(allocation, &allocate(session, &tariff));
        }
    }

    #[test]
    fn test_allocate_all_is_idempotent() {
        let monday = date(2024, 4, 1);
        let sessions = vec![session(monday.at(6, 0, 0, 0), monday.at(8, 0, 0, 0), "4")];
        let jobs = NonZeroUsize::new(8).unwrap();
        assert_eq!(
            allocate_all(&sessions, &tariff(), jobs),
            allocate_all(&sessions, &tariff(), jobs)
        );
    }

    #[test]
    fn test_allocate_all_empty() {
        assert!(allocate_all(&[], &tariff(), NonZeroUsize::new(4).unwrap()).is_empty());
    }
}
