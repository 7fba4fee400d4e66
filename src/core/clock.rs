use chrono::{DateTime, Duration, Utc};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum ClockError {
    InvalidSpeedUp(f64),
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::InvalidSpeedUp(value) => write!(f, "invalid clock speed_up: {value}"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Simulated time derived from elapsed real time and a speed-up factor.
///
/// The clock holds no mutable state, so any number of workers may read it
/// through a shared reference without synchronization.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    start_real: Instant,
    start_sim: DateTime<Utc>,
    speed_up: f64,
}

impl VirtualClock {
    pub fn new(start_sim: DateTime<Utc>, speed_up: f64) -> Result<Self, ClockError> {
        Self::anchored(Instant::now(), start_sim, speed_up)
    }

    /// Builds a clock anchored at an explicit real instant.
    pub fn anchored(
        start_real: Instant,
        start_sim: DateTime<Utc>,
        speed_up: f64,
    ) -> Result<Self, ClockError> {
        if !speed_up.is_finite() || speed_up <= 0.0 {
            return Err(ClockError::InvalidSpeedUp(speed_up));
        }
        Ok(Self {
            start_real,
            start_sim,
            speed_up,
        })
    }

    pub fn current_sim_time(&self) -> DateTime<Utc> {
        self.sim_time_at(Instant::now())
    }

    /// `start_sim + (real - start_real) * speed_up`; instants before the anchor map to `start_sim`.
    ///
    /// Saturates at the latest representable time.
    pub fn sim_time_at(&self, real: Instant) -> DateTime<Utc> {
        let elapsed = real.saturating_duration_since(self.start_real);
        let sim_millis = (elapsed.as_secs_f64() * self.speed_up * 1000.0).round();
        let offset = Duration::milliseconds(sim_millis.min(i64::MAX as f64 / 2.0) as i64);
        saturating_add(self.start_sim, offset)
    }

    pub fn start_sim(&self) -> DateTime<Utc> {
        self.start_sim
    }

    pub fn speed_up(&self) -> f64 {
        self.speed_up
    }

    /// Real time that elapses while `sim_secs` of simulated time pass.
    pub fn real_duration(&self, sim_secs: f64) -> std::time::Duration {
        if !sim_secs.is_finite() || sim_secs <= 0.0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::try_from_secs_f64(sim_secs / self.speed_up)
            .unwrap_or(std::time::Duration::MAX)
    }
}

/// `time + delta`, clamped to the representable range.
pub fn saturating_add(time: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    time.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn scales_elapsed_real_time() {
        let anchor = Instant::now();
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = VirtualClock::anchored(anchor, start, 60.0).expect("clock");
        let later = anchor + std::time::Duration::from_secs(2);
        assert_eq!(clock.sim_time_at(later), start + Duration::minutes(2));
        assert_eq!(clock.sim_time_at(anchor), start);
    }

    #[test]
    fn real_duration_divides_by_speed_up() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = VirtualClock::new(start, 10.0).expect("clock");
        assert_eq!(clock.real_duration(30.0), std::time::Duration::from_secs(3));
        assert_eq!(clock.real_duration(-1.0), std::time::Duration::ZERO);
    }

    #[test]
    fn extreme_speed_up_saturates() {
        let anchor = Instant::now();
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = VirtualClock::anchored(anchor, start, 1e300).expect("clock");
        let later = anchor + std::time::Duration::from_secs(1);
        assert_eq!(clock.sim_time_at(later), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn rejects_non_positive_speed_up() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        assert!(VirtualClock::new(start, 0.0).is_err());
        assert!(VirtualClock::new(start, f64::NAN).is_err());
    }
}
