//! Quota accounting over UTC day and minute windows.
//!
//! Usage is derived on every call from the role's quota table and the
//! timestamps of the user's successful requests. Nothing is cached.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::CiamError;
use super::role::Role;

/// Consumption of one rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestsConsumption {
    pub limit: u16,
    pub used: u16,
    /// Unix seconds when the window rolls over.
    pub reset: i64,
}

impl RequestsConsumption {
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Current quota usage for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub prompt_length_max: u16,
    pub rate_minute: RequestsConsumption,
    pub rate_day: RequestsConsumption,
}

/// UTC-aligned day and minute windows around an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindows {
    pub day_start: DateTime<Utc>,
    pub day_end: DateTime<Utc>,
    pub minute_start: DateTime<Utc>,
    pub minute_end: DateTime<Utc>,
}

impl QuotaWindows {
    pub fn at(now: DateTime<Utc>) -> Self {
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let minute_start = now
            - Duration::seconds(i64::from(now.second()))
            - Duration::nanoseconds(i64::from(now.nanosecond()));
        Self {
            day_start,
            day_end: day_start + Duration::days(1),
            minute_start,
            minute_end: minute_start + Duration::minutes(1),
        }
    }
}

/// Count timestamps inside `[start, end]`, both bounds inclusive.
fn count_within(timestamps: &[DateTime<Utc>], start: DateTime<Utc>, end: DateTime<Utc>) -> u16 {
    let count = timestamps
        .iter()
        .filter(|ts| **ts >= start && **ts <= end)
        .count();
    u16::try_from(count).unwrap_or(u16::MAX)
}

/// Compute quota usage for `role` from successful-request timestamps.
///
/// Once the daily quota is exhausted the minute window is reported as
/// exhausted too, resetting together with the day.
pub fn quota_usage(role: Role, timestamps: &[DateTime<Utc>], now: DateTime<Utc>) -> QuotaUsage {
    let quotas = role.quotas();
    let windows = QuotaWindows::at(now);

    let rate_day = RequestsConsumption {
        limit: quotas.requests_per_day,
        used: count_within(timestamps, windows.day_start, windows.day_end),
        reset: windows.day_end.timestamp(),
    };
    let mut rate_minute = RequestsConsumption {
        limit: quotas.requests_per_minute,
        used: count_within(timestamps, windows.minute_start, windows.minute_end),
        reset: windows.minute_end.timestamp(),
    };

    if rate_day.is_exhausted() {
        rate_minute.used = rate_minute.limit;
        rate_minute.reset = rate_day.reset;
    }

    QuotaUsage {
        prompt_length_max: quotas.prompt_length_max,
        rate_minute,
        rate_day,
    }
}

/// Admission decision for a quota-gated request. The daily quota is checked
/// before throttling.
pub fn check_admission(usage: &QuotaUsage) -> Result<(), CiamError> {
    if usage.rate_day.is_exhausted() {
        return Err(CiamError::DailyQuotaExceeded);
    }
    if usage.rate_minute.is_exhausted() {
        return Err(CiamError::ThrottlingQuotaExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn windows_align_to_utc_boundaries() {
        let windows = QuotaWindows::at(at("2024-03-05T13:47:21.250Z"));
        assert_eq!(windows.day_start, at("2024-03-05T00:00:00Z"));
        assert_eq!(windows.day_end, at("2024-03-06T00:00:00Z"));
        assert_eq!(windows.minute_start, at("2024-03-05T13:47:00Z"));
        assert_eq!(windows.minute_end, at("2024-03-05T13:48:00Z"));
    }

    #[test]
    fn no_history_reports_zero_usage() {
        let now = at("2024-03-05T13:47:21Z");
        let usage = quota_usage(Role::AnonymUser, &[], now);
        assert_eq!(usage.prompt_length_max, 100);
        assert_eq!(
            usage.rate_minute,
            RequestsConsumption {
                limit: 1,
                used: 0,
                reset: at("2024-03-05T13:48:00Z").timestamp(),
            }
        );
        assert_eq!(
            usage.rate_day,
            RequestsConsumption {
                limit: 5,
                used: 0,
                reset: at("2024-03-06T00:00:00Z").timestamp(),
            }
        );
        assert!(check_admission(&usage).is_ok());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = at("2024-03-05T13:47:21Z");
        let timestamps = [
            at("2024-03-05T00:00:00Z"),
            at("2024-03-05T13:47:00Z"),
            at("2024-03-05T13:48:00Z"),
            at("2024-03-04T23:59:59Z"),
        ];
        let usage = quota_usage(Role::RegisteredUser, &timestamps, now);
        assert_eq!(usage.rate_day.used, 3);
        assert_eq!(usage.rate_minute.used, 2);
    }

    #[test]
    fn exhausted_day_forces_throttling_until_midnight() {
        let now = at("2024-03-05T13:47:21Z");
        let timestamps = vec![at("2024-03-05T08:00:00Z"); 20];
        let usage = quota_usage(Role::RegisteredUser, &timestamps, now);
        assert_eq!(usage.rate_day.used, 20);
        assert_eq!(usage.rate_day.limit, 20);
        assert_eq!(usage.rate_minute.used, usage.rate_minute.limit);
        assert_eq!(usage.rate_minute.reset, usage.rate_day.reset);
        assert!(matches!(
            check_admission(&usage),
            Err(CiamError::DailyQuotaExceeded)
        ));
    }

    #[test]
    fn minute_limit_throttles() {
        let now = at("2024-03-05T13:47:21Z");
        let usage = quota_usage(Role::AnonymUser, &[at("2024-03-05T13:47:05Z")], now);
        assert_eq!(usage.rate_minute.used, 1);
        assert_eq!(usage.rate_day.used, 1);
        assert!(matches!(
            check_admission(&usage),
            Err(CiamError::ThrottlingQuotaExceeded)
        ));
    }

    #[test]
    fn previous_minute_does_not_throttle() {
        let now = at("2024-03-05T13:47:21Z");
        let usage = quota_usage(Role::AnonymUser, &[at("2024-03-05T13:46:59Z")], now);
        assert_eq!(usage.rate_minute.used, 0);
        assert!(check_admission(&usage).is_ok());
    }

    #[test]
    fn usage_is_rederivable() {
        let now = at("2024-03-05T13:47:21Z");
        let timestamps = [at("2024-03-05T10:00:00Z"), at("2024-03-05T13:47:01Z")];
        assert_eq!(
            quota_usage(Role::RegisteredUser, &timestamps, now),
            quota_usage(Role::RegisteredUser, &timestamps, now)
        );
    }

    #[test]
    fn serializes_with_wire_names() {
        let now = at("2024-03-05T13:47:21Z");
        let json = serde_json::to_value(quota_usage(Role::AnonymUser, &[], now)).unwrap();
        assert_eq!(json["prompt_length_max"], 100);
        assert_eq!(json["rate_minute"]["limit"], 1);
        assert_eq!(json["rate_day"]["reset"], at("2024-03-06T00:00:00Z").timestamp());
    }
}
