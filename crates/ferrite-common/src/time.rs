use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Compact timestamp format used on the wire for drive-to-drive requests.
pub fn format_amz_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn format_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Acceptable clock-skew tolerance for bearer tokens.
pub const TOKEN_CLOCK_SKEW: chrono::Duration = chrono::Duration::minutes(15);

/// Two on-disk modtimes are "in agreement" for quorum purposes when within
/// this delta of each other.
pub fn within_modtime_delta(a: DateTime<Utc>, b: DateTime<Utc>, delta: chrono::Duration) -> bool {
    (a - b).abs() <= delta
}
