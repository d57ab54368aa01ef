//! Typed directory records

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// How a device is expected to authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// The device's own MAC address is its identity
    Mac,
    /// A user authenticates with credentials (802.1X)
    Dot1x,
}

impl AuthType {
    /// Directory representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Mac => "MAC",
            AuthType::Dot1x => "802.1X",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAC" => Ok(AuthType::Mac),
            "802.1X" | "DOT1X" => Ok(AuthType::Dot1x),
            other => Err(format!("unknown auth type '{}'", other)),
        }
    }
}

/// A user account, snapshot for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    /// `userPassword` value, including its `{SCHEME}` header
    pub password_hash: String,
    /// NT hash as stored (hex text)
    pub nt_password_hash: String,
    pub subscription_end: DateTime<Utc>,
    pub room_name: String,
}

impl User {
    /// Subscription still running at `now` (an end equal to `now` is expired)
    pub fn has_subscription_at(&self, now: DateTime<Utc>) -> bool {
        now < self.subscription_end
    }

    pub fn has_subscription(&self) -> bool {
        self.has_subscription_at(Utc::now())
    }

    /// Whole seconds of subscription left at `now`, never negative
    pub fn seconds_left_at(&self, now: DateTime<Utc>) -> i64 {
        (self.subscription_end - now).num_seconds().max(0)
    }
}

/// A registered device together with its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub mac_address: String,
    pub auth_type: AuthType,
    pub owner: User,
}

impl Device {
    pub fn is_mac_auth(&self) -> bool {
        self.auth_type == AuthType::Mac
    }

    pub fn is_dot1x_auth(&self) -> bool {
        self.auth_type == AuthType::Dot1x
    }

    pub fn is_owned_by(&self, user: &User) -> bool {
        self.owner.name == user.name
    }
}

const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

/// Parse an LDAP GeneralizedTime value
///
/// Accepts `YYYYMMDDHHMMSSZ`, an optional fractional second and either a `Z`
/// or a numeric offset.
pub fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, GENERALIZED_TIME) {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S%.fZ") {
        return Some(naive.and_utc());
    }
    for format in ["%Y%m%d%H%M%S%z", "%Y%m%d%H%M%S%.f%z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

/// Format a timestamp as LDAP GeneralizedTime (UTC)
pub fn format_generalized_time(time: DateTime<Utc>) -> String {
    time.format(GENERALIZED_TIME).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn user(end: DateTime<Utc>) -> User {
        User {
            name: "alice".to_string(),
            password_hash: "{SSHA}abc".to_string(),
            nt_password_hash: "0123456789ABCDEF".to_string(),
            subscription_end: end,
            room_name: "A-012".to_string(),
        }
    }

    #[test]
    fn test_auth_type_round_trip() {
        assert_eq!("MAC".parse::<AuthType>(), Ok(AuthType::Mac));
        assert_eq!("802.1X".parse::<AuthType>(), Ok(AuthType::Dot1x));
        assert_eq!("802.1x".parse::<AuthType>(), Ok(AuthType::Dot1x));
        assert!("PSK".parse::<AuthType>().is_err());
        assert_eq!(AuthType::Dot1x.to_string(), "802.1X");
    }

    #[test]
    fn test_subscription_boundary_is_strict() {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        assert!(!user(now).has_subscription_at(now));
        assert!(user(now + Duration::seconds(1)).has_subscription_at(now));
        assert!(!user(now - Duration::days(1)).has_subscription_at(now));
    }

    #[test]
    fn test_seconds_left() {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        assert_eq!(user(now + Duration::days(1)).seconds_left_at(now), 86400);
        assert_eq!(user(now - Duration::days(1)).seconds_left_at(now), 0);
    }

    #[test]
    fn test_generalized_time() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap();
        assert_eq!(parse_generalized_time("20250630235959Z"), Some(expected));
        assert_eq!(parse_generalized_time("20250630235959.5Z").map(|t| t.timestamp()), Some(expected.timestamp()));
        assert_eq!(parse_generalized_time("20250701015959+0200"), Some(expected));
        assert_eq!(parse_generalized_time("not a date"), None);
        assert_eq!(format_generalized_time(expected), "20250630235959Z");
    }

    #[test]
    fn test_device_ownership() {
        let owner = user(Utc::now());
        let device = Device {
            mac_address: "aabbccddeeff".to_string(),
            auth_type: AuthType::Dot1x,
            owner: owner.clone(),
        };
        assert!(device.is_owned_by(&owner));
        assert!(device.is_dot1x_auth());

        let mut other = owner;
        other.name = "bob".to_string();
        assert!(!device.is_owned_by(&other));
    }
}
