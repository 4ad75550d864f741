//! Authority verdicts and response codes.

use std::fmt;
use std::str::FromStr;

/// Authenticated outcome of a license check, as consumed by policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The authority confirmed the entitlement.
    Licensed,
    /// The authority denied the entitlement.
    NotLicensed,
    /// No usable answer; the check should be retried later.
    Retry,
}

impl Verdict {
    /// Stable numeric code used for the at-rest representation.
    pub const fn code(self) -> i32 {
        match self {
            Verdict::Licensed => 0x0100,
            Verdict::NotLicensed => 0x0231,
            Verdict::Retry => 0x0123,
        }
    }

    /// Inverse of [`Verdict::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0x0100 => Some(Verdict::Licensed),
            0x0231 => Some(Verdict::NotLicensed),
            0x0123 => Some(Verdict::Retry),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error returned when a stored verdict code is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerdict(pub String);

impl fmt::Display for UnknownVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown verdict code: {}", self.0)
    }
}

impl std::error::Error for UnknownVerdict {}

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .ok()
            .and_then(Verdict::from_code)
            .ok_or_else(|| UnknownVerdict(s.to_string()))
    }
}

/// Response codes sent by the license authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Entitlement confirmed.
    Licensed,
    /// Entitlement denied.
    NotLicensed,
    /// Entitlement confirmed, signed with a retired key.
    LicensedOldKey,
    /// The application is not managed by the authority.
    NotManaged,
    /// Authority-side failure.
    ServerFailure,
    /// Too many checks in a short period.
    OverQuota,
    /// The client could not reach the authority.
    ContactingAuthority,
    /// The requested scope id is unknown to the authority.
    InvalidScope,
    /// The requesting user does not match the scope owner.
    NonMatchingUser,
}

impl ResponseCode {
    /// Map a raw wire value.
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0x0 => Some(ResponseCode::Licensed),
            0x1 => Some(ResponseCode::NotLicensed),
            0x2 => Some(ResponseCode::LicensedOldKey),
            0x3 => Some(ResponseCode::NotManaged),
            0x4 => Some(ResponseCode::ServerFailure),
            0x5 => Some(ResponseCode::OverQuota),
            0x101 => Some(ResponseCode::ContactingAuthority),
            0x102 => Some(ResponseCode::InvalidScope),
            0x103 => Some(ResponseCode::NonMatchingUser),
            _ => None,
        }
    }

    /// Raw wire value.
    pub const fn raw(self) -> i32 {
        match self {
            ResponseCode::Licensed => 0x0,
            ResponseCode::NotLicensed => 0x1,
            ResponseCode::LicensedOldKey => 0x2,
            ResponseCode::NotManaged => 0x3,
            ResponseCode::ServerFailure => 0x4,
            ResponseCode::OverQuota => 0x5,
            ResponseCode::ContactingAuthority => 0x101,
            ResponseCode::InvalidScope => 0x102,
            ResponseCode::NonMatchingUser => 0x103,
        }
    }

    /// Whether responses with this code carry signed data.
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            ResponseCode::Licensed | ResponseCode::NotLicensed | ResponseCode::LicensedOldKey
        )
    }
}
