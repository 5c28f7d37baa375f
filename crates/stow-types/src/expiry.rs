use chrono::{DateTime, Duration, Utc};

use crate::error::TypeError;

/// Longest signed-URL lifetime any backend accepts: 7 days.
pub const MAX_SIGNED_URL_HORIZON_SECS: i64 = 7 * 24 * 60 * 60;

/// When a signed URL stops working.
///
/// Accepts an absolute instant, a duration from "now", or unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedUrlExpiry {
    At(DateTime<Utc>),
    In(Duration),
    UnixSeconds(i64),
}

impl SignedUrlExpiry {
    /// Resolve to an absolute instant relative to `now`.
    ///
    /// The instant must lie in the future and no more than `horizon_secs`
    /// after `now`. Arithmetic is checked: values beyond chrono's range are
    /// rejected, never panic.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        horizon_secs: i64,
    ) -> Result<DateTime<Utc>, TypeError> {
        let too_far = |expires: String| TypeError::ExpiryTooFar {
            expires,
            horizon_secs,
        };
        let expires = match *self {
            Self::At(at) => at,
            Self::In(delta) => now
                .checked_add_signed(delta)
                .ok_or_else(|| too_far(format!("now + {delta}")))?,
            Self::UnixSeconds(secs) => {
                DateTime::from_timestamp(secs, 0).ok_or(TypeError::InvalidTimestamp(secs))?
            }
        };
        if expires <= now {
            return Err(TypeError::ExpiryInPast(expires.to_rfc3339()));
        }
        let latest = Duration::try_seconds(horizon_secs).and_then(|h| now.checked_add_signed(h));
        match latest {
            Some(latest) if expires <= latest => Ok(expires),
            // A horizon past the representable range admits every instant.
            None if horizon_secs > 0 => Ok(expires),
            _ => Err(too_far(expires.to_rfc3339())),
        }
    }
}

impl From<DateTime<Utc>> for SignedUrlExpiry {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

impl From<Duration> for SignedUrlExpiry {
    fn from(delta: Duration) -> Self {
        Self::In(delta)
    }
}

impl From<i64> for SignedUrlExpiry {
    fn from(secs: i64) -> Self {
        Self::UnixSeconds(secs)
    }
}
