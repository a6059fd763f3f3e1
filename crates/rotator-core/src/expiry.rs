use chrono::{DateTime, NaiveDateTime, Utc};

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// Whether a certificate needs rotating, and why.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Expires within the lead time (or already expired).
    Due { days_left: i64 },
    /// Still comfortably valid.
    Current { days_left: i64 },
    /// No expiry on record, or one we could not parse. Fails open toward
    /// rotation so a bad field can never mask an expired certificate.
    DueUnverifiable { detail: String },
}

impl Disposition {
    pub fn is_due(&self) -> bool {
        !matches!(self, Disposition::Current { .. })
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Whole days until `expiry`, truncated toward zero. Negative means the
/// certificate has already expired.
pub fn days_until_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_days()
}

/// Rotation is due once the remaining days drop to the lead time or below.
pub fn is_due(days_left: i64, lead_time_days: i64) -> bool {
    days_left <= lead_time_days
}

/// Parse a store-supplied expiry timestamp. Accepts RFC 3339 (including a
/// trailing `Z`) and naive `YYYY-MM-DDTHH:MM:SS`, which is assumed UTC.
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|naive| naive.and_utc())
}

/// Decide a certificate's disposition from its raw expiry field.
pub fn evaluate(expiry: Option<&str>, now: DateTime<Utc>, lead_time_days: i64) -> Disposition {
    let Some(raw) = expiry else {
        return Disposition::DueUnverifiable {
            detail: "no expiry on record".to_string(),
        };
    };

    match parse_expiry(raw) {
        Ok(expires_at) => {
            let days_left = days_until_expiry(expires_at, now);
            if is_due(days_left, lead_time_days) {
                Disposition::Due { days_left }
            } else {
                Disposition::Current { days_left }
            }
        }
        Err(e) => Disposition::DueUnverifiable {
            detail: format!("unparseable expiry '{raw}': {e}"),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
