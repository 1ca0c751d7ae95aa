//! Money amounts.
//!
//! Everything the ledger stores, sums or compares is an `i64` count of minor
//! units (paise). Decimal text only appears at the caller boundary and in
//! log lines.

use crate::errors::{LedgerError, Result};

/// Minor units per major unit.
pub const MINOR_PER_MAJOR: i64 = 100;

const FRACTION_DIGITS: usize = 2;

/// Parse decimal text in major units (`"120.50"`, `"-5"`, `"0.07"`) into
/// minor units. Exponents and more than two significant fractional digits
/// are rejected. The result is not range-checked.
pub fn parse_decimal(text: &str) -> Result<i64> {
    let invalid = || LedgerError::InvalidAmount(format!("{text} is not a decimal amount"));
    let too_large = || LedgerError::InvalidAmount(format!("{text} is too large"));

    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(whole) || !is_digits(fraction) {
        return Err(invalid());
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > FRACTION_DIGITS {
        return Err(LedgerError::InvalidAmount(format!(
            "{text} has more than {FRACTION_DIGITS} decimal places"
        )));
    }

    // Only digits remain, so a parse failure means overflow.
    let whole_units = match whole {
        "" => 0,
        w => w.parse::<i64>().map_err(|_| too_large())?,
    };
    let fraction_units = match fraction {
        "" => 0,
        f => format!("{f:0<FRACTION_DIGITS$}")
            .parse::<i64>()
            .map_err(|_| invalid())?,
    };

    let minor = whole_units
        .checked_mul(MINOR_PER_MAJOR)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(too_large)?;
    Ok(if negative { -minor } else { minor })
}

/// Render minor units as major-unit decimal text, e.g. `12345` as `123.45`.
pub fn format_minor(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let per_major = MINOR_PER_MAJOR.unsigned_abs();
    format!("{sign}{}.{:02}", abs / per_major, abs % per_major)
}
