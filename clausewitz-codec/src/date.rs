//! Packed-date decoding.
//!
//! Dates travel on the wire as a signed 32-bit count of hours since year 0
//! of the in-game calendar, which knows no leap years. Values outside the
//! plausible range are kept as plain integers by the caller.

/// Hour offset of 1.1.1 of year 0.
const EPOCH_HOURS: i64 = 43_800_000;

/// Dates past this point do not occur in real saves; larger payloads are
/// integers that happened to land on the date opcode.
const MAX_HOURS: i64 = 60_000_000;

/// The single pre-epoch payload observed in saves, rendered literally.
const PRE_EPOCH: i32 = 43_791_240;

const MONTH_LENGTHS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Decodes a raw date payload into its `"Y.M.D"` rendering, or `None` when
/// the value is out of range and must be preserved as an integer.
pub fn decode(raw: i32) -> Option<String> {
    if raw == PRE_EPOCH {
        return Some("-1.1.1".to_owned());
    }

    let hours = i64::from(raw);
    if !(EPOCH_HOURS..=MAX_HOURS).contains(&hours) {
        return None;
    }

    let days = (hours - EPOCH_HOURS) / 24;
    let year = days / 365;
    let mut rest = days % 365;

    let mut month = 1;
    for length in &MONTH_LENGTHS[..11] {
        if rest >= *length {
            rest -= length;
            month += 1;
        } else {
            break;
        }
    }

    Some(format!("{year}.{month}.{}", rest + 1))
}
