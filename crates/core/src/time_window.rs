//! Daily `HH:MM` windows with weekday masks, used by rule effective times
//! and periodic mutes.

use chrono::{Datelike, Local, TimeZone, Timelike};

use crate::error::{Result, VigilError};

/// Minutes since midnight, parsed from `HH:MM`.
pub fn parse_hhmm(s: &str) -> Result<u32> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| VigilError::TimeOfDay(s.to_string()))?;
    let h: u32 = h.parse().map_err(|_| VigilError::TimeOfDay(s.to_string()))?;
    let m: u32 = m.parse().map_err(|_| VigilError::TimeOfDay(s.to_string()))?;
    // "24:00" is accepted as end-of-day
    if h > 24 || m > 59 || (h == 24 && m != 0) {
        return Err(VigilError::TimeOfDay(s.to_string()));
    }
    Ok(h * 60 + m)
}

/// Local minute-of-day and weekday (0 = Sunday) for a unix timestamp.
pub fn local_parts(ts: i64) -> (u32, u8) {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => (
            dt.hour() * 60 + dt.minute(),
            dt.weekday().num_days_from_sunday() as u8,
        ),
        None => (0, 0),
    }
}

/// Whether `minute`/`weekday` falls inside `[stime, etime]` on an allowed day.
///
/// When `stime > etime` the window wraps past midnight, e.g. `22:00`-`06:00`.
/// An empty `days` list allows every day.
pub fn in_window(stime: u32, etime: u32, days: &[u8], minute: u32, weekday: u8) -> bool {
    if !days.is_empty() && !days.contains(&weekday) {
        return false;
    }
    if stime <= etime {
        minute >= stime && minute <= etime
    } else {
        minute >= stime || minute <= etime
    }
}

/// Parse a window and test a timestamp against it in local time. An empty
/// start or end means the whole day.
pub fn ts_in_window(stime: &str, etime: &str, days: &[u8], ts: i64) -> Result<bool> {
    let s = if stime.trim().is_empty() { 0 } else { parse_hhmm(stime)? };
    let e = if etime.trim().is_empty() { 24 * 60 } else { parse_hhmm(etime)? };
    let (minute, weekday) = local_parts(ts);
    Ok(in_window(s, e, days, minute, weekday))
}

/// Parse a space separated weekday list such as `"1 2 3 4 5"`.
pub fn parse_days(s: &str) -> Vec<u8> {
    s.split_whitespace()
        .filter_map(|d| d.parse::<u8>().ok())
        .filter(|d| *d <= 6)
        .collect()
}
