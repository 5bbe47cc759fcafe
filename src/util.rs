use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// The datetime format used in MIMIC exports.
const MIMIC_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// parse a '1' to `true` and a '0' to `false`
pub fn bool_01<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let s: u8 = Deserialize::deserialize(d)?;
    match s {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::custom("expected '0' or '1'")),
    }
}

/// Parse a `yyyy-mm-dd hh:mm:ss` timestamp.
pub fn mimic_datetime<'de, D>(d: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let s: String = Deserialize::deserialize(d)?;
    parse_datetime(&s).map_err(|e| Error::custom(format!("{}", e)))
}

/// Like `mimic_datetime`, but maps the empty string (and "null") to `None` and also accepts a
/// bare date, taken as midnight.
pub fn opt_mimic_datetime<'de, D>(d: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if let Ok(datetime) = parse_datetime(s) {
        return Ok(Some(datetime));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::custom(format!("{}", e)))?;
    date.and_hms_opt(0, 0, 0)
        .map(Some)
        .ok_or_else(|| Error::custom("invalid date"))
}

fn parse_datetime(s: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), MIMIC_DATETIME)
}

/// Print a title underlined with '='.
pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
