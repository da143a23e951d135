//! Serde adapter for the day-month-year dates used in experiment files (`"01 Jan 2015"`).

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serializer, de::Error};

pub const FORMAT: &str = "%d %b %Y";

pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.format(FORMAT).to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(&raw, FORMAT)
        .map_err(|e| D::Error::custom(format!("invalid date '{raw}' (expected '{FORMAT}'): {e}")))
}
