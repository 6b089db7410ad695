//! Serde helpers for settings that may arrive as text.
//!
//! Environment variables reach the config layer as quoted strings, so a
//! `TOLL_REQUESTS_PER_DAY=1500` override shows up as `"1500"` where the file
//! would have `1500`. These helpers accept either form.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{Deserialize, Deserializer, Error};

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum TextOrValue<T> {
    Value(T),
    Text(String),
}

impl<T> TextOrValue<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn resolve<E: Error>(self) -> Result<T, E> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|e| E::custom(format!("invalid value {text:?}: {e}"))),
        }
    }
}

/// Deserializes `T` from its native form or from a string that parses to it.
pub fn from_str_or_value<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    TextOrValue::<T>::deserialize(deserializer)?.resolve()
}

/// Like [`from_str_or_value`] for optional settings. An empty string is `None`.
pub fn option_from_str_or_value<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<TextOrValue<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TextOrValue::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(raw) => raw.resolve().map(Some),
    }
}
