//! Contact records as served by the randomuser.me feed.
//!
//! The same shapes are used on the wire and in the local cache (the cache
//! stores each contact as its JSON document), so a contact read back from the
//! cache is field-for-field identical to the one that was fetched.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// One page of results plus the feed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub results: Vec<Contact>,
    pub info: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub seed: String,
    pub results: u32,
    pub page: u32,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub gender: String,
    pub name: Name,
    pub location: Location,
    /// Identity key: the cache and the in-memory list dedupe on this.
    pub email: String,
    pub phone: String,
    pub cell: String,
    pub picture: Picture,
    pub nat: String,
}

impl Contact {
    pub fn full_name(&self) -> String {
        self.name.full_name()
    }

    /// Case-insensitive substring match on full name or email.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.full_name().to_lowercase().contains(needle)
            || self.email.to_lowercase().contains(needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub title: String,
    pub first: String,
    pub last: String,
}

impl Name {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first, self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub street: Street,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postcode: PostalCode,
    pub coordinates: Coordinates,
    pub timezone: Timezone,
}

impl Location {
    pub fn street_line(&self) -> String {
        format!("{} {}", self.street.number, self.street.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    pub number: i64,
    pub name: String,
}

/// Coordinates arrive as decimal strings and are kept that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: String,
    pub longitude: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timezone {
    pub offset: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub large: String,
    pub medium: String,
    pub thumbnail: String,
}

/// Postcodes are numeric for some nationalities and alphanumeric for others,
/// so the feed sends either a JSON string or a JSON integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostalCode {
    Text(String),
    Number(i64),
}

impl PostalCode {
    pub fn as_string(&self) -> String {
        match self {
            PostalCode::Text(value) => value.clone(),
            PostalCode::Number(value) => value.to_string(),
        }
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostalCode::Text(value) => f.write_str(value),
            PostalCode::Number(value) => write!(f, "{}", value),
        }
    }
}

impl Serialize for PostalCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PostalCode::Text(value) => serializer.serialize_str(value),
            PostalCode::Number(value) => serializer.serialize_i64(*value),
        }
    }
}

impl<'de> Deserialize<'de> for PostalCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PostalCodeVisitor;

        impl<'de> Visitor<'de> for PostalCodeVisitor {
            type Value = PostalCode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer postcode")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<PostalCode, E> {
                Ok(PostalCode::Text(value.to_string()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<PostalCode, E> {
                Ok(PostalCode::Text(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<PostalCode, E> {
                Ok(PostalCode::Number(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<PostalCode, E> {
                i64::try_from(value)
                    .map(PostalCode::Number)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
            }
        }

        deserializer.deserialize_any(PostalCodeVisitor)
    }
}
