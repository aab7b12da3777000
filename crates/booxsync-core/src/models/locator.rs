//! Reading position within a rendered publication.
//!
//! A locator is stored and transmitted as the exact JSON text the renderer
//! produced. Parsing only validates it and exposes a few read-only fields, so
//! a locator written on one device reaches another byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A renderer locator kept in its original serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    raw: String,
    fields: LocatorFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LocatorFields {
    href: String,
    #[serde(rename = "type")]
    media_type: Option<String>,
    title: Option<String>,
    #[serde(default)]
    locations: LocatorLocations,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocatorLocations {
    progression: Option<f64>,
    total_progression: Option<f64>,
}

impl Locator {
    /// Validate and wrap locator JSON without re-serializing it.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let fields: LocatorFields = serde_json::from_str(&raw)?;
        if fields.href.trim().is_empty() {
            return Err(Error::InvalidInput("locator href must not be empty".into()));
        }
        Ok(Self { raw, fields })
    }

    /// Parse optional locator text, treating blank text as absent.
    pub fn parse_optional(raw: Option<String>) -> Result<Option<Self>> {
        match crate::util::normalize_text_option(raw) {
            Some(raw) => Self::parse(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Build a locator from its parts. Absent parts are left out of the JSON.
    pub fn from_parts(
        href: &str,
        media_type: Option<&str>,
        progression: Option<f64>,
        total_progression: Option<f64>,
    ) -> Result<Self> {
        let mut object = Map::new();
        object.insert("href".into(), Value::from(href));
        if let Some(media_type) = media_type {
            object.insert("type".into(), Value::from(media_type));
        }
        let mut locations = Map::new();
        if let Some(progression) = progression {
            locations.insert("progression".into(), Value::from(progression));
        }
        if let Some(total) = total_progression {
            locations.insert("totalProgression".into(), Value::from(total));
        }
        object.insert("locations".into(), Value::Object(locations));
        Self::parse(serde_json::to_string(&Value::Object(object))?)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn href(&self) -> &str {
        &self.fields.href
    }

    pub fn media_type(&self) -> Option<&str> {
        self.fields.media_type.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.title.as_deref()
    }

    /// Progression (0-1) inside the current resource.
    pub const fn progression(&self) -> Option<f64> {
        self.fields.locations.progression
    }

    /// Progression (0-1) across the whole publication.
    pub const fn total_progression(&self) -> Option<f64> {
        self.fields.locations.total_progression
    }
}

impl PartialEq for Locator {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Locator {}

impl TryFrom<String> for Locator {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.raw
    }
}
