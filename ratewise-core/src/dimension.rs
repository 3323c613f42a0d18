//! Rating dimensions.
//!
//! A rateable can be scored along several independent axes ("price",
//! "speed", ...). Votes cast without a dimension live on their own axis,
//! [`Dimension::Default`], which never mixes with any named one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An independent axis of rating for a rateable.
///
/// Build named dimensions through [`Dimension::named`]; deserialization
/// goes through it too, so a stored `Named` is never blank or padded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Dimension {
    /// The implicit axis used when no dimension is given
    #[default]
    Default,
    /// A declared, named axis
    Named(String),
}

impl Dimension {
    /// Build a dimension from a name. Surrounding whitespace is dropped and
    /// blank names map to [`Dimension::Default`].
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.trim() {
            "" => Dimension::Default,
            trimmed if trimmed.len() == name.len() => Dimension::Named(name),
            trimmed => Dimension::Named(trimmed.to_string()),
        }
    }

    /// Build a dimension from an optional name, as received from a request.
    pub fn from_option(name: Option<&str>) -> Self {
        match name {
            Some(name) => Self::named(name),
            None => Dimension::Default,
        }
    }

    /// The dimension name, or `None` for the default axis.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dimension::Default => None,
            Dimension::Named(name) => Some(name.as_str()),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Dimension::Default)
    }

    /// Suffix appended to a cache column for this dimension.
    ///
    /// `None` for the default axis; otherwise the snake_cased name, so
    /// `"PriceRange"` and `"price-range"` both become `"price_range"`.
    pub fn column_suffix(&self) -> Option<String> {
        self.as_str().map(snake_case)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Default => write!(f, "<default>"),
            Dimension::Named(name) => write!(f, "{}", name),
        }
    }
}

// Same wire shape as the derived Serialize, normalized on the way in.
#[derive(Deserialize)]
#[serde(rename = "Dimension")]
enum DimensionRepr {
    Default,
    Named(String),
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match DimensionRepr::deserialize(deserializer)? {
            DimensionRepr::Default => Dimension::Default,
            DimensionRepr::Named(name) => Dimension::named(name),
        })
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl From<Option<&str>> for Dimension {
    fn from(name: Option<&str>) -> Self {
        Self::from_option(name)
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;

    for ch in name.trim().chars() {
        if ch == '-' || ch == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }

    out
}
