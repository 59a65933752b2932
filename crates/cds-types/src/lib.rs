//! # CDS Types
//!
//! Validated primitive types shared by the clinical decision support crates.
//!
//! - [`NonEmptyText`]: trimmed text that is guaranteed to carry content
//! - [`ConditionCode`]: a normalised ICD-10 code with access to its top-level category

use std::fmt;

/// Errors that can occur when creating validated text types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("text cannot be empty")]
    Empty,
}

/// Errors that can occur when parsing a [`ConditionCode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("condition code cannot be empty")]
    Empty,
    #[error("invalid ICD-10 code '{0}': expected a letter, two digits and an optional dotted suffix")]
    Malformed(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, rejecting empty or whitespace-only input.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A normalised ICD-10 condition code such as `E11` or `E11.9`.
///
/// Parsing uppercases the input and accepts either the dotted (`E11.9`) or the
/// compact (`E119`) form; the stored form is always dotted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionCode(String);

impl ConditionCode {
    /// Parses and normalises an ICD-10 code.
    ///
    /// # Errors
    ///
    /// Returns [`CodeError::Empty`] for blank input and [`CodeError::Malformed`] when the
    /// code does not start with a letter followed by two alphanumerics (the second may be
    /// a letter for some chapters, e.g. `U07`), or the suffix is longer than four characters.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, CodeError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(CodeError::Empty);
        }

        let upper = raw.to_ascii_uppercase();
        let compact: String = upper.chars().filter(|c| *c != '.').collect();
        if upper.matches('.').count() > 1 || compact.len() < 3 || compact.len() > 7 {
            return Err(CodeError::Malformed(raw.to_owned()));
        }

        let bytes = compact.as_bytes();
        let head_ok = bytes[0].is_ascii_uppercase()
            && bytes[1].is_ascii_digit()
            && bytes[2].is_ascii_alphanumeric();
        let tail_ok = bytes[3..].iter().all(|b| b.is_ascii_alphanumeric());
        if !head_ok || !tail_ok {
            return Err(CodeError::Malformed(raw.to_owned()));
        }

        // A dot, when present, must sit right after the category.
        if let Some(pos) = upper.find('.') {
            if pos != 3 {
                return Err(CodeError::Malformed(raw.to_owned()));
            }
        }

        let normalised = if compact.len() > 3 {
            format!("{}.{}", &compact[..3], &compact[3..])
        } else {
            compact
        };
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three-character top-level category, e.g. `E11` for `E11.9`.
    pub fn category(&self) -> ConditionCode {
        Self(self.0[..3].to_owned())
    }

    /// True when this code is itself a top-level category.
    pub fn is_category(&self) -> bool {
        self.0.len() == 3
    }

    /// True when `self` equals `prefix` or sits underneath it in the ICD-10 hierarchy.
    ///
    /// The comparison ignores dots, so `E11.65` is under both `E11` and `E11.6`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        let own: String = self.0.chars().filter(|c| *c != '.').collect();
        let other: String = prefix
            .trim()
            .chars()
            .filter(|c| *c != '.')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        !other.is_empty() && own.starts_with(&other)
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ConditionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ConditionCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ConditionCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ConditionCode::parse(&s).map_err(serde::de::Error::custom)
    }
}
