use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Locales a translated text may carry.
pub const LOCALES: [&str; 2] = ["en", "cs"];

/// Locale used when the requested one has no translation.
pub const FALLBACK_LOCALE: &str = "en";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalizedTextError {
    #[error("unknown locale '{0}'")]
    UnknownLocale(String),
    #[error("text has no localizations")]
    Empty,
}

/// Text that is either shared by all locales or translated per locale.
///
/// Serialized as a bare string or as `{ "en": "...", "cs": "..." }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawText", into = "RawText")]
pub enum LocalizedText {
    Plain(String),
    Translated(BTreeMap<String, String>),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawText {
    Plain(String),
    Translated(BTreeMap<String, String>),
}

impl TryFrom<RawText> for LocalizedText {
    type Error = LocalizedTextError;

    fn try_from(raw: RawText) -> Result<Self, Self::Error> {
        match raw {
            RawText::Plain(text) => Ok(LocalizedText::Plain(text)),
            RawText::Translated(map) => LocalizedText::translated(map),
        }
    }
}

impl From<LocalizedText> for RawText {
    fn from(text: LocalizedText) -> Self {
        match text {
            LocalizedText::Plain(text) => RawText::Plain(text),
            LocalizedText::Translated(map) => RawText::Translated(map),
        }
    }
}

impl Default for LocalizedText {
    fn default() -> Self {
        LocalizedText::Plain(String::new())
    }
}

impl From<&str> for LocalizedText {
    fn from(text: &str) -> Self {
        LocalizedText::Plain(text.to_string())
    }
}

impl From<String> for LocalizedText {
    fn from(text: String) -> Self {
        LocalizedText::Plain(text)
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resolve(FALLBACK_LOCALE))
    }
}

pub fn is_supported_locale(locale: &str) -> bool {
    LOCALES.contains(&locale)
}

impl LocalizedText {
    /// Builds a translated text, rejecting unknown locales and empty maps.
    /// Blank translations are dropped.
    pub fn translated<I, K, V>(translations: I) -> Result<Self, LocalizedTextError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (locale, text) in translations {
            let locale = locale.into();
            if !is_supported_locale(&locale) {
                return Err(LocalizedTextError::UnknownLocale(locale));
            }
            let text = text.into();
            if !text.trim().is_empty() {
                map.insert(locale, text);
            }
        }
        if map.is_empty() {
            return Err(LocalizedTextError::Empty);
        }
        Ok(LocalizedText::Translated(map))
    }

    /// Exact locale, then English, then the first translation available.
    pub fn resolve(&self, locale: &str) -> &str {
        match self {
            LocalizedText::Plain(text) => text,
            LocalizedText::Translated(map) => map
                .get(locale)
                .or_else(|| map.get(FALLBACK_LOCALE))
                .or_else(|| map.values().next())
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }

    /// Only an exact match counts (plain texts match every locale).
    pub fn resolve_strict(&self, locale: &str) -> Option<&str> {
        match self {
            LocalizedText::Plain(text) => Some(text),
            LocalizedText::Translated(map) => map.get(locale).map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LocalizedText::Plain(text) => text.is_empty(),
            LocalizedText::Translated(map) => map.is_empty(),
        }
    }

    /// Expands the text into one entry per supported locale.
    pub fn to_translations(&self) -> BTreeMap<String, String> {
        LOCALES
            .iter()
            .map(|locale| (locale.to_string(), self.resolve(locale).to_string()))
            .collect()
    }
}
