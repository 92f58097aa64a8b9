use std::collections::BTreeMap;

use records::{LOCALES, LocalizedText};
use regex::Regex;

use crate::error::{Error, Result};

/// Per-locale question text assembled by a generator.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBuffer {
    texts: BTreeMap<String, String>,
    max_len: usize,
}

impl TextBuffer {
    pub fn new(initial: Option<&LocalizedText>, max_len: usize) -> Self {
        let texts = match initial {
            Some(text) => text.to_translations(),
            None => LOCALES
                .iter()
                .map(|locale| (locale.to_string(), String::new()))
                .collect(),
        };
        Self { texts, max_len }
    }

    /// `None` selects every locale.
    fn targets(&self, locales: Option<&[String]>) -> Result<Vec<String>> {
        let Some(locales) = locales else {
            return Ok(self.texts.keys().cloned().collect());
        };
        for locale in locales {
            if !self.texts.contains_key(locale) {
                return Err(Error::UnknownLocale(locale.clone()));
            }
        }
        Ok(locales.to_vec())
    }

    fn update(&mut self, locales: Option<&[String]>, f: impl Fn(&str) -> String) -> Result<()> {
        for locale in self.targets(locales)? {
            let current = self.texts.get(&locale).map(String::as_str).unwrap_or_default();
            let updated = f(current);
            if updated.len() > self.max_len {
                return Err(Error::Generation(format!(
                    "question text exceeds {} bytes",
                    self.max_len
                )));
            }
            self.texts.insert(locale, updated);
        }
        Ok(())
    }

    pub fn set(&mut self, text: &str, locales: Option<&[String]>) -> Result<()> {
        self.update(locales, |_| text.to_string())
    }

    pub fn append(&mut self, text: &str, locales: Option<&[String]>) -> Result<()> {
        self.update(locales, |current| format!("{current}{text}"))
    }

    /// Plain substring replacement, or a regex replacement with `$n` group references.
    pub fn replace(
        &mut self,
        search: &str,
        replace: &str,
        locales: Option<&[String]>,
        regex: bool,
    ) -> Result<()> {
        if regex {
            let pattern = Regex::new(search)?;
            self.update(locales, |current| {
                pattern.replace_all(current, replace).into_owned()
            })
        } else {
            self.update(locales, |current| current.replace(search, replace))
        }
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.texts.get(locale).map(String::as_str)
    }

    /// Final text with empty locales dropped.
    pub fn to_localized(&self) -> Result<LocalizedText> {
        let filled: Vec<(&String, &String)> =
            self.texts.iter().filter(|(_, text)| !text.is_empty()).collect();
        if filled.is_empty() {
            return Err(Error::Generation(
                "the generator did not set any question text".to_string(),
            ));
        }
        Ok(LocalizedText::translated(
            filled.into_iter().map(|(l, t)| (l.clone(), t.clone())),
        )?)
    }
}
