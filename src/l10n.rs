//! Message localization
//!
//! A [`Localizer`] is built once at startup and passed to whatever prints
//! user-facing text. Catalogs are flat JSON objects mapping the English message
//! to its translation, stored as `<dir>/<lang>.json` (`de_DE.json`, `de.json`).
//! Messages without a translation are returned unchanged.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Environment variables consulted for the language, in priority order
pub const LANGUAGE_VARS: [&str; 4] = ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"];

/// Picks the language from the first non-empty variable in [`LANGUAGE_VARS`].
///
/// Only the first entry of a `:` list is used and the encoding suffix is
/// dropped: `de_DE.UTF-8:en` becomes `de_DE`. `C` and `POSIX` mean no
/// translation.
pub fn language_from<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = LANGUAGE_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .find(|v| !v.is_empty())?;

    let first = value.split(':').next().unwrap_or_default();
    let lang = first.split(['.', '@']).next().unwrap_or_default();
    match lang {
        "" | "C" | "POSIX" => None,
        lang => Some(lang.to_string()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Localizer {
    language: Option<String>,
    messages: HashMap<String, String>,
}

impl Localizer {
    /// A localizer that returns every message unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Loads the catalog for the environment's language from `dir`.
    pub fn from_env(dir: &Path) -> Self {
        match language_from(|var| std::env::var(var).ok()) {
            Some(lang) => Self::load(dir, &lang),
            None => Self::identity(),
        }
    }

    /// Loads `<dir>/<lang>.json`, falling back to the base language
    /// (`de_DE` to `de`), then to no translation.
    pub fn load(dir: &Path, lang: &str) -> Self {
        let mut candidates = vec![lang];
        if let Some((base, _)) = lang.split_once('_') {
            candidates.push(base);
        }

        for candidate in candidates {
            let path = dir.join(format!("{candidate}.json"));
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(messages) => {
                    debug!("Loaded {} messages from {}", messages.len(), path.display());
                    return Self {
                        language: Some(candidate.to_string()),
                        messages,
                    };
                }
                Err(e) => warn!("Ignoring invalid catalog {}: {e}", path.display()),
            }
        }
        debug!("No catalog for '{lang}' in {}", dir.display());
        Self::identity()
    }

    /// Language of the loaded catalog
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Translates `message`, or returns it unchanged.
    pub fn tr<'a>(&'a self, message: &'a str) -> Cow<'a, str> {
        match self.messages.get(message) {
            Some(translated) if !translated.is_empty() => Cow::Borrowed(translated),
            _ => Cow::Borrowed(message),
        }
    }
}
