use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use gpui::SharedString;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/formloom_i18n_generated.rs"));
}

/// Locale selection for a manager instance.
///
/// `System` defers to the host locale when the `i18n` feature is enabled and
/// otherwise resolves to the default catalog.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub enum Locale {
    #[default]
    System,
    Tag(String),
}

impl From<String> for Locale {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("system") {
            return Self::System;
        }
        Self::Tag(value.trim().to_string())
    }
}

impl From<&str> for Locale {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

#[derive(Clone)]
pub struct I18nManager {
    catalog: Arc<Catalog>,
    locale: Arc<RwLock<Locale>>,
}

impl Default for I18nManager {
    fn default() -> Self {
        Self::new()
    }
}

impl I18nManager {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(Catalog::load()),
            locale: Arc::new(RwLock::new(Locale::System)),
        }
    }

    pub fn with_locale(locale: impl Into<Locale>) -> Self {
        let manager = Self::new();
        manager.set_locale(locale);
        manager
    }

    pub fn locale(&self) -> Locale {
        self.locale
            .read()
            .expect("i18n locale state poisoned")
            .clone()
    }

    pub fn set_locale(&self, locale: impl Into<Locale>) {
        *self.locale.write().expect("i18n locale state poisoned") = locale.into();
    }

    pub fn default_locale(&self) -> &'static str {
        self.catalog.default_locale
    }

    pub fn resolved_locale(&self) -> &'static str {
        self.catalog
            .resolve_locale(self.requested_locale().as_deref())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Translates `key`, falling back to the key itself when no catalog in
    /// the resolution chain defines it.
    pub fn t(&self, key: &str) -> SharedString {
        match self.lookup(key) {
            Some(value) => value.into(),
            None => key.to_string().into(),
        }
    }

    pub fn t_with(&self, key: &str, params: &[(&str, &str)]) -> SharedString {
        let template = self.lookup(key).unwrap_or(key);
        if params.is_empty() {
            return template.to_string().into();
        }
        format_template(template, params).into()
    }

    fn requested_locale(&self) -> Option<String> {
        match self.locale() {
            #[cfg(feature = "i18n")]
            Locale::System => sys_locale::get_locale(),
            #[cfg(not(feature = "i18n"))]
            Locale::System => None,
            Locale::Tag(tag) => Some(tag),
        }
    }

    fn lookup(&self, key: &str) -> Option<&'static str> {
        self.catalog.lookup(self.resolved_locale(), key)
    }
}

struct Catalog {
    default_locale: &'static str,
    locales: HashMap<&'static str, HashMap<&'static str, &'static str>>,
    tag_lookup: HashMap<String, &'static str>,
    language_lookup: HashMap<String, &'static str>,
}

impl Catalog {
    fn load() -> Self {
        let mut locales = HashMap::new();
        let mut tag_lookup = HashMap::new();
        let mut language_lookup = HashMap::new();
        let mut ambiguous_languages = HashSet::new();

        for (locale, entries) in generated::LOCALES.iter().copied() {
            let normalized = normalize_locale_tag(locale);
            let language = language_of(&normalized);
            tag_lookup.insert(normalized, locale);

            // A bare language tag only resolves when exactly one catalog
            // claims it.
            match language_lookup.get(&language) {
                Some(existing) if *existing != locale => {
                    ambiguous_languages.insert(language);
                }
                Some(_) => {}
                None => {
                    language_lookup.insert(language, locale);
                }
            }

            locales.insert(locale, entries.iter().copied().collect::<HashMap<_, _>>());
        }

        for language in ambiguous_languages {
            language_lookup.remove(&language);
        }

        Self {
            default_locale: generated::DEFAULT_LOCALE,
            locales,
            tag_lookup,
            language_lookup,
        }
    }

    fn resolve_locale(&self, requested: Option<&str>) -> &'static str {
        let Some(requested) = requested else {
            return self.default_locale;
        };

        let normalized = normalize_locale_tag(requested);
        if let Some(locale) = self.tag_lookup.get(&normalized) {
            return locale;
        }
        if let Some(locale) = self.language_lookup.get(&language_of(&normalized)) {
            return locale;
        }
        self.default_locale
    }

    fn lookup(&self, locale: &'static str, key: &str) -> Option<&'static str> {
        self.locales
            .get(locale)
            .and_then(|entries| entries.get(key).copied())
    }
}

fn language_of(normalized_tag: &str) -> String {
    normalized_tag
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn normalize_locale_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    let without_encoding = trimmed.split('.').next().unwrap_or(trimmed);
    let without_variant = without_encoding
        .split('@')
        .next()
        .unwrap_or(without_encoding);
    without_variant
        .replace('_', "-")
        .split('-')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

fn format_template(template: &str, params: &[(&str, &str)]) -> String {
    let values = params.iter().copied().collect::<HashMap<&str, &str>>();
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            // Unterminated token; keep the tail verbatim.
            output.push_str(&rest[open..]);
            return output;
        };

        match values.get(&after_open[..close]) {
            Some(value) => output.push_str(value),
            // Unknown tokens stay in place, braces included.
            None => output.push_str(&rest[open..open + close + 2]),
        }
        rest = &after_open[close + 1..];
    }

    output.push_str(rest);
    output
}
