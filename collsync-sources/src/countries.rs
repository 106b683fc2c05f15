//! Country-name normalization to ISO 3166-1 alpha-2 codes.
//!
//! Resolution order: a literal two-letter code, the herbarium directory's own
//! country list, then the built-in alias table. Names are compared after
//! lower-casing and stripping punctuation, so `"U.S.A."` and `"usa"` agree.

use std::collections::HashMap;

const BUILTIN: &[(&str, &str)] = &[
    ("united states", "US"),
    ("united states of america", "US"),
    ("usa", "US"),
    ("us", "US"),
    ("canada", "CA"),
    ("mexico", "MX"),
    ("brazil", "BR"),
    ("brasil", "BR"),
    ("argentina", "AR"),
    ("chile", "CL"),
    ("colombia", "CO"),
    ("peru", "PE"),
    ("ecuador", "EC"),
    ("venezuela", "VE"),
    ("bolivia", "BO"),
    ("costa rica", "CR"),
    ("cuba", "CU"),
    ("united kingdom", "GB"),
    ("uk", "GB"),
    ("great britain", "GB"),
    ("england", "GB"),
    ("scotland", "GB"),
    ("wales", "GB"),
    ("ireland", "IE"),
    ("france", "FR"),
    ("germany", "DE"),
    ("deutschland", "DE"),
    ("spain", "ES"),
    ("espana", "ES"),
    ("portugal", "PT"),
    ("italy", "IT"),
    ("netherlands", "NL"),
    ("the netherlands", "NL"),
    ("belgium", "BE"),
    ("switzerland", "CH"),
    ("austria", "AT"),
    ("denmark", "DK"),
    ("sweden", "SE"),
    ("norway", "NO"),
    ("finland", "FI"),
    ("poland", "PL"),
    ("czech republic", "CZ"),
    ("czechia", "CZ"),
    ("russia", "RU"),
    ("russian federation", "RU"),
    ("ukraine", "UA"),
    ("turkey", "TR"),
    ("china", "CN"),
    ("peoples republic of china", "CN"),
    ("japan", "JP"),
    ("india", "IN"),
    ("indonesia", "ID"),
    ("philippines", "PH"),
    ("australia", "AU"),
    ("new zealand", "NZ"),
    ("south africa", "ZA"),
    ("republic of south africa", "ZA"),
    ("kenya", "KE"),
    ("madagascar", "MG"),
    ("egypt", "EG"),
    ("morocco", "MA"),
];

/// Resolves free-text country names to ISO codes.
#[derive(Debug, Clone, Default)]
pub struct CountryResolver {
    names: HashMap<String, String>,
}

impl CountryResolver {
    /// A resolver with the built-in alias table only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Adds the herbarium directory's `(name, iso_code)` pairs. They take
    /// precedence over the built-in table.
    pub fn with_names<'a>(mut self, names: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (name, code) in names {
            let code = code.trim();
            if is_iso_code(code) {
                self.names.insert(normalize(name), code.to_ascii_uppercase());
            }
        }
        self
    }

    pub fn resolve(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if is_iso_code(trimmed) && trimmed.chars().all(|c| c.is_ascii_uppercase()) {
            return Some(trimmed.to_string());
        }
        let key = normalize(trimmed);
        if let Some(code) = self.names.get(&key) {
            return Some(code.clone());
        }
        BUILTIN
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, code)| (*code).to_string())
    }
}

fn is_iso_code(s: &str) -> bool {
    s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
