use regex::Regex;
use std::sync::OnceLock;

/// Facility name prefixes, in priority order. The longer Arabic form must be
/// tested before its shorter variant.
pub const DEFAULT_PREFIXES: &[&str] = &[
    "مركز الرعاية الصحية الأولية ب",
    "مركز الرعاية الصحية الأولية",
    "مركز صحي ",
    "Primary Health Care Center",
    "PHC ",
];

/// Turns free-text facility source names (often the exported file name) into
/// stable grouping keys.
pub struct FacilityNameNormalizer {
    prefixes: Vec<String>,
}

fn extension_pattern() -> &'static Regex {
    static EXTENSION: OnceLock<Regex> = OnceLock::new();
    EXTENSION.get_or_init(|| Regex::new(r"(?i)\.(xlsx|xlsm|xlsb|xls|csv|ods)$").unwrap())
}

fn whitespace_pattern() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

impl Default for FacilityNameNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl FacilityNameNormalizer {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    /// Canonical facility key. An empty result means the row is excluded from
    /// aggregation.
    pub fn normalize(&self, raw: Option<&str>) -> String {
        let mut name = match raw {
            Some(raw) => raw.to_string(),
            None => return String::new(),
        };

        // A single pass can expose another prefix or extension, so run to a fixed point.
        loop {
            let next = self.normalize_once(&name);
            if next == name {
                return next;
            }
            name = next;
        }
    }

    fn normalize_once(&self, raw: &str) -> String {
        let mut name = raw.trim();

        if let Some(prefix) = self.prefixes.iter().find(|p| name.starts_with(p.as_str())) {
            name = name[prefix.len()..].trim_start();
        }

        let name = extension_pattern().replace(name, "");
        let name = name.trim_matches(is_edge_noise);
        whitespace_pattern().replace_all(name, " ").into_owned()
    }
}

fn is_edge_noise(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '_' | '.' | ',' | ';' | ':' | '"' | '\'' | '،')
}
