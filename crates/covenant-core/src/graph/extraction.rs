//! Regex- and heuristic-based entity extraction (§4.6). Deliberately not
//! LLM-based: identifiers are recognized by naming convention, not meaning.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::EntityType;

/// A span of text recognized as referring to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub start: usize,
    pub end: usize,
}

static FUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z][a-z0-9_]*[a-z0-9])\(").unwrap());
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]*[A-Z][a-zA-Z0-9]*)\b").unwrap());
static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([\w\-./]+/[\w\-./]+\.[a-zA-Z0-9]{1,6})\b").unwrap());

/// Extract entities from free text: `snake_case(` → function, `CamelCase`
/// → class, `a/b/c.ext` → file. Overlap is resolved by preferring the
/// longest/most specific match (files over classes over functions) at a
/// given byte offset.
pub fn extract_entities(text: &str) -> Vec<ExtractedEntity> {
    let mut found = Vec::new();
    let mut covered: Vec<(usize, usize)> = Vec::new();

    for m in FILE_RE.find_iter(text) {
        found.push(ExtractedEntity {
            entity_type: EntityType::File,
            name: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        });
        covered.push((m.start(), m.end()));
    }

    for cap in CLASS_RE.captures_iter(text) {
        let m = cap.get(1).unwrap();
        if covered.iter().any(|&(s, e)| m.start() >= s && m.end() <= e) {
            continue;
        }
        found.push(ExtractedEntity {
            entity_type: EntityType::Class,
            name: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        });
    }

    for cap in FUNCTION_RE.captures_iter(text) {
        let m = cap.get(1).unwrap();
        if covered.iter().any(|&(s, e)| m.start() >= s && m.end() <= e) {
            continue;
        }
        found.push(ExtractedEntity {
            entity_type: EntityType::Function,
            name: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        });
    }

    found
}

/// A ±60-char window of context around an extraction (§4.6 refs).
pub fn context_snippet(text: &str, start: usize, end: usize) -> String {
    const RADIUS: usize = 60;
    let lo = start.saturating_sub(RADIUS);
    let hi = (end + RADIUS).min(text.len());
    // Clamp to char boundaries so we never slice inside a multi-byte codepoint.
    let lo = (lo..=start).find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    let hi = (hi.min(text.len())..=text.len())
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    let hi = hi.max(lo);
    text[lo..hi].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function_call() {
        let entities = extract_entities("Call authenticate_user() to verify the token");
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Function && e.name == "authenticate_user"));
    }

    #[test]
    fn extracts_class_name() {
        let entities = extract_entities("The UserService class handles auth");
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Class && e.name == "UserService"));
    }

    #[test]
    fn extracts_file_path() {
        let entities = extract_entities("Edit src/auth/service.py and update the tests");
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::File && e.name == "src/auth/service.py"));
    }

    #[test]
    fn snippet_stays_within_bounds() {
        let text = "short";
        let snippet = context_snippet(text, 0, 5);
        assert_eq!(snippet, "short");
    }
}
