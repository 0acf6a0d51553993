//! Lightweight triple and entity extraction for the knowledge graph.

use std::sync::OnceLock;

use regex::Regex;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "this", "that",
    "it", "is", "are", "was", "were", "be", "been",
];

struct TriplePattern {
    regex: Regex,
    predicate: &'static str,
}

fn patterns() -> &'static Vec<TriplePattern> {
    static PATTERNS: OnceLock<Vec<TriplePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let specs = [
            (r"(?i)(?P<subject>[A-Za-z][A-Za-z0-9 _-]{1,32}?)\s+is\s+(?P<object>[^.?!]{1,40})", "is"),
            (r"(?i)(?P<subject>[A-Za-z][A-Za-z0-9 _-]{1,32}?)\s+likes\s+(?P<object>[^.?!]{1,40})", "likes"),
            (r"(?i)(?P<subject>[A-Za-z][A-Za-z0-9 _-]{1,32}?)\s+has\s+(?P<object>[^.?!]{1,40})", "has"),
            (r"(?i)(?P<subject>[A-Za-z][A-Za-z0-9 _-]{1,32}?)\s+->\s+(?P<object>[^.?!]{1,40})", "related_to"),
            (r"(?P<subject>[\p{Han}]{1,8})是(?P<object>[\p{Han}]{1,12})", "是"),
            (r"(?P<subject>[\p{Han}]{1,8})喜欢(?P<object>[\p{Han}]{1,12})", "喜欢"),
            (r"(?P<subject>[\p{Han}]{1,8})有(?P<object>[\p{Han}]{1,12})", "有"),
        ];
        specs
            .into_iter()
            .filter_map(|(pattern, predicate)| {
                Regex::new(pattern)
                    .ok()
                    .map(|regex| TriplePattern { regex, predicate })
            })
            .collect()
    })
}

/// Extract `(subject, predicate, object)` triples from free text.
pub fn extract_triples(text: &str) -> Vec<(String, String, String)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut triples = Vec::new();
    for pattern in patterns() {
        for captures in pattern.regex.captures_iter(&cleaned) {
            let subject = clean_token(captures.name("subject").map(|m| m.as_str()).unwrap_or(""));
            let object = clean_token(captures.name("object").map(|m| m.as_str()).unwrap_or(""));
            if subject.is_empty() || object.is_empty() || subject == object {
                continue;
            }
            triples.push((subject, pattern.predicate.to_string(), object));
        }
    }
    dedupe(triples)
}

/// Extract entity tokens for associative recall.
pub fn extract_entities(text: &str, max_entities: usize) -> Vec<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"[A-Za-z][A-Za-z0-9_-]{1,32}|[\p{Han}]{1,6}").expect("static pattern")
    });

    let mut entities = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for hit in token.find_iter(text) {
        let candidate = hit.as_str();
        if STOPWORDS.contains(&candidate.to_lowercase().as_str()) {
            continue;
        }
        let normalized = normalize_entity(candidate);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        entities.push(normalized);
        if entities.len() >= max_entities {
            break;
        }
    }
    entities
}

fn clean_token(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn normalize_entity(token: &str) -> String {
    let cleaned = clean_token(token);
    if cleaned.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        cleaned.to_lowercase()
    } else {
        cleaned
    }
}

fn dedupe(triples: Vec<(String, String, String)>) -> Vec<(String, String, String)> {
    let mut seen = std::collections::HashSet::new();
    triples
        .into_iter()
        .filter(|(s, p, o)| {
            seen.insert((s.to_lowercase(), p.to_lowercase(), o.to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_likes_triple() {
        let triples = extract_triples("Alice likes strong coffee.");
        assert!(triples
            .iter()
            .any(|(s, p, o)| s == "Alice" && p == "likes" && o.contains("coffee")));
    }

    #[test]
    fn arrow_becomes_related_to() {
        let triples = extract_triples("project -> deadline");
        assert!(triples
            .iter()
            .any(|(s, p, o)| s == "project" && p == "related_to" && o == "deadline"));
    }

    #[test]
    fn dedupes_case_insensitively() {
        let triples = extract_triples("Bob has a cat. bob has a cat.");
        let count = triples
            .iter()
            .filter(|(s, p, _)| s.eq_ignore_ascii_case("bob") && p == "has")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn entities_skip_stopwords_and_dedupe() {
        let entities = extract_entities("The project and the Project deadline", 10);
        assert!(entities.contains(&"project".to_string()));
        assert!(entities.contains(&"deadline".to_string()));
        assert!(!entities.contains(&"the".to_string()));
        assert_eq!(
            entities.iter().filter(|e| e.as_str() == "project").count(),
            1
        );
    }

    #[test]
    fn entity_cap_respected() {
        let entities = extract_entities("alpha beta gamma delta epsilon", 3);
        assert_eq!(entities.len(), 3);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(extract_triples("   ").is_empty());
        assert!(extract_entities("", 5).is_empty());
    }
}
