//! Query normalization and expansion for lexical scoring.
//!
//! Keywords are lowercased, stripped of punctuation and possessives, filtered
//! against a stop-word list and paired with a light suffix-stripped stem.
//! Expansion appends a bounded number of synonyms from a fixed table.

use std::collections::HashSet;

/// Synonyms appended to the query text by [`expand_query`].
const MAX_SYNONYM_TERMS: usize = 10;

/// Keywords contributed by expansion on top of the original query's keywords.
const MAX_EXPANSION_TERMS: usize = 12;

const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing",
    "for", "from", "get", "got", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "know", "let",
    "like", "me", "mine", "my", "no", "not", "of", "on", "or", "our", "ours", "please", "recall",
    "remember", "she", "should", "so", "some", "tell", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "under", "until", "up", "was", "we",
    "were", "what", "what's", "whats", "when", "where", "which", "who", "whom", "whose", "why",
    "will", "with", "would", "you", "your", "yours",
];

fn synonyms_for(word: &str) -> &'static [&'static str] {
    match word {
        "timezone" => &["time zone", "utc offset", "tz"],
        "weather" => &["forecast", "temperature", "sunny", "rain"],
        "birthday" => &["born", "birth date", "anniversary"],
        "preference" | "prefer" => &["favorite", "likes", "preferred"],
        "favorite" | "favourite" => &["preference", "prefer", "likes"],
        "meeting" => &["call", "appointment", "calendar"],
        "schedule" => &["calendar", "agenda", "appointment"],
        "project" => &["task", "initiative", "milestone"],
        "email" => &["mail", "inbox", "address"],
        "phone" => &["mobile", "number", "contact"],
        "address" => &["location", "home", "street"],
        "location" => &["city", "address", "place"],
        "job" => &["work", "role", "employer", "career"],
        "work" => &["job", "office", "employer"],
        "family" => &["wife", "husband", "kids", "children", "parents"],
        "food" => &["diet", "meal", "cuisine"],
        "allergy" | "allergic" => &["allergy", "allergic", "intolerance", "diet"],
        "diet" => &["food", "vegetarian", "vegan", "allergy"],
        "travel" | "trip" => &["trip", "flight", "vacation", "travel"],
        "goal" => &["objective", "plan", "target"],
        "status" => &["progress", "update", "state"],
        "deadline" => &["due date", "milestone"],
        "health" => &["medical", "doctor", "fitness"],
        "name" => &["called", "nickname"],
        _ => &[],
    }
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn normalize_token(raw: &str) -> Option<String> {
    let lower = raw.to_lowercase();
    let trimmed = lower.trim_matches(|c: char| !c.is_alphanumeric());
    let base = trimmed
        .strip_suffix("'s")
        .or_else(|| trimmed.strip_suffix("\u{2019}s"))
        .unwrap_or(trimmed)
        .trim_matches(|c: char| !c.is_alphanumeric());
    (!base.is_empty()).then(|| base.to_string())
}

/// Lightweight suffix stripping; `None` when nothing was stripped or the stem is too short.
fn stem(token: &str) -> Option<String> {
    let len = token.len();
    let stripped = if len >= 6 && token.ends_with("ing") {
        &token[..len - 3]
    } else if len >= 5 && (token.ends_with("ed") || token.ends_with("es")) {
        &token[..len - 2]
    } else if len >= 4 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..len - 1]
    } else {
        return None;
    };
    (stripped.chars().count() >= MIN_KEYWORD_LEN).then(|| stripped.to_string())
}

fn is_separator(c: char) -> bool {
    !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}' || c == '-' || c == '_')
}

/// Normalized words of `text`, in order, without stop-word or length filtering.
pub fn word_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(is_separator).filter_map(normalize_token)
}

/// Token set used for lexical matching: every normalized word plus its stem.
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in word_tokens(text) {
        if let Some(s) = stem(&word) {
            out.insert(s);
        }
        out.insert(word);
    }
    out
}

/// Ordered, de-duplicated keywords of `query` (each surviving token followed by its stem).
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in word_tokens(query) {
        if token.chars().count() < MIN_KEYWORD_LEN
            || is_stop_word(&token)
            || token.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        let stemmed = stem(&token);
        for kw in std::iter::once(token).chain(stemmed) {
            if seen.insert(kw.clone()) {
                keywords.push(kw);
            }
        }
    }
    keywords
}

/// Append up to ten synonyms for the query's keywords.
///
/// Synonyms already present in the query are skipped; a query without keywords is
/// returned unchanged.
pub fn expand_query(query: &str) -> String {
    let keywords = extract_keywords(query);
    if keywords.is_empty() {
        return query.to_string();
    }

    let lower = query.to_lowercase();
    let mut additions: Vec<&str> = Vec::new();
    'outer: for kw in &keywords {
        for syn in synonyms_for(kw) {
            if additions.len() >= MAX_SYNONYM_TERMS {
                break 'outer;
            }
            if lower.contains(syn) || additions.contains(syn) {
                continue;
            }
            additions.push(syn);
        }
    }

    if additions.is_empty() {
        query.to_string()
    } else {
        format!("{query} {}", additions.join(" "))
    }
}

/// Keyword set for lexical scoring: the query's own keywords followed by at most
/// twelve keywords contributed by synonym expansion.
pub fn expanded_keywords(query: &str) -> Vec<String> {
    let mut keywords = extract_keywords(query);
    let mut added = 0;
    for kw in extract_keywords(&expand_query(query)) {
        if added >= MAX_EXPANSION_TERMS {
            break;
        }
        if !keywords.contains(&kw) {
            keywords.push(kw);
            added += 1;
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stop_words_numbers_and_short_tokens() {
        let kws = extract_keywords("What's my timezone in 2024, ok?");
        assert_eq!(kws, vec!["timezone"]);
    }

    #[test]
    fn keywords_keep_original_and_stem_in_order() {
        let kws = extract_keywords("Meetings scheduled; meetings!");
        assert_eq!(kws, vec!["meetings", "meeting", "scheduled", "schedul"]);
    }

    #[test]
    fn stem_respects_length_guards() {
        assert_eq!(stem("running").as_deref(), Some("runn"));
        assert_eq!(stem("sing"), None);
        assert_eq!(stem("boxes").as_deref(), Some("box"));
        assert_eq!(stem("class"), None);
        assert_eq!(stem("cats").as_deref(), Some("cat"));
        assert_eq!(stem("its"), None);
    }

    #[test]
    fn possessives_and_punctuation_are_stripped() {
        let kws = extract_keywords("\"today's\" (weather)...");
        assert_eq!(kws, vec!["today", "weather"]);
    }

    #[test]
    fn expand_appends_synonyms_not_already_present() {
        let expanded = expand_query("weather forecast today");
        assert!(expanded.starts_with("weather forecast today "));
        assert!(expanded.contains("temperature"));
        assert_eq!(expanded.matches("forecast").count(), 1);
    }

    #[test]
    fn expand_without_keywords_is_identity() {
        assert_eq!(expand_query("what is it?"), "what is it?");
        assert_eq!(expand_query(""), "");
    }

    #[test]
    fn expand_is_bounded() {
        let q = "family travel job diet health timezone weather birthday";
        let expanded = expand_query(q);
        let added = expanded[q.len()..].trim();
        // Multi-word synonyms count as one term each.
        let terms_before_cap = q
            .split_whitespace()
            .flat_map(|w| synonyms_for(w).iter())
            .count();
        assert!(terms_before_cap > MAX_SYNONYM_TERMS);
        assert!(!added.is_empty());
        assert!(added.split_whitespace().count() <= MAX_SYNONYM_TERMS * 2);
    }

    #[test]
    fn expanded_keywords_start_with_query_keywords() {
        let kws = expanded_keywords("my timezone");
        assert_eq!(kws[0], "timezone");
        assert!(kws.contains(&"zone".to_string()));
        assert!(kws.len() <= 1 + MAX_EXPANSION_TERMS);
        assert!(!kws.contains(&"tz".to_string()));
    }

    #[test]
    fn tokenize_includes_stems() {
        let tokens = tokenize("Weather in Austin is sunny today; meetings ran late.");
        for t in ["weather", "austin", "sunny", "today", "meetings", "meeting", "in"] {
            assert!(tokens.contains(t), "missing {t}");
        }
    }
}
