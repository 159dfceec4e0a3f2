//! Free-text relevance ranking of person records.
//!
//! Scoring, per record, starting from 0:
//!
//! - per query token: +10 when it occurs in the serialized descriptor, +5 per
//!   attribute whose key or value contains it; +5 when it occurs in the
//!   serialized metadata, +3 per metadata field containing it
//! - +20 when a gender term in the query equals the record's gender
//! - +20 when an age term in the query equals the record's age group
//! - +20 per clothing keyword in the query found in a clothing attribute
//! - +20 per color keyword in the query found in a `*color` attribute
//!
//! Totals are clamped to 0..=100, zero scores are dropped and the rest are
//! stably sorted by score, so ties keep store order. At most
//! `MAX_RESULTS` are returned. Ranking is deterministic.

use serde::Serialize;
use serde_json::Value;

use crate::person::{PersonRecord, AGE_GROUP, GENDER};

pub const MAX_RESULTS: usize = 5;
pub const MAX_SCORE: u32 = 100;

const MIN_TOKEN_CHARS: usize = 3;

const DESCRIPTOR_TOKEN_HIT: u32 = 10;
const ATTRIBUTE_TOKEN_HIT: u32 = 5;
const METADATA_TOKEN_HIT: u32 = 5;
const METADATA_FIELD_HIT: u32 = 3;
const BONUS: u32 = 20;

const GENDER_TERMS: &[(&str, &str)] = &[
    ("man", "male"),
    ("men", "male"),
    ("male", "male"),
    ("boy", "male"),
    ("guy", "male"),
    ("gentleman", "male"),
    ("woman", "female"),
    ("women", "female"),
    ("female", "female"),
    ("girl", "female"),
    ("lady", "female"),
];

const AGE_TERMS: &[(&str, &str)] = &[
    ("child", "child"),
    ("kid", "child"),
    ("toddler", "child"),
    ("baby", "child"),
    ("teen", "teen"),
    ("teenager", "teen"),
    ("adolescent", "teen"),
    ("youth", "teen"),
    ("adult", "adult"),
    ("elderly", "elderly"),
    ("old", "elderly"),
    ("senior", "elderly"),
];

const CLOTHING_KEYWORDS: &[&str] = &[
    "shirt", "t-shirt", "tshirt", "jacket", "coat", "hoodie", "sweater", "jumper", "blouse",
    "top", "vest", "dress", "skirt", "pants", "trousers", "jeans", "shorts", "leggings", "suit",
    "uniform", "hat", "cap", "beanie", "scarf", "shoes", "sneakers", "boots", "sandals",
    "backpack", "bag", "glasses", "sunglasses",
];

const COLOR_KEYWORDS: &[&str] = &[
    "red", "orange", "yellow", "green", "blue", "purple", "pink", "brown", "black", "white",
    "gray", "grey", "beige", "navy", "maroon", "teal", "tan", "gold", "silver",
];

/// One ranked record.
#[derive(Clone, Debug, Serialize)]
pub struct MatchResult<'a> {
    pub record: &'a PersonRecord,
    pub score: u32,
    pub explanation: String,
    pub highlighted_attributes: Vec<String>,
}

/// A tokenized operator query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub tokens: Vec<String>,
    gender: Option<&'static str>,
    age: Option<&'static str>,
    clothing: Vec<&'static str>,
    colors: Vec<&'static str>,
}

impl Query {
    pub fn parse(text: &str) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        for raw in text.to_lowercase().split_whitespace() {
            let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
            if token.chars().count() < MIN_TOKEN_CHARS || tokens.iter().any(|t| t == token) {
                continue;
            }
            tokens.push(token.to_string());
        }
        let gender = tokens.iter().find_map(|t| canonical(GENDER_TERMS, t));
        let age = tokens.iter().find_map(|t| canonical(AGE_TERMS, t));
        let clothing = keywords_in(CLOTHING_KEYWORDS, &tokens);
        let colors = keywords_in(COLOR_KEYWORDS, &tokens);
        Self {
            tokens,
            gender,
            age,
            clothing,
            colors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn canonical(terms: &[(&'static str, &'static str)], word: &str) -> Option<&'static str> {
    terms
        .iter()
        .find(|(term, _)| *term == word)
        .map(|(_, canonical)| *canonical)
}

fn keywords_in(keywords: &[&'static str], tokens: &[String]) -> Vec<&'static str> {
    keywords
        .iter()
        .copied()
        .filter(|k| tokens.iter().any(|t| t == k))
        .collect()
}

fn is_clothing_key(key: &str) -> bool {
    let wearable = key.contains("clothing")
        || key.contains("footwear")
        || key.contains("headwear")
        || key == "accessories";
    wearable && !is_color_key(key) && !key.ends_with("pattern") && !key.ends_with("patterns")
}

fn is_color_key(key: &str) -> bool {
    key.ends_with("color")
        || key.ends_with("colors")
        || key.ends_with("colour")
        || key.ends_with("colours")
}

fn highlight(highlighted: &mut Vec<String>, key: &str) {
    if !highlighted.iter().any(|h| h == key) {
        highlighted.push(key.to_string());
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        Value::Null => String::new(),
        other => other.to_string().to_lowercase(),
    }
}

/// Score one record; returns the clamped score and highlighted attributes.
pub fn score_record(query: &Query, record: &PersonRecord) -> (u32, Vec<String>) {
    let mut score: u32 = 0;
    let mut highlighted = Vec::new();

    let descriptor_text = serde_json::to_string(&record.descriptor)
        .unwrap_or_default()
        .to_lowercase();
    let metadata = serde_json::to_value(&record.metadata).unwrap_or(Value::Null);
    let metadata_text = metadata.to_string().to_lowercase();
    let attributes: Vec<(&String, String)> = record
        .descriptor
        .iter()
        .map(|(key, value)| (key, value.to_match_text()))
        .collect();

    for token in &query.tokens {
        if descriptor_text.contains(token.as_str()) {
            score += DESCRIPTOR_TOKEN_HIT;
            for (key, value) in &attributes {
                if key.contains(token.as_str()) || value.contains(token.as_str()) {
                    score += ATTRIBUTE_TOKEN_HIT;
                    highlight(&mut highlighted, key);
                }
            }
        }
        if metadata_text.contains(token.as_str()) {
            score += METADATA_TOKEN_HIT;
            if let Value::Object(fields) = &metadata {
                for (key, value) in fields {
                    if key.contains(token.as_str()) || scalar_text(value).contains(token.as_str()) {
                        score += METADATA_FIELD_HIT;
                    }
                }
            }
        }
    }

    if let (Some(wanted), Some(gender)) = (query.gender, record.descriptor.text(GENDER)) {
        if canonical(GENDER_TERMS, gender.trim()) == Some(wanted) {
            score += BONUS;
            highlight(&mut highlighted, GENDER);
        }
    }

    if let (Some(wanted), Some(age)) = (query.age, record.descriptor.text(AGE_GROUP)) {
        if canonical(AGE_TERMS, age.trim()) == Some(wanted) {
            score += BONUS;
            highlight(&mut highlighted, AGE_GROUP);
        }
    }

    for keyword in &query.clothing {
        let mut hit = false;
        for (key, value) in &attributes {
            if is_clothing_key(key) && value.contains(keyword) {
                hit = true;
                highlight(&mut highlighted, key);
            }
        }
        if hit {
            score += BONUS;
        }
    }

    for color in &query.colors {
        let mut hit = false;
        for (key, value) in &attributes {
            if is_color_key(key) && value.contains(color) {
                hit = true;
                highlight(&mut highlighted, key);
            }
        }
        if hit {
            score += BONUS;
        }
    }

    (score.min(MAX_SCORE), highlighted)
}

pub fn explain(score: u32, highlighted: &[String]) -> String {
    let strength = if score > 50 {
        "Strong match"
    } else if score > 20 {
        "Moderate match"
    } else {
        "Weak match"
    };
    if highlighted.is_empty() {
        format!("{} on sighting details", strength)
    } else {
        format!("{} on {}", strength, highlighted.join(", "))
    }
}

/// Rank `records` against `query`: best first, at most `MAX_RESULTS`.
pub fn rank<'a>(query: &str, records: &'a [PersonRecord]) -> Vec<MatchResult<'a>> {
    let query = Query::parse(query);
    if query.is_empty() {
        return Vec::new();
    }
    let mut results: Vec<MatchResult<'a>> = records
        .iter()
        .filter_map(|record| {
            let (score, highlighted_attributes) = score_record(&query, record);
            if score == 0 {
                return None;
            }
            Some(MatchResult {
                record,
                score,
                explanation: explain(score, &highlighted_attributes),
                highlighted_attributes,
            })
        })
        .collect();
    // `sort_by` is stable: equal scores keep store order.
    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.truncate(MAX_RESULTS);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::{PersonDescriptor, PersonMetadata};

    fn record(id: &str, pairs: &[(&str, &str)]) -> PersonRecord {
        let mut descriptor = PersonDescriptor::new();
        for (k, v) in pairs {
            descriptor.insert_text(k, v);
        }
        PersonRecord {
            id: id.to_string(),
            descriptor,
            metadata: PersonMetadata::new("cam-1", 1_700_000_000_000),
            crop: None,
        }
    }

    #[test]
    fn tokens_are_lowercased_deduped_and_short_ones_dropped() {
        let query = Query::parse("A Man in a RED red jacket, ok?");
        assert_eq!(query.tokens, vec!["man", "red", "jacket"]);
    }

    #[test]
    fn scenario_man_red_jacket() {
        let records = vec![
            record(
                "p1",
                &[
                    ("gender", "male"),
                    ("clothing_top", "jacket"),
                    ("clothing_top_color", "red"),
                ],
            ),
            record("p2", &[("gender", "female"), ("clothing_top", "dress")]),
        ];
        let results = rank("man red jacket", &records);
        assert_eq!(results.len(), 1);
        let best = &results[0];
        assert_eq!(best.record.id, "p1");
        assert_eq!(best.score, 90);
        for attr in ["gender", "clothing_top", "clothing_top_color"] {
            assert!(best.highlighted_attributes.iter().any(|h| h == attr), "{}", attr);
        }
        assert!(best.explanation.starts_with("Strong match"));
    }

    #[test]
    fn woman_does_not_match_man() {
        let records = vec![record("p1", &[("gender", "male")])];
        assert!(rank("woman", &records).is_empty());
    }

    #[test]
    fn never_more_than_five_and_ties_keep_order() {
        let records: Vec<_> = (0..8)
            .map(|i| record(&format!("p{}", i), &[("hair_color", "black")]))
            .collect();
        let results = rank("black", &records);
        assert_eq!(results.len(), MAX_RESULTS);
        let ids: Vec<_> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
        assert!(results.iter().all(|r| r.score > 0));
    }

    #[test]
    fn score_grows_with_more_matching_attributes() {
        let one = record("a", &[("clothing_top", "hoodie")]);
        let two = record("b", &[("clothing_top", "hoodie"), ("clothing_top_color", "green")]);
        let query = Query::parse("green hoodie");
        let (low, _) = score_record(&query, &one);
        let (high, _) = score_record(&query, &two);
        assert!(high > low);
    }

    #[test]
    fn score_is_clamped() {
        let r = record(
            "p",
            &[
                ("gender", "female"),
                ("age_group", "adult"),
                ("clothing_top", "blue jacket"),
                ("clothing_top_color", "blue"),
                ("clothing_bottom", "blue jeans"),
                ("clothing_bottom_color", "blue"),
            ],
        );
        let (score, _) = score_record(&Query::parse("adult woman blue jacket jeans"), &r);
        assert_eq!(score, MAX_SCORE);
    }

    #[test]
    fn metadata_matches_count_without_highlight() {
        let r = record("p", &[("gender", "male")]);
        let records = [r];
        let results = rank("cam-1", &records);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, METADATA_TOKEN_HIT + METADATA_FIELD_HIT);
        assert!(results[0].highlighted_attributes.is_empty());
        assert_eq!(results[0].explanation, "Weak match on sighting details");
    }

    #[test]
    fn plural_color_and_pattern_keys_are_not_clothing() {
        assert!(is_clothing_key("clothing_top"));
        assert!(!is_clothing_key("clothing_top_colors"));
        assert!(!is_clothing_key("clothing_bottom_patterns"));

        let r = record("p", &[("clothing_top_colors", "red jacket trim")]);
        let (score, highlighted) = score_record(&Query::parse("jacket"), &r);
        assert_eq!(score, DESCRIPTOR_TOKEN_HIT + ATTRIBUTE_TOKEN_HIT);
        assert_eq!(highlighted, vec!["clothing_top_colors".to_string()]);
    }

    #[test]
    fn explanation_thresholds() {
        assert!(explain(51, &[]).starts_with("Strong"));
        assert!(explain(50, &[]).starts_with("Moderate"));
        assert!(explain(21, &[]).starts_with("Moderate"));
        assert!(explain(20, &["gender".into()]).starts_with("Weak match on gender"));
    }
}
