//! Flattens raw dump items into [`CandidateRecord`]s.
//!
//! Every field is read through an ordered list of rules. A rule names a JSON
//! pointer and a typed reader; the first rule whose path exists and whose
//! reader accepts the value wins, so a malformed value at a preferred path
//! falls through to the next one.

use chrono::NaiveDate;
use serde_json::Value;

use crate::models::{Author, CandidateRecord, PartialDate, Rejection, SourceType};
use crate::utils::{calculate_checksum, clean_abstract, clean_inline, collapse_whitespace, fingerprint};

pub const MIN_YEAR: i64 = 1000;
pub const MAX_YEAR: i64 = 2100;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

/// One extraction rule: where to look and how to read what is there.
struct Rule<T> {
    path: &'static str,
    read: fn(&Value) -> Option<T>,
}

const fn rule<T>(path: &'static str, read: fn(&Value) -> Option<T>) -> Rule<T> {
    Rule { path, read }
}

const DOI_RULES: &[Rule<String>] = &[rule("/DOI", read_doi), rule("/doi", read_doi)];

const TITLE_RULES: &[Rule<String>] = &[
    rule("/title", read_text),
    rule("/short-title", read_text),
    rule("/original-title", read_text),
    rule("/subtitle", read_text),
];

const AUTHOR_RULES: &[Rule<Vec<Author>>] = &[rule("/author", read_authors)];

const ABSTRACT_RULES: &[Rule<String>] = &[rule("/abstract", read_abstract)];

const DATE_RULES: &[Rule<PartialDate>] = &[
    rule("/published", read_date),
    rule("/published-print", read_date),
    rule("/published-online", read_date),
    rule("/issued", read_date),
    rule("/created", read_date),
];

const TYPE_RULES: &[Rule<SourceType>] = &[rule("/type", read_source_type)];

const CONTAINER_RULES: &[Rule<String>] = &[
    rule("/container-title", read_text),
    rule("/short-container-title", read_text),
];

const PUBLISHER_RULES: &[Rule<String>] = &[rule("/publisher", read_text)];

const URL_RULES: &[Rule<String>] = &[
    rule("/URL", read_token),
    rule("/url", read_token),
    rule("/resource/primary/URL", read_token),
];

const VOLUME_RULES: &[Rule<String>] = &[rule("/volume", read_token)];

const ISSUE_RULES: &[Rule<String>] = &[
    rule("/journal-issue/issue", read_token),
    rule("/issue", read_token),
];

const LANGUAGE_RULES: &[Rule<String>] = &[rule("/language", read_token)];

const REFERENCE_COUNT_RULES: &[Rule<i64>] = &[
    rule("/reference-count", read_count),
    rule("/references-count", read_count),
];

const CITED_BY_RULES: &[Rule<i64>] = &[rule("/is-referenced-by-count", read_count)];

fn first_match<T>(item: &Value, rules: &[Rule<T>]) -> Option<T> {
    rules
        .iter()
        .find_map(|rule| item.pointer(rule.path).and_then(rule.read))
}

/// Map one raw item to a candidate record.
pub fn normalize(item: &Value) -> Result<CandidateRecord, Rejection> {
    if !item.is_object() {
        return Err(Rejection::NotAnObject);
    }

    let doi = first_match(item, DOI_RULES).ok_or(Rejection::MissingDoi)?;
    let abstract_text = first_match(item, ABSTRACT_RULES);
    let abstract_hash = abstract_text.as_deref().map(calculate_checksum);

    Ok(CandidateRecord {
        doi,
        title: first_match(item, TITLE_RULES),
        authors: first_match(item, AUTHOR_RULES).unwrap_or_default(),
        abstract_text,
        abstract_hash,
        published: first_match(item, DATE_RULES),
        source_type: first_match(item, TYPE_RULES).unwrap_or_default(),
        container_title: first_match(item, CONTAINER_RULES),
        publisher: first_match(item, PUBLISHER_RULES),
        url: first_match(item, URL_RULES),
        volume: first_match(item, VOLUME_RULES),
        issue: first_match(item, ISSUE_RULES),
        language: first_match(item, LANGUAGE_RULES),
        reference_count: first_match(item, REFERENCE_COUNT_RULES),
        cited_by_count: first_match(item, CITED_BY_RULES),
        raw_hash: fingerprint(item),
    })
}

/// Lower-case, trim and strip resolver prefixes; `None` when nothing is left.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    while let Some(prefix) = DOI_PREFIXES.iter().find(|p| doi.starts_with(**p)) {
        doi = doi[prefix.len()..].trim_start().to_string();
    }
    let doi = doi.trim();
    (!doi.is_empty()).then(|| doi.to_string())
}

fn read_doi(value: &Value) -> Option<String> {
    value.as_str().and_then(normalize_doi)
}

/// A string, or the first non-empty string of an array, cleaned of markup.
fn read_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_inline(s),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .find_map(clean_inline),
        _ => None,
    }
}

fn read_abstract(value: &Value) -> Option<String> {
    value.as_str().and_then(clean_abstract)
}

/// A short identifier-like value; numbers are accepted and rendered as text.
fn read_token(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => collapse_whitespace(s),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn read_count(value: &Value) -> Option<i64> {
    let count = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (count >= 0).then_some(count)
}

fn read_source_type(value: &Value) -> Option<SourceType> {
    let Ok(source_type) = value.as_str()?.parse::<SourceType>();
    Some(source_type)
}

fn read_authors(value: &Value) -> Option<Vec<Author>> {
    let entries = value.as_array()?;
    Some(entries.iter().filter_map(read_author).collect())
}

fn read_author(entry: &Value) -> Option<Author> {
    let name_part = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .and_then(clean_inline)
    };

    let given = name_part("given");
    let family = name_part("family").or_else(|| name_part("name"));
    if given.is_none() && family.is_none() {
        return None;
    }

    let affiliations: Vec<String> = entry
        .get("affiliation")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .filter_map(clean_inline)
                .collect()
        })
        .unwrap_or_default();

    Some(Author {
        given,
        family,
        affiliations,
    })
}

/// Read `date-parts[0]`. An unusable year makes the whole date absent; an
/// unusable month drops month and day; an impossible day drops the day.
fn read_date(value: &Value) -> Option<PartialDate> {
    let parts = value.pointer("/date-parts/0")?.as_array()?;

    let year = parts.first().and_then(date_component)?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    let year = year as i32;
    let mut date = PartialDate::year(year);

    let Some(month) = parts
        .get(1)
        .and_then(date_component)
        .filter(|m| (1..=12).contains(m))
    else {
        return Some(date);
    };
    let month = month as u32;
    date = date.with_month(month);

    let day = parts
        .get(2)
        .and_then(date_component)
        .and_then(|d| u32::try_from(d).ok())
        .filter(|d| NaiveDate::from_ymd_opt(year, month, *d).is_some());
    if let Some(day) = day {
        date = date.with_day(day);
    }
    Some(date)
}

fn date_component(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_full_item() {
        let item = json!({
            "DOI": " HTTPS://DOI.ORG/10.1000/ABC.1 ",
            "title": ["", "Rising <i>seas</i>\n and  cities"],
            "author": [
                {"given": "Ada", "family": "Lovelace", "affiliation": [{"name": "Analytical Society"}, {}]},
                {"name": "IPCC Working Group II"},
                {"affiliation": [{"name": "Nobody"}]}
            ],
            "abstract": "<jats:title>Abstract</jats:title><jats:p>Seas rise &amp; cities adapt.</jats:p>",
            "published": {"date-parts": [[2021, 5, 3]]},
            "type": "journal-article",
            "container-title": ["Climatic Change"],
            "publisher": "Springer",
            "URL": "http://dx.doi.org/10.1000/abc.1",
            "volume": 164,
            "journal-issue": {"issue": "3-4"},
            "language": "en",
            "reference-count": 42,
            "is-referenced-by-count": "7"
        });

        let record = normalize(&item).unwrap();
        assert_eq!(record.doi, "10.1000/abc.1");
        assert_eq!(record.title.as_deref(), Some("Rising seas and cities"));
        assert_eq!(record.authors.len(), 2);
        assert_eq!(record.authors[0].affiliations, vec!["Analytical Society"]);
        assert_eq!(record.authors[1].family.as_deref(), Some("IPCC Working Group II"));
        assert_eq!(record.abstract_text.as_deref(), Some("Seas rise & cities adapt."));
        assert_eq!(
            record.abstract_hash.as_deref(),
            Some(calculate_checksum("Seas rise & cities adapt.").as_str())
        );
        assert_eq!(
            record.published,
            Some(PartialDate::year(2021).with_month(5).with_day(3))
        );
        assert_eq!(record.source_type, SourceType::JournalArticle);
        assert_eq!(record.container_title.as_deref(), Some("Climatic Change"));
        assert_eq!(record.volume.as_deref(), Some("164"));
        assert_eq!(record.issue.as_deref(), Some("3-4"));
        assert_eq!(record.reference_count, Some(42));
        assert_eq!(record.cited_by_count, Some(7));
        assert_eq!(record.raw_hash.len(), 64);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(normalize(&json!([1, 2])), Err(Rejection::NotAnObject));
        assert_eq!(normalize(&json!({"title": "x"})), Err(Rejection::MissingDoi));
        assert_eq!(normalize(&json!({"DOI": "  "})), Err(Rejection::MissingDoi));
        assert_eq!(normalize(&json!({"DOI": "doi:"})), Err(Rejection::MissingDoi));
        assert_eq!(normalize(&json!({"DOI": 10})), Err(Rejection::MissingDoi));
    }

    #[test]
    fn test_doi_fallback_path() {
        let record = normalize(&json!({"doi": "doi:10.5/Q"})).unwrap();
        assert_eq!(record.doi, "10.5/q");
        assert_eq!(record.source_type, SourceType::Other);
        assert!(record.authors.is_empty());
        assert!(record.abstract_hash.is_none());
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("10.1/X").as_deref(), Some("10.1/x"));
        assert_eq!(normalize_doi("https://dx.doi.org/10.1/x").as_deref(), Some("10.1/x"));
        assert_eq!(normalize_doi("DOI: 10.1/x").as_deref(), Some("10.1/x"));
        assert_eq!(normalize_doi("https://doi.org/"), None);
    }

    #[test]
    fn test_title_priority() {
        let record = normalize(&json!({
            "DOI": "10.1/x",
            "title": [],
            "short-title": [" "],
            "original-title": ["Titre"],
            "subtitle": ["Sub"]
        }))
        .unwrap();
        assert_eq!(record.title.as_deref(), Some("Titre"));
    }

    #[test]
    fn test_date_rules() {
        let date = |value: Value| read_date(&json!({"date-parts": [value]}));

        assert_eq!(date(json!([2020])), Some(PartialDate::year(2020)));
        assert_eq!(
            date(json!(["2019", "02", "28"])),
            Some(PartialDate::year(2019).with_month(2).with_day(28))
        );
        assert_eq!(date(json!([2019, 2, 30])), Some(PartialDate::year(2019).with_month(2)));
        assert_eq!(date(json!([2019, 13, 1])), Some(PartialDate::year(2019)));
        assert_eq!(date(json!([999, 1, 1])), None);
        assert_eq!(date(json!(["soon"])), None);
        assert_eq!(date(json!([null])), None);
    }

    #[test]
    fn test_invalid_preferred_date_falls_through() {
        let record = normalize(&json!({
            "DOI": "10.1/x",
            "published": {"date-parts": [[3000]]},
            "issued": {"date-parts": [[2018, 7]]},
            "created": {"date-parts": [[2017, 1, 1]]}
        }))
        .unwrap();
        assert_eq!(record.published, Some(PartialDate::year(2018).with_month(7)));
    }

    #[test]
    fn test_raw_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"DOI":"10.1/x","type":"book-chapter"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"type":"book-chapter","DOI":"10.1/x"}"#).unwrap();
        assert_eq!(normalize(&a).unwrap().raw_hash, normalize(&b).unwrap().raw_hash);
    }
}
