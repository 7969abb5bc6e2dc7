//! Bibliographic record model.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Publication type of a record.
///
/// Only the types the store distinguishes get a variant; everything else
/// collapses into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceType {
    JournalArticle,
    ProceedingsArticle,
    BookChapter,
    #[default]
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::JournalArticle => "journal-article",
            SourceType::ProceedingsArticle => "proceedings-article",
            SourceType::BookChapter => "book-chapter",
            SourceType::Other => "other",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "journal-article" => SourceType::JournalArticle,
            "proceedings-article" => SourceType::ProceedingsArticle,
            "book-chapter" => SourceType::BookChapter,
            _ => SourceType::Other,
        })
    }
}

impl Serialize for SourceType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let Ok(source_type) = s.parse::<SourceType>();
        Ok(source_type)
    }
}

/// A publication date where only the year is mandatory.
///
/// Field order matters: the derived `Ord` compares year, then month, then day,
/// with a missing component sorting below any present one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    pub fn with_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self
    }

    pub fn with_day(mut self, day: u32) -> Self {
        self.day = Some(day);
        self
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{month:02}")?;
            if let Some(day) = self.day {
                write!(f, "-{day:02}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub given: Option<String>,
    pub family: Option<String>,
    #[serde(default)]
    pub affiliations: Vec<String>,
}

impl Author {
    /// "Family, Given", or whichever half exists.
    pub fn display_name(&self) -> Option<String> {
        match (&self.family, &self.given) {
            (Some(family), Some(given)) => Some(format!("{family}, {given}")),
            (Some(family), None) => Some(family.clone()),
            (None, Some(given)) => Some(given.clone()),
            (None, None) => None,
        }
    }
}

/// Flattened projection of one raw dump item.
///
/// The same shape is used for the canonical row once a record has won the
/// merge for its DOI, see [`CanonicalRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub doi: String,
    pub title: Option<String>,
    pub authors: Vec<Author>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// SHA-256 of `abstract_text`; present exactly when the abstract is.
    pub abstract_hash: Option<String>,
    pub published: Option<PartialDate>,
    pub source_type: SourceType,
    pub container_title: Option<String>,
    pub publisher: Option<String>,
    pub url: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub language: Option<String>,
    pub reference_count: Option<i64>,
    pub cited_by_count: Option<i64>,
    /// Fingerprint of the canonicalized raw item.
    pub raw_hash: String,
}

/// The persisted, deduplicated version of a record: one per DOI.
pub type CanonicalRecord = CandidateRecord;

impl CandidateRecord {
    /// Number of optional fields carrying a value.
    pub fn populated_fields(&self) -> usize {
        [
            self.title.is_some(),
            !self.authors.is_empty(),
            self.abstract_text.is_some(),
            self.published.is_some(),
            self.container_title.is_some(),
            self.publisher.is_some(),
            self.url.is_some(),
            self.volume.is_some(),
            self.issue.is_some(),
            self.language.is_some(),
            self.reference_count.is_some(),
            self.cited_by_count.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    pub fn first_author(&self) -> Option<String> {
        self.authors.first().and_then(Author::display_name)
    }

    pub fn short_id(&self) -> String {
        short_id(&self.doi)
    }
}

/// First ten hex characters of SHA-256(doi); stable across runs.
pub fn short_id(doi: &str) -> String {
    let hash = Sha256::digest(doi.as_bytes());
    hex::encode(&hash[..5])
}

/// Why a raw item did not become a candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No usable DOI at any known path.
    MissingDoi,
    /// The item is valid JSON but not an object.
    NotAnObject,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingDoi => write!(f, "missing DOI"),
            Rejection::NotAnObject => write!(f, "item is not a JSON object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_date_ordering() {
        let y2020 = PartialDate::year(2020);
        let y2021 = PartialDate::year(2021);
        let may2021 = PartialDate::year(2021).with_month(5);
        let may3_2021 = may2021.with_day(3);

        assert!(y2021 > y2020);
        assert!(may2021 > y2021);
        assert!(may3_2021 > may2021);
        assert!(Some(y2020) > None);
    }

    #[test]
    fn test_partial_date_display() {
        assert_eq!(PartialDate::year(2021).to_string(), "2021");
        assert_eq!(PartialDate::year(2021).with_month(5).to_string(), "2021-05");
        assert_eq!(
            PartialDate::year(2021).with_month(5).with_day(3).to_string(),
            "2021-05-03"
        );
    }

    #[test]
    fn test_source_type_roundtrip() {
        assert_eq!(
            "journal-article".parse::<SourceType>().unwrap(),
            SourceType::JournalArticle
        );
        assert_eq!(
            "Book-Chapter".parse::<SourceType>().unwrap(),
            SourceType::BookChapter
        );
        assert_eq!("dataset".parse::<SourceType>().unwrap(), SourceType::Other);
        assert_eq!(
            serde_json::to_string(&SourceType::ProceedingsArticle).unwrap(),
            "\"proceedings-article\""
        );
    }

    #[test]
    fn test_populated_fields() {
        let mut record = CandidateRecord {
            doi: "10.1/x".into(),
            raw_hash: "aa".into(),
            ..Default::default()
        };
        assert_eq!(record.populated_fields(), 0);

        record.title = Some("T".into());
        record.published = Some(PartialDate::year(2020));
        record.authors.push(Author {
            family: Some("Curie".into()),
            ..Default::default()
        });
        assert_eq!(record.populated_fields(), 3);
    }

    #[test]
    fn test_first_author_and_short_id() {
        let record = CandidateRecord {
            doi: "10.1/x".into(),
            authors: vec![Author {
                given: Some("Marie".into()),
                family: Some("Curie".into()),
                affiliations: vec![],
            }],
            ..Default::default()
        };
        assert_eq!(record.first_author().as_deref(), Some("Curie, Marie"));
        assert_eq!(record.short_id().len(), 10);
        assert_eq!(record.short_id(), short_id("10.1/x"));
    }
}
