//! Raw field maps to typed records.
//!
//! Only a missing required field fails a record. Everything else degrades:
//! text is trimmed and blank text counts as absent, unparsable numbers become
//! `None`, and list fields default to empty. Nested entries (experiences,
//! educations) missing their own required field are dropped from the list.

use crate::record::{
    CompanyRecord, Education, Experience, JobRecord, PersonRecord, PostRecord, TypedRecord,
};
use crate::strategy::{RawFieldMap, RawValue};
use harrow_core::{EntityKind, Result, ScrapeError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Builds [`TypedRecord`]s from [`RawFieldMap`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultValidator;

impl ResultValidator {
    /// Fields that must be present for `kind`.
    #[must_use]
    pub fn required_fields(kind: EntityKind) -> &'static [&'static str] {
        match kind {
            EntityKind::Person => &["linkedin_url", "name"],
            EntityKind::Company => &["linkedin_url", "name"],
            EntityKind::Job => &["linkedin_url", "job_title"],
            EntityKind::Post => &["linkedin_url"],
        }
    }

    /// Build the `kind` record from `raw`.
    pub fn validate(kind: EntityKind, raw: &RawFieldMap) -> Result<TypedRecord> {
        let r = FieldReader::new(kind, raw);
        let record = match kind {
            EntityKind::Person => TypedRecord::Person(PersonRecord {
                linkedin_url: r.required("linkedin_url")?,
                name: r.required("name")?,
                headline: r.text("headline"),
                location: r.text("location"),
                about: r.text("about"),
                connections: r.count("connections"),
                experiences: r.nested("experiences", |e| {
                    Ok(Experience {
                        position_title: e.required("position_title")?,
                        company: e.text("company"),
                        location: e.text("location"),
                        from_date: e.text("from_date"),
                        to_date: e.text("to_date"),
                        description: e.text("description"),
                    })
                }),
                educations: r.nested("educations", |e| {
                    Ok(Education {
                        institution: e.required("institution")?,
                        degree: e.text("degree"),
                        from_date: e.text("from_date"),
                        to_date: e.text("to_date"),
                    })
                }),
                skills: r.text_list("skills"),
            }),
            EntityKind::Company => TypedRecord::Company(CompanyRecord {
                linkedin_url: r.required("linkedin_url")?,
                name: r.required("name")?,
                about_us: r.text("about_us"),
                website: r.text("website"),
                phone: r.text("phone"),
                headquarters: r.text("headquarters"),
                founded: r.text("founded"),
                industry: r.text("industry"),
                company_type: r.text("company_type"),
                company_size: r.text("company_size"),
                specialties: r.split_list("specialties"),
                follower_count: r.count("follower_count"),
            }),
            EntityKind::Job => TypedRecord::Job(JobRecord {
                linkedin_url: r.required("linkedin_url")?,
                job_title: r.required("job_title")?,
                company: r.text("company"),
                company_url: r.text("company_url"),
                location: r.text("location"),
                posted_date: r.text("posted_date"),
                applicant_count: r.count("applicant_count"),
                employment_type: r.text("employment_type"),
                description: r.text("description"),
            }),
            EntityKind::Post => TypedRecord::Post(PostRecord {
                linkedin_url: r.required("linkedin_url")?,
                author: r.text("author"),
                text: r.text("text"),
                posted_date: r.text("posted_date"),
                reactions_count: r.count("reactions_count"),
                comments_count: r.count("comments_count"),
                reposts_count: r.count("reposts_count"),
                image_urls: r.text_list("image_urls"),
            }),
        };
        Ok(record)
    }
}

/// Coercing reader over one field map.
struct FieldReader<'a> {
    kind: EntityKind,
    raw: &'a RawFieldMap,
}

impl<'a> FieldReader<'a> {
    fn new(kind: EntityKind, raw: &'a RawFieldMap) -> Self {
        Self { kind, raw }
    }

    fn required(&self, name: &str) -> Result<String> {
        self.text(name).ok_or_else(|| ScrapeError::Validation {
            entity: self.kind,
            field: name.to_string(),
        })
    }

    fn text(&self, name: &str) -> Option<String> {
        self.raw.get(name).and_then(scalar_text)
    }

    fn count(&self, name: &str) -> Option<u64> {
        match self.raw.get(name)? {
            RawValue::Number(n) if n.fract() == 0.0 => whole_count(*n),
            RawValue::Text(s) => parse_count(s),
            _ => None,
        }
    }

    fn text_list(&self, name: &str) -> Vec<String> {
        match self.raw.get(name) {
            Some(RawValue::List(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(other) => scalar_text(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Like `text_list`, but a single text value is split on commas.
    fn split_list(&self, name: &str) -> Vec<String> {
        match self.raw.get(name) {
            Some(RawValue::Text(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            _ => self.text_list(name),
        }
    }

    fn nested<T>(&self, name: &str, build: impl Fn(&FieldReader<'_>) -> Result<T>) -> Vec<T> {
        let Some(RawValue::List(items)) = self.raw.get(name) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match item {
                RawValue::Record(map) => {
                    match build(&FieldReader::new(self.kind, map)) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            tracing::debug!("Dropping {} entry: {}", name, e);
                            None
                        }
                    }
                }
                _ => None,
            })
            .collect()
    }
}

fn scalar_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Text(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        RawValue::Number(n) if n.is_finite() => Some(n.to_string()),
        _ => None,
    }
}

static COUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d,.]*)\s*([kmb])?\b").expect("count regex is valid"));

static GROUPED_THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+$").expect("grouping regex is valid"));

/// Parse a human-formatted count: `"1,234 followers"`, `"1.2K"`, `"3M"`, `"500+"`.
#[must_use]
pub fn parse_count(text: &str) -> Option<u64> {
    let caps = COUNT_PATTERN.captures(text)?;
    let digits = caps.get(1)?.as_str().trim_end_matches(['.', ',']);
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(suffix) if suffix == "k" => 1_000.0,
        Some(suffix) if suffix == "m" => 1_000_000.0,
        Some(suffix) if suffix == "b" => 1_000_000_000.0,
        _ => 1.0,
    };

    let normalized = if multiplier == 1.0 && GROUPED_THOUSANDS.is_match(digits) {
        digits.replace('.', "")
    } else {
        digits.replace(',', "")
    };

    let value: f64 = normalized.parse().ok()?;
    if multiplier == 1.0 && value.fract() != 0.0 {
        return None;
    }
    whole_count((value * multiplier).round())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn whole_count(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value <= u64::MAX as f64).then(|| value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::ErrorKind;

    fn raw(pairs: &[(&str, RawValue)]) -> RawFieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_missing_required_field_is_validation_error() {
        for kind in [
            EntityKind::Person,
            EntityKind::Company,
            EntityKind::Job,
            EntityKind::Post,
        ] {
            // Everything required except the last required field
            let required = ResultValidator::required_fields(kind);
            let (missing, present) = required.split_last().unwrap();
            let map: RawFieldMap = present
                .iter()
                .map(|f| ((*f).to_string(), RawValue::text("x")))
                .collect();

            let err = ResultValidator::validate(kind, &map).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(
                err,
                ScrapeError::Validation {
                    entity: kind,
                    field: (*missing).to_string(),
                }
            );
        }
    }

    #[test]
    fn test_only_required_fields_gives_empty_optionals() {
        let map = raw(&[
            ("linkedin_url", RawValue::text("https://www.linkedin.com/in/jane/")),
            ("name", RawValue::text("Jane Doe")),
        ]);
        let TypedRecord::Person(person) = ResultValidator::validate(EntityKind::Person, &map).unwrap()
        else {
            panic!("expected a person record");
        };

        assert_eq!(person.name, "Jane Doe");
        assert_eq!(person.headline, None);
        assert_eq!(person.connections, None);
        assert!(person.experiences.is_empty());
        assert!(person.educations.is_empty());
        assert!(person.skills.is_empty());

        let map = raw(&[("linkedin_url", RawValue::text("https://www.linkedin.com/posts/1"))]);
        let TypedRecord::Post(post) = ResultValidator::validate(EntityKind::Post, &map).unwrap()
        else {
            panic!("expected a post record");
        };
        assert!(post.image_urls.is_empty());
        assert_eq!(post.reactions_count, None);
    }

    #[test]
    fn test_blank_required_text_is_missing() {
        let map = raw(&[
            ("linkedin_url", RawValue::text("https://www.linkedin.com/company/acme/")),
            ("name", RawValue::text("   ")),
        ]);
        let err = ResultValidator::validate(EntityKind::Company, &map).unwrap_err();
        assert!(err.to_string().contains("`name`"));
    }

    #[test]
    fn test_coercion() {
        let map = raw(&[
            ("linkedin_url", RawValue::text(" https://www.linkedin.com/company/acme/ ")),
            ("name", RawValue::text("\n Acme \n")),
            ("follower_count", RawValue::text("12,345 followers")),
            ("specialties", RawValue::text("Anvils, Rockets,  ,Traps")),
            ("founded", RawValue::Number(1949.0)),
            ("industry", RawValue::List(vec![])),
        ]);
        let TypedRecord::Company(company) =
            ResultValidator::validate(EntityKind::Company, &map).unwrap()
        else {
            panic!("expected a company record");
        };

        assert_eq!(company.linkedin_url, "https://www.linkedin.com/company/acme/");
        assert_eq!(company.name, "Acme");
        assert_eq!(company.follower_count, Some(12_345));
        assert_eq!(company.specialties, vec!["Anvils", "Rockets", "Traps"]);
        assert_eq!(company.founded.as_deref(), Some("1949"));
        assert_eq!(company.industry, None);
    }

    #[test]
    fn test_unparsable_optional_number_is_none() {
        let map = raw(&[
            ("linkedin_url", RawValue::text("https://www.linkedin.com/jobs/view/1")),
            ("job_title", RawValue::text("Rust Engineer")),
            ("applicant_count", RawValue::text("Be among the first applicants")),
        ]);
        let TypedRecord::Job(job) = ResultValidator::validate(EntityKind::Job, &map).unwrap() else {
            panic!("expected a job record");
        };
        assert_eq!(job.applicant_count, None);
    }

    #[test]
    fn test_fractional_number_count_is_none() {
        let map = raw(&[
            ("linkedin_url", RawValue::text("https://www.linkedin.com/company/acme/")),
            ("name", RawValue::text("Acme")),
            ("follower_count", RawValue::Number(2.5)),
        ]);
        let TypedRecord::Company(company) =
            ResultValidator::validate(EntityKind::Company, &map).unwrap()
        else {
            panic!("expected a company record");
        };
        assert_eq!(company.follower_count, None);
    }

    #[test]
    fn test_invalid_nested_entries_are_dropped() {
        let good = raw(&[
            ("position_title", RawValue::text("Engineer")),
            ("company", RawValue::text("Acme")),
        ]);
        let bad = raw(&[("company", RawValue::text("Nameless Inc"))]);
        let map = raw(&[
            ("linkedin_url", RawValue::text("https://www.linkedin.com/in/jane/")),
            ("name", RawValue::text("Jane")),
            (
                "experiences",
                RawValue::List(vec![RawValue::Record(good), RawValue::Record(bad)]),
            ),
            (
                "skills",
                RawValue::List(vec![RawValue::text("Rust"), RawValue::text(" ")]),
            ),
        ]);

        let TypedRecord::Person(person) = ResultValidator::validate(EntityKind::Person, &map).unwrap()
        else {
            panic!("expected a person record");
        };
        assert_eq!(person.experiences.len(), 1);
        assert_eq!(person.experiences[0].position_title, "Engineer");
        assert_eq!(person.skills, vec!["Rust"]);
    }

    #[test]
    fn test_parse_count_formats() {
        assert_eq!(parse_count("1,234 followers"), Some(1234));
        assert_eq!(parse_count("1.2K"), Some(1200));
        assert_eq!(parse_count("3M followers"), Some(3_000_000));
        assert_eq!(parse_count("500+ connections"), Some(500));
        assert_eq!(parse_count("1.234 Follower"), Some(1234));
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count("no digits"), None);
        assert_eq!(parse_count("1.5"), None);
        assert_eq!(parse_count("1.5 followers"), None);
    }
}
