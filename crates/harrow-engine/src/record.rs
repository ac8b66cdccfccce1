//! Typed output records.
//!
//! Every record carries `linkedin_url`, its identity. Optional attributes are
//! `Option`s, list attributes are always present (possibly empty).

use harrow_core::EntityKind;
use serde::{Deserialize, Serialize};

/// A position on a person profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub position_title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub description: Option<String>,
}

/// An education entry on a person profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub institution: String,
    pub degree: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

/// Person profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub linkedin_url: String,
    pub name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub about: Option<String>,
    pub connections: Option<u64>,
    pub experiences: Vec<Experience>,
    pub educations: Vec<Education>,
    pub skills: Vec<String>,
}

/// Company page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub linkedin_url: String,
    pub name: String,
    pub about_us: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub headquarters: Option<String>,
    pub founded: Option<String>,
    pub industry: Option<String>,
    pub company_type: Option<String>,
    pub company_size: Option<String>,
    pub specialties: Vec<String>,
    pub follower_count: Option<u64>,
}

/// Job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub linkedin_url: String,
    pub job_title: String,
    pub company: Option<String>,
    pub company_url: Option<String>,
    pub location: Option<String>,
    pub posted_date: Option<String>,
    pub applicant_count: Option<u64>,
    pub employment_type: Option<String>,
    pub description: Option<String>,
}

/// Social post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub linkedin_url: String,
    pub author: Option<String>,
    pub text: Option<String>,
    pub posted_date: Option<String>,
    pub reactions_count: Option<u64>,
    pub comments_count: Option<u64>,
    pub reposts_count: Option<u64>,
    pub image_urls: Vec<String>,
}

/// Any record the engine produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum TypedRecord {
    Person(PersonRecord),
    Company(CompanyRecord),
    Job(JobRecord),
    Post(PostRecord),
}

impl TypedRecord {
    /// Record type.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Person(_) => EntityKind::Person,
            Self::Company(_) => EntityKind::Company,
            Self::Job(_) => EntityKind::Job,
            Self::Post(_) => EntityKind::Post,
        }
    }

    /// Identity URL.
    #[must_use]
    pub fn linkedin_url(&self) -> &str {
        match self {
            Self::Person(r) => &r.linkedin_url,
            Self::Company(r) => &r.linkedin_url,
            Self::Job(r) => &r.linkedin_url,
            Self::Post(r) => &r.linkedin_url,
        }
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
