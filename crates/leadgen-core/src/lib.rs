//! Core domain model, agency classifier, and lead scorer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadgen-core";

/// Score cutoff above which a listing becomes a persisted lead.
pub const QUALIFICATION_THRESHOLD: u8 = 40;

pub const MAX_PAGES_LIMIT: u32 = 20;
pub const DEFAULT_MAX_PAGES: u32 = 3;

/// Agency-indicating keywords and known agency brand names. Matched as
/// case-insensitive substrings with no word-boundary check; a company named
/// "Staffingworks Analytics" matches "staffing" and is treated as an agency.
const AGENCY_KEYWORDS: &[&str] = &[
    "recruitment",
    "recruiting",
    "recruiter",
    "staffing",
    "headhunter",
    "head hunter",
    "talent acquisition",
    "talent solutions",
    "talent partners",
    "personnel",
    "manpower",
    "employment agency",
    "search partners",
    "adecco",
    "hays",
    "randstad",
    "robert half",
    "michael page",
    "kelly services",
];

const SENIORITY_KEYWORDS: &[&str] = &["senior", "lead", "manager", "director", "head of"];

/// Case-insensitive substring match against the fixed agency keyword list.
pub fn is_agency(company_name: &str) -> bool {
    let lowered = company_name.to_lowercase();
    AGENCY_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn title_has_seniority_keyword(title: &str) -> bool {
    let lowered = title.to_lowercase();
    SENIORITY_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Additive scoring heuristic over a listing plus whatever enrichment detail
/// was recovered for it. Always lands in [0, 100].
pub fn score_listing(listing: &RawListing, detail: &ListingDetail, company_is_agency: bool) -> u8 {
    let mut score: i32 = 50;

    if company_is_agency {
        score -= 20;
    } else {
        score += 30;
    }

    let contact = detail.contact.as_ref();
    if contact.is_some_and(|c| c.full_name.is_some() || c.first_name.is_some()) {
        score += 15;
    }
    if contact.is_some_and(|c| c.email.is_some()) {
        score += 20;
    }
    if listing.salary.is_some() {
        score += 10;
    }
    if detail.description.as_deref().is_some_and(|d| d.len() > 200) {
        score += 5;
    }
    if title_has_seniority_keyword(&listing.title) {
        score += 10;
    }

    score.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceTier {
    Entry,
    Mid,
    Senior,
}

/// Immutable search input a job is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpecification {
    pub keywords: String,
    pub location: String,
    #[serde(default)]
    pub experience_tier: Option<ExperienceTier>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub company_size: Option<String>,
    #[serde(default = "default_exclude_agencies")]
    pub exclude_agencies: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_exclude_agencies() -> bool {
    true
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecValidationError {
    #[error("keywords must be a non-empty string")]
    EmptyKeywords,
    #[error("location must be a non-empty string")]
    EmptyLocation,
    #[error("max_pages must be between 1 and {MAX_PAGES_LIMIT}, got {0}")]
    MaxPagesOutOfRange(u32),
}

impl SearchSpecification {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.keywords.trim().is_empty() {
            return Err(SpecValidationError::EmptyKeywords);
        }
        if self.location.trim().is_empty() {
            return Err(SpecValidationError::EmptyLocation);
        }
        if self.max_pages < 1 || self.max_pages > MAX_PAGES_LIMIT {
            return Err(SpecValidationError::MaxPagesOutOfRange(self.max_pages));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Cancellation is only allowed before a terminal state is reached.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

/// One queued scraping run, created pending and mutated only by the
/// orchestrator until it reaches a terminal state exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub spec: SearchSpecification,
    pub total_listings_found: u32,
    pub leads_generated: u32,
    pub progress: u8,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new_pending(spec: SearchSpecification) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            spec,
            total_listings_found: 0,
            leads_generated: 0,
            progress: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Company row, keyed by exact name as first seen. Two postings with
/// differently-formatted names for the same real company create two rows;
/// that fidelity gap is deliberate and not silently normalized away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub is_recruitment_agency: bool,
    pub is_blacklisted: bool,
    pub created_at: DateTime<Utc>,
}

impl Company {
    /// The agency flag is a pure function of the name at first sight and is
    /// never recomputed afterwards.
    pub fn from_first_sighting(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            is_recruitment_agency: is_agency(&name),
            is_blacklisted: false,
            name,
            created_at: Utc::now(),
        }
    }
}

/// Hiring-contact fields recovered from a listing's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiringContact {
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub profile_url: Option<String>,
}

/// One scraped posting as yielded by a search-results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub url: String,
    pub salary: Option<String>,
}

/// Enrichment fields fetched from a listing's own page. Both fields stay
/// empty when the detail fetch fails; the listing is still scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDetail {
    pub description: Option<String>,
    pub contact: Option<HiringContact>,
}

/// A persisted, qualifying listing with its score frozen at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub job_id: Uuid,
    pub company_id: Option<Uuid>,
    pub contact_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact_title: Option<String>,
    pub contact_email: Option<String>,
    pub profile_url: Option<String>,
    pub job_title: String,
    pub job_url: String,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub description: Option<String>,
    pub lead_score: u8,
    pub is_qualified: bool,
    pub exported_to_sheets: bool,
    pub exported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn from_scored_listing(
        job_id: Uuid,
        company_id: Option<Uuid>,
        listing: &RawListing,
        detail: &ListingDetail,
        score: u8,
    ) -> Self {
        let contact = detail.contact.clone().unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            job_id,
            company_id,
            contact_name: contact.full_name,
            first_name: contact.first_name,
            last_name: contact.last_name,
            contact_title: contact.title,
            contact_email: contact.email,
            profile_url: contact.profile_url,
            job_title: listing.title.clone(),
            job_url: listing.url.clone(),
            company_name: Some(listing.company_name.clone()),
            location: Some(listing.location.clone()),
            salary_range: listing.salary.clone(),
            description: detail.description.clone(),
            lead_score: score,
            is_qualified: score > QUALIFICATION_THRESHOLD,
            exported_to_sheets: false,
            exported_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportOutcome {
    Success,
    Failed,
}

/// Append-only record of one export attempt for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub outcome: ExportOutcome,
    pub sheet_id: Option<String>,
    pub rows_exported: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExportLog {
    pub fn success(job_id: Uuid, sheet_id: String, rows_exported: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            outcome: ExportOutcome::Success,
            sheet_id: Some(sheet_id),
            rows_exported,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(job_id: Uuid, sheet_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            outcome: ExportOutcome::Failed,
            sheet_id,
            rows_exported: 0,
            error_message: Some(error.into()),
            created_at: Utc::now(),
        }
    }
}
