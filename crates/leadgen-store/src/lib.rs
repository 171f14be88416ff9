//! Job record store: relational persistence for jobs, companies, leads,
//! and export logs, plus the in-memory variant used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadgen_core::{Company, ExportLog, ExportOutcome, Job, JobStatus, Lead, SearchSpecification};
use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadgen-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("unknown job status {0:?}")]
    UnknownStatus(String),
    #[error("decoding stored search specification: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Partial job update. `None` fields are left untouched; every applied patch
/// bumps `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub total_listings_found: Option<u32>,
    pub leads_generated: Option<u32>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[async_trait]
pub trait JobRecordStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<(), StoreError>;
    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;
    async fn recent_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError>;

    async fn insert_company(&self, company: &Company) -> Result<(), StoreError>;
    /// Exact-name match only; no case folding or fuzzy merge.
    async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError>;

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError>;
    async fn leads_for_job(&self, job_id: Uuid) -> Result<Vec<Lead>, StoreError>;
    /// Discard a job's persisted leads. Used when an attempt re-runs from
    /// scratch so rows from the prior attempt are not double-counted.
    async fn delete_leads_for_job(&self, job_id: Uuid) -> Result<(), StoreError>;
    async fn mark_leads_exported(
        &self,
        job_id: Uuid,
        exported_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_export_log(&self, log: &ExportLog) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_job_row(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let status_text: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_text)
        .ok_or_else(|| StoreError::UnknownStatus(status_text.clone()))?;
    let spec_json: serde_json::Value = row.try_get("spec")?;
    let spec: SearchSpecification = serde_json::from_value(spec_json)?;
    let total_listings_found: i32 = row.try_get("total_listings_found")?;
    let leads_generated: i32 = row.try_get("leads_generated")?;
    let progress: i32 = row.try_get("progress")?;

    Ok(Job {
        id: row.try_get("id")?,
        status,
        spec,
        total_listings_found: total_listings_found.max(0) as u32,
        leads_generated: leads_generated.max(0) as u32,
        progress: progress.clamp(0, 100) as u8,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_company_row(row: &sqlx::postgres::PgRow) -> Result<Company, StoreError> {
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_recruitment_agency: row.try_get("is_recruitment_agency")?,
        is_blacklisted: row.try_get("is_blacklisted")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_lead_row(row: &sqlx::postgres::PgRow) -> Result<Lead, StoreError> {
    let lead_score: i32 = row.try_get("lead_score")?;
    Ok(Lead {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        company_id: row.try_get("company_id")?,
        contact_name: row.try_get("contact_name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        contact_title: row.try_get("contact_title")?,
        contact_email: row.try_get("contact_email")?,
        profile_url: row.try_get("profile_url")?,
        job_title: row.try_get("job_title")?,
        job_url: row.try_get("job_url")?,
        company_name: row.try_get("company_name")?,
        location: row.try_get("location")?,
        salary_range: row.try_get("salary_range")?,
        description: row.try_get("description")?,
        lead_score: lead_score.clamp(0, 100) as u8,
        is_qualified: row.try_get("is_qualified")?,
        exported_to_sheets: row.try_get("exported_to_sheets")?,
        exported_at: row.try_get("exported_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const JOB_COLUMNS: &str = "id, status, spec, total_listings_found, leads_generated, progress, \
     error_message, created_at, updated_at, completed_at";

#[async_trait]
impl JobRecordStore for PgStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let spec_json = serde_json::to_value(&job.spec)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, spec, total_listings_found, leads_generated,
                              progress, error_message, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(spec_json)
        .bind(job.total_listings_found as i32)
        .bind(job.leads_generated as i32)
        .bind(job.progress as i32)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET status = COALESCE($2, status),
                   progress = COALESCE($3, progress),
                   total_listings_found = COALESCE($4, total_listings_found),
                   leads_generated = COALESCE($5, leads_generated),
                   error_message = COALESCE($6, error_message),
                   completed_at = COALESCE($7, completed_at),
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.progress.map(|p| p as i32))
        .bind(patch.total_listings_found.map(|v| v as i32))
        .bind(patch.leads_generated.map(|v| v as i32))
        .bind(patch.error_message)
        .bind(patch.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_job_row).transpose()
    }

    async fn recent_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_job_row).collect()
    }

    async fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, name, is_recruitment_agency, is_blacklisted, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(company.is_recruitment_agency)
        .bind(company.is_blacklisted)
        .bind(company.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, is_recruitment_agency, is_blacklisted, created_at
              FROM companies
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_company_row).transpose()
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, job_id, company_id, contact_name, first_name, last_name,
                               contact_title, contact_email, profile_url, job_title, job_url,
                               company_name, location, salary_range, description, lead_score,
                               is_qualified, exported_to_sheets, exported_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(lead.id)
        .bind(lead.job_id)
        .bind(lead.company_id)
        .bind(&lead.contact_name)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.contact_title)
        .bind(&lead.contact_email)
        .bind(&lead.profile_url)
        .bind(&lead.job_title)
        .bind(&lead.job_url)
        .bind(&lead.company_name)
        .bind(&lead.location)
        .bind(&lead.salary_range)
        .bind(&lead.description)
        .bind(lead.lead_score as i32)
        .bind(lead.is_qualified)
        .bind(lead.exported_to_sheets)
        .bind(lead.exported_at)
        .bind(lead.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn leads_for_job(&self, job_id: Uuid) -> Result<Vec<Lead>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, company_id, contact_name, first_name, last_name,
                   contact_title, contact_email, profile_url, job_title, job_url,
                   company_name, location, salary_range, description, lead_score,
                   is_qualified, exported_to_sheets, exported_at, created_at
              FROM leads
             WHERE job_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_lead_row).collect()
    }

    async fn delete_leads_for_job(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM leads WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_leads_exported(
        &self,
        job_id: Uuid,
        exported_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE leads
               SET exported_to_sheets = TRUE,
                   exported_at = $2
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(exported_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_export_log(&self, log: &ExportLog) -> Result<(), StoreError> {
        let outcome = match log.outcome {
            ExportOutcome::Success => "success",
            ExportOutcome::Failed => "failed",
        };
        sqlx::query(
            r#"
            INSERT INTO export_logs (id, job_id, outcome, sheet_id, rows_exported,
                                     error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.job_id)
        .bind(outcome)
        .bind(&log.sheet_id)
        .bind(log.rows_exported as i32)
        .bind(&log.error_message)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory store with the same semantics as `PgStore`, used by pipeline
/// and web tests. Additionally records every progress value written per job
/// so tests can assert monotonicity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    companies: Mutex<Vec<Company>>,
    leads: Mutex<Vec<Lead>>,
    export_logs: Mutex<Vec<ExportLog>>,
    progress_log: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_history(&self, job_id: Uuid) -> Vec<u8> {
        self.progress_log
            .lock()
            .expect("progress log lock")
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn export_logs_for(&self, job_id: Uuid) -> Vec<ExportLog> {
        self.export_logs
            .lock()
            .expect("export logs lock")
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn company_count(&self) -> usize {
        self.companies.lock().expect("companies lock").len()
    }
}

#[async_trait]
impl JobRecordStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs
            .lock()
            .expect("jobs lock")
            .insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(progress) = patch.progress {
            job.progress = progress;
            self.progress_log
                .lock()
                .expect("progress log lock")
                .entry(id)
                .or_default()
                .push(progress);
        }
        if let Some(total) = patch.total_listings_found {
            job.total_listings_found = total;
        }
        if let Some(leads) = patch.leads_generated {
            job.leads_generated = leads;
        }
        if let Some(message) = patch.error_message {
            job.error_message = Some(message);
        }
        if let Some(at) = patch.completed_at {
            job.completed_at = Some(at);
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().expect("jobs lock").get(&id).cloned())
    }

    async fn recent_jobs(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.lock().expect("jobs lock").values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        self.companies
            .lock()
            .expect("companies lock")
            .push(company.clone());
        Ok(())
    }

    async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        Ok(self
            .companies
            .lock()
            .expect("companies lock")
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        self.leads.lock().expect("leads lock").push(lead.clone());
        Ok(())
    }

    async fn leads_for_job(&self, job_id: Uuid) -> Result<Vec<Lead>, StoreError> {
        Ok(self
            .leads
            .lock()
            .expect("leads lock")
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_leads_for_job(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.leads
            .lock()
            .expect("leads lock")
            .retain(|l| l.job_id != job_id);
        Ok(())
    }

    async fn mark_leads_exported(
        &self,
        job_id: Uuid,
        exported_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for lead in self
            .leads
            .lock()
            .expect("leads lock")
            .iter_mut()
            .filter(|l| l.job_id == job_id)
        {
            lead.exported_to_sheets = true;
            lead.exported_at = Some(exported_at);
        }
        Ok(())
    }

    async fn insert_export_log(&self, log: &ExportLog) -> Result<(), StoreError> {
        self.export_logs
            .lock()
            .expect("export logs lock")
            .push(log.clone());
        Ok(())
    }
}
