//! Listing extraction boundary: paginated search-result fetching and
//! per-listing detail enrichment against a job board's public HTML.

use std::time::Duration;

use async_trait::async_trait;
use leadgen_core::{HiringContact, ListingDetail, RawListing, SearchSpecification};
use rand::Rng;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{info_span, Instrument};

pub const CRATE_NAME: &str = "leadgen-extract";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("session setup failed: {0}")]
    Auth(String),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid selector: {0}")]
    Selector(String),
}

/// One page of search results. The sequence of pages is finite and
/// non-restartable: callers walk page indexes upward until `has_next_page`
/// goes false or their page budget runs out.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub listings: Vec<RawListing>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait ListingExtractor: Send + Sync {
    /// Session setup. Failure here aborts the whole job before any page
    /// is fetched.
    async fn authenticate(&self) -> Result<(), ExtractError>;

    async fn fetch_page(
        &self,
        spec: &SearchSpecification,
        page_index: u32,
    ) -> Result<ListingPage, ExtractError>;

    async fn fetch_detail(&self, listing_url: &str) -> Result<ListingDetail, ExtractError>;
}

/// CSS selectors for the board's markup, overridable per deployment.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub listing_card: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub salary: String,
    pub next_page: String,
    pub detail_description: String,
    pub detail_contact_name: String,
    pub detail_contact_title: String,
    pub detail_contact_email: String,
    pub detail_contact_profile: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            listing_card: ".job-card".to_string(),
            title: ".job-title".to_string(),
            company: ".company-name".to_string(),
            location: ".job-location".to_string(),
            link: "a.job-link".to_string(),
            salary: ".salary".to_string(),
            next_page: ".pagination a.next".to_string(),
            detail_description: ".job-description".to_string(),
            detail_contact_name: ".hiring-contact .contact-name".to_string(),
            detail_contact_title: ".hiring-contact .contact-title".to_string(),
            detail_contact_email: ".hiring-contact a[href^='mailto:']".to_string(),
            detail_contact_profile: ".hiring-contact a.profile-link".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub base_url: String,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub selectors: SelectorSet,
}

impl ExtractorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: "leadgen-bot/0.1".to_string(),
            http_timeout: Duration::from_secs(20),
            selectors: SelectorSet::default(),
        }
    }
}

/// Bounded randomized pacing between network calls. Inserted to reduce
/// detectability and load on the scraped site, not for correctness.
#[derive(Debug, Clone, Copy)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn pick(&self) -> Duration {
        if self.max_ms == 0 || self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

pub async fn pacing_delay(range: DelayRange) {
    let delay = range.pick();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Fetches and parses the board's public HTML with a plain `reqwest`
/// session. One instance is owned by one job's worker for the duration of
/// that job and torn down afterwards.
#[derive(Debug)]
pub struct HtmlListingExtractor {
    client: reqwest::Client,
    config: ExtractorConfig,
}

impl HtmlListingExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    fn search_params(spec: &SearchSpecification, page_index: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", spec.keywords.clone()),
            ("l", spec.location.clone()),
            ("page", (page_index + 1).to_string()),
        ];
        if let Some(tier) = spec.experience_tier {
            let value = match tier {
                leadgen_core::ExperienceTier::Entry => "entry",
                leadgen_core::ExperienceTier::Mid => "mid",
                leadgen_core::ExperienceTier::Senior => "senior",
            };
            params.push(("experience", value.to_string()));
        }
        if let Some(job_type) = &spec.job_type {
            params.push(("type", job_type.clone()));
        }
        if let Some(industry) = &spec.industry {
            params.push(("industry", industry.clone()));
        }
        if let Some(size) = &spec.company_size {
            params.push(("company_size", size.clone()));
        }
        params
    }

    async fn get_html(&self, url: &str, params: &[(&str, String)]) -> Result<String, ExtractError> {
        let span = info_span!("board_fetch", url);
        async {
            let resp = self.client.get(url).query(params).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ExtractError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }
            Ok(resp.text().await?)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl ListingExtractor for HtmlListingExtractor {
    async fn authenticate(&self) -> Result<(), ExtractError> {
        // Warm-up request against the board root; a rejection here means the
        // session is unusable and the job must not proceed.
        let resp = self
            .client
            .get(&self.config.base_url)
            .send()
            .await
            .map_err(|e| ExtractError::Auth(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Auth(format!(
                "board returned status {} during session setup",
                status.as_u16()
            )));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        spec: &SearchSpecification,
        page_index: u32,
    ) -> Result<ListingPage, ExtractError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let params = Self::search_params(spec, page_index);
        let html = self.get_html(&url, &params).await?;
        parse_search_page(&html, &self.config.base_url, &self.config.selectors)
    }

    async fn fetch_detail(&self, listing_url: &str) -> Result<ListingDetail, ExtractError> {
        let html = self.get_html(listing_url, &[]).await?;
        parse_detail_page(&html, &self.config.selectors)
    }
}

/// Fixture-backed extractor: serves canned pages and details instead of
/// hitting a live board. Used by pipeline and API tests, and handy for
/// dry runs against captured markup.
#[derive(Debug, Default)]
pub struct FixtureExtractor {
    pages: Vec<ListingPage>,
    details: std::collections::HashMap<String, ListingDetail>,
    fail_authenticate: bool,
    failing_pages: std::collections::HashSet<u32>,
    failing_details: std::collections::HashSet<String>,
    page_calls: std::sync::Mutex<Vec<u32>>,
    detail_calls: std::sync::Mutex<Vec<String>>,
}

impl FixtureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: ListingPage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_detail(mut self, url: impl Into<String>, detail: ListingDetail) -> Self {
        self.details.insert(url.into(), detail);
        self
    }

    pub fn with_auth_failure(mut self) -> Self {
        self.fail_authenticate = true;
        self
    }

    pub fn with_page_failure(mut self, page_index: u32) -> Self {
        self.failing_pages.insert(page_index);
        self
    }

    pub fn with_detail_failure(mut self, url: impl Into<String>) -> Self {
        self.failing_details.insert(url.into());
        self
    }

    pub fn page_calls(&self) -> Vec<u32> {
        self.page_calls.lock().expect("page calls lock").clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().expect("detail calls lock").clone()
    }
}

#[async_trait]
impl ListingExtractor for FixtureExtractor {
    async fn authenticate(&self) -> Result<(), ExtractError> {
        if self.fail_authenticate {
            return Err(ExtractError::Auth("fixture session rejected".to_string()));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        _spec: &SearchSpecification,
        page_index: u32,
    ) -> Result<ListingPage, ExtractError> {
        self.page_calls
            .lock()
            .expect("page calls lock")
            .push(page_index);
        if self.failing_pages.contains(&page_index) {
            return Err(ExtractError::HttpStatus {
                status: 500,
                url: format!("fixture://search/page/{page_index}"),
            });
        }
        Ok(self
            .pages
            .get(page_index as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_detail(&self, listing_url: &str) -> Result<ListingDetail, ExtractError> {
        self.detail_calls
            .lock()
            .expect("detail calls lock")
            .push(listing_url.to_string());
        if self.failing_details.contains(listing_url) {
            return Err(ExtractError::HttpStatus {
                status: 500,
                url: listing_url.to_string(),
            });
        }
        Ok(self.details.get(listing_url).cloned().unwrap_or_default())
    }
}

fn parse_selector(raw: &str) -> Result<Selector, ExtractError> {
    Selector::parse(raw).map_err(|e| ExtractError::Selector(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(fragment: &scraper::ElementRef, selector: &Selector) -> Option<String> {
    fragment
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(fragment: &scraper::ElementRef, selector: &Selector, attr: &str) -> Option<String> {
    fragment
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

fn parse_search_page(
    html: &str,
    base_url: &str,
    selectors: &SelectorSet,
) -> Result<ListingPage, ExtractError> {
    let document = Html::parse_document(html);
    let card_sel = parse_selector(&selectors.listing_card)?;
    let title_sel = parse_selector(&selectors.title)?;
    let company_sel = parse_selector(&selectors.company)?;
    let location_sel = parse_selector(&selectors.location)?;
    let link_sel = parse_selector(&selectors.link)?;
    let salary_sel = parse_selector(&selectors.salary)?;
    let next_sel = parse_selector(&selectors.next_page)?;

    let mut listings = Vec::new();
    for card in document.select(&card_sel) {
        let title = first_text(&card, &title_sel);
        let company = first_text(&card, &company_sel);
        let url = first_attr(&card, &link_sel, "href");

        // Presence checks only: a card without its required fields is not a
        // listing we can act on.
        let (Some(title), Some(company), Some(url)) = (title, company, url) else {
            continue;
        };

        listings.push(RawListing {
            title,
            company_name: company,
            location: first_text(&card, &location_sel).unwrap_or_default(),
            url: absolutize(base_url, &url),
            salary: first_text(&card, &salary_sel),
        });
    }

    let has_next_page = document.select(&next_sel).next().is_some();
    Ok(ListingPage {
        listings,
        has_next_page,
    })
}

fn parse_detail_page(html: &str, selectors: &SelectorSet) -> Result<ListingDetail, ExtractError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let description_sel = parse_selector(&selectors.detail_description)?;
    let name_sel = parse_selector(&selectors.detail_contact_name)?;
    let title_sel = parse_selector(&selectors.detail_contact_title)?;
    let email_sel = parse_selector(&selectors.detail_contact_email)?;
    let profile_sel = parse_selector(&selectors.detail_contact_profile)?;

    let description = first_text(&root, &description_sel);
    let full_name = first_text(&root, &name_sel);
    let contact_title = first_text(&root, &title_sel);
    let email = first_attr(&root, &email_sel, "href")
        .map(|href| href.trim_start_matches("mailto:").to_string());
    let profile_url = first_attr(&root, &profile_sel, "href");

    let (first_name, last_name) = match &full_name {
        Some(name) => {
            let mut parts = name.splitn(2, ' ');
            let first = parts.next().map(str::to_string);
            let last = parts.next().map(str::to_string);
            (first, last)
        }
        None => (None, None),
    };

    let contact = if full_name.is_some() || email.is_some() || profile_url.is_some() {
        Some(HiringContact {
            full_name,
            first_name,
            last_name,
            title: contact_title,
            email,
            profile_url,
        })
    } else {
        None
    };

    Ok(ListingDetail {
        description,
        contact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <div class="job-card">
            <h2 class="job-title">Senior Rust Engineer</h2>
            <span class="company-name">Initech</span>
            <span class="job-location">Berlin</span>
            <span class="salary">90k-110k EUR</span>
            <a class="job-link" href="/jobs/101">View</a>
          </div>
          <div class="job-card">
            <h2 class="job-title">Java Developer</h2>
            <span class="company-name">Apex Recruitment Ltd</span>
            <span class="job-location">Hamburg</span>
            <a class="job-link" href="https://other.example/jobs/7">View</a>
          </div>
          <div class="job-card">
            <h2 class="job-title">Broken card without link</h2>
            <span class="company-name">Nowhere GmbH</span>
          </div>
          <div class="pagination"><a class="next" href="?page=2">Next</a></div>
        </body></html>
    "#;

    const LAST_PAGE: &str = r#"
        <html><body>
          <div class="job-card">
            <h2 class="job-title">Data Engineer</h2>
            <span class="company-name">Globex</span>
            <span class="job-location">Remote</span>
            <a class="job-link" href="/jobs/201">View</a>
          </div>
          <div class="pagination"></div>
        </body></html>
    "#;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <div class="job-description">We are looking for an engineer to own our data platform end to end.</div>
          <div class="hiring-contact">
            <span class="contact-name">Dana Fields</span>
            <span class="contact-title">Engineering Manager</span>
            <a href="mailto:dana@initech.example">Email</a>
            <a class="profile-link" href="https://profiles.example/dana">Profile</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn search_page_yields_complete_cards_in_document_order() {
        let page =
            parse_search_page(SEARCH_PAGE, "https://board.example", &SelectorSet::default())
                .unwrap();
        assert_eq!(page.listings.len(), 2);
        assert!(page.has_next_page);

        let first = &page.listings[0];
        assert_eq!(first.title, "Senior Rust Engineer");
        assert_eq!(first.company_name, "Initech");
        assert_eq!(first.url, "https://board.example/jobs/101");
        assert_eq!(first.salary.as_deref(), Some("90k-110k EUR"));

        // Absolute hrefs pass through untouched.
        assert_eq!(page.listings[1].url, "https://other.example/jobs/7");
        assert_eq!(page.listings[1].salary, None);
    }

    #[test]
    fn last_page_reports_no_next() {
        let page =
            parse_search_page(LAST_PAGE, "https://board.example", &SelectorSet::default()).unwrap();
        assert_eq!(page.listings.len(), 1);
        assert!(!page.has_next_page);
    }

    #[test]
    fn detail_page_yields_description_and_contact() {
        let detail = parse_detail_page(DETAIL_PAGE, &SelectorSet::default()).unwrap();
        assert!(detail.description.is_some());

        let contact = detail.contact.unwrap();
        assert_eq!(contact.full_name.as_deref(), Some("Dana Fields"));
        assert_eq!(contact.first_name.as_deref(), Some("Dana"));
        assert_eq!(contact.last_name.as_deref(), Some("Fields"));
        assert_eq!(contact.title.as_deref(), Some("Engineering Manager"));
        assert_eq!(contact.email.as_deref(), Some("dana@initech.example"));
        assert_eq!(
            contact.profile_url.as_deref(),
            Some("https://profiles.example/dana")
        );
    }

    #[test]
    fn detail_page_without_contact_block_leaves_contact_empty() {
        let detail = parse_detail_page(
            "<html><body><div class=\"job-description\">short</div></body></html>",
            &SelectorSet::default(),
        )
        .unwrap();
        assert_eq!(detail.description.as_deref(), Some("short"));
        assert!(detail.contact.is_none());
    }

    #[test]
    fn search_params_carry_optional_filters() {
        let spec = SearchSpecification {
            keywords: "rust engineer".to_string(),
            location: "Berlin".to_string(),
            experience_tier: Some(leadgen_core::ExperienceTier::Senior),
            job_type: Some("full-time".to_string()),
            industry: None,
            company_size: None,
            exclude_agencies: true,
            max_pages: 3,
        };
        let params = HtmlListingExtractor::search_params(&spec, 0);
        assert!(params.contains(&("q", "rust engineer".to_string())));
        assert!(params.contains(&("page", "1".to_string())));
        assert!(params.contains(&("experience", "senior".to_string())));
        assert!(params.contains(&("type", "full-time".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "industry"));
    }

    #[test]
    fn delay_range_stays_within_bounds() {
        let range = DelayRange {
            min_ms: 1000,
            max_ms: 3000,
        };
        for _ in 0..50 {
            let d = range.pick();
            assert!(d >= Duration::from_millis(1000));
            assert!(d <= Duration::from_millis(3000));
        }
        assert!(DelayRange::none().pick().is_zero());
    }
}
