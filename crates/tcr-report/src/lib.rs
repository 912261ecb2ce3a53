//! Report pipeline orchestration: reference join, per-topic metrics, CSV
//! output and prior-run diffing.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tcr_catalog::{CatalogClient, CatalogConfig};
use tcr_core::{enrich_topics, ApplicationRef, EnrichedTopic, ReportRow, REPORT_HEADERS};
use tcr_storage::{BlobStore, HttpClientConfig, HttpFetcher, TextEncoding, TokenBucketConfig};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tcr-report";

/// Suffix shared by every generated report blob.
pub const REPORT_SUFFIX: &str = "_TopicsEnrichis.csv";

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub api_base_url: String,
    pub bearer_token: String,
    pub version_id: String,
    pub topics_parent_id: String,
    pub page_limit: usize,
    pub blob_root: PathBuf,
    pub source_container: String,
    pub target_container: String,
    pub reference_blob: String,
    pub topic_suffix: String,
    pub scheduler_enabled: bool,
    pub report_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Catalog API request-rate ceiling, requests per second. Unset means
    /// unthrottled.
    pub api_max_rps: Option<u32>,
}

impl ReportConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: std::env::var("CATALOG_API_BASE_URL")
                .unwrap_or_else(|_| "https://catalog.example.com/v2".to_string()),
            bearer_token: std::env::var("CATALOG_BEARER_TOKEN").unwrap_or_default(),
            version_id: std::env::var("CATALOG_VERSION_ID").unwrap_or_default(),
            topics_parent_id: std::env::var("CATALOG_TOPICS_PARENT_ID").unwrap_or_default(),
            page_limit: std::env::var("CATALOG_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2500),
            blob_root: std::env::var("BLOB_ROOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./blobs")),
            source_container: std::env::var("TCR_SOURCE_CONTAINER")
                .unwrap_or_else(|_| "sources".to_string()),
            target_container: std::env::var("TCR_TARGET_CONTAINER")
                .unwrap_or_else(|_| "analytics".to_string()),
            reference_blob: std::env::var("TCR_REFERENCE_BLOB")
                .unwrap_or_else(|_| "ref/ref_application.csv".to_string()),
            topic_suffix: std::env::var("TCR_TOPIC_SUFFIX").unwrap_or_else(|_| "ini".to_string()),
            scheduler_enabled: std::env::var("TCR_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            report_cron: std::env::var("TCR_REPORT_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            user_agent: std::env::var("TCR_USER_AGENT")
                .unwrap_or_else(|_| "tcr-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("TCR_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            api_max_rps: std::env::var("TCR_API_MAX_RPS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Map a requests-per-second ceiling onto a token bucket: burst up to the
/// ceiling, one token back every `1s / rps`. Zero disables throttling like
/// an unset ceiling does.
fn token_bucket_config(api_max_rps: Option<u32>) -> Option<TokenBucketConfig> {
    let rps = api_max_rps.filter(|rps| *rps > 0)?;
    Some(TokenBucketConfig {
        capacity: rps,
        refill_every: Duration::from_millis(u64::from(1000 / rps).max(1)),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub topics_total: usize,
    pub topics_reported: usize,
    pub new_topics: usize,
    /// True when no prior report existed to diff against.
    pub first_run: bool,
    pub output_blob: String,
    pub output_sha256: String,
}

pub fn report_blob_name(date: NaiveDate) -> String {
    format!("{}{}", date.format("%Y%m%d"), REPORT_SUFFIX)
}

pub fn summary_blob_name(date: NaiveDate) -> String {
    format!("{}_RunSummary.json", date.format("%Y%m%d"))
}

/// `;`-separated reference table, extra columns ignored.
pub fn parse_reference_csv(text: &str) -> Result<Vec<ApplicationRef>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: ApplicationRef = record.context("parsing reference table row")?;
        rows.push(row);
    }
    Ok(rows)
}

/// Serialize report rows as `;`-separated CSV. An empty report still gets
/// the full header line.
pub fn render_report_csv(rows: &[ReportRow]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    if rows.is_empty() {
        writer
            .write_record(REPORT_HEADERS)
            .context("writing report headers")?;
    }
    for row in rows {
        writer.serialize(row).context("serializing report row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("finalizing report csv: {err}"))?;
    String::from_utf8(bytes).context("report csv is not valid utf-8")
}

pub fn parse_report_csv(text: &str) -> Result<Vec<ReportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: ReportRow = record.context("parsing report row")?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn filter_by_suffix(topics: Vec<EnrichedTopic>, suffix: &str) -> Vec<EnrichedTopic> {
    topics
        .into_iter()
        .filter(|enriched| enriched.topic.technical_name.ends_with(suffix))
        .collect()
}

/// Flag rows absent from the prior report. Returns the number flagged.
pub fn mark_new_rows(rows: &mut [ReportRow], prior_keys: &HashSet<String>) -> usize {
    let mut flagged = 0;
    for row in rows.iter_mut() {
        if !prior_keys.contains(&row.diff_key()) {
            row.mark_new();
            flagged += 1;
        }
    }
    flagged
}

pub struct ReportPipeline {
    config: ReportConfig,
    blobs: BlobStore,
    catalog: CatalogClient,
}

impl ReportPipeline {
    pub fn new(config: ReportConfig) -> Result<Self> {
        let blobs = BlobStore::new(config.blob_root.clone());
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            bearer_token: Some(config.bearer_token.clone()),
            token_bucket: token_bucket_config(config.api_max_rps),
            ..Default::default()
        })?;
        let catalog = CatalogClient::new(
            http,
            CatalogConfig {
                base_url: config.api_base_url.clone(),
                version_id: config.version_id.clone(),
                topics_parent_id: config.topics_parent_id.clone(),
                page_limit: config.page_limit,
            },
        );
        Ok(Self {
            config,
            blobs,
            catalog,
        })
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, "starting enriched-topics report run");

        let reference = self.load_reference_table().await?;
        let topics = self
            .catalog
            .list_topics(run_id)
            .await
            .context("fetching topics from the cataloging API")?;
        let topics_total = topics.len();

        let enriched = enrich_topics(topics, &reference);
        let selected = filter_by_suffix(enriched, &self.config.topic_suffix);
        info!(
            topics_total,
            selected = selected.len(),
            suffix = %self.config.topic_suffix,
            "topics joined and filtered"
        );

        let mut rows = Vec::with_capacity(selected.len());
        for enriched_topic in &selected {
            let counts = self
                .catalog
                .alignment_counts(run_id, &enriched_topic.topic)
                .await
                .with_context(|| {
                    format!(
                        "computing alignment counts for topic {}",
                        enriched_topic.topic.id
                    )
                })?;
            rows.push(ReportRow::from_enriched(enriched_topic, counts));
        }

        let output_blob = report_blob_name(started_at.date_naive());
        let prior_keys = self.load_prior_report_keys(&output_blob).await?;
        let first_run = prior_keys.is_none();
        let new_topics = match &prior_keys {
            Some(keys) => mark_new_rows(&mut rows, keys),
            None => 0,
        };

        let csv_text = render_report_csv(&rows)?;
        let stored = self
            .blobs
            .write_text(
                &self.config.target_container,
                &output_blob,
                &csv_text,
                TextEncoding::Windows1252,
            )
            .await
            .with_context(|| format!("writing report blob {output_blob}"))?;

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            topics_total,
            topics_reported: rows.len(),
            new_topics,
            first_run,
            output_blob,
            output_sha256: stored.content_hash,
        };
        self.write_summary(&summary).await?;
        info!(
            %run_id,
            reported = summary.topics_reported,
            new_topics = summary.new_topics,
            blob = %summary.output_blob,
            "report run complete"
        );
        Ok(summary)
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.report_cron.clone();
        let job = Job::new_async(cron.as_str(), |_uuid, _lock| {
            Box::pin(async move {
                match run_report_once_from_env().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        new_topics = summary.new_topics,
                        "scheduled report run complete"
                    ),
                    Err(err) => warn!(error = %err, "scheduled report run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    async fn load_reference_table(&self) -> Result<Vec<ApplicationRef>> {
        let text = self
            .blobs
            .read_text(
                &self.config.source_container,
                &self.config.reference_blob,
                TextEncoding::Windows1252,
            )
            .await
            .with_context(|| format!("reading reference blob {}", self.config.reference_blob))?;
        let rows = parse_reference_csv(&text)?;
        info!(applications = rows.len(), "reference table loaded");
        Ok(rows)
    }

    /// Diff keys of the most recent report written before `current_blob`.
    /// Re-running on the same day diffs against the previous day, not the
    /// file being overwritten.
    async fn load_prior_report_keys(&self, current_blob: &str) -> Result<Option<HashSet<String>>> {
        let names = self
            .blobs
            .list_blobs(&self.config.target_container, "")
            .await?;
        let Some(prior) = names
            .into_iter()
            .filter(|name| name.ends_with(REPORT_SUFFIX))
            .filter(|name| name.as_str() < current_blob)
            .next_back()
        else {
            return Ok(None);
        };

        let text = self
            .blobs
            .read_text(
                &self.config.target_container,
                &prior,
                TextEncoding::Windows1252,
            )
            .await
            .with_context(|| format!("reading prior report {prior}"))?;
        let rows =
            parse_report_csv(&text).with_context(|| format!("parsing prior report {prior}"))?;
        info!(prior = %prior, rows = rows.len(), "prior report loaded for diffing");
        Ok(Some(rows.iter().map(ReportRow::diff_key).collect()))
    }

    async fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let name = summary_blob_name(summary.started_at.date_naive());
        let json = serde_json::to_string_pretty(summary).context("serializing run summary")?;
        self.blobs
            .write_text(&self.config.target_container, &name, &json, TextEncoding::Utf8)
            .await
            .with_context(|| format!("writing run summary {name}"))?;
        Ok(())
    }
}

pub async fn run_report_once_from_env() -> Result<RunSummary> {
    let config = ReportConfig::from_env();
    let pipeline = ReportPipeline::new(config)?;
    pipeline.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tcr_core::{AlignmentCounts, Topic, TopicAttributes};

    fn mk_enriched(technical_name: &str, name: &str) -> EnrichedTopic {
        let topics = vec![Topic {
            id: format!("id-{name}"),
            name: name.to_string(),
            technical_name: technical_name.to_string(),
            path: format!("\\Kafka\\{name}"),
            attributes: TopicAttributes::default(),
            links: BTreeMap::new(),
        }];
        enrich_topics(topics, &[]).remove(0)
    }

    fn mk_row(code: &str, name: &str) -> ReportRow {
        let mut enriched = mk_enriched("prd_abc_x_ini", name);
        enriched.application_code = Some(code.to_string());
        ReportRow::from_enriched(
            &enriched,
            AlignmentCounts {
                fields_to_align: 2,
                aligned_fields: 1,
            },
        )
    }

    #[test]
    fn reference_csv_parses_contract_columns_and_ignores_extras() {
        let text = "trigramme;nom;train;agileTeam (valeur corrigée);commentaire\n\
                    ABC;Order Manager;Train Alpha;Team Rocket;ignore me\n\
                    DEF;Billing;Train Beta;Team Lunar;\n";
        let rows = parse_reference_csv(text).expect("parse reference");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trigram, "ABC");
        assert_eq!(rows[0].agile_team, "Team Rocket");
        assert_eq!(rows[1].name, "Billing");
    }

    #[test]
    fn report_header_line_matches_the_frozen_contract() {
        let text = render_report_csv(&[mk_row("ABC", "Orders")]).expect("render");
        let header_line = text.lines().next().expect("header line");
        assert_eq!(header_line, REPORT_HEADERS.join(";"));
    }

    #[test]
    fn empty_report_still_writes_headers() {
        let text = render_report_csv(&[]).expect("render empty");
        assert_eq!(text.trim_end(), REPORT_HEADERS.join(";"));
    }

    #[test]
    fn rendered_report_parses_back() {
        let rows = vec![mk_row("ABC", "Orders"), mk_row("DEF", "Billing")];
        let text = render_report_csv(&rows).expect("render");
        let parsed = parse_report_csv(&text).expect("parse");
        assert_eq!(parsed, rows);
    }

    #[test]
    fn prior_reports_without_the_diff_column_still_parse() {
        let mut text = render_report_csv(&[mk_row("ABC", "Orders")]).expect("render");
        // strip the trailing "Nouveau topic" column from header and row
        text = text
            .lines()
            .map(|line| line.rsplit_once(';').map(|(head, _)| head).unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n");
        let parsed = parse_report_csv(&text).expect("parse legacy report");
        assert_eq!(parsed[0].new_topic, "");
    }

    #[test]
    fn suffix_filter_keeps_matching_technical_names_only() {
        let topics = vec![
            mk_enriched("prd_abc_orders_ini", "Orders"),
            mk_enriched("prd_abc_orders_raw", "Raw"),
        ];
        let selected = filter_by_suffix(topics, "ini");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].topic.name, "Orders");
    }

    #[test]
    fn diffing_flags_rows_missing_from_the_prior_run() {
        let prior: HashSet<String> = [mk_row("ABC", "Orders").diff_key()].into_iter().collect();
        let mut rows = vec![mk_row("ABC", "Orders"), mk_row("DEF", "Billing")];
        let flagged = mark_new_rows(&mut rows, &prior);
        assert_eq!(flagged, 1);
        assert_eq!(rows[0].new_topic, "");
        assert_eq!(rows[1].new_topic, "Oui");
    }

    #[test]
    fn rate_ceiling_maps_onto_the_token_bucket() {
        assert!(token_bucket_config(None).is_none());
        assert!(token_bucket_config(Some(0)).is_none());

        let bucket = token_bucket_config(Some(4)).expect("bucket");
        assert_eq!(bucket.capacity, 4);
        assert_eq!(bucket.refill_every, Duration::from_millis(250));

        // sub-millisecond refill intervals clamp to 1ms
        let fast = token_bucket_config(Some(5000)).expect("bucket");
        assert_eq!(fast.refill_every, Duration::from_millis(1));
    }

    #[test]
    fn blob_names_are_date_stamped() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 25).expect("date");
        assert_eq!(report_blob_name(date), "20260825_TopicsEnrichis.csv");
        assert_eq!(summary_blob_name(date), "20260825_RunSummary.json");
    }

    #[tokio::test]
    async fn prior_report_selection_skips_the_current_blob() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ReportConfig::from_env();
        config.blob_root = dir.path().to_path_buf();
        let pipeline = ReportPipeline::new(config).expect("pipeline");

        let old = render_report_csv(&[mk_row("ABC", "Orders")]).expect("render");
        pipeline
            .blobs()
            .write_text("analytics", "20260824_TopicsEnrichis.csv", &old, TextEncoding::Windows1252)
            .await
            .expect("write prior");
        pipeline
            .blobs()
            .write_text("analytics", "20260825_TopicsEnrichis.csv", &old, TextEncoding::Windows1252)
            .await
            .expect("write current");

        let keys = pipeline
            .load_prior_report_keys("20260825_TopicsEnrichis.csv")
            .await
            .expect("load prior")
            .expect("prior exists");
        assert!(keys.contains("ABC:Orders"));

        let none = pipeline
            .load_prior_report_keys("20260824_TopicsEnrichis.csv")
            .await
            .expect("load prior");
        assert!(none.is_none());
    }
}
