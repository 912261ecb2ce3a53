//! Cataloging API client + glossary-alignment metric computation.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tcr_core::{AlignmentCounts, LinkRef, Topic};
use tcr_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "tcr-catalog";

/// Exact link type path marking a direct glossary alignment.
pub const GLOSSARY_TYPE_PATH: &str = "\\Universe\\Universe\\Universe\\Concept\\BusinessTerm";

/// Fragment marking any glossary-bound link type path.
pub const GLOSSARY_FRAGMENT: &str = "BusinessTerm";

// Guard against a next_page chain that never terminates.
const MAX_PAGES_PER_QUERY: usize = 500;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// API root, e.g. `https://catalog.example.com/v2`.
    pub base_url: String,
    pub version_id: String,
    /// Parent structure under which all Kafka topics live.
    pub topics_parent_id: String,
    pub page_limit: usize,
}

/// Common pagination envelope of the `/structures`, `/fields` and `/usages`
/// endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPage<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntryAttributes {
    /// Locally-scoped data is excluded from every alignment metric.
    #[serde(rename = "Donnee Locale", default)]
    pub local_data: bool,
}

/// A field or usage entry. Both endpoints share this shape for the parts the
/// metrics read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub attributes: EntryAttributes,
    #[serde(default)]
    pub links: BTreeMap<String, Vec<LinkRef>>,
}

impl CatalogEntry {
    fn all_links(&self) -> impl Iterator<Item = &LinkRef> {
        self.links.values().flatten()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("pagination for {endpoint} exceeded {max} pages")]
    PaginationOverflow { endpoint: &'static str, max: usize },
}

/// Entries whose path carries a `data` component, local data excluded.
/// This is the payload-field count the report aligns against.
pub fn count_payload_fields(entries: &[CatalogEntry]) -> usize {
    entries
        .iter()
        .filter(|entry| !entry.attributes.local_data)
        .filter(|entry| {
            entry
                .path
                .split('\\')
                .any(|component| !component.is_empty() && component.eq_ignore_ascii_case("data"))
        })
        .count()
}

/// Every glossary-bound link across the given entries, local data excluded.
/// An entry with several glossary links counts once per link.
pub fn count_glossary_links(entries: &[CatalogEntry]) -> usize {
    entries
        .iter()
        .filter(|entry| !entry.attributes.local_data)
        .flat_map(CatalogEntry::all_links)
        .filter(|link| link.type_path.contains(GLOSSARY_FRAGMENT))
        .count()
}

/// Ids of entries holding at least one exact business-term alignment.
pub fn glossary_entry_ids(entries: &[CatalogEntry]) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|entry| !entry.attributes.local_data)
        .filter(|entry| entry.all_links().any(|link| link.type_path == GLOSSARY_TYPE_PATH))
        .map(|entry| entry.id.clone())
        .collect()
}

/// Merge direct and usage-side glossary counts. Entries aligned on both
/// sides are counted once.
pub fn combine_alignment(
    fields_to_align: usize,
    direct_links: usize,
    direct_ids: &BTreeSet<String>,
    usage_links: usize,
    usage_ids: &BTreeSet<String>,
) -> AlignmentCounts {
    let common = direct_ids.intersection(usage_ids).count();
    AlignmentCounts {
        fields_to_align,
        aligned_fields: (direct_links + usage_links).saturating_sub(common),
    }
}

/// Walk a `next_page` chain, accumulating every page's results. The page
/// source is whatever resolves one URL to one page, so the walk itself needs
/// no server.
async fn collect_pages<T, F, Fut>(
    endpoint: &'static str,
    first_url: String,
    mut fetch_page: F,
) -> Result<Vec<T>, CatalogError>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<ResultsPage<T>, FetchError>>,
{
    let mut results = Vec::new();
    let mut next = Some(first_url);
    let mut pages = 0usize;

    while let Some(url) = next {
        pages += 1;
        if pages > MAX_PAGES_PER_QUERY {
            return Err(CatalogError::PaginationOverflow {
                endpoint,
                max: MAX_PAGES_PER_QUERY,
            });
        }
        let page = fetch_page(url).await?;
        results.extend(page.results);
        next = page.next_page;
    }

    Ok(results)
}

/// Client over the cataloging API's three paginated read endpoints.
#[derive(Debug)]
pub struct CatalogClient {
    http: HttpFetcher,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(http: HttpFetcher, config: CatalogConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn structures_url(&self) -> String {
        format!(
            "{}/structures?versionId={}&parentId={}&Limit={}&maxDepth=0&includeAttributes=true&includeLinks=true",
            self.config.base_url, self.config.version_id, self.config.topics_parent_id, self.config.page_limit
        )
    }

    fn fields_url(&self, topic_id: &str) -> String {
        format!(
            "{}/fields?parentId={}&versionId={}&type=Field&includeLinks=true",
            self.config.base_url, topic_id, self.config.version_id
        )
    }

    fn usages_url(&self, usage_parent_id: &str) -> String {
        format!(
            "{}/usages?parentId={}&versionId={}&includeAttributes=true&includeLinks=true",
            self.config.base_url, usage_parent_id, self.config.version_id
        )
    }

    async fn fetch_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        run_id: Uuid,
        endpoint: &'static str,
        first_url: String,
    ) -> Result<Vec<T>, CatalogError> {
        collect_pages(endpoint, first_url, |url| async move {
            self.http.fetch_json(run_id, endpoint, &url).await
        })
        .await
    }

    /// All topics under the configured parent, across every page.
    pub async fn list_topics(&self, run_id: Uuid) -> Result<Vec<Topic>, CatalogError> {
        self.fetch_all_pages(run_id, "structures", self.structures_url())
            .await
    }

    pub async fn topic_fields(
        &self,
        run_id: Uuid,
        topic_id: &str,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_all_pages(run_id, "fields", self.fields_url(topic_id))
            .await
    }

    pub async fn usage_entries(
        &self,
        run_id: Uuid,
        usage_parent_id: &str,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_all_pages(run_id, "usages", self.usages_url(usage_parent_id))
            .await
    }

    /// Alignment metrics for one topic: payload-field count plus glossary
    /// alignments merged across the field and usage endpoints.
    pub async fn alignment_counts(
        &self,
        run_id: Uuid,
        topic: &Topic,
    ) -> Result<AlignmentCounts, CatalogError> {
        let fields = self.topic_fields(run_id, &topic.id).await?;
        let fields_to_align = count_payload_fields(&fields);
        let direct_links = count_glossary_links(&fields);
        let direct_ids = glossary_entry_ids(&fields);

        let (usage_links, usage_ids) = match topic.usage_parent_id() {
            Some(parent_id) => {
                let usages = self.usage_entries(run_id, parent_id).await?;
                (count_glossary_links(&usages), glossary_entry_ids(&usages))
            }
            None => {
                warn!(topic_id = %topic.id, "topic has no usage parent; usage alignments skipped");
                (0, BTreeSet::new())
            }
        };

        Ok(combine_alignment(
            fields_to_align,
            direct_links,
            &direct_ids,
            usage_links,
            &usage_ids,
        ))
    }
}
