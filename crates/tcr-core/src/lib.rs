//! Core domain model and report column contract for TCR.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tcr-core";

/// Team used when a topic has no (or an empty) reference-table match.
pub const DEFAULT_TEAM: &str = "Nextgen";

/// One row of the application reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRef {
    #[serde(rename = "trigramme")]
    pub trigram: String,
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "train")]
    pub train: String,
    #[serde(rename = "agileTeam (valeur corrigée)")]
    pub agile_team: String,
}

/// A single link target attached to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "typePath", default)]
    pub type_path: String,
}

/// Catalog attributes carried through to the report unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicAttributes {
    #[serde(rename = "Type Topic", default)]
    pub topic_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "creationTime", default)]
    pub creation_time: Option<String>,
    #[serde(rename = "lastModificationTime", default)]
    pub last_modification_time: Option<String>,
}

/// A metadata topic as returned by the cataloging API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "technicalName", default)]
    pub technical_name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub attributes: TopicAttributes,
    #[serde(default)]
    pub links: BTreeMap<String, Vec<LinkRef>>,
}

impl Topic {
    /// Id of the usage entry this topic feeds, taken from the first
    /// `IsUsedBy` link.
    pub fn usage_parent_id(&self) -> Option<&str> {
        self.links
            .get("IsUsedBy")
            .and_then(|links| links.first())
            .map(|link| link.id.as_str())
    }
}

/// A topic joined against the application reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedTopic {
    pub topic: Topic,
    pub application_code: Option<String>,
    pub application: Option<String>,
    pub train: Option<String>,
    pub team: String,
}

/// Per-topic alignment metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlignmentCounts {
    pub fields_to_align: usize,
    pub aligned_fields: usize,
}

/// Application code embedded in a technical name: the second `_`-separated
/// segment, uppercased.
pub fn application_code(technical_name: &str) -> Option<String> {
    let code = technical_name.split('_').nth(1)?;
    if code.is_empty() {
        return None;
    }
    Some(code.to_uppercase())
}

/// Left join of topics against the reference table on application code.
/// Topics without a match are kept with empty application fields and the
/// default team.
pub fn enrich_topics(topics: Vec<Topic>, reference: &[ApplicationRef]) -> Vec<EnrichedTopic> {
    let by_trigram: BTreeMap<&str, &ApplicationRef> = reference
        .iter()
        .map(|row| (row.trigram.as_str(), row))
        .collect();

    topics
        .into_iter()
        .map(|topic| {
            let application_code = application_code(&topic.technical_name);
            let hit = application_code
                .as_deref()
                .and_then(|code| by_trigram.get(code).copied());
            EnrichedTopic {
                application_code,
                application: hit.map(|row| row.name.clone()),
                train: hit.map(|row| row.train.clone()),
                team: hit
                    .map(|row| row.agile_team.trim())
                    .filter(|team| !team.is_empty())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| DEFAULT_TEAM.to_string()),
                topic,
            }
        })
        .collect()
}

pub fn entity_flag(fields_to_align: usize) -> &'static str {
    if fields_to_align > 0 {
        "Topics Entités"
    } else {
        "Topics Fonctionnels"
    }
}

pub fn glossary_percent(counts: AlignmentCounts) -> f64 {
    if counts.fields_to_align == 0 {
        0.0
    } else {
        counts.aligned_fields as f64 / counts.fields_to_align as f64 * 100.0
    }
}

/// Report headers in contract order. Must stay in lockstep with the serde
/// renames on [`ReportRow`].
pub const REPORT_HEADERS: [&str; 24] = [
    "Train",
    "Application",
    "Code applicatio",
    "Equipe",
    "Nom du topic",
    "Type",
    "Flag topic entité ?",
    "Date de création du topic",
    "Date de dernière modification du topic",
    "Path",
    "Description",
    "Nombre de données de la payload",
    "Nombre de données technique de la payload",
    "Nombre de données à usage local de la payload",
    "Nombre de données à aligner fonctionnellement",
    "Status du topic",
    "Nombre de données avec lineage technique",
    "Nombre de données avec lineage fonctionnel",
    "Nombre de données alignés au glossaire",
    "% lineage technique",
    "% lineage fonctionnel",
    "% lineage glossaire",
    "Classe de pourcentage",
    "Nouveau topic",
];

/// Output row of the enriched-topics report. Header spelling and column
/// order are a frozen interface contract, the `Code applicatio` typo
/// included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "Train")]
    pub train: String,
    #[serde(rename = "Application")]
    pub application: String,
    #[serde(rename = "Code applicatio")]
    pub application_code: String,
    #[serde(rename = "Equipe")]
    pub team: String,
    #[serde(rename = "Nom du topic")]
    pub topic_name: String,
    #[serde(rename = "Type")]
    pub topic_type: String,
    #[serde(rename = "Flag topic entité ?")]
    pub entity_flag: String,
    #[serde(rename = "Date de création du topic")]
    pub created_at: String,
    #[serde(rename = "Date de dernière modification du topic")]
    pub modified_at: String,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Nombre de données de la payload")]
    pub payload_fields: usize,
    #[serde(rename = "Nombre de données technique de la payload")]
    pub technical_fields: usize,
    #[serde(rename = "Nombre de données à usage local de la payload")]
    pub local_fields: String,
    #[serde(rename = "Nombre de données à aligner fonctionnellement")]
    pub functional_fields: String,
    #[serde(rename = "Status du topic")]
    pub status: String,
    #[serde(rename = "Nombre de données avec lineage technique")]
    pub technical_lineage: String,
    #[serde(rename = "Nombre de données avec lineage fonctionnel")]
    pub functional_lineage: String,
    #[serde(rename = "Nombre de données alignés au glossaire")]
    pub aligned_fields: usize,
    #[serde(rename = "% lineage technique")]
    pub technical_lineage_percent: String,
    #[serde(rename = "% lineage fonctionnel")]
    pub functional_lineage_percent: String,
    #[serde(rename = "% lineage glossaire")]
    pub glossary_percent: f64,
    #[serde(rename = "Classe de pourcentage")]
    pub percent_class: String,
    // reports written before the diff column existed omit it
    #[serde(rename = "Nouveau topic", default)]
    pub new_topic: String,
}

impl ReportRow {
    pub fn from_enriched(enriched: &EnrichedTopic, counts: AlignmentCounts) -> Self {
        let attrs = &enriched.topic.attributes;
        Self {
            train: enriched.train.clone().unwrap_or_default(),
            application: enriched.application.clone().unwrap_or_default(),
            application_code: enriched.application_code.clone().unwrap_or_default(),
            team: enriched.team.clone(),
            topic_name: enriched.topic.name.clone(),
            topic_type: attrs.topic_type.clone().unwrap_or_default(),
            entity_flag: entity_flag(counts.fields_to_align).to_string(),
            created_at: attrs.creation_time.clone().unwrap_or_default(),
            modified_at: attrs.last_modification_time.clone().unwrap_or_default(),
            path: enriched.topic.path.clone(),
            description: attrs.description.clone().unwrap_or_default(),
            payload_fields: counts.fields_to_align,
            technical_fields: counts.fields_to_align,
            local_fields: String::new(),
            functional_fields: String::new(),
            status: attrs.status.clone().unwrap_or_default(),
            technical_lineage: String::new(),
            functional_lineage: String::new(),
            aligned_fields: counts.aligned_fields,
            technical_lineage_percent: String::new(),
            functional_lineage_percent: String::new(),
            glossary_percent: glossary_percent(counts),
            percent_class: String::new(),
            new_topic: String::new(),
        }
    }

    /// Stable identity used when diffing against a prior report.
    pub fn diff_key(&self) -> String {
        format!("{}:{}", self.application_code, self.topic_name)
    }

    pub fn mark_new(&mut self) {
        self.new_topic = "Oui".to_string();
    }
}
