//! Document corpus consumed by the search, reader and statistics tools.
//!
//! The corpus itself is an external collaborator; [`InMemoryCorpus`] is the
//! implementation the binary ships with (sample data or a JSON file).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub doc_type: String,
    pub content: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AmountComparison {
    Over,
    Under,
    Exact,
    Approximate,
}

impl AmountComparison {
    pub fn matches(&self, value: f64, target: f64) -> bool {
        match self {
            AmountComparison::Over => value > target,
            AmountComparison::Under => value < target,
            AmountComparison::Exact => (value - target).abs() < 0.01,
            AmountComparison::Approximate => (value - target).abs() <= target.abs() * 0.1,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AmountComparison::Over => "over",
            AmountComparison::Under => "under",
            AmountComparison::Exact => "exactly",
            AmountComparison::Approximate => "around",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Keyword(String),
    Type(String),
    Amount { comparison: AmountComparison, amount: f64 },
    AmountRange { min: Option<f64>, max: Option<f64> },
}

impl SearchQuery {
    pub fn describe(&self) -> String {
        match self {
            SearchQuery::Keyword(q) => format!("keyword \"{}\"", q),
            SearchQuery::Type(t) => format!("type \"{}\"", t),
            SearchQuery::Amount { comparison, amount } => {
                format!("amount {} {}", comparison.label(), format_currency(*amount))
            }
            SearchQuery::AmountRange { min, max } => format!(
                "amount between {} and {}",
                min.map(format_currency).unwrap_or_else(|| "any".into()),
                max.map(format_currency).unwrap_or_else(|| "any".into()),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorpusStatistics {
    pub total_documents: usize,
    pub by_type: BTreeMap<String, usize>,
    pub documents_with_amounts: usize,
    pub total_amount: f64,
    pub average_amount: Option<f64>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Vec<Document>;
    async fn get(&self, id: &str) -> Option<Document>;
    async fn statistics(&self) -> CorpusStatistics;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    documents: Vec<Document>,
}

static TERM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:-[a-z0-9]+)*").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "are", "for", "in", "is", "me", "of", "on", "our", "s", "show", "tell",
    "the", "to", "what", "whats", "which", "with",
];

impl InMemoryCorpus {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let documents: Vec<Document> = serde_json::from_str(&raw)?;
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn with_sample_documents() -> Self {
        Self::new(sample_documents())
    }

    fn keyword_matches(&self, query: &str) -> Vec<Document> {
        let lowered = query.to_lowercase();
        let terms: Vec<&str> = TERM
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|t| !STOPWORDS.contains(t))
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        // A term naming a document id narrows the result to those documents.
        let by_id: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| terms.contains(&d.id.to_lowercase().as_str()))
            .cloned()
            .collect();
        if !by_id.is_empty() {
            return by_id;
        }

        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .filter_map(|d| {
                let haystack = format!("{} {} {} {}", d.id, d.title, d.doc_type, d.content).to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(**t)).count();
                (score > 0).then_some((score, d))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.into_iter().map(|(_, d)| d.clone()).collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryCorpus {
    async fn search(&self, query: &SearchQuery) -> Vec<Document> {
        match query {
            SearchQuery::Keyword(q) => self.keyword_matches(q),
            SearchQuery::Type(t) => {
                let wanted = t.trim().to_lowercase();
                let singular = wanted.strip_suffix('s').unwrap_or(&wanted).to_string();
                self.documents
                    .iter()
                    .filter(|d| {
                        let ty = d.doc_type.to_lowercase();
                        ty == wanted || ty == singular
                    })
                    .cloned()
                    .collect()
            }
            SearchQuery::Amount { comparison, amount } => self
                .documents
                .iter()
                .filter(|d| d.amount.is_some_and(|a| comparison.matches(a, *amount)))
                .cloned()
                .collect(),
            SearchQuery::AmountRange { min, max } => self
                .documents
                .iter()
                .filter(|d| {
                    d.amount.is_some_and(|a| {
                        min.is_none_or(|lo| a >= lo) && max.is_none_or(|hi| a <= hi)
                    })
                })
                .cloned()
                .collect(),
        }
    }

    async fn get(&self, id: &str) -> Option<Document> {
        let id = id.trim();
        self.documents.iter().find(|d| d.id.eq_ignore_ascii_case(id)).cloned()
    }

    async fn statistics(&self) -> CorpusStatistics {
        let mut stats = CorpusStatistics {
            total_documents: self.documents.len(),
            ..Default::default()
        };
        for doc in &self.documents {
            *stats.by_type.entry(doc.doc_type.to_lowercase()).or_default() += 1;
            if let Some(amount) = doc.amount {
                stats.documents_with_amounts += 1;
                stats.total_amount += amount;
                stats.min_amount = Some(stats.min_amount.map_or(amount, |m| m.min(amount)));
                stats.max_amount = Some(stats.max_amount.map_or(amount, |m| m.max(amount)));
            }
        }
        if stats.documents_with_amounts > 0 {
            stats.average_amount = Some(stats.total_amount / stats.documents_with_amounts as f64);
        }
        stats
    }
}

/// `$1,234.50` style rendering used in tool output.
pub fn format_currency(amount: f64) -> String {
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}.{:02}", if negative { "-" } else { "" }, grouped, cents % 100)
}

fn doc(id: &str, title: &str, doc_type: &str, amount: f64, date: &str, content: &str) -> Document {
    Document {
        id: id.into(),
        title: title.into(),
        doc_type: doc_type.into(),
        content: content.into(),
        amount: Some(amount),
        date: Some(date.into()),
        metadata: BTreeMap::new(),
    }
}

fn sample_documents() -> Vec<Document> {
    vec![
        doc(
            "INV-001",
            "Invoice #INV-001 - Acme Corporation",
            "invoice",
            22000.0,
            "2024-01-15",
            "INVOICE #INV-001\nBill To: Acme Corporation\nServices: consulting for Q1 2024\n\
             - Strategic consulting: $15,000\n- Market analysis: $5,000\n- Report preparation: $2,000\n\
             Total Due: $22,000\nPayment Terms: Net 30",
        ),
        doc(
            "INV-002",
            "Invoice #INV-002 - TechStart Inc",
            "invoice",
            69300.0,
            "2024-02-20",
            "INVOICE #INV-002\nBill To: TechStart Inc\nServices: software development\n\
             - Backend platform build: $45,000\n- Mobile client: $18,000\nSubtotal: $63,000\n\
             Tax (10%): $6,300\nTotal Due: $69,300\nPayment Terms: Net 45",
        ),
        doc(
            "INV-003",
            "Invoice #INV-003 - Global Corp",
            "invoice",
            214500.0,
            "2024-03-10",
            "INVOICE #INV-003\nBill To: Global Corp\nServices: enterprise data migration\n\
             - Migration services: $150,000\n- Training: $45,000\nSubtotal: $195,000\n\
             Tax (10%): $19,500\nTotal Due: $214,500\nPayment Terms: Net 60",
        ),
        doc(
            "CON-001",
            "Service Agreement - DataCorp",
            "contract",
            180000.0,
            "2024-01-01",
            "SERVICE AGREEMENT CON-001\nParties: DocDacity Ltd and DataCorp\nTerm: 12 months from January 1, 2024\n\
             Scope: managed analytics services and monthly reporting\nMonthly fee: $15,000\n\
             Total contract value: $180,000\nTermination: 60 days written notice",
        ),
        doc(
            "CLM-001",
            "Insurance Claim - John Doe",
            "claim",
            15750.0,
            "2024-02-05",
            "INSURANCE CLAIM CLM-001\nClaimant: John Doe\nPolicy: HLT-55821\n\
             Description: emergency room visit and follow-up outpatient care\n\
             Amount claimed: $15,750\nStatus: under review",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn keyword_with_document_id_narrows_to_that_document() {
        let corpus = InMemoryCorpus::with_sample_documents();
        let hits = corpus
            .search(&SearchQuery::Keyword("What's the total amount in invoice INV-001?".into()))
            .await;
        let ids: Vec<_> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["INV-001"]);
    }

    #[tokio::test]
    async fn keyword_without_id_ranks_by_term_hits() {
        let corpus = InMemoryCorpus::with_sample_documents();
        let hits = corpus.search(&SearchQuery::Keyword("insurance claim".into())).await;
        assert_eq!(hits.first().map(|d| d.id.as_str()), Some("CLM-001"));
        let none = corpus.search(&SearchQuery::Keyword("zebra".into())).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn type_search_accepts_plural() {
        let corpus = InMemoryCorpus::with_sample_documents();
        let hits = corpus.search(&SearchQuery::Type("Invoices".into())).await;
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|d| d.doc_type == "invoice"));
    }

    #[tokio::test]
    async fn amount_filters() {
        let corpus = InMemoryCorpus::with_sample_documents();
        let over = corpus
            .search(&SearchQuery::Amount { comparison: AmountComparison::Over, amount: 50000.0 })
            .await;
        let mut ids: Vec<_> = over.iter().map(|d| d.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, ["CON-001", "INV-002", "INV-003"]);

        let around = corpus
            .search(&SearchQuery::Amount { comparison: AmountComparison::Approximate, amount: 21000.0 })
            .await;
        assert_eq!(around.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["INV-001"]);

        let range = corpus
            .search(&SearchQuery::AmountRange { min: Some(10000.0), max: Some(25000.0) })
            .await;
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn statistics_aggregate_amounts() {
        let corpus = InMemoryCorpus::with_sample_documents();
        let stats = corpus.statistics().await;
        assert_eq!(stats.total_documents, 5);
        assert_eq!(stats.by_type.get("invoice"), Some(&3));
        assert_eq!(stats.min_amount, Some(15750.0));
        assert_eq!(stats.max_amount, Some(214500.0));
        assert_eq!(stats.total_amount, 501550.0);
    }

    #[tokio::test]
    async fn get_is_case_insensitive() {
        let corpus = InMemoryCorpus::with_sample_documents();
        assert!(corpus.get("inv-002").await.is_some());
        assert!(corpus.get("INV-999").await.is_none());
    }

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_currency(22000.0), "$22,000.00");
        assert_eq!(format_currency(214500.5), "$214,500.50");
        assert_eq!(format_currency(999.0), "$999.00");
        assert_eq!(format_currency(-1234.0), "-$1,234.00");
    }

    #[test]
    fn loads_corpus_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(
            &path,
            r#"[{"id": "RPT-1", "title": "Q1 report", "doc_type": "report", "content": "revenue up"}]"#,
        )
        .unwrap();
        let corpus = InMemoryCorpus::from_json_file(&path).unwrap();
        assert_eq!(corpus.len(), 1);
    }
}
