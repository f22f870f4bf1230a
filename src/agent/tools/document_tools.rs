use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, DocumentRef, Tool, ToolContext, ToolError, ToolOutput};
use crate::documents::{format_currency, AmountComparison, Document, SearchQuery};

pub struct SearchTool;
pub struct ReaderTool;
pub struct StatisticsTool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    Keyword,
    Type,
    Amount,
    AmountRange,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Search terms for keyword search, or a document type such as "invoice" for type search.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub search_type: SearchType,
    /// Used with search_type "amount"; defaults to "over".
    #[serde(default)]
    pub comparison: Option<AmountComparison>,
    /// Used with search_type "amount".
    #[serde(default)]
    pub amount: Option<f64>,
    /// Lower bound for search_type "amount_range".
    #[serde(default)]
    pub min_amount: Option<f64>,
    /// Upper bound for search_type "amount_range".
    #[serde(default)]
    pub max_amount: Option<f64>,
}

impl SearchArgs {
    fn into_query(self) -> Result<SearchQuery, ToolError> {
        let invalid = |reason: &str| ToolError::InvalidArguments { tool: "document_search".into(), reason: reason.into() };
        let query = self.query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty());
        match self.search_type {
            SearchType::Keyword => query.map(SearchQuery::Keyword).ok_or_else(|| invalid("query is required")),
            SearchType::Type => query.map(SearchQuery::Type).ok_or_else(|| invalid("query must name a document type")),
            SearchType::Amount => Ok(SearchQuery::Amount {
                comparison: self.comparison.unwrap_or(AmountComparison::Over),
                amount: self.amount.ok_or_else(|| invalid("amount is required for amount search"))?,
            }),
            SearchType::AmountRange => {
                if self.min_amount.is_none() && self.max_amount.is_none() {
                    return Err(invalid("min_amount or max_amount is required for amount_range search"));
                }
                Ok(SearchQuery::AmountRange { min: self.min_amount, max: self.max_amount })
            }
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadArgs {
    /// Exact document id, e.g. "INV-001".
    pub doc_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoArgs {}

fn summary_line(doc: &Document) -> String {
    let mut line = format!("- ID: {} | {} | Type: {}", doc.id, doc.title, doc.doc_type);
    if let Some(amount) = doc.amount {
        line.push_str(&format!(" | Amount: {}", format_currency(amount)));
    }
    if let Some(date) = &doc.date {
        line.push_str(&format!(" | Date: {}", date));
    }
    line
}

fn doc_ref(doc: &Document) -> DocumentRef {
    DocumentRef { id: doc.id.clone(), amount: doc.amount }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str { "document_search" }

    fn description(&self) -> &'static str {
        "Search documents by keyword, document type, amount threshold or amount range."
    }

    fn parameters(&self) -> Value {
        schemars::schema_for!(SearchArgs).to_value()
    }

    async fn run(&self, ctx: ToolContext<'_>, args: Value) -> Result<ToolOutput, ToolError> {
        let query = parse_args::<SearchArgs>(self.name(), args)?.into_query()?;
        let hits = ctx.store.search(&query).await;
        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("No documents found for {}.", query.describe())));
        }
        let mut content = format!("Found {} document(s) for {}:", hits.len(), query.describe());
        for doc in &hits {
            content.push('\n');
            content.push_str(&summary_line(doc));
        }
        Ok(ToolOutput::text(content).with_documents(hits.iter().map(doc_ref).collect()))
    }
}

#[async_trait]
impl Tool for ReaderTool {
    fn name(&self) -> &'static str { "document_reader" }

    fn description(&self) -> &'static str {
        "Read the full content of one document by its id."
    }

    fn parameters(&self) -> Value {
        schemars::schema_for!(ReadArgs).to_value()
    }

    async fn run(&self, ctx: ToolContext<'_>, args: Value) -> Result<ToolOutput, ToolError> {
        let args: ReadArgs = parse_args(self.name(), args)?;
        let doc = ctx
            .store
            .get(&args.doc_id)
            .await
            .ok_or_else(|| ToolError::DocumentNotFound(args.doc_id.trim().to_string()))?;
        let mut content = format!("ID: {}\nTitle: {}\nType: {}\n", doc.id, doc.title, doc.doc_type);
        if let Some(amount) = doc.amount {
            content.push_str(&format!("Amount: {}\n", format_currency(amount)));
        }
        if let Some(date) = &doc.date {
            content.push_str(&format!("Date: {}\n", date));
        }
        content.push('\n');
        content.push_str(&doc.content);
        Ok(ToolOutput::text(content).with_documents(vec![doc_ref(&doc)]))
    }
}

#[async_trait]
impl Tool for StatisticsTool {
    fn name(&self) -> &'static str { "document_statistics" }

    fn description(&self) -> &'static str {
        "Overview of the corpus: document counts by type and amount totals."
    }

    fn parameters(&self) -> Value {
        schemars::schema_for!(NoArgs).to_value()
    }

    async fn run(&self, ctx: ToolContext<'_>, _args: Value) -> Result<ToolOutput, ToolError> {
        let stats = ctx.store.statistics().await;
        let mut content = format!("Document statistics: {} document(s)", stats.total_documents);
        for (ty, count) in &stats.by_type {
            content.push_str(&format!("\n- {}: {}", ty, count));
        }
        if let (Some(avg), Some(min), Some(max)) = (stats.average_amount, stats.min_amount, stats.max_amount) {
            content.push_str(&format!(
                "\nAmounts across {} document(s): total {}, average {}, min {}, max {}",
                stats.documents_with_amounts,
                format_currency(stats.total_amount),
                format_currency(avg),
                format_currency(min),
                format_currency(max),
            ));
        }
        let data = serde_json::to_value(&stats).unwrap_or_else(|_| json!({}));
        Ok(ToolOutput::text(content).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::InMemoryCorpus;
    use uuid::Uuid;

    fn ctx(store: &InMemoryCorpus) -> ToolContext<'_> {
        ToolContext { store, session_id: Uuid::new_v4() }
    }

    #[tokio::test]
    async fn search_lists_ids_and_amounts() {
        let store = InMemoryCorpus::with_sample_documents();
        let out = SearchTool
            .run(ctx(&store), json!({"query": "invoice", "search_type": "type"}))
            .await
            .unwrap();
        assert!(out.content.starts_with("Found 3 document(s)"));
        assert!(out.content.contains("ID: INV-002"));
        let amounts: Vec<_> = out.documents.iter().map(|d| d.amount.unwrap()).collect();
        assert_eq!(amounts, [22000.0, 69300.0, 214500.0]);
    }

    #[tokio::test]
    async fn empty_search_is_not_an_error() {
        let store = InMemoryCorpus::with_sample_documents();
        let out = SearchTool.run(ctx(&store), json!({"query": "spaceship"})).await.unwrap();
        assert!(out.documents.is_empty());
        assert!(out.content.starts_with("No documents found"));
    }

    #[tokio::test]
    async fn amount_search_arguments() {
        let store = InMemoryCorpus::with_sample_documents();
        let out = SearchTool
            .run(ctx(&store), json!({"search_type": "amount", "comparison": "under", "amount": 20000}))
            .await
            .unwrap();
        assert_eq!(out.documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["CLM-001"]);

        let err = SearchTool.run(ctx(&store), json!({"search_type": "amount"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        let err = SearchTool.run(ctx(&store), json!({"search_type": "amount_range"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn reader_returns_content_or_not_found() {
        let store = InMemoryCorpus::with_sample_documents();
        let out = ReaderTool.run(ctx(&store), json!({"doc_id": "CON-001"})).await.unwrap();
        assert!(out.content.contains("Total contract value: $180,000"));
        assert_eq!(out.documents, vec![DocumentRef { id: "CON-001".into(), amount: Some(180000.0) }]);

        let err = ReaderTool.run(ctx(&store), json!({"doc_id": "INV-404"})).await.unwrap_err();
        assert_eq!(err, ToolError::DocumentNotFound("INV-404".into()));
    }

    #[tokio::test]
    async fn statistics_summarise_corpus() {
        let store = InMemoryCorpus::with_sample_documents();
        let out = StatisticsTool.run(ctx(&store), Value::Null).await.unwrap();
        assert!(out.content.contains("5 document(s)"));
        assert!(out.content.contains("- invoice: 3"));
        assert_eq!(out.data.unwrap()["total_documents"], 5);
    }
}
