use serde::Serialize;
use std::fmt::Write as FmtWrite;

use crate::models::{EmbedStats, IngestStats, OutputFormat, SearchResults, StoreOverview};

pub trait Formatter {
    fn format_ingest_stats(&self, stats: &IngestStats) -> String;
    fn format_embed_stats(&self, stats: &EmbedStats) -> String;
    fn format_overview(&self, overview: &StoreOverview) -> String;
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_dois(&self, title: &str, dois: &[String]) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

fn preview(text: &str, max: usize) -> String {
    let head: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{}...", head)
    } else {
        head
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        let mut output = String::new();
        let title = if stats.cancelled {
            "Transform Cancelled"
        } else {
            "Transform Complete"
        };
        writeln!(output, "{}", title).unwrap();
        writeln!(output, "{}", "-".repeat(title.len())).unwrap();
        writeln!(
            output,
            "Shards:        {} ok, {} failed, {} total",
            stats.shards_ok, stats.shards_failed, stats.shards_total
        )
        .unwrap();
        writeln!(output, "Items read:    {}", stats.items_read).unwrap();
        writeln!(output, "Malformed:     {}", stats.malformed_items).unwrap();
        writeln!(output, "Accepted:      {}", stats.accepted).unwrap();
        writeln!(
            output,
            "Rejected:      {} (missing DOI: {}, not an object: {})",
            stats.rejected.total(),
            stats.rejected.missing_doi,
            stats.rejected.not_an_object
        )
        .unwrap();
        writeln!(output, "Deduplicated:  {}", stats.deduplicated).unwrap();
        writeln!(
            output,
            "Store:         {} inserted, {} replaced, {} unchanged",
            stats.inserted, stats.replaced, stats.unchanged
        )
        .unwrap();
        writeln!(output, "Partitions:    {}", stats.partitions_written).unwrap();
        writeln!(output, "Duration:      {}ms", stats.duration_ms).unwrap();

        if !stats.failures.is_empty() {
            writeln!(output, "\nFailed shards:").unwrap();
            for failure in &stats.failures {
                writeln!(output, "  {}: {}", failure.path.display(), failure.error).unwrap();
            }
        }
        output
    }

    fn format_embed_stats(&self, stats: &EmbedStats) -> String {
        let mut output = String::new();
        let title = if stats.cancelled {
            "Embedding Cancelled"
        } else {
            "Embedding Complete"
        };
        writeln!(output, "{}", title).unwrap();
        writeln!(output, "{}", "-".repeat(title.len())).unwrap();
        writeln!(output, "Model:       {}", stats.model_id).unwrap();
        writeln!(output, "Candidates:  {}", stats.candidates).unwrap();
        writeln!(
            output,
            "Embedded:    {} ({} refreshed)",
            stats.embedded, stats.refreshed
        )
        .unwrap();
        writeln!(
            output,
            "Skipped:     {} ({} transient, {} permanent)",
            stats.skipped(),
            stats.failed_transient,
            stats.failed_permanent
        )
        .unwrap();
        writeln!(output, "Calls:       {}", stats.calls).unwrap();
        writeln!(output, "Duration:    {}ms", stats.duration_ms).unwrap();
        output
    }

    fn format_overview(&self, overview: &StoreOverview) -> String {
        let mut output = String::new();
        writeln!(output, "Store").unwrap();
        writeln!(output, "-----").unwrap();
        writeln!(output, "Path:           {}", overview.store_path.display()).unwrap();
        writeln!(output, "Buckets:        {}", overview.bucket_count).unwrap();
        writeln!(output, "Records:        {}", overview.records).unwrap();
        writeln!(output, "  with abstract: {}", overview.with_abstract).unwrap();
        writeln!(output, "  with date:     {}", overview.with_date).unwrap();
        for (source_type, count) in &overview.by_source_type {
            writeln!(output, "  {:<14} {}", source_type, count).unwrap();
        }
        writeln!(output).unwrap();

        writeln!(output, "Embeddings").unwrap();
        writeln!(output, "----------").unwrap();
        if overview.embeddings.is_empty() {
            writeln!(output, "  (none)").unwrap();
        }
        for model in &overview.embeddings {
            let active = if model.model_id == overview.active_model {
                " [active]"
            } else {
                ""
            };
            let dimension = model
                .dimension
                .map(|d| format!(", dim {}", d))
                .unwrap_or_default();
            writeln!(
                output,
                "  {}{}: {}{}",
                model.model_id, active, model.embeddings, dimension
            )
            .unwrap();
        }
        writeln!(
            output,
            "  Missing for {}: {}",
            overview.active_model, overview.missing_active
        )
        .unwrap();
        writeln!(output).unwrap();

        writeln!(output, "Runs").unwrap();
        writeln!(output, "----").unwrap();
        let t = &overview.totals;
        writeln!(
            output,
            "  {} runs: {} accepted, {} rejected, {} deduplicated, {} embedded, {} skipped",
            t.runs, t.accepted, t.rejected, t.deduplicated, t.embedded, t.skipped
        )
        .unwrap();
        for run in &overview.recent_runs {
            let note = if run.cancelled { " (cancelled)" } else { "" };
            writeln!(
                output,
                "  #{} {} {} {}ms{}",
                run.id, run.kind, run.started_at, run.duration_ms, note
            )
            .unwrap();
        }
        output
    }

    fn format_search_results(&self, results: &SearchResults) -> String {
        let query = results.keywords.join(" ");
        if results.is_empty() {
            return format!("No results found for: {}\n", query);
        }

        let mut output = String::new();
        writeln!(output, "Search results for: \"{}\"", query).unwrap();
        writeln!(
            output,
            "Found {} results in {}ms (showing {})\n",
            results.total,
            results.duration_ms,
            results.len()
        )
        .unwrap();

        for (i, hit) in results.hits.iter().enumerate() {
            let year = hit.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
            writeln!(
                output,
                "{}. [{}] {}",
                i + 1,
                hit.short_id,
                hit.title.as_deref().unwrap_or("(untitled)")
            )
            .unwrap();
            writeln!(output, "   DOI: {}", hit.doi).unwrap();
            writeln!(
                output,
                "   {} ({}), {}",
                hit.first_author.as_deref().unwrap_or("Unknown author"),
                year,
                hit.source_type
            )
            .unwrap();
            if let Some(ref container) = hit.container_title {
                writeln!(output, "   In: {}", container).unwrap();
            }
            if let Some(ref text) = hit.abstract_text {
                writeln!(output, "   ---").unwrap();
                writeln!(output, "   {}", preview(text, 200)).unwrap();
            }
            writeln!(output).unwrap();
        }

        output
    }

    fn format_dois(&self, title: &str, dois: &[String]) -> String {
        let mut output = String::new();
        writeln!(output, "{} ({})", title, dois.len()).unwrap();
        for doi in dois {
            writeln!(output, "{}", doi).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl Formatter for JsonFormatter {
    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        self.render(stats)
    }

    fn format_embed_stats(&self, stats: &EmbedStats) -> String {
        self.render(stats)
    }

    fn format_overview(&self, overview: &StoreOverview) -> String {
        let by_type: serde_json::Map<String, serde_json::Value> = overview
            .by_source_type
            .iter()
            .map(|(t, n)| (t.clone(), serde_json::json!(n)))
            .collect();

        let json = serde_json::json!({
            "store": {
                "path": overview.store_path,
                "bucket_count": overview.bucket_count,
                "records": overview.records,
                "with_abstract": overview.with_abstract,
                "with_date": overview.with_date,
                "by_source_type": by_type,
            },
            "embeddings": {
                "active_model": overview.active_model,
                "missing_active": overview.missing_active,
                "models": overview.embeddings,
            },
            "runs": {
                "totals": overview.totals,
                "recent": overview.recent_runs,
            }
        });
        self.render(&json)
    }

    fn format_search_results(&self, results: &SearchResults) -> String {
        self.render(results)
    }

    fn format_dois(&self, title: &str, dois: &[String]) -> String {
        self.render(&serde_json::json!({
            "title": title,
            "count": dois.len(),
            "dois": dois,
        }))
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        let mut output = String::new();
        let title = if stats.cancelled {
            "Transform Cancelled"
        } else {
            "Transform Complete"
        };
        writeln!(output, "## {}\n", title).unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Shards | {} |", stats.shards_total).unwrap();
        writeln!(output, "| Failed shards | {} |", stats.shards_failed).unwrap();
        writeln!(output, "| Items read | {} |", stats.items_read).unwrap();
        writeln!(output, "| Malformed | {} |", stats.malformed_items).unwrap();
        writeln!(output, "| Accepted | {} |", stats.accepted).unwrap();
        writeln!(output, "| Rejected | {} |", stats.rejected.total()).unwrap();
        writeln!(output, "| Deduplicated | {} |", stats.deduplicated).unwrap();
        writeln!(output, "| Inserted | {} |", stats.inserted).unwrap();
        writeln!(output, "| Replaced | {} |", stats.replaced).unwrap();
        writeln!(output, "| Unchanged | {} |", stats.unchanged).unwrap();
        writeln!(output, "| Duration | {}ms |", stats.duration_ms).unwrap();

        if !stats.failures.is_empty() {
            writeln!(output, "\n### Failed shards\n").unwrap();
            for failure in &stats.failures {
                writeln!(
                    output,
                    "- `{}`: {}",
                    failure.path.display(),
                    failure.error
                )
                .unwrap();
            }
        }
        output
    }

    fn format_embed_stats(&self, stats: &EmbedStats) -> String {
        let mut output = String::new();
        writeln!(output, "## Embedding `{}`\n", stats.model_id).unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Candidates | {} |", stats.candidates).unwrap();
        writeln!(output, "| Embedded | {} |", stats.embedded).unwrap();
        writeln!(output, "| Refreshed | {} |", stats.refreshed).unwrap();
        writeln!(output, "| Transient failures | {} |", stats.failed_transient).unwrap();
        writeln!(output, "| Permanent failures | {} |", stats.failed_permanent).unwrap();
        writeln!(output, "| Calls | {} |", stats.calls).unwrap();
        writeln!(output, "| Cancelled | {} |", stats.cancelled).unwrap();
        writeln!(output, "| Duration | {}ms |", stats.duration_ms).unwrap();
        output
    }

    fn format_overview(&self, overview: &StoreOverview) -> String {
        let mut output = String::new();
        writeln!(output, "## Store\n").unwrap();
        writeln!(output, "- **Path:** `{}`", overview.store_path.display()).unwrap();
        writeln!(output, "- **Buckets:** {}", overview.bucket_count).unwrap();
        writeln!(output, "- **Records:** {}", overview.records).unwrap();
        writeln!(output, "- **With abstract:** {}", overview.with_abstract).unwrap();
        writeln!(output, "- **With date:** {}\n", overview.with_date).unwrap();

        if !overview.by_source_type.is_empty() {
            writeln!(output, "| Type | Records |").unwrap();
            writeln!(output, "|------|---------|").unwrap();
            for (source_type, count) in &overview.by_source_type {
                writeln!(output, "| `{}` | {} |", source_type, count).unwrap();
            }
            writeln!(output).unwrap();
        }

        writeln!(output, "## Embeddings\n").unwrap();
        writeln!(output, "| Model | Vectors | Dimension |").unwrap();
        writeln!(output, "|-------|---------|-----------|").unwrap();
        for model in &overview.embeddings {
            let dimension = model
                .dimension
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".into());
            writeln!(
                output,
                "| `{}` | {} | {} |",
                model.model_id, model.embeddings, dimension
            )
            .unwrap();
        }
        writeln!(
            output,
            "\n**Missing for `{}`:** {}\n",
            overview.active_model, overview.missing_active
        )
        .unwrap();

        writeln!(output, "## Recent Runs\n").unwrap();
        writeln!(output, "| # | Kind | Started | Duration |").unwrap();
        writeln!(output, "|---|------|---------|----------|").unwrap();
        for run in &overview.recent_runs {
            writeln!(
                output,
                "| {} | {} | {} | {}ms |",
                run.id, run.kind, run.started_at, run.duration_ms
            )
            .unwrap();
        }
        output
    }

    fn format_search_results(&self, results: &SearchResults) -> String {
        let query = results.keywords.join(" ");
        if results.is_empty() {
            return format!("## No results found\n\nKeywords: `{}`\n", query);
        }

        let mut output = String::new();
        writeln!(output, "## Search Results\n").unwrap();
        writeln!(output, "**Keywords:** `{}`\n", query).unwrap();
        writeln!(
            output,
            "Found {} results in {}ms\n",
            results.total, results.duration_ms
        )
        .unwrap();

        for (i, hit) in results.hits.iter().enumerate() {
            writeln!(
                output,
                "### {}. {}\n",
                i + 1,
                hit.title.as_deref().unwrap_or("(untitled)")
            )
            .unwrap();
            writeln!(output, "- **DOI:** `{}`", hit.doi).unwrap();
            if let Some(ref author) = hit.first_author {
                writeln!(output, "- **First author:** {}", author).unwrap();
            }
            if let Some(year) = hit.year {
                writeln!(output, "- **Year:** {}", year).unwrap();
            }
            writeln!(output, "- **Type:** {}\n", hit.source_type).unwrap();
            if let Some(ref text) = hit.abstract_text {
                writeln!(output, "> {}\n", preview(text, 400)).unwrap();
            }
        }

        output
    }

    fn format_dois(&self, title: &str, dois: &[String]) -> String {
        let mut output = String::new();
        writeln!(output, "## {} ({})\n", title, dois.len()).unwrap();
        for doi in dois {
            writeln!(output, "- `{}`", doi).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchHit, SourceType};

    fn results() -> SearchResults {
        SearchResults {
            keywords: vec!["graph".into()],
            hits: vec![SearchHit {
                doi: "10.1/a".into(),
                short_id: "abcdef0123".into(),
                title: Some("Graph Methods".into()),
                first_author: Some("Lovelace, Ada".into()),
                year: Some(2021),
                source_type: SourceType::JournalArticle,
                container_title: None,
                abstract_text: Some("We study graphs.".into()),
            }],
            total: 1,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_text_search_results() {
        let text = TextFormatter.format_search_results(&results());
        assert!(text.contains("[abcdef0123] Graph Methods"));
        assert!(text.contains("Lovelace, Ada (2021)"));
    }

    #[test]
    fn test_json_search_results_parse() {
        let json = JsonFormatter::new(false).format_search_results(&results());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["hits"][0]["doi"], "10.1/a");
        assert_eq!(value["hits"][0]["abstract"], "We study graphs.");
    }

    #[test]
    fn test_ingest_stats_lists_failures() {
        let stats = IngestStats {
            shards_failed: 1,
            failures: vec![crate::models::ShardFailure {
                path: "bad.json".into(),
                error: "truncated".into(),
            }],
            ..Default::default()
        };
        let text = TextFormatter.format_ingest_stats(&stats);
        assert!(text.contains("bad.json: truncated"));
        let md = MarkdownFormatter.format_ingest_stats(&stats);
        assert!(md.contains("`bad.json`: truncated"));
    }

    #[test]
    fn test_dois_formats() {
        let dois = vec!["10.1/a".to_string()];
        assert!(TextFormatter.format_dois("Missing PDFs", &dois).contains("10.1/a"));
        let json = JsonFormatter::new(true).format_dois("Missing PDFs", &dois);
        assert!(json.contains("\"count\": 1"));
    }

    #[test]
    fn test_error_formats() {
        let message = "failed to open store: locked";
        assert_eq!(
            get_formatter(OutputFormat::Text).format_error(message),
            "Error: failed to open store: locked\n"
        );
        let json = get_formatter(OutputFormat::Json).format_error(message);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"], message);
        assert!(
            get_formatter(OutputFormat::Markdown)
                .format_error(message)
                .contains("**Error:** failed to open store")
        );
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
