//! HTML status page

use crate::error::ApiError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use ledger::LedgerEntry;
use std::borrow::Cow;
use std::fmt::Write;
use std::path::PathBuf;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Watchdog Status</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; }
th, td { padding: 0.3em 1em; border-bottom: 1px solid #ddd; text-align: left; }
tr.stale td, tr.alerted td { color: #b00; }
</style>
</head>
<body>
<h1>Watchdog Status</h1>
<p>{{count}} programs tracked, generated at {{generated_at}}</p>
<table>
<tr><th>ID</th><th>Last seen</th><th>Silent for</th><th>State</th></tr>
{{rows}}
</table>
</body>
</html>
"#;

const ROWS: &str = "{{rows}}";

/// Where the page template comes from
#[derive(Debug, Clone)]
enum TemplateSource {
    Embedded,
    /// Read on every request so edits apply without a restart
    File(PathBuf),
}

/// Renders ledger snapshots as HTML
#[derive(Debug, Clone)]
pub struct StatusPage {
    source: TemplateSource,
}

impl Default for StatusPage {
    fn default() -> Self {
        Self::embedded()
    }
}

impl StatusPage {
    pub fn embedded() -> Self {
        Self {
            source: TemplateSource::Embedded,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: TemplateSource::File(path.into()),
        }
    }

    async fn template(&self) -> Result<Cow<'static, str>, ApiError> {
        match &self.source {
            TemplateSource::Embedded => Ok(Cow::Borrowed(DEFAULT_TEMPLATE)),
            TemplateSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map(Cow::Owned)
                .map_err(|e| ApiError::Render(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    /// Render `entries` as of `now`
    pub async fn render(
        &self,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<String, ApiError> {
        let template = self.template().await?;
        if !template.contains(ROWS) {
            return Err(ApiError::Render(format!("template has no {} placeholder", ROWS)));
        }

        let mut rows = String::new();
        for entry in entries {
            let silent_for = now.signed_duration_since(entry.last_seen_at);
            let state = if entry.alerted {
                "alerted"
            } else if silent_for > threshold {
                "stale"
            } else {
                "alive"
            };
            // Writing to a String cannot fail
            let _ = writeln!(
                rows,
                "<tr class=\"{state}\"><td>{id}</td><td>{seen}</td><td>{silent}s</td><td>{state}</td></tr>",
                state = state,
                id = escape_html(&entry.id),
                seen = entry.last_seen_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                silent = silent_for.num_seconds().max(0),
            );
        }

        Ok(template
            .replace("{{count}}", &entries.len().to_string())
            .replace("{{generated_at}}", &now.to_rfc3339_opts(SecondsFormat::Secs, true))
            .replace(ROWS, &rows))
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
