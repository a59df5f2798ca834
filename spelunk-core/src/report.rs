// Report generation from a finished scan

use serde::{Deserialize, Serialize};
use spelunk_scanner::endpoint::Endpoint;
use spelunk_scanner::explorer::TraversalSummary;
use spelunk_scanner::session::ScanOutcome;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub informational: usize,
    pub success: usize,
    pub redirect: usize,
    pub client_error: usize,
    pub server_error: usize,
    pub other: usize,
}

impl StatusCounts {
    fn add(&mut self, code: u16) {
        match StatusClass::of(code) {
            StatusClass::Informational => self.informational += 1,
            StatusClass::Success => self.success += 1,
            StatusClass::Redirect => self.redirect += 1,
            StatusClass::ClientError => self.client_error += 1,
            StatusClass::ServerError => self.server_error += 1,
            StatusClass::Other => self.other += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    Informational,
    Other,
}

impl StatusClass {
    fn of(code: u16) -> Self {
        match code {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx Informational",
            StatusClass::Success => "2xx Success",
            StatusClass::Redirect => "3xx Redirection",
            StatusClass::ClientError => "4xx Client Error",
            StatusClass::ServerError => "5xx Server Error",
            StatusClass::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInfo {
    pub target: String,
    pub generated_at: String,
    pub elapsed_seconds: f64,
    pub logged_in: bool,
    pub summary: TraversalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub scan_info: ScanInfo,
    pub status_counts: StatusCounts,
    pub endpoints: Vec<Endpoint>,
}

impl ReportData {
    pub fn from_outcome(outcome: &ScanOutcome) -> Self {
        let mut status_counts = StatusCounts::default();
        for endpoint in &outcome.endpoints {
            status_counts.add(endpoint.response.code);
        }
        Self {
            scan_info: ScanInfo {
                target: outcome.target.clone(),
                generated_at: chrono::Utc::now().to_rfc3339(),
                elapsed_seconds: outcome.elapsed.as_secs_f64(),
                logged_in: outcome.logged_in,
                summary: outcome.summary.clone(),
            },
            status_counts,
            endpoints: outcome.endpoints.clone(),
        }
    }

    fn status(&self) -> &'static str {
        if self.scan_info.summary.cancelled {
            "Partial (stopped early)"
        } else {
            "Completed"
        }
    }

    fn login_state(&self) -> &'static str {
        if self.scan_info.logged_in {
            "authenticated"
        } else {
            "unauthenticated"
        }
    }

    /// Endpoints grouped by status class, classes in report order.
    fn grouped(&self) -> Vec<(StatusClass, Vec<&Endpoint>)> {
        let mut groups: Vec<(StatusClass, Vec<&Endpoint>)> = Vec::new();
        for endpoint in &self.endpoints {
            let class = StatusClass::of(endpoint.response.code);
            match groups.iter_mut().find(|(c, _)| *c == class) {
                Some((_, members)) => members.push(endpoint),
                None => groups.push((class, vec![endpoint])),
            }
        }
        groups.sort_by_key(|(class, _)| *class);
        groups
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();
    let info = &data.scan_info;

    report.push_str(RULE);
    report.push_str("                         SPELUNK ENDPOINT REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Target:       {}\n", info.target));
    report.push_str(&format!("Status:       {}\n", data.status()));
    report.push_str(&format!("Generated:    {}\n", info.generated_at));
    report.push_str(&format!("Duration:     {:.1} seconds\n", info.elapsed_seconds));
    report.push_str(&format!("Session:      {}\n", data.login_state()));
    report.push_str(&format!(
        "Locations:    {} explored, {} failed, {} discovered\n",
        info.summary.processed, info.summary.failed, info.summary.claimed
    ));
    report.push_str(&format!("Endpoints:    {}\n\n", data.endpoints.len()));

    for (class, endpoints) in data.grouped() {
        report.push_str(RULE);
        report.push_str(&format!("{} ({})\n", class.title().to_uppercase(), endpoints.len()));
        report.push_str(RULE);
        report.push('\n');
        for endpoint in endpoints {
            report.push_str(&format!(
                "  {:<7} {} [{}]\n",
                endpoint.request.method, endpoint.uri, endpoint.response.code
            ));
            if !endpoint.request.body.is_empty() {
                report.push_str(&format!(
                    "          body: {}\n",
                    truncate(&endpoint.request.body, 70)
                ));
            }
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str(&format!("Total endpoints: {}\n", data.endpoints.len()));
    report.push_str(RULE);
    report.push_str("\nGenerated by Spelunk\n");
    report.push_str("For authorized security testing only.\n\n");

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Spelunk",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": data.scan_info.generated_at,
                "format": "json",
                "disclaimer": "For authorized security testing only"
            },
            "scan": {
                "target": data.scan_info.target,
                "status": data.status(),
                "authenticated": data.scan_info.logged_in,
                "duration_seconds": data.scan_info.elapsed_seconds,
                "locations": data.scan_info.summary,
            },
            "summary": {
                "total_endpoints": data.endpoints.len(),
                "status_breakdown": data.status_counts,
            },
            "endpoints": data.endpoints,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_csv_report(data: &ReportData) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "uri",
        "method",
        "status",
        "request_body_length",
        "response_body_length",
    ])?;
    for endpoint in &data.endpoints {
        writer.write_record(&[
            endpoint.uri.clone(),
            endpoint.request.method.clone(),
            endpoint.response.code.to_string(),
            endpoint.request.body.len().to_string(),
            endpoint.response.body.len().to_string(),
        ])?;
    }
    writer.flush()?;
    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn generate_markdown_report(data: &ReportData) -> String {
    let info = &data.scan_info;
    let mut report = String::new();

    report.push_str("# Spelunk Endpoint Report\n\n");
    report.push_str("| | |\n|---|---|\n");
    report.push_str(&format!("| Target | `{}` |\n", info.target));
    report.push_str(&format!("| Status | {} |\n", data.status()));
    report.push_str(&format!("| Generated | {} |\n", info.generated_at));
    report.push_str(&format!("| Duration | {:.1} s |\n", info.elapsed_seconds));
    report.push_str(&format!("| Session | {} |\n", data.login_state()));
    report.push_str(&format!(
        "| Locations | {} explored, {} failed |\n",
        info.summary.processed, info.summary.failed
    ));
    report.push_str(&format!("| Endpoints | {} |\n\n", data.endpoints.len()));

    for (class, endpoints) in data.grouped() {
        report.push_str(&format!("## {}\n\n", class.title()));
        report.push_str("| Method | URI | Status | Request body |\n");
        report.push_str("|---|---|---|---|\n");
        for endpoint in endpoints {
            report.push_str(&format!(
                "| {} | `{}` | {} | {} |\n",
                endpoint.request.method,
                escape_markdown_cell(&endpoint.uri),
                endpoint.response.code,
                escape_markdown_cell(&truncate(&endpoint.request.body, 60))
            ));
        }
        report.push('\n');
    }

    report.push_str("---\n*For authorized security testing only.*\n");
    report
}

pub fn generate_report(data: &ReportData, format: ReportFormat) -> Result<String, String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data).map_err(|e| e.to_string()),
        ReportFormat::Csv => generate_csv_report(data).map_err(|e| e.to_string()),
        ReportFormat::Markdown => Ok(generate_markdown_report(data)),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn escape_markdown_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
