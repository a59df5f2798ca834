use anyhow::{Context, bail};
use clap::ArgMatches;
use colored::Colorize;
use spelunk_core::report::{ReportData, ReportFormat, generate_report, save_report};
use spelunk_core::scan::{ScanOptions, ScanProgressCallback, budget_from_secs, execute_scan};
use spelunk_scanner::chrome::ChromeOptions;
use spelunk_scanner::explorer::TraversalSummary;
use spelunk_scanner::login::Credentials;
use spelunk_scanner::session::ScanOutcome;
use spelunk_scanner::{Endpoint, ScanError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use url::Url;

/// Install the stderr log subscriber. Warnings only unless asked for more.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    // a second init (tests, repeated handlers) is harmless
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Expand `~` in a user supplied output path
pub fn resolve_output_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

/// Both or neither: half a credential pair is a usage error.
pub fn credentials_from_args(
    username: Option<&String>,
    password: Option<&String>,
) -> anyhow::Result<Option<Credentials>> {
    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials::new(username, password))),
        (None, None) => Ok(None),
        _ => bail!("--username and --password must be given together"),
    }
}

pub fn build_scan_options(args: &ArgMatches) -> anyhow::Result<ScanOptions> {
    let url = args
        .get_one::<Url>("url")
        .context("--url is required")?;
    let credentials = credentials_from_args(
        args.get_one::<String>("username"),
        args.get_one::<String>("password"),
    )?;

    let browser = ChromeOptions {
        endpoint: args.get_one::<String>("browser").cloned(),
        headless: !args.get_flag("headed"),
        ..ChromeOptions::default()
    };

    Ok(ScanOptions {
        url: url.as_str().to_string(),
        credentials,
        threads: args.get_one::<usize>("threads").copied().unwrap_or(5),
        max_depth: args.get_one::<usize>("max-depth").copied().unwrap_or(8),
        timeout: budget_from_secs(args.get_one::<u64>("timeout").copied().unwrap_or(0)),
        browser,
        show_progress_bars: !args.get_flag("quiet"),
    })
}

pub fn parse_format(args: &ArgMatches) -> anyhow::Result<ReportFormat> {
    let name = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    ReportFormat::from_str(name).with_context(|| format!("unknown report format '{}'", name))
}

pub fn render_report(outcome: &ScanOutcome, format: ReportFormat) -> anyhow::Result<String> {
    let data = ReportData::from_outcome(outcome);
    generate_report(&data, format).map_err(anyhow::Error::msg)
}

/// What an aborted run still has to show.
pub fn partial_outcome(target: &str, endpoints: Vec<Endpoint>) -> ScanOutcome {
    ScanOutcome {
        target: target.to_string(),
        endpoints,
        summary: TraversalSummary {
            cancelled: true,
            ..TraversalSummary::default()
        },
        logged_in: false,
        elapsed: Duration::ZERO,
    }
}

fn emit_report(content: &str, output: Option<&PathBuf>, quiet: bool) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let path = resolve_output_path(path);
            save_report(content, &path)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            if !quiet {
                println!("{} Report saved to {}", "✓".green().bold(), path.display());
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}

pub async fn handle_scan(args: &ArgMatches, cancel: CancellationToken) -> anyhow::Result<()> {
    let options = build_scan_options(args)?;
    let format = parse_format(args)?;
    let output = args.get_one::<PathBuf>("output");
    let quiet = args.get_flag("quiet");
    let target = options.url.clone();

    if !quiet {
        println!("\n{} {}", "Exploring".bright_cyan().bold(), target);
        println!("Workers: {}", options.threads);
        println!("Max depth: {}", options.max_depth);
        match options.timeout {
            Some(budget) => println!("Time budget: {}s", budget.as_secs()),
            None => println!("Time budget: unlimited"),
        }
        println!(
            "Session: {}\n",
            match options.credentials {
                Some(ref credentials) => format!("logging in as {}", credentials.username),
                None => "unauthenticated".to_string(),
            }
        );
    }

    let progress_callback: Option<ScanProgressCallback> = if quiet {
        None
    } else {
        Some(Arc::new(|message: String| {
            eprintln!("{} {}", "[*]".bright_blue().bold(), message);
        }))
    };

    match execute_scan(options, progress_callback, cancel).await {
        Ok(outcome) => {
            let report = render_report(&outcome, format)?;
            emit_report(&report, output, quiet)
        }
        Err(ScanError::Aborted { source, endpoints }) => {
            if !endpoints.is_empty() {
                eprintln!(
                    "{} writing the {} endpoints captured before the failure",
                    "⚠".yellow().bold(),
                    endpoints.len()
                );
                let report = render_report(&partial_outcome(&target, endpoints), format)?;
                emit_report(&report, output, quiet)?;
            }
            Err(anyhow::Error::new(*source).context(format!("scan of {} aborted", target)))
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("scan of {} failed", target))),
    }
}
