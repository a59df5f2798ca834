use colored::Colorize;
use spelunk::{command_argument_builder, handle_scan, init_tracing};
use spelunk_core::print_banner;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    init_tracing(chosen_command.get_count("verbose"));

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    match chosen_command.subcommand() {
        Some(("scan", primary_command)) => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!(
                        "\n{} stopping, collecting what was found so far...",
                        "⚠".yellow().bold()
                    );
                    on_interrupt.cancel();
                }
            });

            if let Err(e) = handle_scan(primary_command, cancel).await {
                eprintln!("{} {:#}", "✗ Scan failed:".red().bold(), e);
                std::process::exit(1);
            }
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
