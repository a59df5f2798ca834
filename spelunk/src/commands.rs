use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("spelunk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("spelunk")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (-v info, -vv debug)")
                .required(false)
                .action(clap::ArgAction::Count)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("scan")
                .about(
                    "Log in to a web application, click through its UI and record every API \
                endpoint it calls.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The URL to start exploring from (usually the login page)")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(--"username" <USERNAME>)
                        .required(false)
                        .help("Username to log in with")
                        .requires("password"),
                )
                .arg(
                    arg!(--"password" <PASSWORD>)
                        .required(false)
                        .help("Password to log in with")
                        .requires("username"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of browser tabs exploring in parallel.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help(
                            "Stop exploring after this many seconds and report what was found \
                        (0 = no limit)",
                        )
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Maximum number of clicks from the start page")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("8"),
                )
                .arg(
                    arg!(--"browser" <ENDPOINT>)
                        .required(false)
                        .help(
                            "DevTools endpoint of a running browser (default: launch a local \
                        headless one)",
                        ),
                )
                .arg(
                    arg!(--"headed")
                        .required(false)
                        .help("Show the launched browser window")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("browser"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv, markdown")
                        .value_parser(["text", "json", "csv", "markdown"])
                        .default_value("text"),
                ),
        )
}
