pub mod report;
pub mod scan;

use colored::Colorize;

const BANNER: &str = r#"
                 _             _
  ___ _ __   ___| |_   _ _ __ | | __
 / __| '_ \ / _ \ | | | | '_ \| |/ /
 \__ \ |_) |  __/ | |_| | | | |   <
 |___/ .__/ \___|_|\__,_|_| |_|_|\_\
     |_|
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "authenticated UI explorer & API endpoint mapper".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
