// src/bin/tsg.rs
//
// Raport banów z dziennika: `tsg --hours 24` (albo `--json`).

use anyhow::Result;
use clap::Parser;
use tigris_spamguard::{banstats, config::Settings, logging};

#[derive(Parser, Debug)]
#[command(name = "tsg")]
#[command(about = "Ban statistics for the Tigris SpamGuard ban log")]
struct Args {
    /// Window length in hours (ending now)
    #[arg(long, env = "TSG_STATS_HOURS", default_value_t = 24)]
    hours: u32,

    /// Ban log path (defaults to banlog.path from config)
    #[arg(long)]
    log: Option<String>,

    /// Print stats as JSON instead of the text report
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load()?;
    logging::init(&settings);

    let path = args.log.unwrap_or_else(|| settings.banlog.path.clone());
    let reader = banstats::BanStatsReader::new(path, settings.banlog.offset());
    let stats = reader.get_window_stats(args.hours).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", banstats::render_report(&stats));
    }
    Ok(())
}
