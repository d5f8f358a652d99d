use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ttvcap",
    about = "ttvcap - capture a Twitch channel's live stream, segment by segment",
    version,
    author
)]
pub struct Args {
    /// Channel login to capture (prompted interactively when omitted)
    pub channel: Option<String>,

    /// Root directory for captured sessions
    #[arg(short, long, default_value = "./sequences")]
    pub output: PathBuf,

    /// Playlist poll interval in seconds
    #[arg(long, default_value = "2")]
    pub poll_interval: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
