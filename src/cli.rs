use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "ziplens")]
#[command(version)]
#[command(about = "Explore and extract remote ZIP archives over HTTP Range requests", long_about = None)]
#[command(after_help = "Examples:\n  \
  ziplens -l https://example.com/big.zip          list a remote archive\n  \
  ziplens https://example.com/big.zip docs/a.txt  extract one entry\n  \
  ziplens -p archive.zip notes.md | less          pipe an entry to stdout\n  \
  ziplens --serve --bind 0.0.0.0:8402             run the proxy relay")]
pub struct Cli {
    /// ZIP file path or HTTP(S) URL
    #[arg(value_name = "ARCHIVE", required_unless_present = "serve")]
    pub archive: Option<String>,

    /// Entries to extract (default: all)
    #[arg(value_name = "ENTRIES")]
    pub entries: Vec<String>,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract entries to stdout, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract entries into DIR
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Overwrite existing files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Quiet mode
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Run the proxy/media relay server instead of exploring an archive
    #[arg(long)]
    pub serve: bool,

    /// Relay bind address
    #[arg(long, env = "ZIPLENS_BIND", default_value = "127.0.0.1:8402")]
    pub bind: SocketAddr,

    /// Relay base URL used when an origin refuses direct access
    #[arg(long, env = "ZIPLENS_PROXY")]
    pub proxy: Option<String>,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.archive
            .as_deref()
            .is_some_and(|a| a.starts_with("http://") || a.starts_with("https://"))
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }
}
