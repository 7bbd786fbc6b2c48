use clap::Parser;
use std::path::PathBuf;

/// Incrementally harvest Pratilipi articles and authors into SQLite and CSV.
#[derive(Parser, Debug)]
#[command(name = "pratilipi_crawler", version, about)]
pub struct Cli {
    /// Path to the JSON config file
    pub config: String,

    /// Database section of the config to use
    #[arg(long, default_value = "database-read")]
    pub section: String,

    /// Directory for the CSV snapshots (overrides `output.dir`)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Site language, e.g. HINDI (overrides `site.language`)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Rows per INSERT statement (overrides `output.batch_size`)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Rows in the popular snapshot (overrides `output.popular_count`)
    #[arg(long)]
    pub popular_count: Option<usize>,
}
