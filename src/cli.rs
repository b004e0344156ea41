use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Preview course content the way the site loads it")]
pub struct Cli {
    /// Increase log verbosity (`-v` info, `-vv` debug). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch and validate the course manifest.
    Manifest(ManifestArgs),
    /// Fetch, outline and render one lesson by slug.
    Lesson(LessonArgs),
    /// Render a local Markdown file.
    Render(RenderArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SiteArgs {
    /// Site base URL (default: `COURSEPRESS_BASE_URL`).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Manifest path relative to the base URL (default: `/content/manifest.json`).
    #[arg(long)]
    pub manifest_path: Option<String>,

    /// Session cache directory (default: in-memory).
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Network timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ManifestArgs {
    #[command(flatten)]
    pub site: SiteArgs,
}

#[derive(Debug, Args)]
pub struct LessonArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    /// Lesson slug from the manifest.
    #[arg(long)]
    pub slug: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Markdown file to render.
    #[arg(long)]
    pub file: String,

    /// Origin treated as internal when marking external links.
    #[arg(long)]
    pub site_origin: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Rendered HTML and heading tree as JSON.
    Json,
    /// Rendered HTML only.
    Html,
    /// Heading outline as an indented list.
    Toc,
}
