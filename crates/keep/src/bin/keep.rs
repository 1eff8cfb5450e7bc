// ABOUTME: CLI binary for the keep extraction pipeline.
// ABOUTME: Extracts one URL (or a local HTML file for it) and prints JSON, or the archived HTML with --archive.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use digests_keep::archiver::LocalNameUrlProcessor;
use digests_keep::contents::Links;
use digests_keep::{
    ArchiveFlags, ArchivePage, DenyList, Extractor, Pipeline, SiteConfigRegistry,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "keep")]
#[command(about = "Extract a web page and optionally archive it for offline reading")]
struct Args {
    /// Page URL
    url: String,

    /// Use this HTML file as the page body instead of fetching it
    #[arg(long = "html")]
    html: Option<PathBuf>,

    /// Allow fetching from private/local networks
    #[arg(long = "allow-private-networks")]
    allow_private_networks: bool,

    /// Additional denied networks (CIDR or single IP), repeatable
    #[arg(long = "deny")]
    deny: Vec<String>,

    /// Directory of site config JSON files
    #[arg(long = "site-config")]
    site_config: Option<PathBuf>,

    /// Resolve the links found in the content
    #[arg(long = "links")]
    links: bool,

    /// Print the archived HTML instead of JSON
    #[arg(long = "archive")]
    archive: bool,

    /// Archive frames and objects too
    #[arg(long = "embeds")]
    embeds: bool,

    /// Maximum concurrent archive downloads
    #[arg(long = "max-concurrent", default_value_t = digests_keep::archiver::DEFAULT_MAX_CONCURRENT)]
    max_concurrent: usize,

    /// Reference archived resources as ./_resources files written next to
    /// the output file
    #[arg(long = "local-resources", requires = "output")]
    local_resources: bool,

    /// Output file path (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn deny_list(args: &Args) -> anyhow::Result<DenyList> {
    let mut list = if args.allow_private_networks {
        DenyList::new()
    } else {
        DenyList::private_networks()
    };
    for rule in &args.deny {
        list.push(rule.parse()?);
    }
    Ok(list)
}

fn write_resources(ex: &Extractor, output: &Path) -> anyhow::Result<usize> {
    let Some(archive) = ex.archive() else {
        return Ok(0);
    };
    let dir = output
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("_resources");
    fs::create_dir_all(&dir)?;
    for (url, asset) in &archive.resources {
        let url = Url::parse(url)?;
        let name = LocalNameUrlProcessor::file_name(&url, &asset.content_type);
        fs::write(dir.join(name), &asset.data)?;
    }
    Ok(archive.resources.len())
}

fn report(ex: &Extractor) -> serde_json::Value {
    let drop = ex.drop();
    let links = ex.values().get::<Links>().map(|l| l.0.clone()).unwrap_or_default();
    json!({
        "url": drop.map(|d| d.url().to_string()),
        "domain": drop.map(|d| d.domain()),
        "title": drop.map(|d| d.title.as_str()),
        "description": drop.map(|d| d.description.as_str()),
        "site_name": drop.map(|d| d.site_name.as_str()),
        "authors": drop.map(|d| d.authors()),
        "lang": drop.map(|d| d.lang.as_str()),
        "text_direction": drop.map(|d| d.text_direction.as_str()),
        "document_type": drop.map(|d| d.document_type.as_str()),
        "date": drop.and_then(|d| d.date.map(|t| t.to_rfc3339())),
        "pages": ex.drops().len(),
        "html": ex.html(),
        "text": ex.text(),
        "links": links,
        "errors": ex.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "log": ex.logs(),
    })
}

async fn run(args: &Args) -> anyhow::Result<(String, bool)> {
    let mut pipeline = Pipeline::new().fetch_links(args.links);
    if let Some(dir) = &args.site_config {
        pipeline = pipeline.site_configs(SiteConfigRegistry::from_dir(dir)?);
    }
    if args.archive {
        let flags = ArchiveFlags {
            embeds: args.embeds,
            ..ArchiveFlags::default()
        };
        pipeline = pipeline.archive(
            ArchivePage::new()
                .flags(flags)
                .max_concurrent(args.max_concurrent)
                .local_names(args.local_resources),
        );
    }

    let mut builder = Extractor::builder(args.url.as_str())
        .deny_list(deny_list(args)?)
        .processors(pipeline.processors());
    if let Some(path) = &args.html {
        builder = builder.body(fs::read(path)?);
    }
    let mut ex = builder.build()?;
    ex.run().await?;

    for err in ex.errors() {
        tracing::warn!(err = %err, "extraction error");
    }
    let failed = ex.drop().map_or(true, |d| !d.is_loaded());

    if args.local_resources {
        if let Some(output) = &args.output {
            let count = write_resources(&ex, output)?;
            tracing::info!(count, "resources written");
        }
    }

    let out = match ex.archive() {
        Some(archive) if args.archive => archive.html.clone(),
        _ => serde_json::to_string_pretty(&report(&ex))?,
    };
    Ok((out, failed))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let (output, failed) = match runtime.block_on(run(&args)) {
        Ok(res) => res,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    if let Some(path) = &args.output {
        if let Err(e) = fs::write(path, &output) {
            eprintln!("error writing to {:?}: {}", path, e);
            return ExitCode::from(1);
        }
    } else {
        println!("{}", output);
    }

    if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
