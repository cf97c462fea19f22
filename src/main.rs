//! CLI entry point for jobmatch.
//!
//! Commands import postings into the job store, build the index and rank
//! jobs for free-text queries. Errors from the library are mapped to exit
//! codes; `--json` switches every command to machine-readable output.

use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use jobmatch::display::{self, THEME};
use jobmatch::io::{ExitCode, OutputFormat, OutputManager, read_postings, read_query_file};
use jobmatch::types::JobId;
use jobmatch::vector::IndexArtifact;
use jobmatch::{
    BuildReport, JobSearchService, MatchError, PostingMatch, Settings, StoreError, UpsertOutcome,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Quick start section appended to the top-level help
fn quick_start_help() -> String {
    let mut help = String::new();
    help.push_str(&THEME.apply(&THEME.header, "Quick Start:"));
    help.push('\n');
    help.push_str("  $ jobmatch init                          # Create .jobmatch/settings.toml\n");
    help.push_str("  $ jobmatch import jobs.json              # Load postings into the store\n");
    help.push_str("  $ jobmatch build                         # Embed postings and build the index\n");
    help.push_str("  $ jobmatch search \"rust backend remote\"  # Rank jobs for a query\n");
    help.push_str("  $ jobmatch search --file resume.txt      # Rank jobs for extracted resume text\n");
    help
}

/// Dense-vector job matching
#[derive(Parser)]
#[command(
    name = "jobmatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Match free-text queries and resumes against job postings",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = quick_start_help()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    #[command(about = "Set up .jobmatch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Display the effective settings")]
    Config,

    #[command(about = "Insert or update postings from a JSON file")]
    Import {
        /// JSON array of postings, or {"jobs": [...]}
        file: PathBuf,
    },

    #[command(about = "Delete a posting from the store")]
    Delete { job_id: JobId },

    #[command(about = "Embed postings that have no embedding yet")]
    Embed {
        /// Drop all stored embeddings first and re-embed everything
        #[arg(long)]
        reset: bool,
    },

    #[command(about = "Embed missing postings and rebuild the index")]
    Build,

    #[command(about = "Rank jobs for a query")]
    Search {
        /// Query text
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        query: Option<String>,

        /// Read the query from a plain text file (e.g. an extracted resume)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Results per page
        #[arg(short, long)]
        limit: Option<usize>,

        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    #[command(about = "Show index metadata and store counts")]
    Info,
}

#[derive(Debug, Default, Serialize)]
struct ImportSummary {
    inserted: usize,
    updated: usize,
    /// Updated postings whose description changed
    needs_embedding: usize,
    skipped: usize,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    rank: usize,
    job_id: JobId,
    score: f32,
    title: String,
    company: String,
    location: Option<String>,
    url: Option<String>,
    description_preview: String,
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    query: String,
    total: usize,
    page: usize,
    total_pages: usize,
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    postings: usize,
    embedded: usize,
    index: Option<jobmatch::IndexMetadata>,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", THEME.apply(&THEME.error, format!("Error: {e:#}")));
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.into());
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut output = OutputManager::new(OutputFormat::from_json_flag(cli.json));

    let result = load_settings(cli.config.as_deref()).and_then(|settings| {
        jobmatch::logging::init(&settings.logging, cli.verbose);
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build_global()
        {
            tracing::debug!("rayon pool already initialised: {e}");
        }
        execute(cli.command, settings, &mut output)
    });

    match result {
        Ok(code) => Ok(code),
        Err(err) => match err.downcast_ref::<MatchError>() {
            Some(e) => Ok(output.error(e)?),
            None => Err(err),
        },
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let loaded = match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = loaded.map_err(|e| MatchError::Config {
        reason: e.to_string(),
    })?;
    Ok(settings)
}

fn execute(
    command: Commands,
    settings: Settings,
    output: &mut OutputManager,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| MatchError::Config {
                reason: e.to_string(),
            })?;
            Ok(output.success(&path, |path| {
                THEME.success_with_icon(&format!(
                    "Created configuration file at: {}",
                    path.display()
                ))
            })?)
        }

        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&settings).context("failed to render settings")?;
            Ok(output.success(&settings, |_| rendered)?)
        }

        Commands::Import { file } => {
            let postings = read_postings(&file)?;
            let service = JobSearchService::open(settings)?;
            let summary = import_postings(&service, &postings)?;
            Ok(output.success(&summary, |s| {
                format!(
                    "Imported {} postings: {} new, {} updated ({} need re-embedding), {} skipped",
                    postings.len(),
                    s.inserted,
                    s.updated,
                    s.needs_embedding,
                    s.skipped
                )
            })?)
        }

        Commands::Delete { job_id } => {
            let service = JobSearchService::open(settings)?;
            match service.store().delete_posting(job_id) {
                Ok(()) => Ok(output.success(&job_id, |id| {
                    THEME.success_with_icon(&format!("Deleted job {id}"))
                })?),
                Err(StoreError::NotFound(_)) => Ok(output.not_found("Job", &job_id.to_string())?),
                Err(e) => Err(MatchError::from(e).into()),
            }
        }

        Commands::Embed { reset } => {
            let service = JobSearchService::open(settings)?;
            if reset {
                let cleared = service.reset_embeddings()?;
                output.progress(&format!("Cleared {cleared} stored embeddings"))?;
            }
            let report = if output.format().is_json() {
                service.embed_missing()?
            } else {
                display::with_spinner("Embedding postings", || service.embed_missing())?
            };
            Ok(output.success(&report, |r| {
                format!(
                    "Embedded {} postings ({} failed) in {:.2}s",
                    r.postings_embedded,
                    r.embedding_failures,
                    r.duration.as_secs_f64()
                )
            })?)
        }

        Commands::Build => {
            let service = JobSearchService::open(settings)?;
            let report = if output.format().is_json() {
                service.rebuild_index()?
            } else {
                let spinner = display::create_build_spinner();
                let result =
                    service.rebuild_index_with_progress(display::phase_reporter(spinner.clone()));
                spinner.finish_and_clear();
                result?
            };
            Ok(output.success(&report, render_build_report)?)
        }

        Commands::Search {
            query,
            file,
            limit,
            page,
        } => {
            let text = match (&query, &file) {
                (_, Some(path)) => read_query_file(path)?,
                (Some(query), None) => query.clone(),
                (None, None) => {
                    return Err(MatchError::InvalidInput {
                        reason: "provide a query or --file".to_string(),
                    }
                    .into());
                }
            };

            let per_page = limit.unwrap_or(settings.search.default_top_k);
            if per_page == 0 {
                return Err(MatchError::InvalidInput {
                    reason: "--limit must be at least 1".to_string(),
                }
                .into());
            }
            let service = JobSearchService::open(settings)?;
            let page = service.search_page(&text, page, per_page)?;
            if page.results.is_empty() {
                return Ok(output.not_found("Jobs matching", text.trim())?);
            }

            let ids: Vec<JobId> = page.results.iter().map(|m| m.job_id).collect();
            let postings = service.store().get_postings(&ids).map_err(MatchError::from)?;
            let hits: Vec<PostingMatch> = postings
                .into_iter()
                .filter_map(|posting| {
                    let hit = page.results.iter().find(|m| m.job_id == posting.job_id)?;
                    Some(PostingMatch {
                        posting,
                        score: hit.score,
                    })
                })
                .collect();

            let first_rank = (page.page - 1) * per_page + 1;
            let search_output = SearchOutput {
                query: text.trim().to_string(),
                total: page.total,
                page: page.page,
                total_pages: page.total_pages,
                results: hits
                    .iter()
                    .enumerate()
                    .map(|(i, hit)| SearchHit {
                        rank: first_rank + i,
                        job_id: hit.posting.job_id,
                        score: hit.score.get(),
                        title: hit.posting.title.clone(),
                        company: hit.posting.company.clone(),
                        location: hit.posting.location.clone(),
                        url: hit.posting.url.clone(),
                        description_preview: hit.posting.description_preview(200),
                    })
                    .collect(),
            };

            Ok(output.success(&search_output, |out| {
                format!(
                    "{}\n{}",
                    display::create_results_table(&hits, first_rank),
                    THEME.apply(
                        &THEME.dim,
                        format!(
                            "Page {} of {} ({} ranked results)",
                            out.page, out.total_pages, out.total
                        )
                    )
                )
            })?)
        }

        Commands::Info => {
            let index_dir = settings.index_dir();
            let service = JobSearchService::open(settings)?;
            let metadata = IndexArtifact::read_metadata(&index_dir).map_err(|e| {
                MatchError::from_artifact(IndexArtifact::path_in(&index_dir), e)
            })?;

            let info = InfoOutput {
                postings: service.store().count_postings().map_err(MatchError::from)?,
                embedded: service.store().count_embedded().map_err(MatchError::from)?,
                index: metadata,
            };
            Ok(output.success(&info, |info| {
                display::create_info_table(info.index.as_ref(), info.postings, info.embedded)
            })?)
        }
    }
}

fn import_postings(
    service: &JobSearchService,
    postings: &[jobmatch::NewJobPosting],
) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for posting in postings {
        match service.store().upsert_posting(posting) {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated { embedding_cleared }) => {
                summary.updated += 1;
                if embedding_cleared {
                    summary.needs_embedding += 1;
                }
            }
            Err(StoreError::InvalidPosting { id, reason }) => {
                tracing::warn!("skipping job {id}: {reason}");
                summary.skipped += 1;
            }
            Err(e) => return Err(MatchError::from(e).into()),
        }
    }
    Ok(summary)
}

fn render_build_report(report: &BuildReport) -> String {
    let mut text = THEME.success_with_icon(&format!(
        "Indexed {} postings ({}) in {:.2}s",
        report.total_indexed,
        report
            .kind
            .map_or_else(|| "none".to_string(), |kind| kind.to_string()),
        report.duration.as_secs_f64()
    ));
    text.push_str(&format!(
        "\n  Postings embedded: {}\n  Clusters: {}",
        report.postings_embedded, report.clusters
    ));
    if report.embedding_failures > 0 {
        text.push('\n');
        text.push_str(&THEME.warning_with_icon(&format!(
            "{} postings could not be embedded and were skipped",
            report.embedding_failures
        )));
        for (id, reason) in report.failures.iter().take(5) {
            text.push_str(&format!("\n    job {id}: {reason}"));
        }
    }
    text
}
