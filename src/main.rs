mod config;
mod output;
mod powertrack;
mod query;

pub const USER_AGENT: &str = concat!("ptsearch/", env!("CARGO_PKG_VERSION"));

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use tracing::{info, warn};

use config::{
    COUNT_YAML_KEY, Credentials, DEFAULT_ACCOUNT_TYPE, DEFAULT_CREDENTIALS_PATH, SEARCH_YAML_KEY,
    Settings,
};
use output::{COUNTS_FILE, DATA_FILE, DEFAULT_LOG_EVERY, default_output_dir};
use powertrack::types::Bucket;
use powertrack::{PowerTrackClient, ResultStream, StreamLimits, build_rule, collect_counts};
use query::{Query, QueryCompiler, QueryError, assert_unique, load_terms, normalize};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout; one request is one page of results.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Compile term lists into PowerTrack rules and run them against the full-archive search API.
#[derive(Parser, Debug)]
#[command(name = "ptsearch", version, about)]
struct Cli {
    /// Use sandbox limits (256-char rules, 1 page of 100 results, no counts)
    #[arg(long, global = true)]
    sandbox: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML credentials file
    #[arg(long, global = true, default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: PathBuf,

    /// Account type used when the credentials section does not name one
    #[arg(long, global = true, default_value = DEFAULT_ACCOUNT_TYPE)]
    account_type: String,

    /// Let SEARCHTWEETS_* environment variables override the credentials file
    #[arg(long, global = true)]
    env_overwrite: bool,

    /// Override the maximum rule length in characters
    #[arg(long, global = true)]
    limit: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Line-delimited search term file
    terms: PathBuf,

    /// Restrict results to a language code (e.g. "en")
    #[arg(long)]
    lang: Option<String>,

    /// Fail on case-insensitive duplicate terms instead of removing them
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Debug)]
struct DateRange {
    /// Start date: "YYYY-mm-DD" or "YYYY-mm-DD HH:MM"
    #[arg(long)]
    from: String,

    /// End date: "YYYY-mm-DD" or "YYYY-mm-DD HH:MM"
    #[arg(long)]
    to: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled rule for a term file
    Query(QueryArgs),

    /// Split a term file into <file>_subset<N> files that each fit the rule length limit
    Split {
        /// Line-delimited search term file
        terms: PathBuf,
    },

    /// Stream matching records into <output>/data.json
    Search {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        range: DateRange,

        /// Output directory (default: <terms>_<from>_to_<to> next to the term file)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Log progress every N records
        #[arg(long, default_value_t = DEFAULT_LOG_EVERY)]
        log_every: u64,
    },

    /// Collect per-bucket counts into <output>/counts.json
    Counts {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        range: DateRange,

        /// Count bucket size
        #[arg(long, value_enum, default_value_t = Bucket::Day)]
        bucket: Bucket,

        /// Output directory (default: <terms>_<from>_to_<to> next to the term file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let directive = if verbose {
        "ptsearch=debug"
    } else {
        "ptsearch=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();
    Ok(())
}

fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .build()
}

/// Load, dedup, and compile a term file. With `strict`, duplicates fail before dedup can hide them.
fn compile_term_file(args: &QueryArgs, compiler: &QueryCompiler) -> Result<Query, QueryError> {
    let raw = load_terms(&args.terms)?;
    if args.strict {
        assert_unique(&raw)?;
    }
    let normalized = normalize(&raw);
    let query = compiler.compile(normalized.terms.as_slice(), args.lang.as_deref())?;

    info!(query = %query, length = query.len(), "compiled query");
    Ok(query)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let settings = Settings::new(cli.sandbox).with_query_limit(cli.limit);
    let compiler = QueryCompiler::new(settings.query_limit);

    match &cli.command {
        Command::Query(args) => {
            let query = compile_term_file(args, &compiler)?;
            println!("{query}");
        }

        Command::Split { terms } => {
            let partition = query::split_term_file(terms, &compiler)?;
            for (i, bin) in partition.oversized() {
                warn!(
                    subset = i + 1,
                    term = %bin.join(" "),
                    "subset exceeds the rule length limit and cannot be compiled"
                );
            }
            for (i, bin) in partition.bins().iter().enumerate() {
                println!(
                    "{}\t{} terms",
                    query::subset_path(terms, i + 1).display(),
                    bin.len()
                );
            }
        }

        Command::Search {
            query: args,
            range,
            output,
            log_every,
        } => {
            let query = compile_term_file(args, &compiler)?;
            let credentials = Credentials::load(
                &cli.credentials,
                SEARCH_YAML_KEY,
                &cli.account_type,
                cli.env_overwrite,
            )?;
            let rule = build_rule(
                query.as_str(),
                Some(range.from.as_str()),
                Some(range.to.as_str()),
                Some(settings.results_per_call),
                None,
            )?;
            info!(rule = ?rule, "search rule");

            let client = PowerTrackClient::new(http_client()?, &credentials);
            let limits = StreamLimits {
                max_results: settings.max_results,
                max_pages: settings.max_pages,
            };
            let dir = output
                .clone()
                .unwrap_or_else(|| default_output_dir(&args.terms, &range.from, &range.to));

            let records = ResultStream::new(&client, &rule, limits).stream::<serde_json::Value>();
            output::write_records(records, &dir.join(DATA_FILE), *log_every).await?;
        }

        Command::Counts {
            query: args,
            range,
            bucket,
            output,
        } => {
            settings.require_counts()?;
            let query = compile_term_file(args, &compiler)?;
            let credentials = Credentials::load(
                &cli.credentials,
                COUNT_YAML_KEY,
                &cli.account_type,
                cli.env_overwrite,
            )?;
            let rule = build_rule(
                query.as_str(),
                Some(range.from.as_str()),
                Some(range.to.as_str()),
                None,
                Some(*bucket),
            )?;
            info!(rule = ?rule, "counts rule");

            let client = PowerTrackClient::new(http_client()?, &credentials);
            let buckets = collect_counts(&client, &rule, settings.max_results).await?;
            let dir = output
                .clone()
                .unwrap_or_else(|| default_output_dir(&args.terms, &range.from, &range.to));
            output::write_counts(&dir.join(COUNTS_FILE), &buckets).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn term_file(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn args(terms: PathBuf, lang: Option<&str>, strict: bool) -> QueryArgs {
        QueryArgs {
            terms,
            lang: lang.map(String::from),
            strict,
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_search_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ptsearch",
            "search",
            "terms.txt",
            "--from",
            "2018-01-01",
            "--to",
            "2018-01-02",
            "--lang",
            "en",
            "--sandbox",
            "--limit",
            "512",
        ])
        .unwrap();

        assert!(cli.sandbox);
        assert_eq!(cli.limit, Some(512));
        assert_eq!(cli.credentials, PathBuf::from(DEFAULT_CREDENTIALS_PATH));
        match cli.command {
            Command::Search {
                query,
                range,
                log_every,
                ..
            } => {
                assert_eq!(query.terms, PathBuf::from("terms.txt"));
                assert_eq!(query.lang.as_deref(), Some("en"));
                assert_eq!(range.from, "2018-01-01");
                assert_eq!(log_every, DEFAULT_LOG_EVERY);
            }
            other => panic!("expected search command, got: {other:?}"),
        }
    }

    #[test]
    fn parses_counts_bucket() {
        let cli = Cli::try_parse_from([
            "ptsearch", "counts", "terms", "--from", "2018-01-01", "--to", "2018-01-02",
            "--bucket", "hour",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Counts {
                bucket: Bucket::Hour,
                ..
            }
        ));
    }

    #[test]
    fn search_requires_date_range() {
        assert!(Cli::try_parse_from(["ptsearch", "search", "terms"]).is_err());
    }

    #[test]
    fn compiles_term_file_with_dedup() {
        let (_dir, path) = term_file("Dog\ncat\nDOG\n");
        let query = compile_term_file(&args(path, None, false), &QueryCompiler::default()).unwrap();
        assert_eq!(query.as_str(), "cat OR dog");
    }

    #[test]
    fn compiles_term_file_with_lang() {
        let (_dir, path) = term_file("x\ny\n");
        let query =
            compile_term_file(&args(path, Some("en"), false), &QueryCompiler::default()).unwrap();
        assert_eq!(query.as_str(), "(x OR y) lang:en");
    }

    #[test]
    fn strict_mode_rejects_duplicates() {
        let (_dir, path) = term_file("Dog\ncat\nDOG\n");
        let err = compile_term_file(&args(path, None, true), &QueryCompiler::default()).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateTerms(ref d) if d == &["dog"]));
    }

    #[test]
    fn over_limit_term_file_fails() {
        let (_dir, path) = term_file("alpha\nbravo\ncharlie\n");
        let err = compile_term_file(&args(path, None, false), &QueryCompiler::new(10)).unwrap_err();
        assert!(matches!(err, QueryError::QueryTooLong { limit: 10, .. }));
    }
}
