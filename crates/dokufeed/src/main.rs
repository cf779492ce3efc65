use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dokufeed_core::acl::discover_roles;
use dokufeed_core::config::{DEFAULT_CONFIG_FILENAME, ExportOverrides, FeedConfig};
use dokufeed_core::export::export_store;
use dokufeed_core::page::{Page, WikiStore, discover_page_paths};
use dokufeed_core::runtime::{PathOverrides, ResolvedPaths, inspect_store, resolve_paths};

#[derive(Debug, Parser)]
#[command(
    name = "dokufeed",
    version,
    about = "Exports a flat-file wiki page store as paginated search-feed documents"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    wiki_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved store diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    wiki_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            wiki_root: cli.wiki_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Export(ExportArgs),
    Status,
    Roles(RolesArgs),
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(
        short = 'o',
        long,
        value_name = "PATH",
        help = "Directory the feed documents are written to"
    )]
    output_dir: Option<PathBuf>,
    #[arg(
        short = 'p',
        long,
        value_name = "N",
        help = "Number of pages per feed document"
    )]
    pages_per_file: Option<usize>,
    #[arg(
        short = 'u',
        long,
        value_name = "PREFIX",
        help = "Prefix turning page paths into page URLs"
    )]
    page_url_prefix: Option<String>,
    #[arg(
        short = 'x',
        long = "exclude",
        value_name = "PREFIX",
        help = "Path prefix of pages to leave out (repeatable)"
    )]
    exclude: Vec<String>,
    #[arg(
        long,
        value_name = "DELIMITER",
        help = "Delimiter between hierarchy levels in page paths"
    )]
    category_delimiter: Option<String>,
    #[arg(
        long,
        value_name = "PREFIX",
        help = "Path prefix stripped before category derivation"
    )]
    category_prefix: Option<String>,
    #[arg(long, value_name = "SALT", help = "Salt mixed into usergroup hashes")]
    salt: Option<String>,
    #[arg(long, help = "Materialize all page text up front instead of lazily")]
    eager: bool,
}

#[derive(Debug, Args)]
struct RolesArgs {
    #[arg(long, value_name = "SALT", help = "Salt mixed into usergroup hashes")]
    salt: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dokufeed_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Export(args)) => run_export(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Roles(args)) => run_roles(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let overrides = PathOverrides {
        wiki_root: runtime.wiki_root.clone(),
    };
    resolve_paths(&overrides)
}

fn config_path(runtime: &RuntimeOptions, paths: &ResolvedPaths) -> PathBuf {
    runtime
        .config
        .clone()
        .unwrap_or_else(|| paths.wiki_root.join(DEFAULT_CONFIG_FILENAME))
}

fn run_export(runtime: &RuntimeOptions, args: ExportArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let feed_config = FeedConfig::load(&config_path(runtime, &paths))?;
    let overrides = ExportOverrides {
        output_dir: args.output_dir,
        pages_per_file: args.pages_per_file,
        page_url_prefix: args.page_url_prefix,
        exclude: args.exclude,
        category_delimiter: args.category_delimiter,
        category_prefix: args.category_prefix,
        usergroup_salt: args.salt,
    };
    let config = feed_config.resolve(&overrides)?;

    let roles = discover_roles(&paths, &config.usergroup_salt)?;
    let mut store = WikiStore::load(&paths, args.eager)?;

    let mut items_exported = 0usize;
    let mut observer = |id: usize, _page: &Page| {
        items_exported = id;
    };
    let report = export_store(&mut store, &roles, &config, Some(&mut observer))?;

    println!("export complete");
    println!("wiki_root: {}", paths.wiki_root.display());
    println!("output_dir: {}", config.output_dir.display());
    println!("roles: {}", roles.len());
    println!("pages_total: {}", report.pages_total);
    println!("pages_excluded: {}", report.pages_excluded);
    println!("pages_deleted: {}", report.pages_deleted);
    println!("pages_retained: {}", report.pages_retained);
    println!("items_exported: {items_exported}");
    println!("batches_written: {}", report.batches_written);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_store(&paths);
    let pages = discover_page_paths(&paths)?;

    println!("store status");
    println!("wiki_root: {}", paths.wiki_root.display());
    println!("wiki_root_exists: {}", format_flag(status.wiki_root_exists));
    println!("meta_dir_exists: {}", format_flag(status.meta_dir_exists));
    println!("pages_dir_exists: {}", format_flag(status.pages_dir_exists));
    println!(
        "users_file_exists: {}",
        format_flag(status.users_file_exists)
    );
    println!("acl_file_exists: {}", format_flag(status.acl_file_exists));
    println!("pages_discovered: {}", pages.len());
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_roles(runtime: &RuntimeOptions, args: RolesArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let feed_config = FeedConfig::load(&config_path(runtime, &paths))?;
    let overrides = ExportOverrides {
        usergroup_salt: args.salt,
        ..ExportOverrides::default()
    };
    let config = feed_config.resolve(&overrides)?;
    let roles = discover_roles(&paths, &config.usergroup_salt)?;

    println!("roles discovered: {}", roles.len());
    for role in &roles {
        println!(
            "{}: {} ({} rules)",
            role.name,
            role.usergroup_hash,
            role.rules.len()
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
