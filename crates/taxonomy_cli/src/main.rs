//! Operator CLI for a taxonomy database.
//!
//! # Responsibility
//! - Initialize and migrate a database file.
//! - Print category trees, run the expiry sweep, and search from a shell.
//!
//! Settings come from `TAXONOMY_*` environment variables; `--db` overrides
//! the database path.

use clap::{Parser, Subcommand};
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use taxonomy_core::db::migrations::{current_version, latest_version};
use taxonomy_core::repo::category_repo::SqliteCategoryRepository;
use taxonomy_core::repo::classification_repo::SqliteClassificationRepository;
use taxonomy_core::repo::namespace_repo::SqliteNamespaceRepository;
use taxonomy_core::search::{SearchEntityKind, SearchService};
use taxonomy_core::service::now_epoch_ms;
use taxonomy_core::{
    init_logging_from_config, open_db, open_db_in_memory, CategoryService, CategoryTreeNode,
    ClassificationService, CoreConfig, RequestContext, SearchQuery,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "taxonomy")]
#[command(author, version, about = "Multi-tenant taxonomy maintenance tool")]
#[command(propagate_version = true)]
struct Cli {
    /// Database file (defaults to TAXONOMY_DB_PATH, else in-memory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Tenant the command acts for
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Actor recorded on writes
    #[arg(long, global = true, default_value = "cli")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check core linkage
    Ping,

    /// Create or migrate the database and report the schema version
    Init,

    /// Print the category tree of a taxonomy
    Tree {
        /// Taxonomy id
        taxonomy: Uuid,
    },

    /// Expire classifications whose expiry time has passed
    Expire {
        /// Reference time in epoch milliseconds (default: now)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Search taxonomies, categories and classifications
    Search {
        /// Free text
        text: Option<String>,

        /// Restrict to kinds (taxonomy, category, classification)
        #[arg(short, long, value_parser = parse_kind)]
        kind: Vec<SearchEntityKind>,

        #[arg(long)]
        namespace: Option<String>,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = CoreConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    init_logging_from_config(&config)?;

    if let Commands::Ping = cli.command {
        println!("taxonomy_core ping={}", taxonomy_core::ping());
        println!("taxonomy_core version={}", taxonomy_core::core_version());
        return Ok(());
    }

    let conn = open_connection(&config)?;
    let ctx = RequestContext::admin(cli.tenant, cli.user)?;

    match cli.command {
        Commands::Ping => {}
        Commands::Init => {
            println!(
                "schema version {} (latest {})",
                current_version(&conn)?,
                latest_version()
            );
        }
        Commands::Tree { taxonomy } => {
            let service = CategoryService::new(
                SqliteCategoryRepository::try_new(&conn)?,
                SqliteNamespaceRepository::try_new(&conn)?,
            );
            let mut lines = Vec::new();
            for node in service.category_tree(&ctx, taxonomy)? {
                render_tree(&node, 0, &mut lines);
            }
            if lines.is_empty() {
                println!("(no categories)");
            }
            for line in lines {
                println!("{line}");
            }
        }
        Commands::Expire { now } => {
            let service = ClassificationService::new(
                SqliteClassificationRepository::try_new(&conn)?,
                SqliteCategoryRepository::try_new(&conn)?,
                SqliteNamespaceRepository::try_new(&conn)?,
            );
            let expired = service.expire_due(&ctx, now.unwrap_or_else(now_epoch_ms))?;
            info!(
                "event=cli_expire module=cli status=ok tenant_id={} expired={}",
                ctx.tenant_id(),
                expired.len()
            );
            println!("expired {} classification(s)", expired.len());
        }
        Commands::Search {
            text,
            kind,
            namespace,
            page,
            limit,
        } => {
            let service = SearchService::new(
                SqliteNamespaceRepository::try_new(&conn)?,
                SqliteCategoryRepository::try_new(&conn)?,
                SqliteClassificationRepository::try_new(&conn)?,
            )
            .with_limits(config.search_default_limit, config.search_max_limit);
            let query = SearchQuery {
                text,
                kinds: kind,
                namespace,
                page,
                limit,
                ..SearchQuery::default()
            };
            let result = service.search(&ctx, &query)?;
            for hit in &result.items {
                println!(
                    "{:<14} {}  {}  [{}]",
                    hit.record.kind().as_str(),
                    hit.record.id(),
                    hit.record.name(),
                    hit.namespace
                );
            }
            println!(
                "page {}/{} ({} total)",
                result.page,
                result.total_pages.max(1),
                result.total
            );
        }
    }
    Ok(())
}

fn open_connection(config: &CoreConfig) -> Result<Connection, Box<dyn Error>> {
    let conn = match &config.db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    Ok(conn)
}

fn render_tree(node: &CategoryTreeNode, depth: usize, lines: &mut Vec<String>) {
    let category = &node.category;
    let marker = if category.is_active { "" } else { " (inactive)" };
    lines.push(format!(
        "{}{} [{}]{}",
        "  ".repeat(depth),
        category.name,
        category.path,
        marker
    ));
    for child in &node.children {
        render_tree(child, depth + 1, lines);
    }
}

fn parse_kind(raw: &str) -> Result<SearchEntityKind, String> {
    SearchEntityKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == raw.trim())
        .ok_or_else(|| format!("unknown kind `{raw}`"))
}
