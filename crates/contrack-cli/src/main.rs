use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use contrack_core::{ContestId, ContestStatus, Identity, Platform, UserId};
use contrack_storage::PgStore;
use contrack_sync::{ContestQuery, ContrackServices, SyncConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "contrack-cli")]
#[command(about = "Contest Tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every enabled source once and reconcile into the store.
    Sync,
    /// Serve the JSON API (and the scheduler when enabled).
    Serve,
    /// Apply database migrations.
    Migrate,
    /// List contests with their current status.
    Contests(ContestsArgs),
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Match solution playlist videos to past contests.
    LinkSolutions,
}

#[derive(Debug, Args)]
struct ContestsArgs {
    #[arg(long)]
    status: Option<ContestStatus>,
    #[arg(long)]
    platform: Option<Platform>,
    /// Only contests bookmarked by this user.
    #[arg(long)]
    user: Option<String>,
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    Add {
        contest_id: String,
        #[arg(long)]
        user: String,
    },
    Remove {
        contest_id: String,
        #[arg(long)]
        user: String,
    },
    List {
        #[arg(long)]
        user: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_contest_id(raw: &str) -> Result<ContestId> {
    ContestId::parse(raw).with_context(|| format!("`{raw}` is not a contest id (expected e.g. cf:1999)"))
}

async fn services() -> Result<ContrackServices> {
    let services = ContrackServices::from_config(SyncConfig::from_env()).await?;
    if services.stores.backend == "memory" {
        warn!("DATABASE_URL not set; changes only live for this process");
    }
    Ok(services)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let outcome = contrack_sync::run_sync_once_from_env().await?;
            let summary = outcome.reconcile.clone().unwrap_or_default();
            println!(
                "sync {:?}: run_id={} contests={} inserted={} updated={} failed_sources={} rejected={}",
                outcome.disposition,
                outcome.run_id,
                outcome.contests_in_batch,
                summary.applied_inserts,
                summary.applied_updates,
                outcome.failed_sources.len(),
                outcome.rejected.len()
            );
            if let Some(notice) = outcome.notice {
                println!("notice: {notice}");
            }
        }
        Commands::Serve => contrack_web::serve_from_env().await?,
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let Some(url) = config.database_url else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgStore::connect(&url).await.context("connecting to postgres")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Contests(args) => {
            let services = services().await?;
            let query = ContestQuery {
                status: args.status,
                platform: args.platform,
                bookmarked_by: args.user.map(UserId::new),
            };
            let page = services.feed.list(&query, Utc::now()).await?;
            if let Some(warning) = &page.warning {
                println!("warning: {warning}");
            }
            for view in &page.contests {
                println!(
                    "{:<8} {:<28} {:<11} {} {}",
                    view.status.as_str(),
                    view.contest.id.as_str(),
                    view.contest.platform.display_name(),
                    view.contest.start_time.format("%Y-%m-%d %H:%M UTC"),
                    view.time_remaining
                        .as_deref()
                        .map(|t| format!("(starts in {t})"))
                        .unwrap_or_default()
                );
                println!("         {}", view.contest.name);
            }
        }
        Commands::Bookmark(command) => {
            let services = services().await?;
            let coordinator = &services.bookmarks;
            match command {
                BookmarkCommand::Add { contest_id, user } => {
                    let identity = Identity::User(UserId::new(user));
                    coordinator.add(&identity, &parse_contest_id(&contest_id)?).await?;
                    println!("bookmarked {contest_id}");
                }
                BookmarkCommand::Remove { contest_id, user } => {
                    let identity = Identity::User(UserId::new(user));
                    coordinator.remove(&identity, &parse_contest_id(&contest_id)?).await?;
                    println!("removed {contest_id}");
                }
                BookmarkCommand::List { user } => {
                    for id in coordinator.list(&Identity::User(UserId::new(user))).await? {
                        println!("{id}");
                    }
                }
            }
        }
        Commands::LinkSolutions => {
            let services = services().await?;
            let Some(linker) = &services.linker else {
                bail!("YOUTUBE_API_KEY and CONTRACK_SOLUTION_PLAYLISTS must be set to link solutions");
            };
            let report = linker.run_once(Utc::now()).await?;
            println!(
                "linked {} of {} past contests from {} videos",
                report.linked.len(),
                report.candidates,
                report.videos_seen
            );
            for linked in &report.linked {
                println!("{} -> {} ({:.2})", linked.contest_id.as_str(), linked.video_url, linked.score);
            }
        }
    }

    Ok(())
}
