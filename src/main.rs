// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

// Use library instead of local modules
use subreddit_follow::{AppConfig, FollowService, FollowStore, RedditClient, SqliteFollowStore, CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow up to five subreddits and rank their top posts")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, env = "FOLLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a subreddit, evicting the oldest one if five are followed
    Follow(FollowArgs),
    /// List followed subreddits, oldest first
    List,
    /// Print the top post of each followed subreddit, highest score first
    Feed,
    /// Show recent follow and eviction events
    History(HistoryArgs),
    /// Browse the ranked feed in the terminal
    Ui,
}

#[derive(Args, Debug)]
struct FollowArgs {
    /// Subreddit name, without the r/ prefix
    name: String,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_service(config: &AppConfig) -> Result<FollowService> {
    let store = SqliteFollowStore::open(&config.db_path)?;
    let source = RedditClient::new(&config.reddit)?;
    Ok(FollowService::new(store, source))
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Follow(args) => run_follow(&config, &args.name)?,
        Command::List => run_list(&config)?,
        Command::Feed => run_feed(&config)?,
        Command::History(args) => run_history(&config, args.limit)?,
        Command::Ui => run_ui_mode(&config)?,
    }

    Ok(())
}

fn run_follow(config: &AppConfig, name: &str) -> Result<()> {
    let service = build_service(config)?;

    match service.admit(name) {
        Ok(admission) => {
            println!("✓ Following r/{}", admission.followed.name);
            for old in &admission.evicted {
                println!("  ↳ unfollowed r/{} (oldest, limit is {})", old.name, CAPACITY);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Not followed [{}]: {}", e.reason_code(), e);
            std::process::exit(1);
        }
    }
}

fn run_list(config: &AppConfig) -> Result<()> {
    let store = SqliteFollowStore::open(&config.db_path)?;
    let followed = store.list()?;

    println!("📋 Followed subreddits ({}/{})", followed.len(), CAPACITY);
    for record in &followed {
        println!(
            "  r/{:<24} since {}",
            record.name,
            record.followed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}

fn run_feed(config: &AppConfig) -> Result<()> {
    let service = build_service(config)?;
    let posts = service.assemble_feed()?;

    if posts.is_empty() {
        println!("Nothing followed yet. Try: subreddit-follow follow rust");
        return Ok(());
    }

    for (rank, post) in posts.iter().enumerate() {
        if post.is_empty() {
            println!("{:>2}. (no data)", rank + 1);
            continue;
        }
        let score = post.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{:>2}. [{:>6}] r/{}  {}", rank + 1, score, post.subreddit, post.title);
        println!("              {}  ({})", post.url, post.created_at);
    }

    Ok(())
}

fn run_history(config: &AppConfig, limit: usize) -> Result<()> {
    let store = SqliteFollowStore::open(&config.db_path)?;

    for event in store.recent_events(limit)? {
        println!(
            "{}  {:<18} r/{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.entity_id
        );
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &AppConfig) -> Result<()> {
    println!("🖥️  Loading feed...\n");

    let service = build_service(config)?;
    let posts = service.assemble_feed()?;
    let followed = service.followed()?;

    let mut app = ui::App::new(posts, followed);
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use web UI: cargo run --bin follow-server --features server");
    std::process::exit(1);
}
