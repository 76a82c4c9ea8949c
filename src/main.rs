//! Roost - Bluesky timeline from the terminal
#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use roost::api::bluesky::BlueskyClient;
use roost::api::{FeedSource, PostActions};
use roost::config::APP_PASSWORD_ENV;
use roost::db::{MemoryCache, PostCache, SqliteCache};
use roost::{Config, Database, FeedEntry, FeedId, ModerationVerdict, TimelineEngine, TimelineEvent, TimelineHandle};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    match parse_args()? {
        Command::Timeline(options) => timeline_cli(&options).await,
        Command::Follow { options, interval } => follow_cli(&options, interval).await,
        Command::Like { uri } => engage_cli(&uri, Action::Like).await,
        Command::Repost { uri } => engage_cli(&uri, Action::Repost).await,
        Command::Anchor { feed, clear } => anchor_cli(feed.as_deref(), clear),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Options shared by commands that open a timeline
struct TimelineOptions {
    feed: Option<String>,
    limit: usize,
    no_cache: bool,
}

/// CLI commands
enum Command {
    Timeline(TimelineOptions),
    Follow {
        options: TimelineOptions,
        interval: Option<u64>,
    },
    Like {
        uri: String,
    },
    Repost {
        uri: String,
    },
    Anchor {
        feed: Option<String>,
        clear: bool,
    },
    Help,
    Version,
}

#[derive(Clone, Copy)]
enum Action {
    Like,
    Repost,
}

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_options(args: &[String]) -> Result<TimelineOptions> {
    let limit = match flag_value(args, &["--limit", "-l"]) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid --limit: {value}"))?,
        None => 20,
    };

    Ok(TimelineOptions {
        feed: flag_value(args, &["--feed", "-f"]).map(String::from),
        limit,
        no_cache: args.iter().any(|a| a == "--no-cache"),
    })
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Timeline(parse_options(&[])?));
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "timeline" | "tl" => Ok(Command::Timeline(parse_options(&args[2..])?)),

        "follow" => {
            let interval = match flag_value(&args[2..], &["--interval", "-i"]) {
                Some(value) => Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid --interval: {value}"))?,
                ),
                None => None,
            };
            if interval == Some(0) {
                anyhow::bail!("--interval must be at least 1 second");
            }
            Ok(Command::Follow {
                options: parse_options(&args[2..])?,
                interval,
            })
        }

        "like" | "repost" => {
            let uri = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing post URI (at://...)"))?
                .clone();
            if args[1] == "like" {
                Ok(Command::Like { uri })
            } else {
                Ok(Command::Repost { uri })
            }
        }

        "anchor" => Ok(Command::Anchor {
            feed: flag_value(&args[2..], &["--feed", "-f"]).map(String::from),
            clear: args.get(2).is_some_and(|a| a == "clear"),
        }),

        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'roost --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"🐦 Roost - Bluesky timeline sync

USAGE:
    roost [COMMAND]

COMMANDS:
    timeline [OPTIONS]                 Show the timeline (default)
      Options:
        -f, --feed <feed>              "following" or a feed/list at:// URI
        -l, --limit <n>                Number of posts (default: 20)
        --no-cache                     Don't read or write the local cache

    follow [OPTIONS]                   Keep the timeline open and print new posts
      Options:
        -i, --interval <secs>          Refresh interval (default: from config)
        (plus the timeline options)

    like <uri>                         Toggle like on a post in the timeline
    repost <uri>                       Toggle repost on a post in the timeline

    anchor [clear] [--feed <feed>]     Show or clear the saved scroll position

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

ENVIRONMENT:
    {}                 Bluesky app password
    RUST_LOG                           Log filter (default: warn)

CONFIG:
    {}

HOMEPAGE:
    {}
"#,
        APP_PASSWORD_ENV,
        config_path,
        roost::REPO_URL
    );
}

fn print_version() {
    println!("roost {}", roost::VERSION);
}

fn resolve_feed(config: &Config, feed: Option<&str>) -> Result<FeedId> {
    match feed {
        Some(feed) => FeedId::from_str(feed)
            .with_context(|| format!("Unknown feed '{feed}' (use 'following' or an at:// feed URI)")),
        None => config.feed_id(),
    }
}

async fn login(config: &Config) -> Result<Arc<BlueskyClient>> {
    if config.handle.is_empty() {
        let path = Config::default_path()?;
        anyhow::bail!("No handle configured. Set `handle` in {}", path.display());
    }
    let password = std::env::var(APP_PASSWORD_ENV)
        .with_context(|| format!("Set {APP_PASSWORD_ENV} to a Bluesky app password"))?;

    let client = BlueskyClient::login_with_pds(&config.handle, &password, &config.pds_url)
        .await
        .context("Bluesky login failed")?;
    Ok(Arc::new(client))
}

fn open_cache(config: &Config, no_cache: bool) -> Result<Arc<dyn PostCache>> {
    if no_cache {
        return Ok(Arc::new(MemoryCache::new()));
    }

    let db = Database::open()?;
    match db.clear_old_cache(config.timeline.cache_max_age_hours) {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Pruned {n} stale cached posts"),
        Err(e) => tracing::warn!("Failed to prune post cache: {e}"),
    }
    Ok(Arc::new(SqliteCache::new(db, config.timeline.cache_limit)))
}

async fn open_timeline(config: &Config, options: &TimelineOptions) -> Result<TimelineHandle> {
    let feed = resolve_feed(config, options.feed.as_deref())?;
    let client = login(config).await?;
    let cache = open_cache(config, options.no_cache)?;

    let source: Arc<dyn FeedSource> = client.clone();
    let actions: Arc<dyn PostActions> = client;
    let timeline = TimelineEngine::new(
        feed,
        config.timeline.clone(),
        config.moderation.clone(),
        source,
        cache,
        actions,
    )
    .spawn();

    timeline.load().await?;
    Ok(timeline)
}

fn print_entry(entry: &FeedEntry) {
    let post = &entry.post;
    if let Some(by) = entry.reposted_by() {
        println!("\n🔁 reposted by @{}", by);
    }
    println!("@{} · {}", post.author.handle, post.relative_time());
    match &entry.moderation {
        ModerationVerdict::Warn { label } => println!("⚠ content warning: {}", label),
        _ => println!("{}", post.text),
    }
    println!(
        "♥ {}  🔁 {}  💬 {}   {}",
        post.like_count,
        post.repost_count,
        post.reply_count,
        post.uri
    );
    println!("{}", post.web_url());
}

async fn timeline_cli(options: &TimelineOptions) -> Result<()> {
    let config = Config::load()?;
    let timeline = open_timeline(&config, options).await?;
    let snapshot = timeline.snapshot();

    println!("\n🐦 {} timeline", snapshot.feed.name());
    println!("{}", "─".repeat(60));

    if snapshot.pending_count > 0 {
        println!("({} newer posts above your last position)", snapshot.pending_count);
    }
    for entry in snapshot.displayed.iter().take(options.limit) {
        print_entry(entry);
    }

    if let Some(entry) = snapshot.displayed.first() {
        timeline.update_visible_position(0).await?;
        tracing::debug!(uri = entry.uri(), "Saved scroll position");
    }
    timeline.shutdown().await;
    Ok(())
}

async fn follow_cli(options: &TimelineOptions, interval: Option<u64>) -> Result<()> {
    let config = Config::load()?;
    let interval = interval
        .map(Duration::from_secs)
        .or_else(|| config.timeline.refresh_interval())
        .unwrap_or(Duration::from_secs(60))
        .max(config.timeline.minimum_fetch_interval());

    let timeline = open_timeline(&config, options).await?;
    let mut events = timeline.subscribe();

    // Show the newest posts first, then stream
    timeline.insert_pending().await?;
    let snapshot = timeline.snapshot();
    for entry in snapshot.displayed.iter().take(options.limit).rev() {
        print_entry(entry);
    }
    let mut newest = snapshot.displayed.first().map(|e| e.uri().to_string());

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    timeline.start_background(interval).await?;
    println!("\nFollowing (every {}s), Ctrl-C to stop", interval.as_secs());

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            event = events.recv() => match event {
                Ok(TimelineEvent::NewPostsAvailable { .. }) => {
                    timeline.insert_pending().await?;
                }
                Ok(TimelineEvent::AutoInserted { .. }) => {}
                Ok(TimelineEvent::BackgroundError(message)) => {
                    eprintln!("⚠ {}", message);
                    continue;
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Skipped {n} timeline events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }

        let snapshot = timeline.snapshot();
        let fresh: Vec<&FeedEntry> = snapshot
            .displayed
            .iter()
            .take_while(|e| Some(e.uri()) != newest.as_deref())
            .collect();
        for entry in fresh.iter().rev() {
            print_entry(entry);
        }
        if let Some(first) = snapshot.displayed.first() {
            newest = Some(first.uri().to_string());
        }
        timeline
            .mark_seen(fresh.iter().map(|e| e.uri().to_string()).collect())
            .await?;
    }

    timeline.stop_background().await?;
    timeline.update_visible_position(0).await?;
    timeline.shutdown().await;
    println!("\nStopped");
    Ok(())
}

async fn engage_cli(uri: &str, action: Action) -> Result<()> {
    let config = Config::load()?;
    let options = TimelineOptions {
        feed: None,
        limit: 0,
        no_cache: false,
    };
    let timeline = open_timeline(&config, &options).await?;
    timeline.insert_pending().await?;

    if !timeline.snapshot().displayed.iter().any(|e| e.uri() == uri) {
        timeline.shutdown().await;
        anyhow::bail!("Post {uri} is not in the loaded timeline");
    }

    match action {
        Action::Like => timeline.toggle_like(uri).await?,
        Action::Repost => timeline.toggle_repost(uri).await?,
    }

    let snapshot = timeline.snapshot();
    if let Some(entry) = snapshot.displayed.iter().find(|e| e.uri() == uri) {
        let (done, count) = match action {
            Action::Like => (entry.post.viewer.like.is_some(), entry.post.like_count),
            Action::Repost => (entry.post.viewer.repost.is_some(), entry.post.repost_count),
        };
        let verb = match (action, done) {
            (Action::Like, true) => "Liked",
            (Action::Like, false) => "Unliked",
            (Action::Repost, true) => "Reposted",
            (Action::Repost, false) => "Removed repost of",
        };
        println!("✓ {} \"{}\" ({})", verb, entry.post.preview(60), count);
    }

    timeline.shutdown().await;
    Ok(())
}

fn anchor_cli(feed: Option<&str>, clear: bool) -> Result<()> {
    let config = Config::load()?;
    let feed = resolve_feed(&config, feed)?;
    let db = Database::open()?;
    let key = feed.cache_key();

    if clear {
        db.clear_scroll_anchor(&key)?;
        println!("✓ Cleared scroll position for {}", feed.name());
        return Ok(());
    }

    match db.scroll_anchor(&key)? {
        Some(anchor) => {
            println!("Feed:   {}", feed.name());
            println!("Post:   {}", anchor.uri);
            match anchor.timestamp {
                Some(ts) => println!("Posted: {}", ts.to_rfc3339()),
                None => println!("Posted: unknown"),
            }
        }
        None => println!("No saved scroll position for {}", feed.name()),
    }
    Ok(())
}
