//! securitybot: verify security alerts with the people who triggered them
//!
//! # Usage
//!
//! ```bash
//! # Run the scheduler and the HTTP API against the chat bridge
//! securitybot run --config securitybot.toml
//!
//! # Seed an alert through the running daemon's API
//! securitybot create \
//!     --title sudo_on_prod --ldap alice \
//!     --description "sudo -i on web-01" --reason "ran sudo on a production host" \
//!     --escalation '[{"ldap": "bob", "delay_in_sec": 300}]'
//!
//! # Inspect tasks and suppression rules
//! securitybot query --status verification
//! securitybot ignored --ldap alice
//! securitybot blacklist
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tasker::{
    MemoryStore, Scheduler, SharedClock, SharedRuleStore, SharedTaskStore, StoreTasker,
    SystemClock, TaskStatus,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use securitybot::{api, telemetry, ApiState, BotConfig, HttpAuthBridge, HttpChatBridge};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (overrides environment defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// RocksDB state directory (overrides SECURITYBOT_STATE_PATH)
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    /// Seconds between ticks (overrides SECURITYBOT_TICK_SECS)
    #[arg(long, global = true)]
    tick_secs: Option<u64>,

    /// Bound on each store call in seconds
    #[arg(long, global = true)]
    store_timeout_secs: Option<u64>,

    /// Close unanswered tasks after this many seconds
    #[arg(long, global = true)]
    response_timeout_secs: Option<u64>,

    /// Chat bridge base URL (overrides SECURITYBOT_CHAT_URL)
    #[arg(long, global = true)]
    chat_url: Option<String>,

    /// Chat bridge token (overrides SLACK_API_TOKEN)
    #[arg(long, global = true)]
    chat_token: Option<String>,

    /// Channel receiving dispositions (overrides REPORTING_CHANNEL)
    #[arg(long, global = true)]
    reporting_channel: Option<String>,

    /// API listen address for `run` (overrides SECURITYBOT_API_ADDR)
    #[arg(long, global = true)]
    api_addr: Option<String>,

    /// Base URL of a running daemon's API, for the client commands
    #[arg(long, global = true, default_value = "http://127.0.0.1:8888")]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling scheduler and the HTTP API until interrupted
    Run,

    /// Create a new alert task through the API and print it as JSON
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        ldap: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        url: Option<String>,
        /// RFC 3339 event time (defaults to now)
        #[arg(long)]
        event_time: Option<DateTime<Utc>>,
        /// JSON list: [{"ldap": "bob", "delay_in_sec": 300}]
        #[arg(long, default_value = "")]
        escalation: String,
    },

    /// Print matching tasks as JSON, newest event first
    Query {
        #[arg(long, default_value_t = tasker::query::DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long = "title")]
        titles: Vec<String>,
        #[arg(long)]
        ldap: Vec<String>,
        /// Status name or level (open, in_progress, verification, closed)
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        performed: Option<bool>,
        #[arg(long)]
        authenticated: Option<bool>,
        /// Event time strictly after (RFC 3339)
        #[arg(long)]
        after: Option<DateTime<Utc>>,
        /// Event time strictly before (RFC 3339)
        #[arg(long)]
        before: Option<DateTime<Utc>>,
    },

    /// Print unexpired ignore rules, soonest expiry first
    Ignored {
        #[arg(long, default_value_t = tasker::query::DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long)]
        ldap: Vec<String>,
    },

    /// Stop prompting `ldap` for `title` for a while
    Ignore {
        #[arg(long)]
        ldap: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long)]
        duration_secs: u64,
    },

    /// Print blacklisted subjects, or add one with --add
    Blacklist {
        #[arg(long, default_value_t = tasker::query::DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long)]
        add: Option<String>,
    },
}

impl Args {
    /// Apply CLI overrides on top of env/file configuration.
    fn overlay(&self, config: &mut BotConfig) {
        if let Some(path) = &self.state_path {
            config.state_path = Some(path.clone());
        }
        if let Some(secs) = self.tick_secs {
            config.tick_interval_secs = secs;
        }
        if let Some(secs) = self.store_timeout_secs {
            config.store_timeout_secs = secs;
        }
        if let Some(secs) = self.response_timeout_secs {
            config.response_timeout_secs = Some(secs);
        }
        if let Some(url) = &self.chat_url {
            config.chat.url = url.clone();
        }
        if let Some(token) = &self.chat_token {
            config.chat.token = Some(token.clone());
        }
        if let Some(channel) = &self.reporting_channel {
            config.chat.reporting_channel = channel.clone();
        }
        if let Some(addr) = &self.api_addr {
            config.api_addr = addr.clone();
        }
    }
}

/// One backend serving both the task and the rule tables.
fn open_store(config: &BotConfig) -> Result<(SharedTaskStore, SharedRuleStore)> {
    #[cfg(feature = "heavy-state")]
    if let Some(path) = &config.state_path {
        info!(path = %path.display(), "Opening RocksDB task store");
        let store = Arc::new(
            tasker::RocksStore::open(path.clone())
                .with_context(|| format!("Failed to open state store at {}", path.display()))?,
        );
        let tasks: SharedTaskStore = store.clone();
        let rules: SharedRuleStore = store;
        return Ok((tasks, rules));
    }

    #[cfg(not(feature = "heavy-state"))]
    if config.state_path.is_some() {
        warn!("state_path is set but this build lacks heavy-state; tasks will not persist");
    }

    info!("Using in-memory task store");
    let store = Arc::new(MemoryStore::new());
    let tasks: SharedTaskStore = store.clone();
    let rules: SharedRuleStore = store;
    Ok((tasks, rules))
}

async fn run(config: BotConfig) -> Result<()> {
    let (store, rules) = open_store(&config)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let listener = TcpListener::bind(&config.api_addr)
        .await
        .with_context(|| format!("Failed to bind API on {}", config.api_addr))?;

    let tasker = Arc::new(
        StoreTasker::new(store.clone(), clock.clone()).with_store_timeout(config.store_timeout()),
    );
    let chat = Arc::new(
        HttpChatBridge::new(&config.chat).context("Failed to build chat bridge client")?,
    );

    let mut scheduler = Scheduler::new(tasker, chat, clock.clone(), config.scheduler_config())
        .with_rules(rules.clone());
    match &config.auth {
        Some(auth) => {
            info!(url = %auth.url, "Push-auth corroboration enabled");
            let bridge =
                HttpAuthBridge::new(auth).context("Failed to build auth bridge client")?;
            scheduler = scheduler.with_auth(Arc::new(bridge));
        }
        None => warn!("No auth bridge configured; unauthenticated claims stay unverified"),
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, stopping after current tick"),
            Err(e) => warn!(error = %e, "Failed to listen for interrupt; stopping"),
        }
        trigger.cancel();
    });

    let state = ApiState {
        tasks: store,
        rules,
        clock,
    };
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = api::serve(listener, state, shutdown.clone()).await {
                error!(error = %e, "API server failed; stopping");
                shutdown.cancel();
            }
        }
    });

    info!(
        chat = %config.chat.url,
        channel = %config.chat.reporting_channel,
        api = %config.api_addr,
        tick_secs = config.tick_interval_secs,
        "securitybot starting"
    );
    scheduler.run(shutdown.clone()).await;
    shutdown.cancel();
    server.await.context("API server task panicked")?;
    Ok(())
}

/// Send an API request and print the JSON reply.
async fn call(request: reqwest::RequestBuilder) -> Result<()> {
    let response = request.send().await.context("API unreachable")?;
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("API returned a non-JSON body")?;
    if !status.is_success() {
        let reason = body["error"].as_str().unwrap_or("unknown error");
        bail!("API request failed ({}): {}", status, reason);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn csv(items: &[String]) -> Option<String> {
    (!items.is_empty()).then(|| items.join(","))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbose);

    let mut config = BotConfig::load(args.config.as_deref()).context("Failed to load config")?;
    args.overlay(&mut config);
    config.validate().context("Invalid configuration")?;

    let client = reqwest::Client::new();
    let base = args.api_url.trim_end_matches('/').to_string();

    match args.command {
        Command::Run => run(config).await?,

        Command::Create {
            title,
            ldap,
            description,
            reason,
            url,
            event_time,
            escalation,
        } => {
            let mut form = vec![
                ("title", title),
                ("ldap", ldap),
                ("description", description),
                ("reason", reason),
                ("escalation", escalation),
            ];
            if let Some(url) = url {
                form.push(("url", url));
            }
            if let Some(at) = event_time {
                form.push(("event_time", at.timestamp().to_string()));
            }
            call(client.post(format!("{}/api/create", base)).form(&form)).await?;
        }

        Command::Query {
            limit,
            titles,
            ldap,
            status,
            performed,
            authenticated,
            after,
            before,
        } => {
            let mut params = vec![("limit", limit.to_string())];
            let optional = [
                ("titles", csv(&titles)),
                ("ldap", csv(&ldap)),
                ("status", status.map(|s| s.level().to_string())),
                ("performed", performed.map(|p| p.to_string())),
                ("authenticated", authenticated.map(|a| a.to_string())),
                ("after", after.map(|t| t.timestamp().to_string())),
                ("before", before.map(|t| t.timestamp().to_string())),
            ];
            params.extend(optional.into_iter().filter_map(|(k, v)| Some((k, v?))));
            call(client.get(format!("{}/api/query", base)).query(&params)).await?;
        }

        Command::Ignored { limit, ldap } => {
            let mut params = vec![("limit", limit.to_string())];
            if let Some(ldap) = csv(&ldap) {
                params.push(("ldap", ldap));
            }
            call(client.get(format!("{}/api/ignored", base)).query(&params)).await?;
        }

        Command::Ignore {
            ldap,
            title,
            reason,
            duration_secs,
        } => {
            let form = [
                ("ldap", ldap),
                ("title", title),
                ("reason", reason),
                ("duration_secs", duration_secs.to_string()),
            ];
            call(client.post(format!("{}/api/ignored", base)).form(&form)).await?;
        }

        Command::Blacklist { limit, add } => {
            let request = match add {
                Some(ldap) => client
                    .post(format!("{}/api/blacklist", base))
                    .form(&[("ldap", ldap)]),
                None => client
                    .get(format!("{}/api/blacklist", base))
                    .query(&[("limit", limit.to_string())]),
            };
            call(request).await?;
        }
    }

    Ok(())
}
