//! Dashbite CLI - manage a Dashbite session and checkout from the terminal.
//!
//! Signs in against the hosted backend, keeps the session in the configured
//! store, and runs mobile-money checkouts with status polling.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dashbite_core::config::ENV_STORE_PASSPHRASE;
use dashbite_core::utils::{format_optional, format_remaining, truncate_string};
use dashbite_core::{
    ApiClient, AuthApi, Config, EncryptedFileStore, KeyValueStore, KeyringStore, MemoryStore,
    PaymentApi, PaymentGateway, PaymentMethod, PaymentPoller, PaymentRequest, PollOutcome,
    Preferences, PreferencesStore, SessionManager, SessionMonitor, SignUpOutcome, SignUpRequest,
    StoreKind, Theme,
};

/// Directory for rotating log files; stderr only when unset
const ENV_LOG_DIR: &str = "DASHBITE_LOG_DIR";

const USAGE: &str = "\
Usage: dashbite <command> [args]

Commands:
  login [email]                          Sign in (prompts for the password)
  signup <email> [name] [phone]          Create an account
  callback <access> <refresh> [secs]     Store tokens from a confirmation link
  logout                                 Sign out and forget the session
  status                                 Show the stored session
  validate                               Validate (and refresh) the session
  watch                                  Re-validate periodically and report changes
  pay <order> <amount> <method> <phone>  Start a checkout and wait for the result
  pay-status <order>                     Check a payment once
  prefs [field value]                    Show or change preferences";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "dashbite.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn build_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    Ok(match config.store {
        StoreKind::Keyring => Arc::new(KeyringStore::default()),
        StoreKind::File => {
            let passphrase = std::env::var(ENV_STORE_PASSPHRASE)
                .with_context(|| format!("{} is required for the file store", ENV_STORE_PASSPHRASE))?;
            let dir = config.cache_dir()?.join("store");
            Arc::new(EncryptedFileStore::open(dir, &passphrase).context("Failed to open file store")?)
        }
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    })
}

struct Cli {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    api: ApiClient,
    sessions: SessionManager,
}

impl Cli {
    fn new(config: Config) -> Result<Self> {
        let store = build_store(&config)?;
        let api = ApiClient::new(config.backend_url()?, config.api_key.clone())?;
        let provider = Arc::new(AuthApi::new(api.clone()));
        let sessions = SessionManager::new(store.clone(), provider, config.session_policy());
        Ok(Self {
            config,
            store,
            api,
            sessions,
        })
    }

    fn payments(&self, token: String) -> Result<PaymentApi> {
        let api = self.api.with_base_url(self.config.payment_url()?);
        Ok(PaymentApi::new(api).with_token(token))
    }

    /// Validate the session and hand back its access token
    async fn require_token(&self) -> Result<String> {
        if !self.sessions.validate_session().await {
            anyhow::bail!("Not signed in. Run `dashbite login` first.");
        }
        self.sessions
            .access_token()
            .ok_or_else(|| anyhow::anyhow!("Session disappeared during validation"))
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let config = Config::load()?;
    info!(command, store = ?config.store, "Dashbite CLI starting");

    // Preferences only need the store
    if command == "prefs" {
        return preferences(&build_store(&config)?, rest);
    }

    let ctx = Cli::new(config)?;
    match command {
        "login" => login(&ctx, rest).await,
        "signup" => signup(&ctx, rest).await,
        "callback" => callback(&ctx, rest).await,
        "logout" => {
            ctx.sessions.sign_out().await?;
            eprintln!("Signed out.");
            Ok(())
        }
        "status" => {
            status(&ctx);
            Ok(())
        }
        "validate" => {
            let valid = ctx.sessions.validate_session().await;
            eprintln!("{}", if valid { "Session is valid." } else { "Session is not valid." });
            status(&ctx);
            Ok(())
        }
        "watch" => watch(&ctx).await,
        "pay" => pay(&ctx, rest).await,
        "pay-status" => pay_status(&ctx, rest).await,
        _ => {
            eprintln!("{}", USAGE);
            anyhow::bail!("Unknown command: {}", command)
        }
    }
}

async fn login(ctx: &Cli, args: &[String]) -> Result<()> {
    let email = match args.first() {
        Some(email) => email.clone(),
        None => match ctx.config.last_email.clone() {
            Some(last) => {
                let entered = prompt(&format!("Email [{}]: ", last))?;
                if entered.is_empty() {
                    last
                } else {
                    entered
                }
            }
            None => prompt("Email: ")?,
        },
    };
    let password = rpassword::prompt_password("Password: ")?;

    let session = ctx.sessions.sign_in(&email, &password).await?;
    eprintln!(
        "Signed in as {} ({}).",
        format_optional(&session.user.display_name, &session.user.email),
        session.user.email
    );

    // Only the file settings are rewritten, never the environment overrides
    if let Err(e) = Config::update_file(|c| c.last_email = Some(email)) {
        tracing::warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

async fn signup(ctx: &Cli, args: &[String]) -> Result<()> {
    let email = args
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("signup needs an email"))?;
    let password = rpassword::prompt_password("Choose a password: ")?;
    let request = SignUpRequest {
        email,
        password,
        display_name: args.get(1).cloned(),
        phone: args.get(2).cloned(),
    };

    match ctx.sessions.sign_up(&request).await? {
        SignUpOutcome::SignedIn(session) => {
            eprintln!("Account created; signed in as {}.", session.user.email)
        }
        SignUpOutcome::ConfirmationRequired(user) => eprintln!(
            "Account created for {}. Follow the confirmation link, then run `dashbite callback`.",
            user.email
        ),
    }
    Ok(())
}

async fn callback(ctx: &Cli, args: &[String]) -> Result<()> {
    let (Some(access), Some(refresh)) = (args.first(), args.get(1)) else {
        anyhow::bail!("callback needs an access token and a refresh token");
    };
    let expires_in = match args.get(2) {
        Some(secs) => Some(secs.parse::<i64>().context("expires_in must be seconds")?),
        None => None,
    };

    let session = ctx
        .sessions
        .exchange_callback_tokens(access, refresh, expires_in)
        .await?;
    eprintln!("Signed in as {}.", session.user.email);
    Ok(())
}

fn status(ctx: &Cli) {
    let Some(session) = ctx.sessions.get_session() else {
        eprintln!("No session.");
        return;
    };
    let now = Utc::now();
    let user = &session.user;

    eprintln!("User:          {} <{}>", format_optional(&user.display_name, "-"), user.email);
    eprintln!("Role:          {}", format_optional(&user.role, "-"));
    eprintln!("Phone:         {}", format_optional(&user.phone, "-"));
    eprintln!("State:         {:?}", ctx.sessions.state());
    eprintln!("Expires in:    {}", format_remaining(session.time_until_expiry(now)));
    eprintln!("Last active:   {}", session.last_activity.format("%Y-%m-%d %H:%M:%S UTC"));
    eprintln!("Access token:  {}", truncate_string(&session.access_token, 24));
}

async fn watch(ctx: &Cli) -> Result<()> {
    let interval = ctx.config.validation_interval();
    let mut monitor = SessionMonitor::spawn(ctx.sessions.clone(), interval);
    eprintln!(
        "Watching session every {}s (authenticated: {}). Ctrl-C to stop.",
        interval.as_secs(),
        monitor.is_authenticated()
    );

    while let Some(authenticated) = monitor.changed().await {
        eprintln!("Session status changed: authenticated = {}", authenticated);
        if !authenticated {
            break;
        }
    }
    monitor.stop();
    Ok(())
}

async fn pay(ctx: &Cli, args: &[String]) -> Result<()> {
    let [order_id, amount, method, phone] = args else {
        anyhow::bail!("pay needs <order> <amount> <method> <phone>");
    };
    let amount: u64 = amount.parse().context("amount must be a whole number")?;
    let method: PaymentMethod = method.parse()?;

    let preferences = PreferencesStore::new(ctx.store.clone()).load();
    let request = PaymentRequest::new(order_id.as_str(), amount, preferences.currency, method, phone)?;

    let gateway = Arc::new(ctx.payments(ctx.require_token().await?)?);
    let checkout = gateway.create_payment(&request).await?;
    println!("{}", checkout.payment_url);
    eprintln!("Open the link above to pay; waiting for confirmation...");

    let mut handle = PaymentPoller::spawn(gateway, checkout.order_id, ctx.config.poll_config());
    match handle.wait().await {
        PollOutcome::Succeeded => eprintln!("Payment confirmed."),
        PollOutcome::Failed => anyhow::bail!("Payment failed"),
        PollOutcome::TimedOut { attempts } => {
            anyhow::bail!("No confirmation after {} checks; try `dashbite pay-status`", attempts)
        }
        PollOutcome::Cancelled => anyhow::bail!("Payment polling cancelled"),
    }
    Ok(())
}

async fn pay_status(ctx: &Cli, args: &[String]) -> Result<()> {
    let order_id = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("pay-status needs an order id"))?;
    let gateway = ctx.payments(ctx.require_token().await?)?;
    let status = gateway.check_status(order_id).await?;
    println!("{}", status.as_str());
    Ok(())
}

/// A single preference edit from the command line
enum PreferenceChange {
    Language(String),
    Currency(String),
    Theme(Theme),
    OrderUpdates(bool),
    Promotions(bool),
    Reservations(bool),
}

impl PreferenceChange {
    fn parse(field: &str, value: &str) -> Result<Self> {
        let flag = || -> Result<bool> {
            value
                .parse::<bool>()
                .with_context(|| format!("{} expects true or false", field))
        };
        Ok(match field {
            "language" => Self::Language(value.to_string()),
            "currency" => Self::Currency(value.to_ascii_uppercase()),
            "theme" => Self::Theme(match value {
                "light" => Theme::Light,
                "dark" => Theme::Dark,
                "system" => Theme::System,
                other => anyhow::bail!("Unknown theme: {}", other),
            }),
            "notifications.order_updates" => Self::OrderUpdates(flag()?),
            "notifications.promotions" => Self::Promotions(flag()?),
            "notifications.reservations" => Self::Reservations(flag()?),
            other => anyhow::bail!("Unknown preference: {}", other),
        })
    }

    fn apply(self, prefs: &mut Preferences) {
        match self {
            Self::Language(language) => prefs.language = language,
            Self::Currency(currency) => prefs.currency = currency,
            Self::Theme(theme) => prefs.theme = theme,
            Self::OrderUpdates(on) => prefs.notifications.order_updates = on,
            Self::Promotions(on) => prefs.notifications.promotions = on,
            Self::Reservations(on) => prefs.notifications.reservations = on,
        }
    }
}

fn preferences(store: &Arc<dyn KeyValueStore>, args: &[String]) -> Result<()> {
    let prefs = PreferencesStore::new(store.clone());

    match args {
        [] => {}
        [field, value] => {
            let change = PreferenceChange::parse(field, value)?;
            prefs.update(|p| change.apply(p))?;
        }
        _ => anyhow::bail!("prefs takes no arguments or <field> <value>"),
    }

    println!("{}", serde_json::to_string_pretty(&prefs.load())?);
    Ok(())
}
