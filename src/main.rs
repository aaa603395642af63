use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};
use weld_inspector_bot::archive::FeedbackArchive;
use weld_inspector_bot::bot::handlers::{self, Command};
use weld_inspector_bot::config::{Settings, LOG_FILE_PREFIX};
use weld_inspector_bot::conversation::ConversationHandler;
use weld_inspector_bot::detection::HttpDetector;
use weld_inspector_bot::session::RateLimitPolicy;
use weld_inspector_bot::workspace::TempWorkspace;

/// Regex patterns for redacting the bot token from logs
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        let output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        self.token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length, the redacted text may differ in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Patterns must exist before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    let settings = init_settings();
    // Flushes buffered log lines on drop
    let _log_guard = init_logging(patterns, &settings);

    info!("Starting Weld Inspector TG Bot...");
    info!("Configuration loaded successfully.");

    let workspace = TempWorkspace::new(settings.temp_root.clone());
    workspace.purge_root().await;

    let conversation = init_conversation(&settings, workspace);

    let bot = Bot::new(settings.telegram_token.clone());
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![conversation, settings])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Daily rotated log file, written from a background thread
fn file_writer(dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

fn init_logging(patterns: Arc<RedactionPatterns>, settings: &Settings) -> Option<WorkerGuard> {
    let stderr_writer = RedactingMakeWriter::new(io::stderr, patterns.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = file_writer(&settings.log_dir, settings.log_max_files);
    let (file_layer, guard, file_error) = match file {
        Ok((writer, guard)) => {
            let make_writer = RedactingMakeWriter::new(move || writer.clone(), patterns);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(make_writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stderr_writer))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("File logging disabled, cannot use {}: {e}", settings.log_dir.display());
    }
    guard
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            // Logging is not up yet
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}

fn init_conversation(settings: &Settings, workspace: TempWorkspace) -> Arc<ConversationHandler> {
    let policy = RateLimitPolicy::new(settings.rate_limit_window(), settings.max_photos_per_window);
    info!(
        "Rate limit: {} photos per {} min, detector at {}",
        settings.max_photos_per_window, settings.rate_limit_window_minutes, settings.detector_url
    );

    Arc::new(ConversationHandler::new(
        policy,
        workspace,
        FeedbackArchive::new(settings.archive_root.clone()),
        Arc::new(HttpDetector::new(settings.detector_url.clone())),
        settings.detector_timeout(),
    ))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.photo().is_some() || msg.document().is_some())
                        .endpoint(handle_image),
                )
                .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
                .branch(dptree::endpoint(handle_other)),
        )
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::Help => handlers::help(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_image(
    bot: Bot,
    msg: Message,
    conversation: Arc<ConversationHandler>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_image(bot, msg, conversation, settings).await {
        error!("Image handler error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    conversation: Arc<ConversationHandler>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg, conversation).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_other(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_other(bot, msg).await {
        error!("Fallback handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    conversation: Arc<ConversationHandler>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_callback(bot, q, conversation).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
