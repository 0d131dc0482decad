use std::sync::Arc;

use futures::StreamExt;

use bramify::app::{AppParts, assemble};
use bramify::channels::{Channel, ChannelManager, CliChannel, TelegramChannel};
use bramify::config::AppConfig;
use bramify::extract::StructuredExtractor;
use bramify::llm::create_provider;
use bramify::notify::Notifier;
use bramify::pipeline::Dispatcher;
use bramify::plugins::{PluginDeps, builtin_plugins};
use bramify::storage::{MemoryGateway, SheetsGateway, StorageGateway};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = bramify::logging::init(config.log_dir.as_deref());

    eprintln!("⏱  Bramify v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Mode at startup: {}", config.default_mode);

    // ── Extractor ───────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let extractor = Arc::new(StructuredExtractor::new(llm, config.extractor_config()));

    // ── Storage ─────────────────────────────────────────────────────────
    let storage: Arc<dyn StorageGateway> = match config.sheets.clone() {
        Some(sheets) => {
            eprintln!(
                "   Storage: Google Sheets {} (tabs: {} / {})",
                sheets.spreadsheet_id, sheets.production_tab, sheets.test_tab
            );
            Arc::new(SheetsGateway::new(sheets))
        }
        None => {
            eprintln!("   Storage: in-memory (set GOOGLE_SHEETS_SPREADSHEET_ID to persist)");
            Arc::new(MemoryGateway::new())
        }
    };

    // ── Core ────────────────────────────────────────────────────────────
    let (notifier, mut notifications) = Notifier::channel();
    let deps = PluginDeps {
        extractor,
        storage,
        notifier,
        timezone: config.timezone,
        reminders_path: config.reminders_path.clone(),
        reminder_check_interval: config.reminder_check_interval,
        command_prefix: config.command_prefix.clone(),
    };
    let mut app = assemble(AppParts {
        pipeline: config.pipeline_config(),
        initial_mode: config.default_mode,
        deps,
        plugins: builtin_plugins(),
    })
    .await?;

    eprintln!("   Plugins: {}", app.load_report.loaded.join(", "));
    for failure in &app.load_report.failed {
        eprintln!("   Plugin {} not loaded: {}", failure.id, failure.error);
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&app.orchestrator)));

    // ── Channels ────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    channels.add(Arc::new(CliChannel::default()));
    if let Some(token) = config.telegram_bot_token.clone() {
        let telegram = TelegramChannel::new(token);
        if let Err(e) = telegram.health_check().await {
            tracing::warn!(error = %e, "Telegram health check failed");
        }
        channels.add(Arc::new(telegram));
    }
    if config.allow_list.is_empty() {
        eprintln!("   Warning: TELEGRAM_ALLOWED_USER_IDS is empty, every sender will be denied");
    }
    eprintln!("   Channels: {}\n", channels.names().join(", "));

    let channels = Arc::new(channels);
    let mut inbound = channels.start_all().await?;

    // ── Event loop ──────────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            next = inbound.next() => {
                let Some(message) = next else {
                    tracing::info!("All channels closed");
                    break;
                };
                let outcome = dispatcher.submit(message.clone()).await;
                let channels = Arc::clone(&channels);
                tokio::spawn(async move {
                    let Ok(outcome) = outcome.await else {
                        tracing::error!(id = %message.id, "Message worker dropped the reply");
                        return;
                    };
                    if let Err(e) = channels.respond(&message, &outcome.reply).await {
                        tracing::error!(id = %message.id, error = %e, "Failed to send reply");
                    }
                });
            }
            Some(notification) = notifications.recv() => {
                if let Err(e) = channels.deliver(&notification).await {
                    tracing::error!(
                        user = %notification.user_id,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            }
        }
    }

    if let Err(e) = app.plugins.shutdown_all().await {
        tracing::warn!(error = %e, "Plugin shutdown reported an error");
    }
    channels.shutdown_all().await;
    Ok(())
}
