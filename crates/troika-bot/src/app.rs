//! Process assembly.
//!
//! Construction order: instance lock, messenger, gateway contours,
//! domain services, assistant, background loops, dispatcher, watchdog.
//! Nothing here is reachable from tests; every piece is exercised through
//! its own crate.

use std::sync::Arc;
use std::time::Duration;

use teloxide::dptree;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use troika_ai::{
    ActivePromotionsTool, HistoryWriter, KnowledgeSearchTool, OpenAiVendor, PartnerLookupTool,
    SessionConfig, SessionManager, ToolRegistry,
};
use troika_appeals::AppealsService;
use troika_auth::{AuthCache, AuthService};
use troika_broadcast::{
    Broadcaster, BroadcasterConfig, MediaCache, MediaCacheConfig, SentLedger,
};
use troika_config::{Config, CredentialsSource};
use troika_core::{
    Heartbeat, Messenger, OutboundText, PidLock, SendLimiter, TaskTracker, UserId,
};
use troika_monitor::{
    HealthMonitor, HealthMonitorConfig, ResponseMonitor, ResponseMonitorConfig, Watchdog,
    WatchdogConfig, WatchdogVerdict,
};
use troika_sheets::{
    Connector, GatewayConfig, SheetEndpoint, SheetsApi, SheetsGateway,
};

use crate::capabilities::{NoKnowledge, SheetPartnerLookup, SnapshotPromotions};
use crate::rest_sheets::{MetadataTokenSource, RestSheets, TokenSource};
use crate::router::{Inbound, Router};
use crate::telegram::TelegramMessenger;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(45);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const SYSTEM_PROMPT: &str = "You are the support assistant for authorized partners of the \
    loyalty program. Answer questions about partner terms and current promotions, using the \
    available tools for facts. Be concise and factual. When you cannot help, say that the \
    user should contact a specialist.";

/// Build everything and run until shutdown or a watchdog verdict.
pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    let _pid_lock = PidLock::acquire(&config.state_dir.join("troika.pid"))?;
    info!("instance lock acquired");

    match &config.credentials {
        CredentialsSource::File(path) => {
            info!(path = %path.display(), "service account credentials validated");
        },
        CredentialsSource::Inline(_) => info!("inline service account credentials validated"),
    }

    // Messenger.
    let bot = Bot::new(&config.messenger_token);
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));
    let limiter = Arc::new(SendLimiter::with_defaults());

    // Sheet contours over one gateway: shared pool, shared write lock.
    let tokens: Arc<dyn TokenSource> = Arc::new(MetadataTokenSource::new());
    let gateway = SheetsGateway::new(GatewayConfig::default());
    let auth_handle = gateway.sheet(
        SheetEndpoint::Auth,
        &config.auth_sheet.name,
        connector(&config.auth_sheet.id, &tokens),
    );
    let appeals_handle = gateway.sheet(
        SheetEndpoint::Appeals,
        &config.appeals_sheet.name,
        connector(&config.appeals_sheet.id, &tokens),
    );
    let promotions_handle = gateway.sheet(
        SheetEndpoint::Promotions,
        &config.promotions_sheet.name,
        connector(&config.promotions_sheet.id, &tokens),
    );

    // Domain services.
    let auth = Arc::new(AuthService::new(
        auth_handle.clone(),
        AuthCache::load(&config.state_dir.join("auth_cache.json")),
    ));
    let appeals = Arc::new(AppealsService::new(appeals_handle.clone()));

    // Broadcaster.
    let ledger = SentLedger::open(&config.state_dir.join("sent_promotions.tsv"))?;
    let broadcaster = Arc::new(Broadcaster::new(
        promotions_handle.clone(),
        Arc::clone(&auth),
        Arc::clone(&messenger),
        Arc::clone(&limiter),
        ledger,
        MediaCache::new(MediaCacheConfig::default()),
        BroadcasterConfig::default(),
    ));

    // Assistant sessions with the tool seams.
    let mut vendor = OpenAiVendor::new(&config.llm_api_key, &config.llm_assistant_id);
    if let Some(base_url) = &config.llm_base_url {
        vendor = vendor.with_base_url(base_url);
    }
    let tools = ToolRegistry::new()
        .register(Arc::new(ActivePromotionsTool::new(Arc::new(
            SnapshotPromotions::new(Arc::clone(&broadcaster)),
        ))))
        .register(Arc::new(PartnerLookupTool::new(Arc::new(
            SheetPartnerLookup::new(Arc::clone(&auth)),
        ))))
        .register(Arc::new(KnowledgeSearchTool::new(Arc::new(NoKnowledge))));
    if config.knowledge_drive_folder_id.is_none() {
        info!("no knowledge folder configured, knowledge search will return nothing");
    }
    let sessions = Arc::new(
        SessionManager::new(
            Arc::new(vendor),
            Arc::new(tools),
            SessionConfig {
                system_prompt: SYSTEM_PROMPT.to_string(),
                ..SessionConfig::default()
            },
        )
        .with_history_writer(HistoryWriter::new(config.state_dir.join("history"))),
    );

    // Shared liveness state.
    let tracker = TaskTracker::new();
    let heartbeat = Heartbeat::new();
    let escalation = CancellationToken::new();

    let router = Arc::new(Router::new(
        Arc::clone(&auth),
        Arc::clone(&appeals),
        sessions,
        Arc::clone(&messenger),
        Arc::clone(&limiter),
        heartbeat.clone(),
        config.web_form_url.clone(),
        tracker.cancellation_token(),
    ));

    // Background loops.
    {
        let monitor = Arc::new(ResponseMonitor::new(
            Arc::clone(&appeals),
            Arc::clone(&messenger),
            Arc::clone(&limiter),
            ResponseMonitorConfig::default(),
        ));
        tracker.track("response-monitor", move |cancel| monitor.run(cancel));
    }
    {
        let broadcaster = Arc::clone(&broadcaster);
        tracker.track("promotions-broadcaster", move |cancel| {
            broadcaster.run(cancel)
        });
    }
    {
        let health = HealthMonitor::new(
            Arc::clone(&messenger),
            vec![
                auth_handle.clone(),
                appeals_handle.clone(),
                promotions_handle.clone(),
            ],
            escalation.clone(),
            HealthMonitorConfig::default(),
        );
        tracker.track("health-monitor", move |cancel| health.run(cancel));
    }
    {
        let messenger = Arc::clone(&messenger);
        let heartbeat = heartbeat.clone();
        tracker.track("poll-keepalive", move |cancel| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return Ok::<_, String>(()),
                    () = tokio::time::sleep(KEEPALIVE_INTERVAL) => {},
                }
                if messenger.ping().await.is_ok() {
                    heartbeat.beat();
                }
            }
        });
    }
    {
        let router = Arc::clone(&router);
        let bot = bot.clone();
        tracker.track("telegram-dispatcher", move |cancel| async move {
            tokio::select! {
                () = cancel.cancelled() => {},
                () = dispatch(bot, router) => {},
            }
            Ok::<_, String>(())
        });
    }

    // Shutdown signal.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // The watchdog is the foreground task; it performs the emergency
    // shutdown itself on a stall.
    let watchdog = Watchdog::new(
        heartbeat,
        tracker.clone(),
        escalation,
        WatchdogConfig::default(),
    );
    match watchdog.run(shutdown).await {
        WatchdogVerdict::Stalled => {
            notify_admin(
                &config,
                &messenger,
                "Troika: polling stalled, restarting.",
            )
            .await;
            error!("exiting for supervisor restart");
            std::process::exit(1);
        },
        WatchdogVerdict::Cancelled => {
            tracker.shutdown(SHUTDOWN_GRACE).await;
            info!("shutdown complete");
            Ok(())
        },
    }
}

fn connector(document_id: &str, tokens: &Arc<dyn TokenSource>) -> Connector {
    let document_id = document_id.to_string();
    let tokens = Arc::clone(tokens);
    Arc::new(move || {
        Ok(Arc::new(RestSheets::new(&document_id, Arc::clone(&tokens))) as Arc<dyn SheetsApi>)
    })
}

/// Run the long-poll dispatcher until it exits.
async fn dispatch(bot: Bot, router: Arc<Router>) {
    use teloxide::dispatching::UpdateFilterExt as _;

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .default_handler(|_| async {})
        .build()
        .dispatch()
        .await;
}

async fn on_message(msg: Message, router: Arc<Router>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let Ok(raw_id) = i64::try_from(from.id.0) else {
        return Ok(());
    };
    let user = UserId(raw_id);

    let inbound = if let Some(data) = msg.web_app_data() {
        Inbound::WebForm(data.data.clone())
    } else if let Some(text) = msg.text() {
        Inbound::Text(text.to_string())
    } else {
        return Ok(());
    };

    router.handle(user, inbound).await;
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, router: Arc<Router>) -> ResponseResult<()> {
    let Ok(raw_id) = i64::try_from(q.from.id.0) else {
        return Ok(());
    };
    if let Some(data) = q.data.clone() {
        router.handle(UserId(raw_id), Inbound::Callback(data)).await;
    }
    let _ = bot.answer_callback_query(q.id).await;
    Ok(())
}

/// Wait for SIGINT or, where the platform has it, SIGTERM.
///
/// Supervisors stop the process with SIGTERM; both signals take the same
/// graceful path through the task tracker.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn notify_admin(config: &Config, messenger: &Arc<dyn Messenger>, text: &str) {
    let Some(admin) = config.admin_user_id else {
        return;
    };
    let _ = messenger
        .send_text(admin, OutboundText::plain(text))
        .await;
}
