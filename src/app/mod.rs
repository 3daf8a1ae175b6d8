use crate::api::{ApiCommand, ApiServer};
use crate::config::Config;
use crate::events::{Dispatched, Dispatcher, InteractionEvent};
use crate::housekeeping::Housekeeper;
use crate::platform::{DiscordRest, InMemoryPlatform, OccupancyCache, Platform};
use crate::recruit::{RecruitContext, Recruiter, TeardownCause};
use crate::ui::Reply;
use crate::session::SessionStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run_service(dry_run: bool) -> Result<()> {
    info!("Starting rallycall service");

    let config = Config::load()?;
    config.validate()?;
    let config = Arc::new(config);

    let platform = build_platform(&config, dry_run)?;
    let store = SessionStore::new();
    let ctx = RecruitContext::new(store.clone(), platform, config.clone());
    let recruiter = Recruiter::new(ctx.clone());
    let dispatcher = Dispatcher::new(recruiter.clone());

    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<ApiCommand>(64);

    let housekeeper = Housekeeper::new(ctx, recruiter.sync.clone());
    let housekeeping = tokio::spawn(housekeeper.run(shutdown.child_token()));

    let api_server = ApiServer::new(tx, store.clone(), &config);
    let api_shutdown = shutdown.clone();
    let api = tokio::spawn(async move {
        if let Err(e) = api_server.start(api_shutdown.clone()).await {
            error!("API server failed: {}", e);
            api_shutdown.cancel();
        }
    });

    info!("rallycall is ready!");
    info!(
        "Deliver interactions with: curl -X POST http://{}/interactions -H 'content-type: application/json' -d '{{\"type\":\"ping\"}}'",
        config.api.bind
    );

    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, closing live recruitments");
                recruiter.teardown.teardown_all(TeardownCause::Shutdown).await;
                shutdown.cancel();
                break;
            }
            command = rx.recv() => match command {
                Some(ApiCommand::Interaction { event, respond }) => {
                    let dispatcher = dispatcher.clone();
                    let shutdown = shutdown.clone();
                    in_flight.spawn(async move {
                        let outcome = handle_interaction(&dispatcher, &shutdown, event).await;
                        let exit = outcome.shutdown;
                        if respond.send(outcome).is_err() {
                            warn!("Interaction caller went away before the reply was sent");
                        }
                        if exit {
                            shutdown.cancel();
                        }
                    });
                }
                None => break,
            },
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    warn!("Interaction task ended abnormally: {}", e);
                }
            }
        }
    }

    shutdown.cancel();
    close_remaining(&recruiter, &store, in_flight).await;
    if let Err(e) = housekeeping.await {
        warn!("Housekeeping task ended abnormally: {}", e);
    }
    if let Err(e) = api.await {
        warn!("API task ended abnormally: {}", e);
    }

    info!("rallycall stopped");
    Ok(())
}

/// Dispatch one interaction, refusing new work once shutdown has begun.
async fn handle_interaction(
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
    event: InteractionEvent,
) -> Dispatched {
    if shutdown.is_cancelled() {
        return Dispatched {
            reply: Some(Reply::ephemeral("rallycall is shutting down. Try again later.")),
            shutdown: false,
        };
    }
    dispatcher.dispatch(event).await
}

/// Let in-flight interactions finish, then close whatever they left open.
async fn close_remaining(
    recruiter: &Recruiter,
    store: &SessionStore,
    mut in_flight: JoinSet<()>,
) {
    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            warn!("Interaction task ended abnormally: {}", e);
        }
    }

    let leftover = store.len().await;
    if leftover > 0 {
        warn!("{} recruitment(s) still live at exit, closing them", leftover);
        recruiter.teardown.teardown_all(TeardownCause::Shutdown).await;
    }
}

fn build_platform(config: &Config, dry_run: bool) -> Result<Arc<dyn Platform>> {
    let discord = &config.discord;
    if dry_run {
        info!("Dry run: using the in-memory platform");
        return Ok(Arc::new(InMemoryPlatform::with_channels(
            discord.voice_category_id,
            &[discord.announcement_channel_id, discord.button_channel_id],
        )));
    }

    let rest = DiscordRest::new(discord, OccupancyCache::default())?;
    Ok(Arc::new(rest))
}
