// Application event loop: dispatches adapter messages to the command and
// reaction handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{AggregateStore, LiveVoteRegistry, ReactionHandler, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeEvent, BridgePlatform};
use crate::commands::CommandHandler;
use crate::config::Config;
use crate::protocol::AdapterMessage;

/// How long in-flight handlers get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct App {
    commands: Arc<CommandHandler>,
    reactions: Arc<ReactionHandler>,
    platform: Arc<BridgePlatform>,
    /// The bot's own id, once the adapter has said hello.
    self_id: Option<UserId>,
    tasks: JoinSet<()>,
}

impl App {
    pub fn new(
        config: &Config,
        store: Arc<AggregateStore>,
        registry: Arc<LiveVoteRegistry>,
        platform: Arc<BridgePlatform>,
    ) -> Self {
        App {
            commands: Arc::new(CommandHandler::new(
                config,
                Arc::clone(&store),
                Arc::clone(&registry),
            )),
            reactions: Arc::new(ReactionHandler::new(store, registry)),
            platform,
            self_id: None,
            tasks: JoinSet::new(),
        }
    }

    fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected { addr } => {
                info!("adapter connected from {addr}");
            }
            BridgeEvent::Disconnected => {
                let abandoned = self.platform.abandon_pending();
                info!(abandoned, "adapter disconnected");
            }
            BridgeEvent::Message(json) => self.handle_adapter_message(&json),
        }
    }

    fn handle_adapter_message(&mut self, json: &str) {
        let message: AdapterMessage = match serde_json::from_str(json) {
            Ok(m) => m,
            Err(e) => {
                warn!("ignoring malformed adapter message: {e}");
                return;
            }
        };

        match message {
            AdapterMessage::AdapterHello { payload } => {
                info!(platform = %payload.platform, self_id = %payload.self_id, "adapter identified");
                self.self_id = Some(payload.self_id);
            }
            AdapterMessage::MessageCreated { payload } => {
                let commands = Arc::clone(&self.commands);
                let platform = Arc::clone(&self.platform);
                self.tasks.spawn(async move {
                    commands.handle_message(&payload, platform.as_ref()).await;
                });
            }
            AdapterMessage::ReactionAdded { payload } => {
                let event = payload.into_event(self.self_id);
                let reactions = Arc::clone(&self.reactions);
                let platform = Arc::clone(&self.platform);
                self.tasks.spawn(async move {
                    reactions.handle(&event, platform.as_ref()).await;
                });
            }
            AdapterMessage::ActionResult { payload } => {
                let request_id = payload.request_id;
                if !self.platform.complete(payload) {
                    debug!(request_id, "no request is waiting for this result");
                }
            }
            AdapterMessage::Heartbeat => {
                debug!("adapter heartbeat");
            }
        }
    }

    /// Wait for in-flight handlers, aborting whatever outlives the grace
    /// period.
    async fn drain(&mut self) {
        let in_flight = self.tasks.len();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, "waiting for event handlers to finish");
        let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(remaining = self.tasks.len(), "aborting event handlers after grace period");
            self.tasks.shutdown().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the event loop until the bridge channel closes or `shutdown`
/// resolves. Each command and reaction is handled on its own task so action
/// results keep flowing while handlers wait on the adapter.
pub async fn run<F>(
    mut events: mpsc::Receiver<BridgeEvent>,
    shutdown: F,
    mut app: App,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    info!("application event loop started");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => app.handle_event(event),
                    None => {
                        info!("bridge channel closed, shutting down");
                        break;
                    }
                }
            }

            Some(joined) = app.tasks.join_next() => {
                if let Err(e) = joined {
                    error!("event handler failed: {e}");
                }
            }

            () = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    app.drain().await;
    Ok(())
}
