use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext, CreateEmbed, CreateMessage,
    EventHandler as SerenityEventHandler, GatewayIntents, GuildId, Http,
    Message as SerenityMessage, Ready, RoleId, UserId,
};
use serenity::cache::Cache;
use tokio::sync::{Mutex as AsyncMutex, RwLock, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeEvent, DonationEvent, MemberJoinedEvent};
use crate::config::Config;

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;

const MEMBER_EMBED_COLOR: u32 = 0x67d894;
const UNKNOWN_EMBED_COLOR: u32 = 0xFF5733;

#[derive(Debug, Clone, PartialEq)]
pub struct RoleInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub user_id: u64,
    pub username: String,
    pub discriminator: u16,
    pub role_ids: Vec<u64>,
}

impl MemberSnapshot {
    pub fn identity(&self) -> String {
        crate::bridge::identity::member_identity(&self.username, self.discriminator)
    }
}

/// Plain copy of one guild's roster, detached from the gateway cache so the
/// reconciliation logic can run (and be tested) without it.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildSnapshot {
    pub id: u64,
    pub name: String,
    pub roles: Vec<RoleInfo>,
    pub members: Vec<MemberSnapshot>,
}

/// Read access to the guild roster plus the two role mutations the bridge
/// issues. Each mutation is independently fallible; the caller decides how to
/// proceed on failure.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn guilds(&self) -> Vec<GuildSnapshot>;
    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<()>;
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<()>;
}

/// Human-readable outcome mirror. Sends are fire-and-forget: a failed
/// notification is logged, never surfaced to the triggering operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
    async fn donation_received(&self, resolved_identity: Option<&str>, event: &DonationEvent);
}

#[derive(Clone)]
pub struct DiscordClient {
    config: Arc<Config>,
    events: mpsc::Sender<BridgeEvent>,
    http: Arc<RwLock<Option<Arc<Http>>>>,
    cache: Arc<RwLock<Option<Arc<Cache>>>>,
    login_state: Arc<AsyncMutex<LoginState>>,
}

#[derive(Default)]
struct LoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct GatewayHandler {
    config: Arc<Config>,
    events: mpsc::Sender<BridgeEvent>,
    ready_sender: Arc<AsyncMutex<Option<oneshot::Sender<()>>>>,
}

#[serenity::async_trait]
impl SerenityEventHandler for GatewayHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn message(&self, ctx: SerenityContext, msg: SerenityMessage) {
        if msg.author.bot {
            return;
        }

        let our_id = ctx.cache.current_user().id;
        if !msg.mentions.iter().any(|user| user.id == our_id) {
            return;
        }

        let channel = ChannelId::new(self.config.bot.log_channel_id);
        if let Err(err) = channel
            .send_message(
                &ctx.http,
                CreateMessage::new().content(&self.config.bot.mention_response),
            )
            .await
        {
            error!("failed to answer mention: {err}");
        }
    }

    async fn guild_member_addition(
        &self,
        _ctx: SerenityContext,
        member: serenity::model::guild::Member,
    ) {
        if member.user.bot {
            return;
        }

        let event = MemberJoinedEvent {
            guild_id: member.guild_id.get(),
            user_id: member.user.id.get(),
            username: member.user.name.clone(),
            discriminator: member.user.discriminator.map(|d| d.get()).unwrap_or(0),
            role_ids: member.roles.iter().map(|role_id| role_id.get()).collect(),
        };

        debug!(
            "guild member joined guild_id={} user={}#{:04}",
            event.guild_id, event.username, event.discriminator
        );

        if let Err(err) = self.events.send(BridgeEvent::MemberJoined(event)).await {
            error!("failed to enqueue member-joined event: {err}");
        }
    }
}

impl DiscordClient {
    pub async fn new(config: Arc<Config>, events: mpsc::Sender<BridgeEvent>) -> Result<Self> {
        info!("initializing discord client");
        Ok(Self {
            config,
            events,
            http: Arc::new(RwLock::new(None)),
            cache: Arc::new(RwLock::new(None)),
            login_state: Arc::new(AsyncMutex::new(LoginState::default())),
        })
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        // The roster snapshot needs member lists, which ride on privileged
        // intents.
        let intents = if self.config.auth.use_privileged_intents {
            GatewayIntents::all()
        } else {
            GatewayIntents::non_privileged()
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = GatewayHandler {
            config: self.config.clone(),
            events: self.events.clone(),
            ready_sender: Arc::new(AsyncMutex::new(Some(ready_tx))),
        };

        let mut gateway_client = SerenityClient::builder(&self.config.auth.bot_token, intents)
            .event_handler(event_handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        *self.http.write().await = Some(gateway_client.http.clone());
        *self.cache.write().await = Some(gateway_client.cache.clone());

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(std::time::Duration::from_secs(30), ready_rx).await {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!(
                    "discord gateway exited before receiving Ready event"
                ))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }

    async fn http(&self) -> Result<Arc<Http>> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("discord http client not available"))
    }

    async fn send_to_log_channel(&self, message: CreateMessage) {
        let http = match self.http().await {
            Ok(http) => http,
            Err(err) => {
                warn!("dropping notification: {err}");
                return;
            }
        };

        let channel = ChannelId::new(self.config.bot.log_channel_id);
        if let Err(err) = channel.send_message(http.as_ref(), message).await {
            error!("failed to message log channel: {err}");
        }
    }
}

fn snapshot_guilds(cache: &Cache) -> Vec<GuildSnapshot> {
    cache
        .guilds()
        .into_iter()
        .filter_map(|guild_id| {
            let guild = cache.guild(guild_id)?;
            Some(GuildSnapshot {
                id: guild_id.get(),
                name: guild.name.clone(),
                roles: guild
                    .roles
                    .values()
                    .map(|role| RoleInfo {
                        id: role.id.get(),
                        name: role.name.clone(),
                    })
                    .collect(),
                members: guild
                    .members
                    .values()
                    .map(|member| MemberSnapshot {
                        user_id: member.user.id.get(),
                        username: member.user.name.clone(),
                        discriminator: member.user.discriminator.map(|d| d.get()).unwrap_or(0),
                        role_ids: member.roles.iter().map(|role_id| role_id.get()).collect(),
                    })
                    .collect(),
            })
        })
        .collect()
}

#[async_trait]
impl Roster for DiscordClient {
    async fn guilds(&self) -> Vec<GuildSnapshot> {
        let cache = self.cache.read().await;
        match cache.as_ref() {
            Some(cache) => snapshot_guilds(cache),
            None => {
                warn!("discord cache not available, roster is empty");
                Vec::new()
            }
        }
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<()> {
        let http = self.http().await?;
        http.add_member_role(
            GuildId::new(guild_id),
            UserId::new(user_id),
            RoleId::new(role_id),
            Some("kofi-bridge tier change"),
        )
        .await
        .map_err(|err| anyhow!("failed to add role {role_id} to {user_id}: {err}"))
    }

    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<()> {
        let http = self.http().await?;
        http.remove_member_role(
            GuildId::new(guild_id),
            UserId::new(user_id),
            RoleId::new(role_id),
            Some("kofi-bridge tier change"),
        )
        .await
        .map_err(|err| anyhow!("failed to remove role {role_id} from {user_id}: {err}"))
    }
}

#[async_trait]
impl Notifier for DiscordClient {
    async fn notify(&self, text: &str) {
        self.send_to_log_channel(CreateMessage::new().content(text))
            .await;
    }

    async fn donation_received(&self, resolved_identity: Option<&str>, event: &DonationEvent) {
        let color = if resolved_identity.is_some() {
            MEMBER_EMBED_COLOR
        } else {
            UNKNOWN_EMBED_COLOR
        };

        // Discord rejects embed fields with empty values.
        let field = |value: &str| {
            if value.is_empty() {
                "null".to_string()
            } else {
                value.to_string()
            }
        };

        let embed = CreateEmbed::new()
            .title("Donation received")
            .color(color)
            .field("Payment Source", field(&event.payment_source), true)
            .field("Payment ID", field(&event.payment_id), true)
            .field("Sender", field(&event.sender_name), true)
            .field(
                "Donor Discord name",
                resolved_identity.unwrap_or("Unknown").to_string(),
                true,
            )
            .field("Donation amount", event.amount.to_string(), true)
            .field("Message", field(&event.raw_message), true)
            .field("Received", event.timestamp.to_rfc3339(), true);

        self.send_to_log_channel(CreateMessage::new().embed(embed))
            .await;
    }
}
