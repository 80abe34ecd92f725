use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::discord::{GuildSnapshot, MemberSnapshot, Notifier, RoleInfo, Roster};
use crate::store::{MemberRecord, MembershipStore, PendingRecord};

pub mod identity;
pub mod roles;
pub mod sweeper;
pub mod tiers;

/// One normalized donation, consumed exactly once.
#[derive(Debug, Clone)]
pub struct DonationEvent {
    pub payment_source: String,
    pub payment_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub sender_name: String,
    pub raw_message: String,
}

#[derive(Debug, Clone)]
pub struct MemberJoinedEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub username: String,
    pub discriminator: u16,
    pub role_ids: Vec<u64>,
}

/// Everything the dispatcher consumes, in arrival order. A single consumer
/// keeps donation handling and admissions from interleaving their
/// read-modify-write cycles against the store.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Donation(DonationEvent),
    MemberJoined(MemberJoinedEvent),
}

pub struct DonationBridge {
    config: Arc<Config>,
    store: MembershipStore,
    roster: Arc<dyn Roster>,
    notifier: Arc<dyn Notifier>,
}

impl DonationBridge {
    pub fn new(
        config: Arc<Config>,
        store: MembershipStore,
        roster: Arc<dyn Roster>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            roster,
            notifier,
        }
    }

    pub async fn announce_connected(&self) {
        self.message(&self.config.bot.connected_message).await;
    }

    /// Single-consumer dispatch loop; returns when every sender is gone.
    pub async fn run(&self, mut events: mpsc::Receiver<BridgeEvent>) {
        info!("donation bridge dispatcher started");
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::Donation(donation) => self.handle_donation(donation).await,
                BridgeEvent::MemberJoined(joined) => self.handle_member_joined(joined).await,
            }
        }
        info!("donation bridge dispatcher stopped");
    }

    /// Classification boundary: nothing escapes to the inbound transport.
    pub async fn handle_donation(&self, event: DonationEvent) {
        info!("received donation: {}", event.amount);
        debug!("donation event {:?}", event);
        if let Err(err) = self.route_donation(&event).await {
            error!("donation handling failed: {err:#}");
            self.alert(&err, "updating donor role and logging donation")
                .await;
        }
    }

    async fn route_donation(&self, event: &DonationEvent) -> Result<()> {
        let Some(identity) = identity::find_identity(&event.raw_message) else {
            let ((), saved) = tokio::join!(
                self.notifier.donation_received(None, event),
                self.register_unknown(event),
            );
            return saved;
        };

        let guilds = self.roster.guilds().await;
        let Some((guild, member)) = identity::find_member(&guilds, &identity) else {
            let ((), saved) = tokio::join!(
                self.notifier.donation_received(None, event),
                self.register_pending(event, &identity),
            );
            return saved;
        };

        let ((), saved) = tokio::join!(
            self.notifier.donation_received(Some(&identity), event),
            self.register_member(event, guild, member),
        );
        saved
    }

    /// Donation with no recognizable identity in its message.
    async fn register_unknown(&self, event: &DonationEvent) -> Result<()> {
        let mut document = self.store.read().await.context("database read")?;

        let entry = PendingRecord {
            tier: tiers::tier_for_amount(&self.config.tiers, event.amount).map(|t| t.name),
            expire_date: tiers::expire_date(event.timestamp),
            payment_amount: event.amount,
        };
        document.unknown.push(entry.clone());

        self.store.write(&document).await.context("database write")?;
        self.message(&format!(
            ":floppy_disk: Could not find user in message. Saving as `unknown` member: {}",
            format_json(&entry)
        ))
        .await;
        Ok(())
    }

    /// Identity known, but not present in any tracked guild yet.
    async fn register_pending(&self, event: &DonationEvent, identity: &str) -> Result<()> {
        let mut document = self.store.read().await.context("database read")?;

        if let Some(previous) = document.pending.get(identity) {
            self.message(&format!(
                ":information_source: {identity} already exists as an entry in the database. \
                 Their past data will be overwritten: {}",
                format_json(previous)
            ))
            .await;
        }

        let entry = PendingRecord {
            tier: tiers::tier_for_amount(&self.config.tiers, event.amount).map(|t| t.name),
            expire_date: tiers::expire_date(event.timestamp),
            payment_amount: event.amount,
        };
        document.pending.insert(identity.to_string(), entry.clone());

        self.store.write(&document).await.context("database write")?;
        self.message(&format!(
            ":floppy_disk: {identity} is not a member in the server. Saving as `pending` member: {}",
            format_json(&entry)
        ))
        .await;
        Ok(())
    }

    /// Identity resolved to a live guild member: reconcile roles and record
    /// the membership.
    async fn register_member(
        &self,
        event: &DonationEvent,
        guild: &GuildSnapshot,
        member: &MemberSnapshot,
    ) -> Result<()> {
        let identity = member.identity();
        debug!(
            "registering member {identity} from guild {} ({})",
            guild.name, guild.id
        );
        let mut document = self.store.read().await.context("database read")?;

        if let Some(previous) = document.members.get(&identity) {
            self.message(&format!(
                ":information_source: `{identity}` already exists as an entry in the database. \
                 Their past data will be overwritten: {}",
                format_json(previous)
            ))
            .await;
        }

        let desired = self
            .resolve_tier_role(guild, &identity, event.amount)
            .await;
        self.apply_role_plan(guild, member, desired.as_ref()).await;

        let entry = MemberRecord {
            expire_date: tiers::expire_date(event.timestamp),
            payment_amount: event.amount,
        };
        document.members.insert(identity, entry.clone());

        self.store.write(&document).await.context("database write")?;
        self.message(&format!(
            ":floppy_disk: Saved to `members`: {}",
            format_json(&entry)
        ))
        .await;
        Ok(())
    }

    /// Tier role the member should end up with. A missing tier or a tier role
    /// that does not exist in the guild both resolve to no role, each with its
    /// own notification.
    async fn resolve_tier_role(
        &self,
        guild: &GuildSnapshot,
        identity: &str,
        amount: f64,
    ) -> Option<RoleInfo> {
        let Some(tier) = tiers::tier_for_amount(&self.config.tiers, amount) else {
            self.message(&format!(
                ":information_source: No tiers match `{identity}`'s donation of `{amount}`. \
                 Their past roles will be removed."
            ))
            .await;
            return None;
        };

        match roles::role_by_name(guild, &tier.name) {
            Some(role) => Some(role.clone()),
            None => {
                self.message(&format!(
                    ":warning: Tried giving role `{}` to `{identity}`, but it was not found. \
                     Has it been created yet?\nRemoving user's past roles.",
                    tier.name
                ))
                .await;
                None
            }
        }
    }

    /// Executes a role diff. Each mutation fails independently; a failed
    /// removal never blocks the others and nothing is rolled back.
    pub(crate) async fn apply_role_plan(
        &self,
        guild: &GuildSnapshot,
        member: &MemberSnapshot,
        desired: Option<&RoleInfo>,
    ) {
        let tier_names: Vec<String> = self.config.tiers.iter().map(|t| t.name.clone()).collect();
        let plan = roles::plan_role_change(&tier_names, guild, member, desired);
        let identity = member.identity();

        if plan.already_held
            && let Some(role) = desired
        {
            self.message(&format!(
                "{identity} already has role {}. No role added.",
                role.name
            ))
            .await;
        }

        if let Some(role) = &plan.add {
            match self
                .roster
                .add_role(guild.id, member.user_id, role.id)
                .await
            {
                Ok(()) => {
                    self.message(&format!(
                        ":star: Set role `{}` for member `{identity}`",
                        role.name
                    ))
                    .await;
                }
                Err(err) => self.alert(&err, "role adding").await,
            }
        }

        for role in &plan.remove {
            match self
                .roster
                .remove_role(guild.id, member.user_id, role.id)
                .await
            {
                Ok(()) => {
                    self.message(&format!(
                        ":no_entry_sign: Removed role `{}` for member `{identity}`",
                        role.name
                    ))
                    .await;
                }
                Err(err) => self.alert(&err, "role removal").await,
            }
        }
    }

    /// Promotes a pending record to a full membership when its identity joins
    /// a tracked guild.
    pub async fn handle_member_joined(&self, event: MemberJoinedEvent) {
        if let Err(err) = self.admit_member(&event).await {
            error!("member admission failed: {err:#}");
            self.alert(&err, "new member admission").await;
        }
    }

    async fn admit_member(&self, event: &MemberJoinedEvent) -> Result<()> {
        let identity = identity::member_identity(&event.username, event.discriminator);
        let mut document = self.store.read().await.context("database read")?;

        let Some(entry) = document.pending.remove(&identity) else {
            self.message(&format!(
                ":warning: User `{identity}` not found in the `pending` database. No roles \
                 assigned. Maybe they didn't include their Discord ID in their message, or \
                 they're not a supporter?"
            ))
            .await;
            return Ok(());
        };

        self.message(&format!(
            ":information_source: Found member `{identity}` in `pending` records: {}",
            format_json(&entry)
        ))
        .await;

        let guilds = self.roster.guilds().await;
        let guild = guilds
            .iter()
            .find(|guild| guild.id == event.guild_id)
            .context("joined guild is not in the roster")?;

        // The gateway event carries the member's roles, so no cache lookup is
        // needed for the freshly joined member.
        let member = MemberSnapshot {
            user_id: event.user_id,
            username: event.username.clone(),
            discriminator: event.discriminator,
            role_ids: event.role_ids.clone(),
        };

        let desired = self
            .resolve_tier_role(guild, &identity, entry.payment_amount)
            .await;
        self.apply_role_plan(guild, &member, desired.as_ref()).await;

        let record = MemberRecord {
            expire_date: entry.expire_date,
            payment_amount: entry.payment_amount,
        };
        document.members.insert(identity, record.clone());

        self.store.write(&document).await.context("database write")?;
        self.message(&format!(
            ":floppy_disk: Removed from `pending` and saved to `members`: {}",
            format_json(&record)
        ))
        .await;
        Ok(())
    }

    /// Logs and mirrors one notification to the log channel.
    pub(crate) async fn message(&self, text: &str) {
        info!("{text}");
        self.notifier.notify(text).await;
    }

    /// Logs an error and raises it in the log channel, tagged with its source.
    pub(crate) async fn alert(&self, err: &(dyn std::fmt::Display + Send + Sync), source: &str) {
        error!("{source}: {err}");
        self.notifier
            .notify(&format!(":bangbang: `{err}` in {source}"))
            .await;
    }
}

fn format_json<T: Serialize>(value: &T) -> String {
    let body =
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "<unserializable>".to_string());
    format!("```json\n{body}\n```")
}
