use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Local, NaiveTime};
use tracing::{debug, error, info};

use super::{DonationBridge, format_json, identity};

/// Fire-and-forget sweep loop. Each pass runs the expiration sweep and then
/// rearms unconditionally; a failed sweep is alerted, not retried early. Runs
/// until the process exits.
pub async fn run_scheduler(bridge: Arc<DonationBridge>) {
    info!("expiration sweep scheduler started");
    loop {
        let now = Local::now();
        let next = next_sweep_time(now, bridge.config.sweep.hour, bridge.config.sweep.interval_days);
        let wait = (next - now).to_std().unwrap_or_default();

        bridge
            .message(&format!(
                ":information_source: Queuing next expired members check at `{}` ({:.1} hours).",
                next.format("%Y-%m-%d %H:%M:%S"),
                wait.as_secs_f64() / 3600.0
            ))
            .await;

        tokio::time::sleep(wait).await;

        if let Err(err) = bridge.sweep_expired().await {
            error!("expiration sweep failed: {err:#}");
            bridge.alert(&err, "expiration check").await;
        }
    }
}

/// Next run is (today + interval days) at hour:00:00 local time.
pub fn next_sweep_time(now: DateTime<Local>, hour: u32, interval_days: i64) -> DateTime<Local> {
    let date = now.date_naive() + Duration::days(interval_days);
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    date.and_time(time)
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or(now + Duration::days(interval_days))
}

impl DonationBridge {
    /// Revokes and deletes every membership whose expiration date has passed.
    /// The document is persisted once, after all entries are processed.
    pub async fn sweep_expired(&self) -> Result<()> {
        self.message(":information_source: Running check for expired members...")
            .await;

        let mut document = self.store.read().await.context("database read")?;
        let today = Local::now().date_naive();
        let guilds = self.roster.guilds().await;

        let expired: Vec<String> = document
            .members
            .iter()
            .filter(|(_, record)| record.expire_date <= today)
            .map(|(identity, _)| identity.clone())
            .collect();

        for member_identity in expired {
            let Some(record) = document.members.get(&member_identity).cloned() else {
                continue;
            };
            debug!("checking expired member {member_identity}");

            self.message(&format!(
                "User `{member_identity}`'s membership expired on {}.",
                record.expire_date
            ))
            .await;

            match identity::find_member(&guilds, &member_identity) {
                None => {
                    // No roles to revoke for someone who already left.
                    self.message(&format!(
                        ":warning: Could not find user `{member_identity}` in server. Maybe they left?"
                    ))
                    .await;
                }
                Some((guild, member)) => {
                    self.apply_role_plan(guild, member, None).await;
                }
            }

            self.message(&format!(
                ":no_entry_sign: Removing `{member_identity}` from database: {}",
                format_json(&record)
            ))
            .await;
            document.members.remove(&member_identity);
        }

        self.store.write(&document).await.context("database write")?;
        self.message(":white_check_mark: Expired member check complete.")
            .await;
        Ok(())
    }
}
