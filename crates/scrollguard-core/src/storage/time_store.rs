//! Block records and news usage, persisted through a [`KvStore`].
//!
//! The [`TimeManager`] trait is the only way the escalation pipeline and the
//! reminder scheduler touch shared state. Every method takes `now` explicitly
//! so the same code path serves the live driver and deterministic tests.
//!
//! ## Keys
//!
//! - `block:host:<hostname>`: hostname-scoped [`BlockRecord`]
//! - `block:category:news`: category-scoped [`BlockRecord`]
//! - `news_usage`: the daily [`NewsUsage`] counter

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::Config;
use super::kv::KvStore;
use crate::error::Result;

const BLOCK_PREFIX: &str = "block:";
const NEWS_USAGE_KEY: &str = "news_usage";

/// Site category that can be blocked as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteCategory {
    News,
}

impl SiteCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SiteCategory::News => "news",
        }
    }
}

/// What a block record applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum BlockScope {
    Host(String),
    Category(SiteCategory),
}

impl BlockScope {
    pub fn host(hostname: impl Into<String>) -> Self {
        BlockScope::Host(hostname.into())
    }

    pub fn news() -> Self {
        BlockScope::Category(SiteCategory::News)
    }

    pub fn storage_key(&self) -> String {
        match self {
            BlockScope::Host(hostname) => format!("{BLOCK_PREFIX}host:{hostname}"),
            BlockScope::Category(category) => format!("{BLOCK_PREFIX}category:{}", category.as_str()),
        }
    }
}

impl fmt::Display for BlockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockScope::Host(hostname) => write!(f, "{hostname}"),
            BlockScope::Category(category) => write!(f, "all {} sites", category.as_str()),
        }
    }
}

/// A persisted expiry. Expired records are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub scope: BlockScope,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BlockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining milliseconds, never negative.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}

/// Daily news reading counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsUsage {
    pub daily_start: DateTime<Utc>,
    pub total_time_ms: u64,
    pub last_update: DateTime<Utc>,
}

impl NewsUsage {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            daily_start: day_start(now),
            total_time_ms: 0,
            last_update: now,
        }
    }

    /// Reset the counter when `now` falls on a later calendar day.
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = day_start(now);
        if self.daily_start < today {
            self.daily_start = today;
            self.total_time_ms = 0;
        }
    }
}

/// Start of the local calendar day containing `now`.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Format a millisecond duration as `m:ss` or `h:mm:ss`, rounding up to the
/// next whole second so a countdown never shows `0:00` while time remains.
pub fn format_time(ms: i64) -> String {
    if ms <= 0 {
        return "0:00".to_string();
    }
    let total_secs = (ms + 999) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Block and usage operations shared by every tab.
#[async_trait]
pub trait TimeManager: Send + Sync {
    async fn is_time_blocked(&self, hostname: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn create_time_block(&self, hostname: &str, now: DateTime<Utc>) -> Result<()>;
    async fn remove_time_block(&self, hostname: &str) -> Result<()>;
    async fn get_remaining_time(&self, hostname: &str, now: DateTime<Utc>) -> Result<i64>;

    async fn is_news_time_blocked(&self, now: DateTime<Utc>) -> Result<bool>;
    async fn create_news_time_block(&self, now: DateTime<Utc>) -> Result<()>;
    async fn remove_news_time_block(&self) -> Result<()>;
    async fn get_remaining_news_block_time(&self, now: DateTime<Utc>) -> Result<i64>;

    /// Add reading time and report whether the daily limit is now reached.
    async fn add_news_time(&self, delta_ms: u64, now: DateTime<Utc>) -> Result<bool>;

    fn format_time(&self, ms: i64) -> String {
        format_time(ms)
    }

    async fn is_blocked(&self, scope: &BlockScope, now: DateTime<Utc>) -> Result<bool> {
        match scope {
            BlockScope::Host(hostname) => self.is_time_blocked(hostname, now).await,
            BlockScope::Category(SiteCategory::News) => self.is_news_time_blocked(now).await,
        }
    }

    async fn create_block(&self, scope: &BlockScope, now: DateTime<Utc>) -> Result<()> {
        match scope {
            BlockScope::Host(hostname) => self.create_time_block(hostname, now).await,
            BlockScope::Category(SiteCategory::News) => self.create_news_time_block(now).await,
        }
    }

    async fn remove_block(&self, scope: &BlockScope) -> Result<()> {
        match scope {
            BlockScope::Host(hostname) => self.remove_time_block(hostname).await,
            BlockScope::Category(SiteCategory::News) => self.remove_news_time_block().await,
        }
    }

    async fn remaining(&self, scope: &BlockScope, now: DateTime<Utc>) -> Result<i64> {
        match scope {
            BlockScope::Host(hostname) => self.get_remaining_time(hostname, now).await,
            BlockScope::Category(SiteCategory::News) => {
                self.get_remaining_news_block_time(now).await
            }
        }
    }
}

/// [`TimeManager`] over any [`KvStore`], records encoded as JSON.
pub struct KvTimeManager<S> {
    store: S,
    block_duration: Duration,
    news_daily_limit_ms: u64,
}

impl<S: KvStore> KvTimeManager<S> {
    pub fn new(store: S, block_duration: Duration, news_daily_limit_ms: u64) -> Self {
        Self {
            store,
            block_duration,
            news_daily_limit_ms,
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(
            store,
            config.blocking.block_duration(),
            config.news.daily_limit_ms(),
        )
    }

    /// The stored record for `scope`, expired or not.
    pub fn record(&self, scope: &BlockScope) -> Result<Option<BlockRecord>> {
        match self.store.kv_get(&scope.storage_key())? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The record for `scope` if it has not expired.
    fn active_record(&self, scope: &BlockScope, now: DateTime<Utc>) -> Result<Option<BlockRecord>> {
        Ok(self.record(scope)?.filter(|r| !r.is_expired(now)))
    }

    fn write_block(&self, scope: BlockScope, now: DateTime<Utc>) -> Result<()> {
        let record = BlockRecord {
            scope,
            created_at: now,
            expires_at: now + self.block_duration,
        };
        let json = serde_json::to_string(&record)?;
        self.store.kv_set(&record.scope.storage_key(), &json)?;
        tracing::info!("Block created for {} until {}", record.scope, record.expires_at);
        Ok(())
    }

    fn delete_block(&self, scope: &BlockScope) -> Result<()> {
        self.store.kv_delete(&scope.storage_key())?;
        tracing::info!("Block removed for {}", scope);
        Ok(())
    }

    /// All non-expired block records.
    pub fn active_blocks(&self, now: DateTime<Utc>) -> Result<Vec<BlockRecord>> {
        let mut records = Vec::new();
        for key in self.store.kv_keys(BLOCK_PREFIX)? {
            let Some(json) = self.store.kv_get(&key)? else {
                continue;
            };
            match serde_json::from_str::<BlockRecord>(&json) {
                Ok(record) if !record.is_expired(now) => records.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable block record {}: {}", key, e),
            }
        }
        Ok(records)
    }

    /// Today's news usage, rolled over if the day changed.
    pub fn news_usage(&self, now: DateTime<Utc>) -> Result<NewsUsage> {
        let mut usage = match self.store.kv_get(NEWS_USAGE_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => NewsUsage::fresh(now),
        };
        usage.roll_over(now);
        Ok(usage)
    }

    pub fn reset_news_usage(&self) -> Result<()> {
        self.store.kv_delete(NEWS_USAGE_KEY)?;
        Ok(())
    }

    pub fn news_daily_limit_ms(&self) -> u64 {
        self.news_daily_limit_ms
    }
}

#[async_trait]
impl<S: KvStore> TimeManager for KvTimeManager<S> {
    async fn is_time_blocked(&self, hostname: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.active_record(&BlockScope::host(hostname), now)?.is_some())
    }

    async fn create_time_block(&self, hostname: &str, now: DateTime<Utc>) -> Result<()> {
        self.write_block(BlockScope::host(hostname), now)
    }

    async fn remove_time_block(&self, hostname: &str) -> Result<()> {
        self.delete_block(&BlockScope::host(hostname))
    }

    async fn get_remaining_time(&self, hostname: &str, now: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .active_record(&BlockScope::host(hostname), now)?
            .map(|r| r.remaining_ms(now))
            .unwrap_or(0))
    }

    async fn is_news_time_blocked(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.active_record(&BlockScope::news(), now)?.is_some())
    }

    async fn create_news_time_block(&self, now: DateTime<Utc>) -> Result<()> {
        self.write_block(BlockScope::news(), now)
    }

    async fn remove_news_time_block(&self) -> Result<()> {
        self.delete_block(&BlockScope::news())
    }

    async fn get_remaining_news_block_time(&self, now: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .active_record(&BlockScope::news(), now)?
            .map(|r| r.remaining_ms(now))
            .unwrap_or(0))
    }

    async fn add_news_time(&self, delta_ms: u64, now: DateTime<Utc>) -> Result<bool> {
        let mut usage = self.news_usage(now)?;
        usage.total_time_ms = usage.total_time_ms.saturating_add(delta_ms);
        usage.last_update = now;
        self.store
            .kv_set(NEWS_USAGE_KEY, &serde_json::to_string(&usage)?)?;

        let exceeded = usage.total_time_ms >= self.news_daily_limit_ms;
        tracing::debug!(
            "News time +{}ms, {}ms of {}ms used today",
            delta_ms,
            usage.total_time_ms,
            self.news_daily_limit_ms
        );
        Ok(exceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn manager() -> KvTimeManager<MemoryKv> {
        KvTimeManager::new(MemoryKv::new(), Duration::minutes(30), 20 * 60 * 1000)
    }

    #[test]
    fn format_time_examples() {
        assert_eq!(format_time(-5), "0:00");
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(1), "0:01");
        assert_eq!(format_time(59_000), "0:59");
        assert_eq!(format_time(61_500), "1:02");
        assert_eq!(format_time(30 * 60 * 1000), "30:00");
        assert_eq!(format_time(3_600_000 + 5_000), "1:00:05");
    }

    #[test]
    fn scope_keys_are_distinct() {
        assert_eq!(BlockScope::host("x.com").storage_key(), "block:host:x.com");
        assert_eq!(BlockScope::news().storage_key(), "block:category:news");
        assert_eq!(BlockScope::news().to_string(), "all news sites");
    }

    #[tokio::test]
    async fn host_block_lifecycle() {
        let times = manager();
        assert!(!times.is_time_blocked("reddit.com", t0()).await.unwrap());
        assert_eq!(times.get_remaining_time("reddit.com", t0()).await.unwrap(), 0);

        times.create_time_block("reddit.com", t0()).await.unwrap();
        assert!(times.is_time_blocked("reddit.com", t0()).await.unwrap());
        assert!(!times.is_news_time_blocked(t0()).await.unwrap());
        assert_eq!(
            times
                .get_remaining_time("reddit.com", t0() + Duration::minutes(10))
                .await
                .unwrap(),
            20 * 60 * 1000
        );

        times.remove_time_block("reddit.com").await.unwrap();
        assert!(!times.is_time_blocked("reddit.com", t0()).await.unwrap());
    }

    #[tokio::test]
    async fn expired_record_is_treated_as_absent() {
        let times = manager();
        times.create_news_time_block(t0()).await.unwrap();

        let at_expiry = t0() + Duration::minutes(30);
        assert!(!times.is_news_time_blocked(at_expiry).await.unwrap());
        assert_eq!(times.get_remaining_news_block_time(at_expiry).await.unwrap(), 0);
        assert!(times.active_blocks(at_expiry).unwrap().is_empty());
        // The stale record is still on disk until someone removes it.
        assert!(times.record(&BlockScope::news()).unwrap().is_some());
    }

    #[tokio::test]
    async fn recreating_a_block_overwrites_the_previous_record() {
        let times = manager();
        times.create_time_block("x.com", t0()).await.unwrap();
        times
            .create_time_block("x.com", t0() + Duration::minutes(10))
            .await
            .unwrap();

        let blocks = times.active_blocks(t0()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].expires_at, t0() + Duration::minutes(40));
    }

    #[tokio::test]
    async fn news_limit_reported_on_crossing_call() {
        let times = manager();
        let minute = 60 * 1000;
        let calls = [5 * minute, 5 * minute, 5 * minute, 6 * minute];

        let mut results = Vec::new();
        for (i, delta) in calls.iter().enumerate() {
            let now = t0() + Duration::minutes(i as i64);
            results.push(times.add_news_time(*delta, now).await.unwrap());
        }
        assert_eq!(results, vec![false, false, false, true]);
        assert_eq!(times.news_usage(t0()).unwrap().total_time_ms, 21 * minute);
    }

    #[tokio::test]
    async fn news_usage_resets_on_a_new_day() {
        let times = manager();
        times.add_news_time(19 * 60 * 1000, t0()).await.unwrap();

        let two_days_later = t0() + Duration::days(2);
        assert!(!times.add_news_time(60 * 1000, two_days_later).await.unwrap());
        let usage = times.news_usage(two_days_later).unwrap();
        assert_eq!(usage.total_time_ms, 60 * 1000);
        assert!(usage.daily_start > t0());
    }

    #[tokio::test]
    async fn scope_helpers_dispatch() {
        let times = manager();
        let news = BlockScope::news();
        times.create_block(&news, t0()).await.unwrap();
        assert!(times.is_blocked(&news, t0()).await.unwrap());
        assert!(!times.is_blocked(&BlockScope::host("cnn.com"), t0()).await.unwrap());
        assert_eq!(times.remaining(&news, t0()).await.unwrap(), 30 * 60 * 1000);
        times.remove_block(&news).await.unwrap();
        assert!(!times.is_blocked(&news, t0()).await.unwrap());
    }
}
