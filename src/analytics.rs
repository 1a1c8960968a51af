//! Time-bucketed analytics counters and the recent-event ring.
//!
//! Page views, user actions, and business events accumulate into daily (and
//! for page views, hourly) store counters using the same
//! increment-then-expire primitive as the rate limiter. Each event also
//! leaves a short-lived raw snapshot keyed by its timestamp, which the
//! real-time view aggregates by scanning a bounded range instead of
//! maintaining a stream.
//!
//! Tracking is fire-and-forget: failures are logged and swallowed, and
//! callers spawn these methods off the request path so a slow store never
//! delays a response.

use crate::error::GateError;
use crate::rate_limiter::epoch_millis;
use crate::store::KeyValueStore;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const COUNTER_PREFIX: &str = "analytics";
const RECENT_PREFIX: &str = "analytics:recent:";

/// Daily and hourly counters live for 30 days.
const COUNTER_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
/// Page-view and action snapshots live for an hour.
const RECENT_TTL: Duration = Duration::from_secs(3600);
/// Business-event snapshots live for a week.
const BUSINESS_RECENT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// The real-time view looks back one hour.
const REALTIME_WINDOW_MS: u64 = 3600 * 1000;
/// Upper bound on raw events returned by the real-time view.
const REALTIME_EVENT_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageViewEvent {
    pub path: String,
    pub visitor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActionEvent {
    pub action: String,
    pub path: String,
    pub visitor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub name: String,
    pub detail: Value,
    pub timestamp_ms: u64,
}

impl BusinessEvent {
    pub fn new(name: &str, detail: Value) -> Self {
        Self {
            name: name.to_string(),
            detail,
            timestamp_ms: epoch_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyCounts {
    pub date: NaiveDate,
    pub page_views: u64,
    pub actions: u64,
    pub business_events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsTotals {
    pub page_views: u64,
    pub actions: u64,
    pub business_events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: Vec<DailyCounts>,
    pub totals: AnalyticsTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentEvent {
    pub kind: String,
    pub timestamp_ms: u64,
    pub payload: Value,
}

/// Approximation of current activity, bounded by snapshot TTLs. Not an
/// exact stream aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct RealTimeReport {
    pub active_users: u64,
    pub page_views_last_hour: u64,
    pub actions_last_hour: u64,
    pub business_events_last_hour: u64,
    pub recent: Vec<RecentEvent>,
}

pub struct AnalyticsPipeline {
    store: Arc<dyn KeyValueStore>,
}

impl AnalyticsPipeline {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn track_page_view(&self, event: PageViewEvent) {
        if let Err(e) = self.record_page_view(&event).await {
            warn!(path = %event.path, error = %e, "page view tracking failed");
        }
    }

    pub async fn track_user_action(&self, event: UserActionEvent) {
        if let Err(e) = self.record_user_action(&event).await {
            warn!(action = %event.action, error = %e, "user action tracking failed");
        }
    }

    pub async fn track_business_event(&self, event: BusinessEvent) {
        if let Err(e) = self.record_business_event(&event).await {
            warn!(name = %event.name, error = %e, "business event tracking failed");
        }
    }

    async fn record_page_view(&self, event: &PageViewEvent) -> Result<(), GateError> {
        let Some((date, hour)) = date_parts(event.timestamp_ms) else {
            warn!(timestamp_ms = event.timestamp_ms, "unrepresentable page view timestamp");
            return Ok(());
        };

        self.bump(&format!("{}:pageviews:{}", COUNTER_PREFIX, date))
            .await?;
        self.bump(&format!("{}:pageviews:{}:{:02}", COUNTER_PREFIX, date, hour))
            .await?;
        self.snapshot("page", event.timestamp_ms, serde_json::to_value(event)?, RECENT_TTL)
            .await
    }

    async fn record_user_action(&self, event: &UserActionEvent) -> Result<(), GateError> {
        let Some((date, _)) = date_parts(event.timestamp_ms) else {
            warn!(timestamp_ms = event.timestamp_ms, "unrepresentable action timestamp");
            return Ok(());
        };

        self.bump(&format!("{}:actions:{}", COUNTER_PREFIX, date))
            .await?;
        self.snapshot("action", event.timestamp_ms, serde_json::to_value(event)?, RECENT_TTL)
            .await
    }

    async fn record_business_event(&self, event: &BusinessEvent) -> Result<(), GateError> {
        let Some((date, _)) = date_parts(event.timestamp_ms) else {
            warn!(timestamp_ms = event.timestamp_ms, "unrepresentable business event timestamp");
            return Ok(());
        };

        self.bump(&format!("{}:business:{}", COUNTER_PREFIX, date))
            .await?;
        self.snapshot(
            "business",
            event.timestamp_ms,
            serde_json::to_value(event)?,
            BUSINESS_RECENT_TTL,
        )
        .await
    }

    /// Increment a counter; the hit that creates it arms its TTL.
    async fn bump(&self, key: &str) -> Result<(), GateError> {
        let count = self.store.increment(key).await?;
        if count == 1 {
            self.store.expire(key, COUNTER_TTL).await?;
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        kind: &str,
        timestamp_ms: u64,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), GateError> {
        let key = format!(
            "{}{}:{}:{}",
            RECENT_PREFIX,
            kind,
            timestamp_ms,
            Uuid::new_v4().simple()
        );
        self.store.set_with_ttl(&key, &payload.to_string(), ttl).await
    }

    /// Day-by-day counts over an inclusive date range. Days with no
    /// recorded events report zero.
    pub async fn get_analytics(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AnalyticsReport, GateError> {
        if start > end {
            return Err(GateError::InvalidQuery(
                "start date must not be after end date".to_string(),
            ));
        }

        let mut days = Vec::new();
        let mut totals = AnalyticsTotals {
            page_views: 0,
            actions: 0,
            business_events: 0,
        };

        let mut day = start;
        loop {
            let page_views = self
                .read_counter(&format!("{}:pageviews:{}", COUNTER_PREFIX, day))
                .await?;
            let actions = self
                .read_counter(&format!("{}:actions:{}", COUNTER_PREFIX, day))
                .await?;
            let business_events = self
                .read_counter(&format!("{}:business:{}", COUNTER_PREFIX, day))
                .await?;

            totals.page_views += page_views;
            totals.actions += actions;
            totals.business_events += business_events;
            days.push(DailyCounts {
                date: day,
                page_views,
                actions,
                business_events,
            });

            if day >= end {
                break;
            }
            day = day
                .succ_opt()
                .ok_or_else(|| GateError::InvalidQuery("date out of range".to_string()))?;
        }

        Ok(AnalyticsReport {
            start,
            end,
            days,
            totals,
        })
    }

    /// Scan the recent-event ring for the last hour of activity.
    pub async fn get_real_time_analytics(&self) -> Result<RealTimeReport, GateError> {
        let cutoff = epoch_millis().saturating_sub(REALTIME_WINDOW_MS);
        let keys = self.store.scan_prefix(RECENT_PREFIX).await?;

        let mut events = Vec::new();
        for key in keys {
            let Some((kind, timestamp_ms)) = parse_recent_key(&key) else {
                continue;
            };
            if timestamp_ms < cutoff {
                continue;
            }
            // The key may expire between scan and get; skip silently.
            if let Some(raw) = self.store.get(&key).await? {
                let payload = serde_json::from_str(&raw).unwrap_or(Value::Null);
                events.push(RecentEvent {
                    kind,
                    timestamp_ms,
                    payload,
                });
            }
        }
        events.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));

        let mut page_views = 0u64;
        let mut actions = 0u64;
        let mut business_events = 0u64;
        let mut visitors = HashSet::new();
        for event in &events {
            match event.kind.as_str() {
                "page" => page_views += 1,
                "action" => actions += 1,
                "business" => business_events += 1,
                _ => {}
            }
            if event.kind != "business" {
                if let Some(who) = event
                    .payload
                    .get("session_id")
                    .and_then(Value::as_str)
                    .or_else(|| event.payload.get("visitor").and_then(Value::as_str))
                {
                    visitors.insert(who.to_string());
                }
            }
        }
        events.truncate(REALTIME_EVENT_LIMIT);

        Ok(RealTimeReport {
            active_users: visitors.len() as u64,
            page_views_last_hour: page_views,
            actions_last_hour: actions,
            business_events_last_hour: business_events,
            recent: events,
        })
    }

    async fn read_counter(&self, key: &str) -> Result<u64, GateError> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}

fn date_parts(timestamp_ms: u64) -> Option<(NaiveDate, u32)> {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms as i64)?;
    Some((dt.date_naive(), dt.hour()))
}

fn parse_recent_key(key: &str) -> Option<(String, u64)> {
    let rest = key.strip_prefix(RECENT_PREFIX)?;
    let mut parts = rest.split(':');
    let kind = parts.next()?.to_string();
    let timestamp_ms = parts.next()?.parse().ok()?;
    Some((kind, timestamp_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn pipeline() -> AnalyticsPipeline {
        AnalyticsPipeline::new(Arc::new(MemoryStore::new()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn millis_on(day: NaiveDate, hour: u32) -> u64 {
        day.and_hms_opt(hour, 30, 0).unwrap().and_utc().timestamp_millis() as u64
    }

    fn page_view(day: NaiveDate, hour: u32, session: &str) -> PageViewEvent {
        PageViewEvent {
            path: "/api/books".to_string(),
            visitor: "1.2.3.4".to_string(),
            session_id: Some(session.to_string()),
            referrer: None,
            timestamp_ms: millis_on(day, hour),
        }
    }

    #[tokio::test]
    async fn range_report_sums_per_day_with_zeroed_gaps() {
        let pipeline = pipeline();
        let d1 = date(2026, 8, 1);
        let d2 = date(2026, 8, 2);
        let d3 = date(2026, 8, 3);

        pipeline.track_page_view(page_view(d1, 9, "s1")).await;
        pipeline.track_page_view(page_view(d1, 10, "s1")).await;
        pipeline.track_page_view(page_view(d3, 14, "s2")).await;
        pipeline
            .track_user_action(UserActionEvent {
                action: "add_to_cart".to_string(),
                path: "/api/cart".to_string(),
                visitor: "1.2.3.4".to_string(),
                session_id: Some("s1".to_string()),
                timestamp_ms: millis_on(d1, 9),
            })
            .await;

        let report = pipeline.get_analytics(d1, d3).await.unwrap();
        assert_eq!(report.days.len(), 3);
        assert_eq!(report.days[0].page_views, 2);
        assert_eq!(report.days[0].actions, 1);
        assert_eq!(report.days[1].date, d2);
        assert_eq!(report.days[1].page_views, 0);
        assert_eq!(report.days[1].actions, 0);
        assert_eq!(report.days[2].page_views, 1);
        assert_eq!(report.totals.page_views, 3);
        assert_eq!(report.totals.actions, 1);
    }

    #[tokio::test]
    async fn single_day_range_is_inclusive() {
        let pipeline = pipeline();
        let d = date(2026, 8, 5);
        pipeline.track_page_view(page_view(d, 8, "s1")).await;

        let report = pipeline.get_analytics(d, d).await.unwrap();
        assert_eq!(report.days.len(), 1);
        assert_eq!(report.totals.page_views, 1);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let pipeline = pipeline();
        let result = pipeline
            .get_analytics(date(2026, 8, 5), date(2026, 8, 1))
            .await;
        assert!(matches!(result, Err(GateError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn hourly_pageview_counter_tracks_alongside_daily() {
        let pipeline = pipeline();
        let d = date(2026, 8, 5);
        pipeline.track_page_view(page_view(d, 9, "s1")).await;
        pipeline.track_page_view(page_view(d, 9, "s2")).await;
        pipeline.track_page_view(page_view(d, 17, "s1")).await;

        let hourly = pipeline
            .read_counter("analytics:pageviews:2026-08-05:09")
            .await
            .unwrap();
        assert_eq!(hourly, 2);
        let daily = pipeline
            .read_counter("analytics:pageviews:2026-08-05")
            .await
            .unwrap();
        assert_eq!(daily, 3);
    }

    #[tokio::test]
    async fn real_time_view_counts_distinct_sessions_in_the_last_hour() {
        let pipeline = pipeline();
        let now = epoch_millis();

        for (session, offset_ms) in [("s1", 0u64), ("s1", 60_000), ("s2", 120_000)] {
            pipeline
                .track_page_view(PageViewEvent {
                    path: "/api/books".to_string(),
                    visitor: "1.2.3.4".to_string(),
                    session_id: Some(session.to_string()),
                    referrer: None,
                    timestamp_ms: now - offset_ms,
                })
                .await;
        }
        // Outside the hour: present in the store, absent from the view.
        pipeline
            .track_page_view(PageViewEvent {
                path: "/api/books".to_string(),
                visitor: "5.6.7.8".to_string(),
                session_id: Some("stale".to_string()),
                referrer: None,
                timestamp_ms: now - 2 * 3600 * 1000,
            })
            .await;

        let report = pipeline.get_real_time_analytics().await.unwrap();
        assert_eq!(report.page_views_last_hour, 3);
        assert_eq!(report.active_users, 2);
        assert_eq!(report.recent.len(), 3);
        // Newest first.
        assert!(report.recent[0].timestamp_ms >= report.recent[1].timestamp_ms);
    }

    #[tokio::test]
    async fn business_events_do_not_count_as_active_users() {
        let pipeline = pipeline();
        pipeline
            .track_business_event(BusinessEvent::new(
                "order_placed",
                json!({"order_id": "o-1", "total_cents": 4200}),
            ))
            .await;

        let report = pipeline.get_real_time_analytics().await.unwrap();
        assert_eq!(report.business_events_last_hour, 1);
        assert_eq!(report.active_users, 0);
    }
}
