//! Gathers the figures for the daily digest and resolves where to send it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::DigestStats;
use crate::database::{Filter, Store, StoreError};
use crate::registry::Collection;

/// Start of the current UTC day.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// The caller's address from the provisioned users collection.
pub async fn recipient(store: &dyn Store, subject: &str) -> Result<Option<String>, StoreError> {
    let user = store.find_by_id(Collection::Users, subject).await?;
    Ok(user
        .and_then(|row| row.get("email").and_then(Value::as_str).map(str::to_string))
        .filter(|email| !email.is_empty()))
}

/// Counts activity since `since`. The five counts run concurrently.
pub async fn collect_stats(
    store: &dyn Store,
    subject: &str,
    since: DateTime<Utc>,
) -> Result<DigestStats, StoreError> {
    let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);

    let active_habits = [Filter::owner(subject), Filter::eq("is_active", true)];
    let habits_done = [
        Filter::owner(subject),
        Filter::eq("is_active", true),
        Filter::gte("last_completed_at", since.clone()),
    ];
    let open_tasks = [Filter::owner(subject), Filter::eq("is_archived", false)];
    let tasks_done = [
        Filter::owner(subject),
        Filter::eq("is_archived", false),
        Filter::eq("status", "completed"),
        Filter::gte("completion_date", since.clone()),
    ];
    let journal_today = [Filter::owner(subject), Filter::gte("created_at", since)];

    let (habits_completed, habits_total, tasks_completed, tasks_total, journal_entries) = tokio::try_join!(
        store.count(Collection::Habits, &habits_done),
        store.count(Collection::Habits, &active_habits),
        store.count(Collection::Tasks, &tasks_done),
        store.count(Collection::Tasks, &open_tasks),
        store.count(Collection::Journal, &journal_today),
    )?;

    Ok(DigestStats {
        habits_completed,
        habits_total,
        tasks_completed,
        tasks_total,
        journal_entries,
        // No streak history is kept yet.
        streak: "0".to_string(),
    })
}
