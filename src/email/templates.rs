use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::EmailMessage;

const STYLE: &str = "body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 0; background: #f4f4f5; } \
.container { max-width: 560px; margin: 40px auto; background: #ffffff; border-radius: 12px; padding: 40px; } \
h1 { color: #18181b; font-size: 24px; margin-bottom: 16px; } \
p { color: #3f3f46; font-size: 16px; line-height: 1.6; } \
.stat-grid { display: flex; flex-wrap: wrap; gap: 16px; margin-bottom: 24px; } \
.stat-card { flex: 1 1 45%; background: #f4f4f5; border-radius: 8px; padding: 16px; text-align: center; } \
.stat-value { font-size: 28px; font-weight: 700; color: #6366f1; } \
.stat-label { font-size: 13px; color: #71717a; margin-top: 4px; } \
.footer { text-align: center; color: #a1a1aa; font-size: 13px; margin-top: 32px; }";

/// Today's activity summary for the daily digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestStats {
    pub habits_completed: u64,
    pub habits_total: u64,
    pub tasks_completed: u64,
    pub tasks_total: u64,
    pub journal_entries: u64,
    pub streak: String,
}

impl DigestStats {
    /// Fixed figures used by the test-email endpoint.
    pub fn sample() -> Self {
        Self {
            habits_completed: 3,
            habits_total: 5,
            tasks_completed: 7,
            tasks_total: 10,
            journal_entries: 1,
            streak: "14".to_string(),
        }
    }
}

pub fn welcome(to: &str, name: &str) -> EmailMessage {
    let body = format!(
        "<h1>Welcome, {name}!</h1>\
         <p>Thanks for joining <strong>MyLife OS</strong>. We are excited to help you build better habits, track your health, and achieve your goals.</p>\
         <p>Here is what you can do to get started:</p>\
         <ul><li>Set up your first habit tracker</li><li>Create daily goals</li><li>Start journaling</li></ul>\
         <p>If you have any questions, just reply to this email.</p>",
        name = escape_html(name)
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Welcome to MyLife OS!".to_string(),
        html: page(&body),
    }
}

pub fn daily_digest(to: &str, stats: &DigestStats) -> EmailMessage {
    let card = |value: String, label: &str| {
        format!(
            "<div class=\"stat-card\"><div class=\"stat-value\">{value}</div><div class=\"stat-label\">{label}</div></div>"
        )
    };
    let body = format!(
        "<h1>Your Daily Digest</h1><div class=\"stat-grid\">{}{}{}{}</div>\
         <p>Keep up the great work! Consistency is the key to lasting change.</p>",
        card(format!("{}/{}", stats.habits_completed, stats.habits_total), "Habits Completed"),
        card(format!("{}/{}", stats.tasks_completed, stats.tasks_total), "Tasks Done"),
        card(stats.journal_entries.to_string(), "Journal Entries"),
        card(escape_html(&stats.streak), "Day Streak"),
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Your Daily Digest - MyLife OS".to_string(),
        html: page(&body),
    }
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\" />\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\
         <style>{STYLE}</style></head><body><div class=\"container\">{body}\
         <div class=\"footer\"><p>&copy; {year} MyLife OS. All rights reserved.</p></div>\
         </div></body></html>",
        year = Utc::now().year()
    )
}

/// Escape HTML special characters in user-controlled template values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
