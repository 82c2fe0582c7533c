//! Outgoing notifications: the `Notifier` contract, the SMTP-backed default
//! and the message templates every job uses.

use crate::config::SmtpConfig;
use crate::error::{Result, WatchError};
use crate::model::{ContestRecord, ContestResult, ReminderKind};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SUBJECT_PREFIX: &str = "[cpwatch]";

/// Delivery capability. New transports only need to implement this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one plain-text message.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// STARTTLS SMTP notifier built on `lettre`.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build a transport from config. Does not connect until the first send.
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        if config.host.trim().is_empty() || config.user.trim().is_empty() {
            anyhow::bail!("smtp host and user must be set");
        }
        let from: Mailbox = config.sender().parse()?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);
        if !config.password.is_empty() {
            builder = builder.credentials(SmtpCredentials::new(
                config.user.clone(),
                config.password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(recipient.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_owned())?;
        self.transport.send(email).await?;
        tracing::info!("email sent to {recipient}: {subject}");
        Ok(())
    }
}

/// Send `message` through `notifier`, bounded by `timeout`.
///
/// Transport errors and timeouts both surface as
/// [`WatchError::DeliveryFailed`].
pub async fn deliver(
    notifier: &dyn Notifier,
    recipient: &str,
    message: &EmailMessage,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(
        timeout,
        notifier.send(recipient, &message.subject, &message.body),
    )
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WatchError::delivery(e.to_string())),
        Err(_) => Err(WatchError::delivery(format!("timed out after {timeout:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
}

/// Message for one due reminder.
///
/// Countdown messages state the real time left at `now`, which is shorter
/// than the threshold when several thresholds are crossed in one pass.
#[must_use]
pub fn reminder_message(
    contest: &ContestRecord,
    kind: ReminderKind,
    now: DateTime<Utc>,
    tz: Tz,
) -> EmailMessage {
    match kind {
        ReminderKind::New => new_contest_message(contest, tz),
        ReminderKind::PostContest => EmailMessage {
            subject: format!("{SUBJECT_PREFIX} Post-contest report: {}", contest.name),
            body: format!("{} has ended.", contest.name),
        },
        ReminderKind::DayBefore | ReminderKind::HourBefore | ReminderKind::QuarterHourBefore => {
            let starts = format_time(contest.start_time, tz);
            match countdown_phrase(contest.start_time.signed_duration_since(now)) {
                Some(left) => EmailMessage {
                    subject: format!("{SUBJECT_PREFIX} Contest in {left}: {}", contest.name),
                    body: format!(
                        "Reminder: {} starts at {starts} (in {left}).\n\n{}",
                        contest.name, contest.url
                    ),
                },
                None => EmailMessage {
                    subject: format!("{SUBJECT_PREFIX} Contest starting now: {}", contest.name),
                    body: format!(
                        "Reminder: {} is starting ({starts}).\n\n{}",
                        contest.name, contest.url
                    ),
                },
            }
        }
    }
}

fn new_contest_message(contest: &ContestRecord, tz: Tz) -> EmailMessage {
    let registration = if contest.registration_open {
        "Registration is open. Use `cpwatch` or the dashboard to register."
    } else {
        "Registration is not open yet."
    };
    EmailMessage {
        subject: format!("{SUBJECT_PREFIX} New contest: {}", contest.name),
        body: format!(
            "A new contest has been announced.\n\n\
             Platform: {}\nContest: {}\nStart: {}\nDuration: {}\nLink: {}\n\n{registration}",
            contest.platform.display_name(),
            contest.name,
            format_time(contest.start_time, tz),
            format_duration(contest.duration_secs),
            contest.url,
        ),
    }
}

/// Outcome email for a registration attempt.
#[must_use]
pub fn registration_message(
    contest: &ContestRecord,
    success: bool,
    detail: &str,
    tz: Tz,
) -> EmailMessage {
    let verdict = if success { "success" } else { "failed" };
    EmailMessage {
        subject: format!("{SUBJECT_PREFIX} Registration {verdict}: {}", contest.name),
        body: format!(
            "{}\n\nContest: {} ({})\nStart: {}",
            detail,
            contest.name,
            contest.platform.display_name(),
            format_time(contest.start_time, tz)
        ),
    }
}

/// Report sent once the user's contest result is available.
#[must_use]
pub fn post_contest_message(contest: &ContestRecord, result: &ContestResult) -> EmailMessage {
    let mut body = format!(
        "Contest: {}\nRank: {}\nProblems solved: {}",
        contest.name, result.rank, result.solved
    );
    if let (Some(old), Some(new)) = (result.old_rating, result.new_rating) {
        let delta = new - old;
        let sign = if delta >= 0 { "+" } else { "" };
        body.push_str(&format!("\nRating: {old} -> {new} ({sign}{delta})"));
    } else if let Some(new) = result.new_rating {
        body.push_str(&format!("\nRating: {new}"));
    }
    if let Some(penalty) = result.penalty {
        body.push_str(&format!("\nPenalty: {penalty}"));
    }
    if !result.problems.is_empty() {
        body.push_str("\n\nProblems:");
        for p in &result.problems {
            let line = match (p.solved, p.solved_after_secs) {
                (true, Some(secs)) => format!("solved at {}", format_duration(secs)),
                (true, None) => "solved".to_owned(),
                (false, _) => "not solved".to_owned(),
            };
            body.push_str(&format!("\n  {}: {line}", p.index));
            if p.rejected_attempts > 0 {
                body.push_str(&format!(" ({} rejected)", p.rejected_attempts));
            }
        }
    }
    EmailMessage {
        subject: format!("{SUBJECT_PREFIX} Post-contest report: {}", contest.name),
        body,
    }
}

/// `2026-05-01 14:35 UTC`, or `2026-05-01 20:05 IST` in `Asia/Kolkata`.
#[must_use]
pub fn format_time(t: DateTime<Utc>, tz: Tz) -> String {
    t.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}

/// `23 hours 59 minutes`, `1 hour`, `30 minutes`. `None` once fewer than
/// sixty seconds remain.
#[must_use]
pub fn countdown_phrase(left: TimeDelta) -> Option<String> {
    let minutes = left.num_minutes();
    if minutes < 1 {
        return None;
    }
    let (h, m) = (minutes / 60, minutes % 60);
    let unit = |n: i64, word: &str| {
        if n == 1 { format!("1 {word}") } else { format!("{n} {word}s") }
    };
    Some(match (h, m) {
        (0, m) => unit(m, "minute"),
        (h, 0) => unit(h, "hour"),
        (h, m) => format!("{} {}", unit(h, "hour"), unit(m, "minute")),
    })
}

/// `2h 15m`, `45m`.
#[must_use]
pub fn format_duration(secs: i64) -> String {
    let minutes = secs.max(0) / 60;
    let (h, m) = (minutes / 60, minutes % 60);
    if h == 0 { format!("{m}m") } else { format!("{h}h {m}m") }
}
