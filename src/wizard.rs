use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

const PASSWORD_RESET: &str = "password_reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WizardStep {
    EnterEmail,
    EnterCode,
    Done,
}

impl WizardStep {
    fn as_str(self) -> &'static str {
        match self {
            WizardStep::EnterEmail => "enterEmail",
            WizardStep::EnterCode => "enterCode",
            WizardStep::Done => "done",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "enterEmail" => Some(WizardStep::EnterEmail),
            "enterCode" => Some(WizardStep::EnterCode),
            "done" => Some(WizardStep::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub step: WizardStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("cannot {action} while at step {}", .step.as_str())]
    BadState { step: WizardStep, action: &'static str },
    #[error("{0}")]
    BadInput(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn email_digest(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Forgot-password flow: enter email, then enter the emailed code. The step
/// survives restarts but expires after `ttl` of inactivity.
pub struct PasswordResetWizard<'a> {
    conn: &'a Connection,
    ttl: Duration,
}

impl<'a> PasswordResetWizard<'a> {
    pub fn new(conn: &'a Connection, ttl_seconds: i64) -> Result<Self, WizardError> {
        let ttl = Duration::try_seconds(ttl_seconds)
            .filter(|d| *d > Duration::zero())
            .ok_or_else(|| {
                WizardError::BadInput(format!("wizard ttl out of range: {}s", ttl_seconds))
            })?;
        Ok(Self { conn, ttl })
    }

    pub fn current(&self, now: DateTime<Utc>) -> Result<WizardView, WizardError> {
        let row: Option<(String, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT step, email_digest, updated_at FROM wizard_state WHERE wizard = ?",
                [PASSWORD_RESET],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .context("failed to read wizard state")?;

        let Some((step, email_digest, updated_at)) = row else {
            return Ok(Self::fresh());
        };

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .ok();
        let step = WizardStep::parse(&step);
        let (Some(step), Some(updated_at)) = (step, updated_at) else {
            log::warn!("discarding unreadable password reset state");
            self.clear()?;
            return Ok(Self::fresh());
        };

        let Some(expires_at) = updated_at.checked_add_signed(self.ttl) else {
            log::warn!("discarding password reset state with unusable timestamp");
            self.clear()?;
            return Ok(Self::fresh());
        };
        if now >= expires_at {
            log::info!("password reset state expired at {}", expires_at.to_rfc3339());
            self.clear()?;
            return Ok(Self::fresh());
        }

        Ok(WizardView {
            step,
            email_digest,
            expires_at: Some(expires_at.to_rfc3339()),
        })
    }

    pub fn start(&self, email: &str, now: DateTime<Utc>) -> Result<WizardView, WizardError> {
        let view = self.current(now)?;
        if view.step != WizardStep::EnterEmail {
            return Err(WizardError::BadState {
                step: view.step,
                action: "start",
            });
        }
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(WizardError::BadInput("a valid email is required".to_string()));
        }
        self.write(WizardStep::EnterCode, Some(email_digest(email)), now)?;
        self.current(now)
    }

    /// The code itself is checked by the backend; only its presence is
    /// required here.
    pub fn confirm(&self, code: &str, now: DateTime<Utc>) -> Result<WizardView, WizardError> {
        let view = self.current(now)?;
        if view.step != WizardStep::EnterCode {
            return Err(WizardError::BadState {
                step: view.step,
                action: "confirm",
            });
        }
        if code.trim().is_empty() {
            return Err(WizardError::BadInput("a code is required".to_string()));
        }
        self.write(WizardStep::Done, view.email_digest, now)?;
        self.current(now)
    }

    pub fn cancel(&self) -> Result<WizardView, WizardError> {
        self.clear()?;
        Ok(Self::fresh())
    }

    fn fresh() -> WizardView {
        WizardView {
            step: WizardStep::EnterEmail,
            email_digest: None,
            expires_at: None,
        }
    }

    fn write(
        &self,
        step: WizardStep,
        email_digest: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.conn
            .execute(
                "INSERT INTO wizard_state(wizard, step, email_digest, updated_at) VALUES(?, ?, ?, ?)
                 ON CONFLICT(wizard) DO UPDATE SET
                   step = excluded.step,
                   email_digest = excluded.email_digest,
                   updated_at = excluded.updated_at",
                (PASSWORD_RESET, step.as_str(), email_digest, now.to_rfc3339()),
            )
            .context("failed to write wizard state")?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM wizard_state WHERE wizard = ?", [PASSWORD_RESET])
            .context("failed to clear wizard state")?;
        Ok(())
    }
}
