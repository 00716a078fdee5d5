//! The database-hosted mailer contract.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Result;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
  #[default]
  Text,
  Html,
}

/// A message ready for submission. Recipient lists are already extracted
/// and `;`-joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
  pub subject:               String,
  pub recipients:            String,
  pub body:                  String,
  pub body_format:           BodyFormat,
  pub copy_recipients:       Option<String>,
  pub blind_copy_recipients: Option<String>,
  pub reply_to:              Option<String>,
}

/// Submits messages through the mail procedure hosted by the database.
/// Implementations do not retry; a failed submission is an error.
pub trait Mailer {
  async fn send_email(&self, message: &MailMessage) -> Result<()>;
}
