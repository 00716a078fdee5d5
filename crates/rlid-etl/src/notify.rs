//! Outgoing mail: recipient extraction, HTML report bodies and a message
//! builder over the database-hosted mailer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as Json;
use tracing::info;

use rlid_core::mail::{BodyFormat, MailMessage, Mailer};
use rlid_rules::Issue;

use crate::{Error, Result};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w\.-]+@[\w\.-]+").expect("email pattern"));

// ─── Recipients ──────────────────────────────────────────────────────────────

fn collect_addresses(value: &Json, out: &mut Vec<String>) {
  match value {
    Json::String(s) => {
      for m in EMAIL.find_iter(s) {
        let address = m.as_str().to_owned();
        if !out.contains(&address) {
          out.push(address);
        }
      }
    }
    Json::Array(items) => items.iter().for_each(|v| collect_addresses(v, out)),
    Json::Object(map) => map.values().for_each(|v| collect_addresses(v, out)),
    Json::Null | Json::Bool(_) | Json::Number(_) => {}
  }
}

/// Every address in `value`, in first-seen order, without duplicates.
pub fn extract_recipients(value: &Json) -> Vec<String> {
  let mut out = Vec::new();
  collect_addresses(value, &mut out);
  out
}

/// `;`-joined addresses of `value`, or `None` when it holds none.
pub fn recipient_list(value: &Json) -> Option<String> {
  let addresses = extract_recipients(value);
  (!addresses.is_empty()).then(|| addresses.join(";"))
}

// ─── Bodies ──────────────────────────────────────────────────────────────────

pub fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

pub fn html_table(headers: &[&str], rows: &[Vec<String>]) -> String {
  let mut html = String::from("<table border=\"1\" cellpadding=\"4\">\n<tr>");
  for h in headers {
    html.push_str(&format!("<th>{}</th>", escape_html(h)));
  }
  html.push_str("</tr>\n");
  for row in rows {
    html.push_str("<tr>");
    for cell in row {
      html.push_str(&format!("<td>{}</td>", escape_html(cell)));
    }
    html.push_str("</tr>\n");
  }
  html.push_str("</table>");
  html
}

/// One row per issue: subject, the issue's context values, description and
/// whether it blocks publication.
pub fn issue_report_body(title: &str, issues: &[&Issue]) -> String {
  let context_names: Vec<&str> = {
    let mut names: Vec<&str> = issues.iter().flat_map(|i| i.context.keys().map(String::as_str)).collect();
    names.sort_unstable();
    names.dedup();
    names
  };
  let mut headers = vec!["Subject"];
  headers.extend(context_names.iter().copied());
  headers.extend(["Description", "OK to publish"]);

  let rows: Vec<Vec<String>> = issues
    .iter()
    .map(|issue| {
      let mut row = vec![issue.subject.to_string()];
      row.extend(context_names.iter().map(|n| issue.context.get(*n).map(|v| v.to_string()).unwrap_or_default()));
      row.push(issue.description.clone());
      row.push(if issue.ok_to_publish { "Y" } else { "N" }.to_owned());
      row
    })
    .collect();
  format!("<h3>{}</h3>\n{}", escape_html(title), html_table(&headers, &rows))
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Builder for a [`MailMessage`]; recipients are extracted from free-form
/// JSON values.
#[derive(Debug, Clone, Default)]
pub struct Email {
  message: MailMessage,
}

impl Email {
  pub fn new(subject: &str) -> Self {
    Self { message: MailMessage { subject: subject.to_owned(), ..MailMessage::default() } }
  }

  pub fn to(mut self, recipients: &Json) -> Self {
    self.message.recipients = recipient_list(recipients).unwrap_or_default();
    self
  }

  pub fn cc(mut self, recipients: &Json) -> Self {
    self.message.copy_recipients = recipient_list(recipients);
    self
  }

  pub fn bcc(mut self, recipients: &Json) -> Self {
    self.message.blind_copy_recipients = recipient_list(recipients);
    self
  }

  pub fn reply_to(mut self, address: Option<&str>) -> Self {
    self.message.reply_to = address.map(str::to_owned);
    self
  }

  pub fn text(mut self, body: impl Into<String>) -> Self {
    self.message.body = body.into();
    self.message.body_format = BodyFormat::Text;
    self
  }

  pub fn html(mut self, body: impl Into<String>) -> Self {
    self.message.body = body.into();
    self.message.body_format = BodyFormat::Html;
    self
  }

  pub fn build(self) -> Result<MailMessage> {
    if self.message.recipients.is_empty() {
      return Err(Error::config(format!("message {:?} has no recipients", self.message.subject)));
    }
    Ok(self.message)
  }

  /// Submit the message. No retry.
  pub async fn send<M: Mailer>(self, mailer: &M) -> Result<()> {
    let message = self.build()?;
    mailer.send_email(&message).await?;
    info!(subject = %message.subject, recipients = %message.recipients, "mail queued");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use rlid_core::record::Value;
  use serde_json::json;

  use super::*;

  #[test]
  fn recipients_come_from_any_nesting() {
    let value = json!([
      "gis@lanecounty.org; Ops <ops@lcog.org>",
      {"primary": "gis@lanecounty.org", "backup": ["dba@lcog.org"]},
      42,
    ]);
    assert_eq!(extract_recipients(&value), ["gis@lanecounty.org", "ops@lcog.org", "dba@lcog.org"]);
    assert_eq!(recipient_list(&json!("a@b.org")).as_deref(), Some("a@b.org"));
    assert_eq!(recipient_list(&json!(null)), None);
  }

  #[test]
  fn tables_escape_their_cells() {
    let html = html_table(&["Name"], &[vec!["O'Brien <Jr>".into()]]);
    assert!(html.contains("<td>O&#39;Brien &lt;Jr&gt;</td>"));
    assert!(html.contains("<th>Name</th>"));
  }

  #[test]
  fn issue_reports_list_context_columns() {
    let issue = Issue::new(Value::from("A"), "'house_nbr' must not be zero or negative.", false)
      .with_context("concat_address", "0 MAIN ST");
    let body = issue_report_body("Address publication issues", &[&issue]);
    assert!(body.contains("<th>concat_address</th>"));
    assert!(body.contains("<td>0 MAIN ST</td>"));
    assert!(body.contains("must not be zero or negative."));
    assert!(body.contains("<td>N</td>"));
  }

  #[test]
  fn messages_need_recipients() {
    assert!(Email::new("subject").text("body").build().is_err());
    let message = Email::new("subject").to(&json!(["a@b.org", "a@b.org"])).html("<p/>").build().unwrap();
    assert_eq!(message.recipients, "a@b.org");
    assert_eq!(message.body_format, BodyFormat::Html);
  }
}
