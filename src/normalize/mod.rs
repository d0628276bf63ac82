//! Converts platform payloads into one [`Document`] shape.

mod mail;

use crate::platform::Platform;
use crate::remote::drive::DriveFile;
use crate::remote::{MailMessage, RawItem};
use crate::util::html_to_text;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A retrieved item in the shape the caller and the downstream consumer see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub platform: Platform,
    pub date: DateTime<Utc>,
    /// Remote ordering key (epoch ms) the watermark is compared against
    pub timestamp_ms: i64,
    pub author: String,
    pub title: String,
    pub href: String,
    pub owner_email: String,
    pub source_icon: String,
    /// Flattened body text; empty unless content was requested
    pub content: String,
}

/// Account-level details every document of a run shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountContext<'a> {
    /// Multi-account selector, usually the account email
    pub auth_user_hint: Option<&'a str>,
}

impl AccountContext<'_> {
    fn owner_email(&self) -> String {
        self.auth_user_hint
            .filter(|h| h.contains('@'))
            .unwrap_or_default()
            .to_string()
    }
}

/// Build a [`Document`] from a fetched item.
///
/// Bodies are decoded only when `with_content` is set; otherwise `content`
/// stays empty.
pub fn normalize(raw: &RawItem, account: AccountContext<'_>, with_content: bool) -> Document {
    match raw {
        RawItem::Mail(message) => normalize_mail(message, account, with_content),
        RawItem::File(file) => normalize_file(file, account, with_content),
    }
}

fn normalize_mail(message: &MailMessage, account: AccountContext<'_>, with_content: bool) -> Document {
    Document {
        id: message.id.clone(),
        platform: Platform::Gmail,
        date: mail::sent_date(message),
        timestamp_ms: message.internal_date_ms(),
        author: mail::sender(message),
        title: mail::subject(message),
        href: mail_link(&message.id, mail::container(message), account.auth_user_hint),
        owner_email: account.owner_email(),
        source_icon: Platform::Gmail.source_icon().to_string(),
        content: if with_content {
            mail::body_text(message)
        } else {
            String::new()
        },
    }
}

/// Deep link into the Gmail web client.
pub fn mail_link(id: &str, container: &str, auth_user_hint: Option<&str>) -> String {
    format!(
        "https://mail.google.com/mail/u/{}/#{}/{}",
        auth_user_hint.unwrap_or("0"),
        container,
        id
    )
}

fn normalize_file(file: &DriveFile, account: AccountContext<'_>, with_content: bool) -> Document {
    let author = file
        .owners
        .first()
        .and_then(|o| o.display_name.clone().or_else(|| o.email_address.clone()))
        .unwrap_or_default();

    let content = match (&file.content, with_content) {
        (Some(c), true) if c.mime_type.eq_ignore_ascii_case("text/html") => html_to_text(&c.text),
        (Some(c), true) => c.text.replace("\r\n", "\n").trim().to_string(),
        _ => String::new(),
    };

    Document {
        id: file.id.clone(),
        platform: Platform::Drive,
        date: file.modified_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        timestamp_ms: file.modified_ms(),
        author,
        title: if file.name.trim().is_empty() {
            "(untitled)".to_string()
        } else {
            file.name.clone()
        },
        href: file_link(file, account.auth_user_hint),
        owner_email: account.owner_email(),
        source_icon: Platform::Drive.source_icon().to_string(),
        content,
    }
}

/// `webViewLink` when Drive gave one, with `authuser` added for multi-account sessions.
fn file_link(file: &DriveFile, auth_user_hint: Option<&str>) -> String {
    let base = file
        .web_view_link
        .clone()
        .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));
    let Some(hint) = auth_user_hint else {
        return base;
    };
    match url::Url::parse(&base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("authuser", hint);
            url.to_string()
        }
        Err(_) => base,
    }
}
