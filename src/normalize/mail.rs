use crate::remote::gmail::{Header, MailMessage, MessagePart};
use crate::util::html_to_text;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Utc};

/// Gmail body data is base64url, sometimes padded and sometimes not.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Container used in deep links when no label maps to a mailbox view.
pub(crate) const DEFAULT_CONTAINER: &str = "all";

/// Label ids that correspond to a mailbox view, and that view's URL fragment.
const LABEL_CONTAINERS: [(&str, &str); 6] = [
    ("INBOX", "inbox"),
    ("SENT", "sent"),
    ("STARRED", "starred"),
    ("DRAFT", "drafts"),
    ("SPAM", "spam"),
    ("TRASH", "trash"),
];

/// First header called `name`, compared case-insensitively.
pub(crate) fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.trim())
        .filter(|v| !v.is_empty())
}

fn top_headers(message: &MailMessage) -> &[Header] {
    message
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or(&[])
}

/// Sent date from the `Date` header, falling back to the receive time.
pub(crate) fn sent_date(message: &MailMessage) -> DateTime<Utc> {
    header(top_headers(message), "date")
        .and_then(parse_date_header)
        .or_else(|| DateTime::<Utc>::from_timestamp_millis(message.internal_date_ms()))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_date_header(raw: &str) -> Option<DateTime<Utc>> {
    // Mailers append zone comments like "(UTC)" or "(PST)"
    let value = match raw.rfind(" (") {
        Some(i) if raw.ends_with(')') => &raw[..i],
        _ => raw,
    };
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Display name from a `From` header, or the bare address when there is none.
pub(crate) fn sender(message: &MailMessage) -> String {
    let Some(from) = header(top_headers(message), "from") else {
        return String::new();
    };
    match from.find('<') {
        Some(lt) => {
            let name = from[..lt].trim().trim_matches('"').trim();
            if name.is_empty() {
                from[lt + 1..].trim_end_matches('>').trim().to_string()
            } else {
                name.to_string()
            }
        }
        None => from.to_string(),
    }
}

pub(crate) fn subject(message: &MailMessage) -> String {
    header(top_headers(message), "subject")
        .unwrap_or("(no subject)")
        .to_string()
}

pub(crate) fn container(message: &MailMessage) -> &'static str {
    message
        .label_ids
        .iter()
        .find_map(|label| {
            LABEL_CONTAINERS
                .iter()
                .find(|(id, _)| *id == label.as_str())
                .map(|(_, view)| *view)
        })
        .unwrap_or(DEFAULT_CONTAINER)
}

/// Decoded, flattened text of every readable body part.
pub(crate) fn body_text(message: &MailMessage) -> String {
    let mut parts = Vec::new();
    if let Some(payload) = &message.payload {
        collect_text(payload, &mut parts, &message.id);
    }
    parts.join("\n\n")
}

fn collect_text(part: &MessagePart, out: &mut Vec<String>, message_id: &str) {
    let mime = part.mime_type.to_ascii_lowercase();

    if mime == "multipart/alternative" {
        // Alternatives carry the same content; prefer the plain one
        let preferred = ["text/plain", "text/html"].iter().find_map(|wanted| {
            part.parts
                .iter()
                .find(|p| p.mime_type.eq_ignore_ascii_case(wanted))
        });
        match preferred {
            Some(p) => collect_text(p, out, message_id),
            None => part
                .parts
                .iter()
                .for_each(|p| collect_text(p, out, message_id)),
        }
        return;
    }

    if mime.starts_with("multipart/") {
        part.parts
            .iter()
            .for_each(|p| collect_text(p, out, message_id));
        return;
    }

    let is_html = match mime.as_str() {
        "text/plain" => false,
        "text/html" => true,
        _ => return,
    };

    let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) else {
        return;
    };
    let bytes = match BODY_ENGINE.decode(data.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(message = %message_id, mime = %mime, error = %e, "Skipping undecodable body part");
            return;
        }
    };
    let raw = String::from_utf8_lossy(&bytes);

    let text = if is_html {
        html_to_text(&raw)
    } else {
        raw.replace("\r\n", "\n").trim().to_string()
    };
    if !text.is_empty() {
        out.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::gmail::PartBody;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use pretty_assertions::assert_eq;

    fn h(name: &str, value: &str) -> Header {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    fn leaf(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.into(),
            body: Some(PartBody {
                data: Some(URL_SAFE_NO_PAD.encode(text)),
                size: text.len() as u64,
            }),
            ..MessagePart::default()
        }
    }

    fn message(payload: MessagePart) -> MailMessage {
        MailMessage {
            id: "m1".into(),
            payload: Some(payload),
            ..MailMessage::default()
        }
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let m = message(MessagePart {
            headers: vec![
                h("SUBJECT", "Budget review"),
                h("from", "\"Doe, Jane\" <jane@corp.example>"),
                h("DaTe", "Tue, 5 Mar 2024 09:30:00 +0100"),
            ],
            ..MessagePart::default()
        });
        assert_eq!(subject(&m), "Budget review");
        assert_eq!(sender(&m), "Doe, Jane");
        assert_eq!(sent_date(&m).to_rfc3339(), "2024-03-05T08:30:00+00:00");
    }

    #[test]
    fn test_date_header_with_zone_comment() {
        let m = message(MessagePart {
            headers: vec![h("Date", "Fri, 1 Mar 2024 17:00:00 +0000 (UTC)")],
            ..MessagePart::default()
        });
        assert_eq!(sent_date(&m).timestamp(), 1_709_312_400);
    }

    #[test]
    fn test_missing_headers_fall_back() {
        let mut m = message(MessagePart::default());
        m.internal_date = Some("1700000000000".into());
        assert_eq!(subject(&m), "(no subject)");
        assert_eq!(sender(&m), "");
        assert_eq!(sent_date(&m).timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_sender_without_display_name() {
        let m = message(MessagePart {
            headers: vec![h("From", "<ops@corp.example>")],
            ..MessagePart::default()
        });
        assert_eq!(sender(&m), "ops@corp.example");

        let m = message(MessagePart {
            headers: vec![h("From", "ops@corp.example")],
            ..MessagePart::default()
        });
        assert_eq!(sender(&m), "ops@corp.example");
    }

    #[test]
    fn test_container_from_labels() {
        let mut m = message(MessagePart::default());
        assert_eq!(container(&m), "all");
        m.label_ids = vec!["UNREAD".into(), "CATEGORY_UPDATES".into(), "SENT".into()];
        assert_eq!(container(&m), "sent");
    }

    #[test]
    fn test_alternative_prefers_plain_text() {
        let m = message(MessagePart {
            mime_type: "multipart/alternative".into(),
            parts: vec![
                leaf("text/html", "<p>Hello <b>there</b></p>"),
                leaf("text/plain", "Hello there\r\n"),
            ],
            ..MessagePart::default()
        });
        assert_eq!(body_text(&m), "Hello there");
    }

    #[test]
    fn test_html_only_is_flattened() {
        let m = message(MessagePart {
            mime_type: "multipart/alternative".into(),
            parts: vec![leaf(
                "text/html",
                "<div>Line one</div><div>Line <i>two</i></div>",
            )],
            ..MessagePart::default()
        });
        assert_eq!(body_text(&m), "Line one Line two");
    }

    #[test]
    fn test_mixed_parts_skip_attachments() {
        let attachment = MessagePart {
            mime_type: "application/pdf".into(),
            body: Some(PartBody {
                data: None,
                size: 1024,
            }),
            ..MessagePart::default()
        };
        let m = message(MessagePart {
            mime_type: "multipart/mixed".into(),
            parts: vec![
                leaf("text/plain", "See attached."),
                attachment,
                leaf("text/plain", "Second note"),
            ],
            ..MessagePart::default()
        });
        assert_eq!(body_text(&m), "See attached.\n\nSecond note");
    }

    #[test]
    fn test_padded_body_decodes() {
        let mut part = leaf("text/plain", "");
        part.body = Some(PartBody {
            // "hi!?" padded, url-safe alphabet
            data: Some("aGkhPw==".into()),
            size: 4,
        });
        assert_eq!(body_text(&message(part)), "hi!?");
    }

    #[test]
    fn test_undecodable_part_is_skipped() {
        let mut part = leaf("text/plain", "");
        part.body = Some(PartBody {
            data: Some("***not base64***".into()),
            size: 3,
        });
        assert_eq!(body_text(&message(part)), "");
    }
}
