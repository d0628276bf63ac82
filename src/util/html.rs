//! Markup-to-text flattening for message and document bodies.
//!
//! No HTML parser: bodies are split on a closing block tag first so each
//! scan works on a bounded chunk, then tags are skipped by simple scanning.

use std::borrow::Cow;

/// Structural boundary the input is split on before scanning.
const BOUNDARY: &[u8] = b"</div>";

/// Elements whose contents are never visible text.
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "head", "title"];

/// Case-insensitive ASCII search for `needle` in `haystack`, from byte `from`.
fn find_ci(haystack: &str, needle: &[u8], from: usize) -> Option<usize> {
    let bytes = haystack.as_bytes();
    if needle.is_empty() || bytes.len() < needle.len() {
        return None;
    }
    (from..=bytes.len() - needle.len()).find(|&i| bytes[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Flatten HTML to its visible text, fragments joined by single spaces.
pub fn html_to_text(html: &str) -> String {
    let mut fragments: Vec<String> = Vec::new();
    let mut start = 0;

    while start < html.len() {
        let end = match find_ci(html, BOUNDARY, start) {
            Some(i) => i + BOUNDARY.len(),
            None => html.len(),
        };
        collect_fragments(&html[start..end], &mut fragments);
        start = end;
    }

    fragments.join(" ")
}

fn collect_fragments(chunk: &str, out: &mut Vec<String>) {
    let mut rest = chunk;

    while let Some(lt) = rest.find('<') {
        push_text(&rest[..lt], out);
        let tag_start = &rest[lt..];

        if tag_start.starts_with("<!--") {
            rest = match tag_start.find("-->") {
                Some(end) => &tag_start[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = tag_start.find('>') else {
            // Unterminated tag: nothing visible follows
            return;
        };
        let name = tag_name(&tag_start[1..gt]);
        rest = &tag_start[gt + 1..];

        if HIDDEN_ELEMENTS.contains(&name.as_str()) && !tag_start[1..gt].ends_with('/') {
            let closing = format!("</{name}");
            rest = match find_ci(rest, closing.as_bytes(), 0) {
                Some(close) => match rest[close..].find('>') {
                    Some(gt) => &rest[close + gt + 1..],
                    None => "",
                },
                None => "",
            };
        }
    }

    push_text(rest, out);
}

/// Lowercased element name of a tag body such as `div class="x"` or `/p`.
fn tag_name(inner: &str) -> String {
    inner
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn push_text(raw: &str, out: &mut Vec<String>) {
    if raw.trim().is_empty() {
        return;
    }
    let decoded = decode_entities(raw);
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        out.push(collapsed);
    }
}

/// Decode the character references that show up in mail bodies.
///
/// Unknown named references are left as written.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let semi = candidate
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .map(|(i, _)| i);

        let decoded = semi.and_then(|semi| {
            let entity = &candidate[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            // Numeric references can name control characters
            ch.map(|c| match c {
                '\t' | '\n' => (c, semi + 1),
                c if c.is_control() => (' ', semi + 1),
                c => (c, semi + 1),
            })
        });

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &candidate[consumed..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}
