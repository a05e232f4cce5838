//! Namespace-agnostic XML element lookup
//!
//! Device payloads use whatever prefixes the firmware felt like (`tds:`,
//! `tt:`, `d:`, default namespaces). Lookups match on the local name only,
//! ignoring ASCII case.

/// True when the payload plausibly is an XML document
pub fn looks_like_xml(text: &str) -> bool {
    text.trim_start_matches('\u{feff}').trim_start().starts_with('<')
}

/// Inner text of every element whose local name is `local`
pub fn element_texts(xml: &str, local: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0;

    while let Some(rel) = xml[pos..].find('<') {
        let open = pos + rel + 1;
        let Some(tag_len) = xml[open..].find('>') else {
            break;
        };
        let tag = &xml[open..open + tag_len];
        pos = open + tag_len + 1;

        if tag.starts_with(['/', '?', '!']) {
            continue;
        }

        let name = tag
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        let local_name = name.rsplit(':').next().unwrap_or(name);
        if !local_name.eq_ignore_ascii_case(local) {
            continue;
        }

        if tag.ends_with('/') {
            out.push(String::new());
            continue;
        }

        let close = format!("</{}>", name);
        if let Some(end) = xml[pos..].find(&close) {
            let inner = strip_tags(&xml[pos..pos + end]);
            out.push(decode_entities(inner.trim()));
        }
    }

    out
}

/// First non-empty text of an element with local name `local`
pub fn first_element_text(xml: &str, local: &str) -> Option<String> {
    element_texts(xml, local)
        .into_iter()
        .find(|v| !v.is_empty())
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Escape text for use inside an element
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
