//! Tag-path extraction of feed items.
//!
//! RSS, Atom and scraped HTML are all treated as loosely nested markup and
//! walked with slash-separated tag paths. JSON documents are first rendered
//! into the same markup (object keys become tags, arrays repeat their key)
//! so one extractor serves every source kind.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use fleetcron_models::{guid_hash, FeedItem, FeedKind, FeedSource};

use crate::error::{JobError, JobResult};

static CDATA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ATTRS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Image locations tried when a source has no `image_path`.
const IMAGE_FALLBACKS: &[&str] = &["enclosure/@url", "media:thumbnail/@url", "media:content/@url", "img/@src"];

/// An element matched by a tag path.
#[derive(Debug, Clone, Copy)]
struct Element<'a> {
    attrs: &'a str,
    inner: &'a str,
}

fn tag_regex(tag: &str) -> JobResult<Regex> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?is)<{tag}(?:\s([^>]*?))?\s*(?:/>|>(.*?)</{tag}\s*>)"))
        .map_err(|e| JobError::malformed(format!("unusable tag path segment: {}", e)))
}

fn children<'a>(doc: &'a str, tag: &str) -> JobResult<Vec<Element<'a>>> {
    let re = tag_regex(tag)?;
    Ok(re
        .captures_iter(doc)
        .map(|cap| Element {
            attrs: cap.get(1).map(|m| m.as_str()).unwrap_or(""),
            inner: cap.get(2).map(|m| m.as_str()).unwrap_or(""),
        })
        .collect())
}

/// All elements reached by following `path` from `doc`.
fn select<'a>(doc: &'a str, path: &[&str]) -> JobResult<Vec<Element<'a>>> {
    let mut current = vec![Element { attrs: "", inner: doc }];
    for tag in path {
        let mut next = Vec::new();
        for element in &current {
            next.extend(children(element.inner, tag)?);
        }
        if next.is_empty() {
            return Ok(next);
        }
        current = next;
    }
    Ok(current)
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTRS.captures_iter(attrs).find_map(|cap| {
        if !cap[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let value = cap.get(2).or_else(|| cap.get(3)).or_else(|| cap.get(4))?;
        Some(decode_entities(value.as_str()).trim().to_string())
    })
}

/// Split `a/b/@attr` into tag segments and the attribute name.
fn split_path(path: &str) -> (Vec<&str>, Option<&str>) {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let attr = match segments.last() {
        Some(last) if last.starts_with('@') => segments.pop().map(|s| &s[1..]),
        _ => None,
    };
    (segments, attr)
}

/// First non-empty value at `path` inside one item.
fn extract(item: &str, path: &str) -> JobResult<Option<String>> {
    let (tags, attr) = split_path(path);
    if tags.is_empty() {
        return Ok(None);
    }
    for element in select(item, &tags)? {
        let value = match attr {
            Some(name) => attribute(element.attrs, name),
            None => Some(clean_text(element.inner)),
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity.strip_prefix('#').and_then(|dec| dec.parse().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Plain text of an element body: CDATA unwrapped, markup (including
/// entity-escaped markup) removed, whitespace collapsed.
pub fn clean_text(raw: &str) -> String {
    let text = CDATA.replace_all(raw, "$1");
    let text = TAGS.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = TAGS.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::Array(items) => {
                        for item in items {
                            render_element(key, item, out);
                        }
                    }
                    other => render_element(key, other, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                render_element("items", item, out);
            }
        }
        Value::String(s) => out.push_str(&escape_text(s)),
        Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}

fn render_element(tag: &str, value: &Value, out: &mut String) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    render_value(value, out);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Render a JSON document as tagged markup. A top-level array becomes a
/// sequence of `<items>` elements.
pub fn json_to_markup(bytes: &[u8]) -> JobResult<String> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| JobError::malformed(format!("invalid JSON feed: {}", e)))?;
    let mut out = String::new();
    render_value(&value, &mut out);
    Ok(out)
}

/// RFC 2822 (RSS) or RFC 3339 (Atom); anything else is `None`.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Extract items from a fetched document.
///
/// Items with neither a title nor a link are skipped. Missing publish times
/// fall back to `fetched_at`.
pub fn parse_feed(source: &FeedSource, body: &[u8], fetched_at: DateTime<Utc>) -> JobResult<Vec<FeedItem>> {
    let source = source.normalized();
    let document = match source.kind {
        FeedKind::Json => json_to_markup(body)?,
        _ => String::from_utf8_lossy(body).into_owned(),
    };

    let channel = match source.channel_path.as_deref() {
        Some(path) => {
            let (tags, _) = split_path(path);
            select(&document, &tags)?.first().map(|e| e.inner).unwrap_or(document.as_str())
        }
        None => document.as_str(),
    };

    let item_path = source
        .item_path
        .as_deref()
        .ok_or_else(|| JobError::malformed(format!("source {} has no item path", source.name)))?;
    let (item_tags, _) = split_path(item_path);

    let mut items = Vec::new();
    for element in select(channel, &item_tags)? {
        let field = |path: &Option<String>| -> JobResult<Option<String>> {
            match path.as_deref() {
                Some(path) => extract(element.inner, path),
                None => Ok(None),
            }
        };

        let title = field(&source.title_path)?;
        let link = field(&source.link_path)?;
        if title.is_none() && link.is_none() {
            continue;
        }
        let title = title.or_else(|| link.clone()).unwrap_or_default();
        let link = link.unwrap_or_default();
        let guid = field(&source.guid_path)?
            .or_else(|| (!link.is_empty()).then(|| link.clone()))
            .unwrap_or_else(|| format!("{}:{}", source.name, title));

        let image_link = match source.image_path.as_deref() {
            Some(path) => extract(element.inner, path)?,
            None => {
                let mut found = None;
                for path in IMAGE_FALLBACKS {
                    if let Some(url) = extract(element.inner, path)? {
                        found = Some(url);
                        break;
                    }
                }
                found
            }
        };

        let pub_date = field(&source.date_path)?
            .and_then(|d| parse_date(&d))
            .unwrap_or(fetched_at);

        items.push(FeedItem {
            guid_hash: guid_hash(&guid),
            title,
            link,
            description: field(&source.description_path)?.unwrap_or_default(),
            image_link,
            pub_date,
            source_name: source.name.clone(),
        });
    }
    Ok(items)
}
