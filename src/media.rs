use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

pub const CANONICAL_VIDEO_HOST: &str = "https://www.youtube.com";

const VIDEO_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

static PLATFORM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?(?:youtube\.com|youtu\.be)/[\w\-?=&%/#.]+")
        .expect("platform url regex must be valid")
});

static VIDEO_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(youtube\.com/embed/|youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/)")
        .expect("video shape regex must be valid")
});

static IFRAMES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("iframe[src]").expect("iframe selector must be valid"));

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector must be valid"));

static ALL_ELEMENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("universal selector must be valid"));

static DATA_SCRIPTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"], script[type="application/json"]"#)
        .expect("script selector must be valid")
});

/// Embeddable video links found anywhere in the page, first-seen order.
/// Only watch, embed, shorts and short-link shapes survive.
pub fn extract_media(html: &str) -> Vec<String> {
    if html.trim().is_empty() {
        return Vec::new();
    }

    let doc = Html::parse_document(html);
    let mut found = Vec::new();

    for iframe in doc.select(&IFRAMES) {
        if let Some(url) = iframe.value().attr("src").and_then(absolutize) {
            found.push(url);
        }
    }

    for anchor in doc.select(&ANCHORS) {
        if let Some(url) = anchor.value().attr("href").and_then(absolutize) {
            found.push(url);
        }
    }

    for script in doc.select(&DATA_SCRIPTS) {
        let body = script.text().collect::<String>();
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            found.extend(urls_in_json(&value));
        }
    }

    // Decoded attribute values and text nodes: `&amp;` is already `&` here.
    for element in doc.select(&ALL_ELEMENTS) {
        for (_, value) in element.value().attrs() {
            found.extend(platform_urls(value));
        }
    }
    for text in doc.root_element().text() {
        found.extend(platform_urls(text));
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|url| is_video_url(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn is_video_url(url: &str) -> bool {
    is_video_host(url) && VIDEO_SHAPE.is_match(url)
}

fn absolutize(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(rest) = url.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if url.starts_with('/') {
        if url.to_ascii_lowercase().starts_with("/embed/") {
            return Some(format!("{CANONICAL_VIDEO_HOST}{url}"));
        }
        return None;
    }
    Some(url.to_string())
}

fn is_video_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| VIDEO_HOSTS.contains(&host.as_str()))
}

fn urls_in_json(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_json_urls(value, &mut out);
    out
}

fn collect_json_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.extend(platform_urls(text)),
        Value::Array(items) => {
            for item in items {
                collect_json_urls(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_json_urls(item, out);
            }
        }
        _ => {}
    }
}

fn platform_urls(text: &str) -> impl Iterator<Item = String> + '_ {
    PLATFORM_URL
        .find_iter(text)
        .map(|m| trim_trailing(m.as_str()).to_string())
}

fn trim_trailing(url: &str) -> &str {
    url.trim_end_matches(['.', '#'])
}
