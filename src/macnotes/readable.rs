//! A readable rendition of a web page, for `notes add --url`.
//!
//! The page is fetched once. The main content is the first `<article>`, else `<main>`,
//! else `<body>`; scripts, styles and page chrome are dropped. A trailer with the
//! original URL and the access time is appended before `</body>`.

use crate::error::{NotesError, Result};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

static COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));

static CHROME: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe",
        "svg",
    ]
    .iter()
    .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("valid chrome regex"))
    .collect()
});

static CONTAINERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["article", "main", "body"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}\s*>"))
                .expect("valid container regex")
        })
        .collect()
});

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n+").expect("valid whitespace regex"));

/// Download `url` and return `(title, html)`.
pub fn fetch_readable(url: &str) -> Result<(String, String)> {
    reqwest::Url::parse(url).map_err(|e| NotesError::Api(format!("Invalid URL '{}': {}", url, e)))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let page = client.get(url).send()?.error_for_status()?.text()?;
    Ok(readable_html(url, &page, Local::now()))
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Extract `(title, html)` from a fetched page.
pub fn readable_html(url: &str, page: &str, accessed: DateTime<Local>) -> (String, String) {
    let title = TITLE
        .captures(page)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());

    let mut content = COMMENT.replace_all(page, "").into_owned();
    for chrome in CHROME.iter() {
        content = chrome.replace_all(&content, "").into_owned();
    }
    let content = CONTAINERS
        .iter()
        .find_map(|re| re.captures(&content).map(|c| c[1].to_string()))
        .unwrap_or(content);
    let content = BLANK_LINES.replace_all(content.trim(), "\n");

    let html = format!(
        "<html><body>{}Original URL: <a href={url}>{url}</a><br>Accessed on: {}</body></html>",
        content,
        accessed.format("%Y-%m-%dT%H:%M:%S")
    );
    (title, html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAGE: &str = r#"<html><head><title>Bread &amp; Butter</title>
<style>body { color: red }</style></head>
<body><nav><a href="/">Home</a></nav>
<article><h1>Sourdough</h1>

<p>Feed the starter.</p><script>track()</script></article>
<footer>(c) 2024</footer></body></html>"#;

    fn accessed() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_title_and_article() {
        let (title, html) = readable_html("https://example.com/bread", PAGE, accessed());
        assert_eq!(title, "Bread & Butter");
        assert!(html.starts_with("<html><body><h1>Sourdough</h1>\n<p>Feed the starter.</p>"));
        assert!(!html.contains("track()"));
        assert!(!html.contains("Home"));
        assert!(!html.contains("(c) 2024"));
    }

    #[test]
    fn test_trailer() {
        let (_, html) = readable_html("https://example.com/bread", PAGE, accessed());
        assert!(html.ends_with(
            "Original URL: <a href=https://example.com/bread>https://example.com/bread</a><br>\
             Accessed on: 2024-05-01T09:30:00</body></html>"
        ));
    }

    #[test]
    fn test_untitled_page_uses_url() {
        let (title, html) = readable_html("https://example.com", "<p>hi</p>", accessed());
        assert_eq!(title, "https://example.com");
        assert!(html.contains("<p>hi</p>"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(fetch_readable("not a url"), Err(NotesError::Api(_))));
    }
}
