use crate::domain::models::{Article, Feed};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Everything outside RFC 3986 unreserved characters is encoded, `/`
/// included, so the wrapped URL always travels as a single path segment.
const TRACKER_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("XML write error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML write error: {0}")]
    Io(#[from] std::io::Error),

    #[error("generated document is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Builds the proxy-side URLs embedded in rewritten feeds.
#[derive(Debug, Clone)]
pub struct TrackerUrls {
    base: String,
}

impl TrackerUrls {
    pub fn new(api_base_url: &str, root_path: &str) -> Self {
        let base = format!(
            "{}/{}",
            api_base_url.trim_end_matches('/'),
            root_path.trim_matches('/')
        );
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn encode_target(target: &str) -> String {
        utf8_percent_encode(target, TRACKER_SEGMENT).to_string()
    }

    /// The proxy's own address for a user's view of a feed.
    pub fn user_feed_url(&self, user_id: &str, feed_url: &str) -> String {
        format!("{}/v1/feed/{}/{}", self.base, user_id, feed_url)
    }

    /// The click-tracking wrapper that redirects to `target` after logging.
    pub fn tracker_url(&self, user_id: &str, article_id: i64, target: &str) -> String {
        format!(
            "{}/v1/log/{}/{}/{}",
            self.base,
            user_id,
            article_id,
            Self::encode_target(target)
        )
    }
}

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"href="(.*?)""#).expect("valid href pattern"))
}

/// Rewrite every `href="..."` inside embedded HTML to the user's tracker.
fn rewrite_hrefs(html: &str, urls: &TrackerUrls, user_id: &str, article_id: i64) -> String {
    href_pattern()
        .replace_all(html, |caps: &regex::Captures<'_>| {
            format!(r#"href="{}""#, urls.tracker_url(user_id, article_id, &caps[1]))
        })
        .into_owned()
}

/// Produce the user-specific RSS 2.0 document: every article link, comments
/// link and embedded anchor goes through the click tracker.
pub fn write_user_feed(
    feed: &Feed,
    articles: &[Article],
    user_id: &str,
    urls: &TrackerUrls,
) -> Result<String, RewriteError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", "http://www.w3.org/2005/Atom"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    let title = feed.title.as_deref().unwrap_or(feed.url.as_str());
    writer
        .create_element("title")
        .write_text_content(BytesText::new(title))?;
    writer
        .create_element("link")
        .write_text_content(BytesText::new(&feed.url))?;
    writer
        .create_element("atom:link")
        .with_attributes([
            (
                "href",
                urls.user_feed_url(user_id, &feed.url).as_str(),
            ),
            ("rel", "self"),
            ("type", "application/rss+xml"),
        ])
        .write_empty()?;
    writer
        .create_element("description")
        .write_text_content(BytesText::new(feed.description.as_deref().unwrap_or(title)))?;
    if let Some(language) = feed.language.as_deref() {
        writer
            .create_element("language")
            .write_text_content(BytesText::new(language))?;
    }
    if let Some(logo) = feed.logo.as_deref() {
        writer.write_event(Event::Start(BytesStart::new("image")))?;
        writer
            .create_element("url")
            .write_text_content(BytesText::new(logo))?;
        writer
            .create_element("title")
            .write_text_content(BytesText::new(title))?;
        writer
            .create_element("link")
            .write_text_content(BytesText::new(&feed.url))?;
        writer.write_event(Event::End(BytesEnd::new("image")))?;
    }

    for article in articles {
        writer.write_event(Event::Start(BytesStart::new("item")))?;

        if let Some(article_title) = article.title.as_deref() {
            writer
                .create_element("title")
                .write_text_content(BytesText::new(article_title))?;
        }
        writer
            .create_element("guid")
            .with_attribute(("isPermaLink", "false"))
            .write_text_content(BytesText::new(&article.url))?;
        writer
            .create_element("link")
            .write_text_content(BytesText::new(
                urls.tracker_url(user_id, article.id, &article.url).as_str(),
            ))?;
        if let Some(description) = article.description.as_deref() {
            let rewritten = rewrite_hrefs(description, urls, user_id, article.id);
            writer
                .create_element("description")
                .write_text_content(BytesText::new(&rewritten))?;
        }
        if let Some(comments_url) = article.comments_url.as_deref() {
            writer
                .create_element("comments")
                .write_text_content(BytesText::new(
                    urls.tracker_url(user_id, article.id, comments_url).as_str(),
                ))?;
        }
        if let Some(pub_date) = article.pub_date {
            writer
                .create_element("pubDate")
                .write_text_content(BytesText::new(&pub_date.to_rfc2822()))?;
        }

        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use percent_encoding::percent_decode_str;

    fn sample_feed() -> Feed {
        Feed {
            id: 1,
            url: "https://news.ycombinator.com/rss".to_string(),
            original_url: None,
            title: Some("Hacker News".to_string()),
            description: Some("Links for the intellectually curious".to_string()),
            language: Some("en".to_string()),
            logo: None,
            consecutive_failures: 0,
            last_error: None,
            is_disabled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_article(id: i64) -> Article {
        Article {
            id,
            feed_id: 1,
            title: Some(format!("Article {}", id)),
            description: Some(
                r#"Read <a href="https://example.com/more?page=2">more</a> here"#.to_string(),
            ),
            url: format!("https://news.ycombinator.com/item?id={}", id),
            comments_url: Some(format!("https://news.ycombinator.com/item?id={}#c", id)),
            pub_date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            updated: Utc::now(),
            embedding: None,
        }
    }

    fn urls() -> TrackerUrls {
        TrackerUrls::new("https://proxy.example", "/")
    }

    #[test]
    fn test_tracker_url_encodes_slashes() {
        let tracker = urls().tracker_url("u1", 7, "https://example.com/a/b?q=1");
        let (prefix, encoded) = tracker.split_at("https://proxy.example/v1/log/u1/7/".len());
        assert_eq!(prefix, "https://proxy.example/v1/log/u1/7/");
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('?'));

        // Decoding restores the exact original URL, query included
        let decoded = percent_decode_str(encoded).decode_utf8().unwrap();
        assert_eq!(decoded, "https://example.com/a/b?q=1");
    }

    #[test]
    fn test_root_path_joining() {
        let with_root = TrackerUrls::new("https://proxy.example/", "/rss/");
        assert_eq!(
            with_root.user_feed_url("u1", "https://example.com/feed"),
            "https://proxy.example/rss/v1/feed/u1/https://example.com/feed"
        );

        let bare = TrackerUrls::new("https://proxy.example", "");
        assert_eq!(
            bare.tracker_url("u1", 1, "x"),
            "https://proxy.example/v1/log/u1/1/x"
        );
    }

    #[test]
    fn test_feed_document_wraps_every_link() {
        let feed = sample_feed();
        let articles = vec![sample_article(1), sample_article(2)];

        let xml = write_user_feed(&feed, &articles, "u1", &urls()).unwrap();

        assert!(xml.starts_with("<?xml"));
        assert_eq!(xml.matches("<item>").count(), 2);

        // Every <link> and <comments> inside items points at the tracker
        for line in xml.lines() {
            let line = line.trim();
            if line.starts_with("<link>") || line.starts_with("<comments>") {
                if line.contains("news.ycombinator.com/rss") {
                    continue; // channel link keeps the feed's own URL
                }
                assert!(
                    line.contains("/v1/log/u1/"),
                    "unwrapped link leaked: {}",
                    line
                );
            }
        }

        // Embedded anchors are wrapped too (XML-escaped in the output)
        assert!(!xml.contains(r#"href=&quot;https://example.com/more"#));
        assert!(xml.contains("https%3A%2F%2Fexample.com%2Fmore%3Fpage%3D2"));
    }

    #[test]
    fn test_guid_keeps_original_identity() {
        let feed = sample_feed();
        let articles = vec![sample_article(42)];

        let xml = write_user_feed(&feed, &articles, "u1", &urls()).unwrap();

        assert!(xml.contains(
            r#"<guid isPermaLink="false">https://news.ycombinator.com/item?id=42</guid>"#
        ));
    }

    #[test]
    fn test_self_link_points_at_proxy() {
        let feed = sample_feed();
        let xml = write_user_feed(&feed, &[], "u1", &urls()).unwrap();

        assert!(xml.contains(r#"rel="self""#));
        assert!(xml.contains("https://proxy.example/v1/feed/u1/https://news.ycombinator.com/rss"));
    }

    #[test]
    fn test_pub_date_is_rfc2822_utc() {
        let feed = sample_feed();
        let xml = write_user_feed(&feed, &[sample_article(1)], "u1", &urls()).unwrap();

        assert!(xml.contains("<pubDate>Wed, 01 May 2024 12:00:00 +0000</pubDate>"));
    }

    #[test]
    fn test_article_without_optional_fields() {
        let feed = sample_feed();
        let article = Article {
            id: 9,
            feed_id: 1,
            title: None,
            description: None,
            url: "https://news.ycombinator.com/item?id=9".to_string(),
            comments_url: None,
            pub_date: None,
            updated: Utc::now(),
            embedding: None,
        };

        let xml = write_user_feed(&feed, &[article], "u1", &urls()).unwrap();
        assert_eq!(xml.matches("<item>").count(), 1);
        assert!(!xml.contains("<comments>"));
        assert!(!xml.contains("<pubDate>"));
    }
}
