use crate::domain::models::{ParsedArticle, ParsedFeed};
use chrono::Utc;
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("not a valid feed: {0}")]
    NotAFeed(String),

    #[error("feed has no title")]
    MissingTitle,
}

/// Parse RSS 2.0 / Atom bytes into the canonical feed representation.
///
/// `final_url` is the URL the document was actually served from (after
/// redirects) and becomes the feed's canonical URL. A document that parses
/// but carries no feed title is rejected, which is what sends the fetcher
/// into HTML discovery.
pub fn parse_feed_document(bytes: &[u8], final_url: &str) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(bytes).map_err(|e| ParseError::NotAFeed(e.to_string()))?;

    let title = feed
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .filter(|t| !t.is_empty())
        .ok_or(ParseError::MissingTitle)?;

    let description = feed.description.as_ref().map(|d| d.content.clone());
    let language = feed.language.clone();
    let logo = feed.logo.as_ref().map(|logo| logo.uri.clone());

    // feed-rs does not surface the RSS <comments> element, so collect those
    // in a separate pass keyed by item link.
    let comments_by_link = extract_comments_urls(&String::from_utf8_lossy(bytes));

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            // An article without a link cannot be tracked; skip it.
            let url = entry.links.first().map(|link| link.href.clone())?;

            let title = entry.title.as_ref().map(|t| t.content.clone());
            let description = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));
            let pub_date = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));
            let comments_url = comments_by_link.get(&url).cloned();

            Some(ParsedArticle {
                title,
                url,
                description,
                comments_url,
                pub_date,
            })
        })
        .collect();

    Ok(ParsedFeed {
        url: final_url.to_string(),
        title,
        description,
        language,
        logo,
        articles,
    })
}

/// Collect per-item `<comments>` URLs from raw RSS XML, keyed by the item's
/// `<link>`. Tolerates malformed markup by bailing out of the scan.
fn extract_comments_urls(xml: &str) -> HashMap<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut map = HashMap::new();
    let mut buf = Vec::new();

    let mut in_item = false;
    let mut current_element: Option<&'static str> = None;
    let mut item_link: Option<String> = None;
    let mut item_comments: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"item" | b"entry" => {
                    in_item = true;
                    item_link = None;
                    item_comments = None;
                }
                b"link" if in_item => current_element = Some("link"),
                b"comments" if in_item => current_element = Some("comments"),
                _ => current_element = None,
            },
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.unescape() {
                    match current_element {
                        Some("link") if item_link.is_none() => {
                            item_link = Some(text.trim().to_string());
                        }
                        Some("comments") => {
                            item_comments = Some(text.trim().to_string());
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"item" | b"entry" => {
                    if let (Some(link), Some(comments)) = (item_link.take(), item_comments.take()) {
                        map.insert(link, comments);
                    }
                    in_item = false;
                }
                _ => current_element = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("Error scanning XML for comments links: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    map
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
