use chrono::DateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;

use crate::storage::NewFeedItem;

/// Errors produced while decoding an RSS document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Body is not UTF-8
    #[error("Feed is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// Malformed XML or a document that does not match the RSS shape
    #[error("Malformed XML: {0}")]
    Xml(String),
    /// Well-formed XML whose root is neither `<rss>` nor `<channel>`
    #[error("Unexpected root element <{0}>, expected <rss> or <channel>")]
    UnexpectedRoot(String),
    /// No element at all
    #[error("Feed document is empty")]
    Empty,
}

/// An RSS 2.0 document after XML decoding and HTML-entity unescaping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssFeed {
    pub channel: Channel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

// The deserializer matches children by local name, so `<atom:link>` lands in
// `links` next to `<link>` and `<media:title>` next to `<title>`. Each field
// collects every match and the first non-empty one wins.

#[derive(Deserialize)]
struct RawRss {
    channel: RawChannel,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawChannel {
    #[serde(rename = "title")]
    titles: Vec<String>,
    #[serde(rename = "link")]
    links: Vec<String>,
    #[serde(rename = "description")]
    descriptions: Vec<String>,
    #[serde(rename = "item")]
    items: Vec<RawItem>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawItem {
    #[serde(rename = "title")]
    titles: Vec<String>,
    #[serde(rename = "link")]
    links: Vec<String>,
    #[serde(rename = "description")]
    descriptions: Vec<String>,
    #[serde(rename = "pubDate")]
    pub_dates: Vec<String>,
}

fn first_non_empty(values: Vec<String>) -> String {
    values
        .into_iter()
        .find(|v| !v.trim().is_empty())
        .unwrap_or_default()
}

impl From<RawChannel> for Channel {
    fn from(raw: RawChannel) -> Self {
        Self {
            title: first_non_empty(raw.titles),
            link: first_non_empty(raw.links),
            description: first_non_empty(raw.descriptions),
            items: raw.items.into_iter().map(RssItem::from).collect(),
        }
    }
}

impl From<RawItem> for RssItem {
    fn from(raw: RawItem) -> Self {
        Self {
            title: first_non_empty(raw.titles),
            link: first_non_empty(raw.links),
            description: first_non_empty(raw.descriptions),
            pub_date: first_non_empty(raw.pub_dates),
        }
    }
}

/// Items converted for storage, plus how many were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    pub items: Vec<NewFeedItem>,
    /// Items without a link; they cannot be keyed and are not stored
    pub skipped: usize,
}

/// Decode an RSS body into a normalized [`RssFeed`].
///
/// Accepts the standard `<rss><channel>…</channel></rss>` layout as well as
/// a bare `<channel>` root. Every title, link and description is
/// HTML-unescaped after XML decoding, so a double-encoded `&amp;eacute;`
/// comes out as `é`.
pub fn parse_feed(bytes: &[u8]) -> Result<RssFeed, ParseError> {
    let xml = std::str::from_utf8(bytes)?;
    let xml = xml.trim_start_matches('\u{feff}');

    let raw = match root_element(xml)?.as_str() {
        "rss" => quick_xml::de::from_str::<RawRss>(xml).map(|rss| rss.channel),
        "channel" => quick_xml::de::from_str::<RawChannel>(xml),
        other => return Err(ParseError::UnexpectedRoot(other.to_owned())),
    }
    .map_err(|e| ParseError::Xml(e.to_string()))?;

    let mut feed = RssFeed {
        channel: raw.into(),
    };

    feed.unescape();
    Ok(feed)
}

/// Local name of the first element in the document.
fn root_element(xml: &str) -> Result<String, ParseError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(ParseError::Empty),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }
}

fn unescape_html(s: &mut String) {
    let decoded = html_escape::decode_html_entities(s.as_str()).trim().to_owned();
    *s = decoded;
}

impl RssFeed {
    fn unescape(&mut self) {
        let channel = &mut self.channel;
        unescape_html(&mut channel.title);
        unescape_html(&mut channel.link);
        unescape_html(&mut channel.description);
        for item in &mut channel.items {
            unescape_html(&mut item.title);
            unescape_html(&mut item.link);
            unescape_html(&mut item.description);
        }
    }

    /// Convert the channel's items into rows for the item sink.
    pub fn new_items(&self) -> ParseResult {
        let mut result = ParseResult::default();
        for item in &self.channel.items {
            if item.link.is_empty() {
                result.skipped += 1;
                continue;
            }
            result.items.push(NewFeedItem {
                title: item.title.clone(),
                link: item.link.clone(),
                description: item.description.clone(),
                published_at: item.published_at(),
            });
        }
        result
    }
}

impl RssItem {
    /// `pubDate` as Unix millis. RFC 2822 is the RSS format; RFC 3339 is
    /// accepted because some generators emit it. Anything else is `None`.
    pub fn published_at(&self) -> Option<i64> {
        let raw = self.pub_date.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|dt| dt.timestamp_millis())
            .ok()
    }
}
