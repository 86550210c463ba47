//! Test helpers for integration tests.
//!
//! Provides a feed source serving in-memory XML documents and a mailer that
//! records what it would have sent.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use feedmail::feed::parse_feed;
use feedmail::{
    CacheValidators, FeedFetch, FeedSource, FeedmailError, FetchError, Mailer, OutgoingMail,
    Result,
};

/// One RSS item for [`rss`].
pub struct RssItem<'a> {
    pub guid: &'a str,
    pub title: &'a str,
    pub pub_date: Option<&'a str>,
}

impl<'a> RssItem<'a> {
    pub fn new(guid: &'a str, title: &'a str) -> Self {
        Self {
            guid,
            title,
            pub_date: None,
        }
    }

    pub fn dated(guid: &'a str, title: &'a str, pub_date: &'a str) -> Self {
        Self {
            guid,
            title,
            pub_date: Some(pub_date),
        }
    }
}

/// Build an RSS 2.0 document.
pub fn rss(title: &str, items: &[RssItem<'_>]) -> String {
    let mut body = String::new();
    for item in items {
        body.push_str("<item>");
        body.push_str(&format!("<title>{}</title>", item.title));
        body.push_str(&format!("<guid>{}</guid>", item.guid));
        body.push_str(&format!(
            "<link>https://example.com/posts/{}</link>",
            item.guid
        ));
        if let Some(date) = item.pub_date {
            body.push_str(&format!("<pubDate>{}</pubDate>", date));
        }
        body.push_str(&format!("<description>About {}</description>", item.title));
        body.push_str("</item>");
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>{title}</title><link>https://example.com/</link><description>test</description>{body}</channel></rss>"#
    )
}

/// Serves XML documents by URL; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct XmlSource {
    documents: Mutex<HashMap<String, String>>,
    fetches: Mutex<usize>,
}

impl XmlSource {
    pub fn set(&self, url: &str, xml: String) {
        self.documents.lock().unwrap().insert(url.to_string(), xml);
    }

    pub fn remove(&self, url: &str) {
        self.documents.lock().unwrap().remove(url);
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl FeedSource for XmlSource {
    async fn fetch(
        &self,
        url: &str,
        _validators: &CacheValidators,
    ) -> std::result::Result<FeedFetch, FetchError> {
        *self.fetches.lock().unwrap() += 1;
        let xml = self.documents.lock().unwrap().get(url).cloned();
        match xml {
            Some(xml) => parse_feed(url, xml.as_bytes()).map(FeedFetch::Fetched),
            None => Err(FetchError::Transport(format!("could not connect to {}", url))),
        }
    }
}

/// Records sent mail; can be switched into a failing state.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    down: Mutex<bool>,
}

impl RecordingMailer {
    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if *self.down.lock().unwrap() {
            return Err(FeedmailError::Mail("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}
