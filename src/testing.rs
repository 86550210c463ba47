//! In-memory feed source and mailer for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::feed::{CacheValidators, FeedFetch, FeedItem, FeedSource, FetchError, ParsedFeed};
use crate::mail::{Mailer, OutgoingMail};
use crate::{FeedmailError, Result};

/// Feed source serving scripted responses.
#[derive(Default)]
pub struct FakeSource {
    responses: Mutex<HashMap<String, std::result::Result<FeedFetch, FetchError>>>,
    requests: Mutex<Vec<(String, CacheValidators)>>,
}

impl FakeSource {
    pub fn serve(&self, url: &str, items: Vec<FeedItem>) {
        self.serve_with_validators(url, items, CacheValidators::default());
    }

    pub fn serve_with_validators(&self, url: &str, items: Vec<FeedItem>, validators: CacheValidators) {
        let feed = ParsedFeed {
            title: format!("Feed {}", url),
            items,
            validators,
        };
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(FeedFetch::Fetched(feed)));
    }

    pub fn fail(&self, url: &str, err: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(err));
    }

    pub fn not_modified(&self, url: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(FeedFetch::NotModified));
    }

    pub fn requests(&self) -> Vec<(String, CacheValidators)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for FakeSource {
    async fn fetch(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> std::result::Result<FeedFetch, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), validators.clone()));
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Transport("connection refused".to_string())))
    }
}

/// Mailer recording every mail, failing subjects that contain a marker.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    failing: Mutex<Option<String>>,
}

impl FakeMailer {
    pub fn fail_when_subject_contains(&self, marker: Option<&str>) {
        *self.failing.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if let Some(marker) = self.failing.lock().unwrap().as_deref() {
            if mail.subject.contains(marker) {
                return Err(FeedmailError::Mail("SMTP unavailable".to_string()));
            }
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}
