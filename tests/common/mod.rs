//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use tributary::app::{Result, TributaryError};
use tributary::domain::Item;
use tributary::fetcher::{FetchError, FetchOptions, FetchResponse, Fetcher};
use tributary::notify::Notifier;

/// RSS 2.0 document from (guid, title, pubDate) triples.
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title><link>https://example.com</link>"#,
    );
    for (guid, title, date) in items {
        body.push_str(&format!(
            "<item><guid>{guid}</guid><title>{title}</title><link>https://example.com/{guid}</link><pubDate>{date}</pubDate><description>About {title}</description></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

/// Serves canned bodies by URL; unknown URLs answer 500.
#[derive(Default)]
pub struct StubFetcher {
    bodies: Mutex<HashMap<String, String>>,
    not_modified: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl StubFetcher {
    pub fn serve(&self, url: &str, body: String) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn unchanged(&self, url: &str) {
        self.not_modified.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> std::result::Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.not_modified.lock().unwrap().contains(url) {
            return Ok(FetchResponse {
                status: 304,
                headers: HeaderMap::new(),
                body: Vec::new(),
                not_modified: true,
            });
        }

        match self.bodies.lock().unwrap().get(url) {
            Some(body) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/rss+xml"));
                Ok(FetchResponse {
                    status: 200,
                    headers,
                    body: body.clone().into_bytes(),
                    not_modified: false,
                })
            }
            None => Err(FetchError::FetchFailed {
                url: url.to_string(),
                status: Some(500),
                reason: "HTTP 500".to_string(),
            }),
        }
    }
}

/// Records deliveries; ids listed in `fail_once` fail on their first try.
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<(String, String)>>,
    fail_once: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn fail_once(&self, id: &str) {
        self.fail_once.lock().unwrap().insert(id.to_string());
    }

    /// Delivered item titles, in delivery order.
    pub fn titles(&self) -> Vec<String> {
        self.delivered.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, target: &str, item: &Item) -> Result<()> {
        if self.fail_once.lock().unwrap().remove(&item.id) {
            return Err(TributaryError::DeliveryFailed {
                target: target.to_string(),
                reason: "simulated outage".to_string(),
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .push((target.to_string(), item.title.clone()));
        Ok(())
    }
}
