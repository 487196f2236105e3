use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;

pub mod lookup;
pub mod parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Enforce,
    Testing,
    None,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum MxPattern {
    Equals(String),
    StartsWith(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Policy {
    pub mode: Mode,
    pub mx: Vec<MxPattern>,
    pub max_age: u64,
}

/// Outcome of one RFC 8461 policy resolution for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// A new or replacement policy was retrieved over HTTPS.
    Valid { id: String, policy: Arc<Policy> },
    /// The TXT record still carries the caller's policy id; HTTPS skipped.
    NotChanged,
    /// The domain publishes no usable policy.
    NotFound,
    /// Transient DNS/HTTPS failure; the caller must keep any cached entry.
    Failed,
}

#[derive(Debug)]
pub enum Error {
    Dns(mail_auth::Error),
    Http(reqwest::Error),
    InvalidPolicy(String),
}

/// Seam between the resolution pipeline and the network. The production
/// implementation is [`lookup::StsFetcher`]; tests substitute scripted
/// fetchers.
#[async_trait]
pub trait PolicyFetch: Send + Sync {
    async fn fetch(
        &self,
        domain: &str,
        latest_pol_id: Option<&str>,
        timeout: Duration,
    ) -> FetchResult;
}

impl Policy {
    /// Colon-joined MX pattern list for the socketmap reply, sorted and
    /// deduplicated, wildcard entries minus their leading `*`.
    pub fn match_list(&self) -> String {
        let mut entries = BTreeSet::new();
        for pattern in &self.mx {
            entries.insert(match pattern {
                MxPattern::Equals(host) => host.as_str(),
                MxPattern::StartsWith(suffix) => suffix.as_str(),
            });
        }
        entries.into_iter().collect::<Vec<_>>().join(":")
    }
}

impl From<mail_auth::Error> for Error {
    fn from(value: mail_auth::Error) -> Self {
        Error::Dns(value)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Http(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::InvalidPolicy(value)
    }
}
