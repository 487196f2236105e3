use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    config::{Config, ZoneConfig},
    core::Core,
    sts::{FetchResult, Mode, MxPattern, Policy, PolicyFetch},
};

pub mod session;

/// Scripted fetcher: per-domain results and delays, plus a fetch counter
/// so tests can assert how often the network would have been touched.
#[derive(Default)]
pub struct TestFetcher {
    results: DashMap<String, FetchResult>,
    delays: DashMap<String, Duration>,
    pub fetches: AtomicUsize,
}

impl TestFetcher {
    pub fn with_result(self, domain: &str, result: FetchResult) -> Self {
        self.results.insert(domain.to_string(), result);
        self
    }

    pub fn with_delay(self, domain: &str, delay: Duration) -> Self {
        self.delays.insert(domain.to_string(), delay);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyFetch for TestFetcher {
    async fn fetch(
        &self,
        domain: &str,
        _latest_pol_id: Option<&str>,
        _timeout: Duration,
    ) -> FetchResult {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.get(domain).map(|delay| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.results
            .get(domain)
            .map(|result| result.clone())
            .unwrap_or(FetchResult::NotFound)
    }
}

pub fn valid(id: &str, mode: Mode, mx: &[&str], max_age: u64) -> FetchResult {
    FetchResult::Valid {
        id: id.to_string(),
        policy: policy(mode, mx, max_age),
    }
}

pub fn policy(mode: Mode, mx: &[&str], max_age: u64) -> Arc<Policy> {
    Arc::new(Policy {
        mode,
        mx: mx
            .iter()
            .map(|entry| match entry.strip_prefix('*') {
                Some(suffix) => MxPattern::StartsWith(suffix.to_string()),
                None => MxPattern::Equals(entry.to_string()),
            })
            .collect(),
        max_age,
    })
}

impl Core {
    /// Core wired to a scripted fetcher, with a default (non-strict) zone
    /// and a `strict` zone honoring testing-mode policies.
    pub fn test(fetcher: Arc<TestFetcher>) -> Self {
        let mut config = Config::default();
        config.cache.options.cache_size = 100;
        config.default_zone = ZoneConfig {
            timeout: 4,
            strict_testing: false,
        };
        config.zones.insert(
            "strict".to_string(),
            ZoneConfig {
                timeout: 4,
                strict_testing: true,
            },
        );
        Core::new(&config, fetcher)
    }
}
