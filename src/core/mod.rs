use std::{sync::Arc, time::Duration};

use ahash::AHashMap;

use crate::{
    config::{Config, ZoneConfig},
    lookup::PolicyCache,
    sts::{FetchResult, PolicyFetch},
};

pub struct Core {
    pub cache: PolicyCache,
    pub zones: ZoneRegistry,
    pub max_frame_size: usize,
}

/// A named configuration bucket: resolution deadline plus strictness.
/// Every zone shares the process-wide fetcher.
pub struct Zone {
    pub name: String,
    pub timeout: Duration,
    pub strict_testing: bool,
    fetcher: Arc<dyn PolicyFetch>,
}

pub struct ZoneRegistry {
    default: Zone,
    zones: AHashMap<String, Zone>,
}

impl Core {
    pub fn new(config: &Config, fetcher: Arc<dyn PolicyFetch>) -> Self {
        Core {
            cache: PolicyCache::new(&config.cache),
            zones: ZoneRegistry::new(config, fetcher),
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Zone {
    fn new(name: String, config: &ZoneConfig, fetcher: Arc<dyn PolicyFetch>) -> Self {
        Zone {
            name,
            timeout: Duration::from_secs(config.timeout),
            strict_testing: config.strict_testing,
            fetcher,
        }
    }

    /// Resolves the STS policy state for `domain`, clamping the whole
    /// TXT + HTTPS sequence to the zone deadline.
    pub async fn resolve(&self, domain: &str, latest_pol_id: Option<&str>) -> FetchResult {
        match tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch(domain, latest_pol_id, self.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    context = "sts",
                    event = "resolve-timeout",
                    zone = self.name,
                    domain = domain,
                );
                FetchResult::Failed
            }
        }
    }
}

impl ZoneRegistry {
    pub fn new(config: &Config, fetcher: Arc<dyn PolicyFetch>) -> Self {
        ZoneRegistry {
            default: Zone::new(String::new(), &config.default_zone, fetcher.clone()),
            zones: config
                .zones
                .iter()
                .map(|(name, zone_config)| {
                    (
                        name.clone(),
                        Zone::new(name.clone(), zone_config, fetcher.clone()),
                    )
                })
                .collect(),
        }
    }

    /// Empty and unknown zone names fall back to the default zone.
    pub fn get(&self, name: &str) -> &Zone {
        if name.is_empty() {
            &self.default
        } else {
            self.zones.get(name).unwrap_or(&self.default)
        }
    }
}
