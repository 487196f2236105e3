use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mail_auth::{hickory_resolver::proto::op::ResponseCode, mta_sts::MtaSts, Resolver};
use reqwest::{redirect, StatusCode};

use crate::USER_AGENT;

use super::{Error, FetchResult, Policy, PolicyFetch};

/// Production fetcher: TXT discovery through the system resolver, policy
/// document retrieval over HTTPS with strict Web PKI validation.
pub struct StsFetcher {
    pub dns: Resolver,
}

impl StsFetcher {
    pub fn new(dns: Resolver) -> Self {
        Self { dns }
    }

    async fn fetch_policy(
        &self,
        domain: &str,
        latest_pol_id: Option<&str>,
        timeout: Duration,
    ) -> Result<FetchResult, Error> {
        // Discover the current policy id
        let record = self
            .dns
            .txt_lookup::<MtaSts>(format!("_mta-sts.{domain}."))
            .await?;

        // The cached policy is still current, skip the HTTPS roundtrip
        if latest_pol_id == Some(record.id.as_str()) {
            return Ok(FetchResult::NotChanged);
        }

        // Fetch the policy document
        let response = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?
            .get(format!("https://mta-sts.{domain}/.well-known/mta-sts.txt"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(FetchResult::NotFound);
        }
        if response.status() != StatusCode::OK {
            tracing::debug!(
                context = "sts",
                event = "unexpected-status",
                domain = domain,
                status = response.status().as_u16(),
            );
            return Ok(FetchResult::Failed);
        }
        let bytes = response.bytes().await?;

        // Parse policy
        let policy = Policy::parse(
            std::str::from_utf8(&bytes).map_err(|err| Error::InvalidPolicy(err.to_string()))?,
        )?;

        Ok(FetchResult::Valid {
            id: record.id.clone(),
            policy: Arc::new(policy),
        })
    }
}

#[async_trait]
impl PolicyFetch for StsFetcher {
    async fn fetch(
        &self,
        domain: &str,
        latest_pol_id: Option<&str>,
        timeout: Duration,
    ) -> FetchResult {
        match self.fetch_policy(domain, latest_pol_id, timeout).await {
            Ok(result) => result,
            Err(Error::Dns(err)) => {
                tracing::debug!(
                    context = "sts",
                    event = "txt-lookup-failed",
                    domain = domain,
                    reason = ?err,
                );
                match err {
                    mail_auth::Error::DnsRecordNotFound(code) => match code {
                        ResponseCode::NXDomain | ResponseCode::NoError => FetchResult::NotFound,
                        _ => FetchResult::Failed,
                    },
                    mail_auth::Error::InvalidRecordType | mail_auth::Error::ParseError => {
                        FetchResult::NotFound
                    }
                    _ => FetchResult::Failed,
                }
            }
            Err(Error::Http(err)) => {
                tracing::debug!(
                    context = "sts",
                    event = "policy-fetch-failed",
                    domain = domain,
                    reason = %err,
                );
                FetchResult::Failed
            }
            Err(Error::InvalidPolicy(reason)) => {
                tracing::debug!(
                    context = "sts",
                    event = "invalid-policy",
                    domain = domain,
                    reason = reason,
                );
                FetchResult::NotFound
            }
        }
    }
}
