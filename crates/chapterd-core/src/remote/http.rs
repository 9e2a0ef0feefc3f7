//! curl-backed client for the MangaDex-shaped API.

use async_trait::async_trait;
use std::time::Duration;

use super::parse::{parse_aggregate_count, parse_feed_page, title_id_from_url};
use super::{RemoteApi, RemoteChapter, RemoteError};
use crate::config::RemoteConfig;
use crate::rate_limit::RateLimiter;
use crate::retry::{run_with_retry, RetryPolicy};

const FEED_PAGE_SIZE: u64 = 100;
const USER_AGENT: &str = concat!("chapterd/", env!("CARGO_PKG_VERSION"));

/// Every request takes a token from the shared rate limiter and is retried
/// per the policy on transient failures.
#[derive(Debug, Clone)]
pub struct MangaDexClient {
    api_base_url: String,
    site_base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl MangaDexClient {
    pub fn new(cfg: &RemoteConfig, retry: RetryPolicy, limiter: RateLimiter) -> Self {
        Self {
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            site_base_url: cfg.site_base_url.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            retry,
            limiter,
        }
    }

    pub fn aggregate_url(&self, title_id: &str, language: &str) -> String {
        format!(
            "{}/manga/{title_id}/aggregate?translatedLanguage[]={language}",
            self.api_base_url
        )
    }

    pub fn feed_url(&self, title_id: &str, language: &str, offset: u64) -> String {
        format!(
            "{}/manga/{title_id}/feed?translatedLanguage[]={language}&limit={FEED_PAGE_SIZE}\
             &offset={offset}&order[chapter]=asc&includes[]=scanlation_group",
            self.api_base_url
        )
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        run_with_retry(&self.retry, RemoteError::kind, || async {
            self.limiter.acquire().await;
            let url = url.to_string();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || http_get(&url, timeout))
                .await
                .map_err(|e| RemoteError::Task(e.to_string()))?
        })
        .await
    }
}

/// Blocking GET; non-2xx responses become `RemoteError::Http`.
fn http_get(url: &str, timeout: Duration) -> Result<Vec<u8>, RemoteError> {
    let mut body = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.useragent(USER_AGENT)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(timeout)?;
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let status = easy.response_code()?;
    if !(200..300).contains(&status) {
        return Err(RemoteError::Http {
            status,
            url: url.to_string(),
        });
    }
    Ok(body)
}

#[async_trait]
impl RemoteApi for MangaDexClient {
    async fn aggregate_count(&self, source_url: &str, language: &str) -> Result<i64, RemoteError> {
        let id = title_id_from_url(source_url)?;
        let url = self.aggregate_url(&id, language);
        let body = self.get(&url).await?;
        parse_aggregate_count(&body, &url)
    }

    async fn list_chapters(
        &self,
        source_url: &str,
        language: &str,
    ) -> Result<Vec<RemoteChapter>, RemoteError> {
        let id = title_id_from_url(source_url)?;
        let mut chapters = Vec::new();
        let mut offset = 0;
        loop {
            let url = self.feed_url(&id, language, offset);
            let body = self.get(&url).await?;
            let page = parse_feed_page(&body, &url, &self.site_base_url)?;
            tracing::debug!(title_id = %id, offset, total = page.total, "fetched chapter feed page");
            let next = page.next_offset(offset);
            chapters.extend(page.chapters);
            match next {
                Some(n) => offset = n,
                None => break,
            }
        }
        Ok(chapters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls() {
        let client = MangaDexClient::new(
            &RemoteConfig {
                api_base_url: "https://api.example.org/".to_string(),
                ..RemoteConfig::default()
            },
            RetryPolicy::default(),
            RateLimiter::new(1.0, 1),
        );
        assert_eq!(
            client.aggregate_url("abc", "en"),
            "https://api.example.org/manga/abc/aggregate?translatedLanguage[]=en"
        );
        assert_eq!(
            client.feed_url("abc", "en", 200),
            "https://api.example.org/manga/abc/feed?translatedLanguage[]=en&limit=100\
             &offset=200&order[chapter]=asc&includes[]=scanlation_group"
        );
    }

    #[tokio::test]
    async fn unsupported_url_fails_before_any_request() {
        let client = MangaDexClient::new(
            &RemoteConfig::default(),
            RetryPolicy::default(),
            RateLimiter::new(1.0, 1),
        );
        let err = client
            .aggregate_count("https://mangadex.org/user/abc", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedUrl(_)));
        assert!(client.limiter.try_acquire().await);
    }
}
