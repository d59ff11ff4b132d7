//! Octocrab client scoped to one repository, with the request transport.
//!
//! Every request goes through the same path: count it, consult the response
//! cache, wait on the [`RateLimiter`], send with cache validators, feed the
//! quota headers back to the limiter, then store or reuse the body. Effects
//! are repo-scoped, so the client carries the `RepoId` and builds the paths.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use octocrab::Octocrab;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::effects::Freshness;
use crate::types::RepoId;

use super::analytics::{ApiAnalytics, ApiCall};
use super::cache::{CachedResponse, ResponseCache, normalize_key};
use super::error::GitHubApiError;
use super::rate_limit::RateLimiter;
use super::retry::RetryConfig;

/// Default cache byte budget (1000 MB).
pub const DEFAULT_CACHE_BYTES: usize = 1000 * 1024 * 1024;

/// A GitHub API client scoped to a specific repository.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
    repo: RepoId,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    analytics: Arc<ApiAnalytics>,
    retry: RetryConfig,
}

/// Mutating HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Post,
    Put,
}

impl OctocrabClient {
    /// Creates a client with a default limiter and an in-memory cache.
    pub fn new(client: Octocrab, repo: RepoId) -> Self {
        Self {
            client,
            repo,
            limiter: Arc::new(RateLimiter::default()),
            cache: Arc::new(ResponseCache::in_memory(DEFAULT_CACHE_BYTES)),
            analytics: Arc::new(ApiAnalytics::new()),
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Creates a client authenticated with a personal access token.
    pub fn from_token(token: impl Into<String>, repo: RepoId) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client, repo))
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn analytics(&self) -> &Arc<ApiAnalytics> {
        &self.analytics
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Builds a repository-relative API path: `repo_path("/pulls/3")` is
    /// `/repos/{owner}/{repo}/pulls/3`.
    pub fn repo_path(&self, suffix: &str) -> String {
        format!("/repos/{}/{}{}", self.repo.owner, self.repo.repo, suffix)
    }

    // ─── Reads ────────────────────────────────────────────────────────────────

    /// GETs `path` and deserializes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        call: ApiCall,
        path: &str,
        freshness: Freshness,
    ) -> Result<T, GitHubApiError> {
        let body = self.get_body(call, path, freshness).await?;
        serde_json::from_str(&body).map_err(|e| {
            GitHubApiError::permanent_without_source(format!(
                "failed to decode {} response from {}: {}",
                call, path, e
            ))
        })
    }

    async fn get_body(
        &self,
        call: ApiCall,
        path: &str,
        freshness: Freshness,
    ) -> Result<String, GitHubApiError> {
        let key = normalize_key(path);
        let cached = self.cache.get(&key);

        if freshness == Freshness::Cached
            && let Some(entry) = &cached
            && entry.is_fresh(Utc::now())
        {
            self.analytics.record(call, true);
            return Ok(entry.body.clone());
        }

        self.limiter.acquire().await;

        let mut headers = HeaderMap::new();
        if freshness == Freshness::Fresh {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        }
        if let Some(etag) = cached.as_ref().and_then(|entry| entry.etag.as_deref())
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(IF_NONE_MATCH, value);
        }

        let response = self
            .client
            ._get_with_headers(path, Some(headers))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        self.limiter.after_response(response.headers());

        let status = response.status();
        let etag = header_string(response.headers(), ETAG.as_str());
        let max_age = max_age(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(entry) => {
                    self.analytics.record(call, true);
                    self.cache.touch(&key, Utc::now(), max_age);
                    Ok(entry.body)
                }
                None => Err(GitHubApiError::transient_without_source(format!(
                    "304 for {} without a cached body",
                    path
                ))),
            };
        }

        self.analytics.record(call, false);
        let body = self
            .client
            .body_to_string(response)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        if !status.is_success() {
            return Err(GitHubApiError::from_status(
                status.as_u16(),
                error_message(&body),
            ));
        }

        self.cache.put(
            &key,
            CachedResponse {
                body: body.clone(),
                etag,
                fetched_at: Utc::now(),
                max_age,
            },
        );
        Ok(body)
    }

    // ─── Writes ───────────────────────────────────────────────────────────────

    /// Sends a mutating request and deserializes the JSON response.
    ///
    /// Mutations bypass the cache; callers invalidate the resources they
    /// changed with [`invalidate`](Self::invalidate).
    pub async fn send_json<B, T>(
        &self,
        call: ApiCall,
        method: Mutation,
        path: &str,
        body: &B,
    ) -> Result<T, GitHubApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.analytics.record(call, false);
        self.limiter.acquire().await;

        let response = match method {
            Mutation::Post => self.client._post(path, Some(body)).await,
            Mutation::Put => self.client._put(path, Some(body)).await,
        }
        .map_err(GitHubApiError::from_octocrab)?;
        self.limiter.after_response(response.headers());

        let status = response.status();
        let text = self
            .client
            .body_to_string(response)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        if !status.is_success() {
            return Err(GitHubApiError::from_status(
                status.as_u16(),
                error_message(&text),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            GitHubApiError::permanent_without_source(format!(
                "failed to decode {} response from {}: {}",
                call, path, e
            ))
        })
    }

    /// Drops cached responses for `path` and everything beneath it.
    pub fn invalidate(&self, path: &str) {
        self.cache.delete_resource(path);
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("repo", &self.repo)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parses `max-age` out of a `Cache-Control` header. Missing means zero.
fn max_age(headers: &HeaderMap) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_max_age)
        .unwrap_or(Duration::ZERO)
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|secs| secs.trim().parse().ok())
        .map(Duration::from_secs)
}

/// Extracts GitHub's `message` field from an error body, falling back to the
/// raw body.
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.trim().to_string(),
    }
}
