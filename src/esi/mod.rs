//! Typed facade over the upstream market API.
//!
//! Only the operations the pollers consume are modeled. Every listing
//! endpoint is paged; the page count and cache-expiry window ride along on
//! response headers and are surfaced through [`PagedResponse`].

pub mod transport;
pub mod types;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::config::EsiConfig;
pub use transport::ThrottledClient;
pub use types::{ContractBid, ContractHeader, ContractItem, FullContract, MarketOrder};

/// Page-count header on every paged listing.
const PAGES_HEADER: &str = "x-pages";

/// A page of upstream data plus the paging and cache metadata that arrived
/// with it.
#[derive(Debug, Clone)]
pub struct PagedResponse<T> {
    pub items: T,
    /// Total pages available. Missing or unparseable headers mean 1.
    pub pages: i32,
    /// Upstream cache-expiry instant, when the header parsed.
    pub expires: Option<DateTime<Utc>>,
}

/// Token lookup for authenticated structure polling. The actual SSO refresh
/// flow lives outside this service; implementations hand back a ready
/// bearer token or `None` when the identity is unavailable.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Token source backed by a pre-resolved token string.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn bearer_token(&self) -> Option<String> {
        if self.token.trim().is_empty() {
            None
        } else {
            Some(self.token.clone())
        }
    }
}

/// Upstream API client used by all pollers.
#[derive(Clone)]
pub struct EsiClient {
    transport: ThrottledClient,
    base_url: String,
}

impl EsiClient {
    pub fn new(cfg: &EsiConfig) -> Result<Self> {
        Ok(Self {
            transport: ThrottledClient::new(cfg)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list_regions(&self) -> Result<Vec<i32>> {
        let resp = self.get("/v1/universe/regions/", &[], None).await?;
        let regions = resp.json().await.context("decoding region list")?;
        Ok(regions)
    }

    pub async fn list_region_orders(
        &self,
        region_id: i32,
        page: i32,
    ) -> Result<PagedResponse<Vec<MarketOrder>>> {
        let path = format!("/v1/markets/{region_id}/orders/");
        let query = [
            ("order_type", "all".to_string()),
            ("page", page.to_string()),
        ];
        self.get_paged(&path, &query, None).await
    }

    pub async fn list_region_contracts(
        &self,
        region_id: i32,
        page: i32,
    ) -> Result<PagedResponse<Vec<ContractHeader>>> {
        let path = format!("/v1/contracts/public/{region_id}/");
        let query = [("page", page.to_string())];
        self.get_paged(&path, &query, None).await
    }

    pub async fn list_contract_items(&self, contract_id: i32) -> Result<Vec<ContractItem>> {
        let path = format!("/v1/contracts/public/items/{contract_id}/");
        let resp = self.get(&path, &[], None).await?;
        resp.json().await.context("decoding contract items")
    }

    pub async fn list_contract_bids(&self, contract_id: i32) -> Result<Vec<ContractBid>> {
        let path = format!("/v1/contracts/public/bids/{contract_id}/");
        let resp = self.get(&path, &[], None).await?;
        resp.json().await.context("decoding contract bids")
    }

    /// Orders inside a player structure. Requires a market-reader token.
    pub async fn list_structure_orders(
        &self,
        structure_id: i64,
        page: i32,
        token: &str,
    ) -> Result<PagedResponse<Vec<MarketOrder>>> {
        let path = format!("/v1/markets/structures/{structure_id}/");
        let query = [("page", page.to_string())];
        self.get_paged(&path, &query, Some(token)).await
    }

    async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<PagedResponse<T>> {
        let resp = self.get(path, query, token).await?;
        let pages = page_count(resp.headers());
        let expires = cache_expires(resp.headers());
        let items = resp.json().await.with_context(|| format!("decoding {path}"))?;
        Ok(PagedResponse {
            items,
            pages,
            expires,
        })
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.transport.get(&url).query(query);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        let req = builder.build().context("building upstream request")?;

        let resp = self.transport.execute(req).await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        Ok(resp)
    }
}

/// Total page count from the listing headers. Absence means one page.
pub fn page_count(headers: &HeaderMap) -> i32 {
    headers
        .get(PAGES_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(1)
        .max(1)
}

/// Cache-expiry instant from the standard `expires` header (RFC 2822).
pub fn cache_expires(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(reqwest::header::EXPIRES)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_defaults_to_one() {
        let mut headers = HeaderMap::new();
        assert_eq!(page_count(&headers), 1);
        headers.insert(PAGES_HEADER, "garbage".parse().unwrap());
        assert_eq!(page_count(&headers), 1);
        headers.insert(PAGES_HEADER, "7".parse().unwrap());
        assert_eq!(page_count(&headers), 7);
    }

    #[test]
    fn cache_expires_parses_rfc2822() {
        let mut headers = HeaderMap::new();
        assert!(cache_expires(&headers).is_none());
        headers.insert(
            reqwest::header::EXPIRES,
            "Sat, 01 Aug 2026 12:05:00 GMT".parse().unwrap(),
        );
        let t = cache_expires(&headers).unwrap();
        assert_eq!(t.timestamp(), 1785585900);
    }

    #[test]
    fn static_token_source_rejects_empty_tokens() {
        assert!(StaticTokenSource::new("").bearer_token().is_none());
        assert_eq!(
            StaticTokenSource::new("abc").bearer_token().as_deref(),
            Some("abc")
        );
    }
}
