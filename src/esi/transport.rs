//! Throttled upstream transport.
//!
//! Wraps every round-trip with a process-wide concurrency cap, per-attempt
//! latency metrics, and the upstream error-budget backoff protocol. Callers
//! get the final response back and treat anything non-2xx as fatal for the
//! current poll cycle.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use metrics::{histogram, increment_counter};
use rand::Rng;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::{Request, Response};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::EsiConfig;

/// Histogram of per-attempt call latencies, labeled by host, normalized
/// endpoint, status, and attempt number.
pub const METRIC_API_CALLS: &str = "evemarketwatch_api_calls";
/// Count of responses with status >= 400.
pub const METRIC_API_ERRORS: &str = "evemarketwatch_api_errors";

/// Attempts beyond this return whatever the last attempt produced.
const MAX_TRIES: u32 = 10;

static ENDPOINT_FILTER: OnceLock<Regex> = OnceLock::new();

/// Collapse version and numeric id path segments so metrics do not explode
/// into one series per entity id.
fn normalize_endpoint(path: &str) -> String {
    let re = ENDPOINT_FILTER
        .get_or_init(|| Regex::new("/v[0-9]/|/[0-9]+/").expect("endpoint filter regex"));
    // Replace repeatedly: adjacent numeric segments share a slash, so a
    // single pass leaves every other one behind.
    let mut out = path.to_string();
    loop {
        let next = re.replace_all(&out, "/").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Error-budget signal parsed from the upstream response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBudget {
    /// Seconds until the error window resets.
    pub reset: f64,
    /// Errors remaining in the window, out of 100.
    pub remain: f64,
}

impl ErrorBudget {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let reset = header_f64(headers, "x-esi-error-limit-reset")?;
        let remain = header_f64(headers, "x-esi-error-limit-remain")?;
        Some(Self { reset, remain })
    }

    /// Sleep proportional to how depleted the budget is: a full budget
    /// yields no wait, a near-empty one approaches the full reset window.
    fn proportional_delay(&self, jitter: f64) -> Duration {
        let depleted = 1.0 - (self.remain / 100.0);
        let seconds = (self.reset * depleted).max(0.0) * (1.0 + jitter);
        Duration::from_secs_f64(seconds)
    }

    fn full_window(&self) -> Duration {
        Duration::from_secs_f64(self.reset.max(0.0))
    }
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
}

/// What to do after one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Disposition {
    /// Hand the response to the caller.
    GiveUp,
    /// Sleep already applied; run another attempt.
    Retry,
}

/// Pure backoff decision for one observed status. `jitter` is drawn from
/// [0, 1) by the caller so tests can pin it.
fn attempt_plan(
    status: u16,
    budget: Option<ErrorBudget>,
    tries: u32,
    jitter: f64,
) -> (Duration, Disposition) {
    let mut sleep = Duration::ZERO;

    // Errors without a parseable budget back off linearly with the
    // attempt counter.
    if status >= 400 && budget.is_none() {
        sleep += Duration::from_secs(u64::from(tries));
    }

    match budget {
        Some(b) if status == 420 => sleep += b.full_window(),
        Some(b) => sleep += b.proportional_delay(jitter),
        None => {}
    }

    let disposition = if (200..420).contains(&status) {
        Disposition::GiveUp
    } else {
        Disposition::Retry
    };

    (sleep, disposition)
}

/// HTTP client with a global in-flight cap and adaptive retry.
#[derive(Clone)]
pub struct ThrottledClient {
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
}

impl ThrottledClient {
    pub fn new(cfg: &EsiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(5 * 60))
            .tcp_keepalive(Duration::from_secs(5 * 60))
            .build()
            .context("building upstream HTTP client")?;

        Ok(Self {
            client,
            limiter: Arc::new(Semaphore::new(cfg.max_concurrent_requests)),
        })
    }

    /// Start a GET request bound to the shared connection pool.
    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url)
    }

    /// Run a request to completion under the concurrency cap, retrying per
    /// the upstream error-budget protocol.
    pub async fn execute(&self, req: Request) -> Result<Response> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .context("request limiter closed")?;

        let host = req.url().host_str().unwrap_or_default().to_string();
        let endpoint = normalize_endpoint(req.url().path());

        let mut tries: u32 = 0;
        loop {
            tries += 1;

            let attempt = req
                .try_clone()
                .context("upstream request is not retryable")?;
            let start = Instant::now();
            let result = self.client.execute(attempt).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    histogram!(
                        METRIC_API_CALLS,
                        elapsed_ms,
                        "host" => host.clone(),
                        "endpoint" => endpoint.clone(),
                        "status" => status.to_string(),
                        "try" => tries.to_string(),
                    );

                    let budget = ErrorBudget::from_headers(resp.headers());
                    if status >= 400 {
                        increment_counter!(METRIC_API_ERRORS);
                        warn!(
                            status,
                            url = %req.url(),
                            reset = budget.map(|b| b.reset),
                            remain = budget.map(|b| b.remain),
                            "upstream error response"
                        );
                    }

                    let jitter = rand::thread_rng().gen_range(0.0..1.0);
                    let (sleep, disposition) = attempt_plan(status, budget, tries, jitter);
                    if !sleep.is_zero() {
                        tokio::time::sleep(sleep).await;
                    }

                    match disposition {
                        Disposition::GiveUp => {
                            if (400..420).contains(&status) && status != 403 {
                                warn!(status, url = %req.url(), "giving up on request");
                            }
                            return Ok(resp);
                        }
                        Disposition::Retry if tries > MAX_TRIES => {
                            warn!(url = %req.url(), "too many tries");
                            return Ok(resp);
                        }
                        Disposition::Retry => {}
                    }
                }
                Err(e) => {
                    if tries > MAX_TRIES {
                        warn!(url = %req.url(), "too many tries");
                        return Err(e).context("upstream request failed");
                    }
                    warn!(error = %e, url = %req.url(), "transport error, retrying");
                }
            }
        }
    }
}
