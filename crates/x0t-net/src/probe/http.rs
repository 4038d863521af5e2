//! HTTP blocking probe

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use x0t_core::config::ProbeConfig;
use x0t_core::BlockingType;

use super::{CensorshipDetector, DetectionResult, Verdict};
use crate::error::Result;

/// Redirects are reported, never followed
pub(crate) fn build_client(config: &ProbeConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()?)
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Status code, redirect target and content check
///
/// `content_missing` is true only when expected content was given and absent.
pub fn classify_http(
    status: u16,
    location: Option<&str>,
    content_missing: bool,
    block_keywords: &[String],
) -> Verdict {
    let mut verdict = Verdict::CLEAR;

    if matches!(status, 403 | 451) {
        verdict = Verdict::blocked(BlockingType::HttpBlocking, 0.9);
    } else if status >= 400 {
        verdict = Verdict::blocked(BlockingType::HttpBlocking, 0.5);
    }

    if is_redirect(status) {
        let location = location.unwrap_or_default().to_lowercase();
        if block_keywords
            .iter()
            .any(|word| location.contains(&word.to_lowercase()))
        {
            verdict = Verdict::blocked(BlockingType::HttpBlocking, 0.8);
        }
    }

    if content_missing {
        verdict = Verdict::blocked(BlockingType::HttpBlocking, verdict.confidence.max(0.6));
    }

    verdict
}

impl CensorshipDetector {
    /// Fetch `url` without following redirects and look for block indicators
    #[instrument(skip(self, expected_content))]
    pub async fn detect_http_blocking(&self, url: &str, expected_content: Option<&str>) -> DetectionResult {
        let started = Instant::now();

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => return DetectionResult::failed(url, e, started),
        };

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        let content_missing = match expected_content {
            Some(expected) => match response.text().await {
                Ok(body) => !body.contains(expected),
                Err(e) => return DetectionResult::failed(url, e, started),
            },
            None => false,
        };

        let verdict = classify_http(
            status,
            location.as_deref(),
            content_missing,
            &self.config.block_keywords,
        );
        debug!(status, ?verdict, "HTTP probe classified");

        let mut details = json!({
            "status_code": status,
            "headers": headers,
        });
        if is_redirect(status) {
            details["redirect_location"] = json!(location.unwrap_or_default());
        }
        DetectionResult::from_verdict(url, verdict, details, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        ProbeConfig::default().block_keywords
    }

    #[test]
    fn test_censorship_statuses() {
        for status in [403, 451] {
            let verdict = classify_http(status, None, false, &keywords());
            assert_eq!(verdict.confidence, 0.9);
            assert_eq!(verdict.blocking_type, BlockingType::HttpBlocking);
        }
        assert_eq!(classify_http(500, None, false, &keywords()).confidence, 0.5);
        assert_eq!(classify_http(200, None, false, &keywords()), Verdict::CLEAR);
    }

    #[test]
    fn test_block_page_redirect() {
        let verdict = classify_http(302, Some("http://isp.example/BLOCKED.html"), false, &keywords());
        assert_eq!(verdict.confidence, 0.8);

        let verdict = classify_http(301, Some("https://www.example.com/"), false, &keywords());
        assert_eq!(verdict, Verdict::CLEAR);
    }

    #[test]
    fn test_missing_content() {
        let verdict = classify_http(200, None, true, &keywords());
        assert!(verdict.is_blocked);
        assert_eq!(verdict.confidence, 0.6);

        // does not lower a stronger signal
        assert_eq!(classify_http(451, None, true, &keywords()).confidence, 0.9);
    }
}
