//! Site classification.
//!
//! Maps a hostname to the two facts the pipeline cares about: whether the
//! site is on the blocked (doomscroll-watched) list and whether it counts
//! towards the shared news allowance.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage::{BlockScope, SitesConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteType {
    pub is_blocked: bool,
    pub is_news: bool,
}

impl SiteType {
    pub const NEITHER: SiteType = SiteType {
        is_blocked: false,
        is_news: false,
    };

    /// Tracked sites get escalation and reminders; others are left alone.
    pub fn is_tracked(&self) -> bool {
        self.is_blocked || self.is_news
    }

    /// Scope a new block should use on this site: the shared news category
    /// for news sites, the hostname otherwise.
    pub fn block_scope(&self, hostname: &str) -> BlockScope {
        if self.is_news {
            BlockScope::news()
        } else {
            BlockScope::host(hostname)
        }
    }
}

pub trait SiteClassifier: Send + Sync {
    fn classify(&self, hostname: &str) -> SiteType;

    fn current_site_type(&self, url: &str, hostname: &str) -> SiteType {
        match hostname_from_url(url) {
            Ok(from_url) if !from_url.is_empty() => self.classify(&from_url),
            _ => self.classify(hostname),
        }
    }
}

/// Classifier backed by the configured site lists. A pattern matches the
/// exact hostname and any of its subdomains.
#[derive(Debug, Clone, Default)]
pub struct ListClassifier {
    blocked: Vec<String>,
    news: Vec<String>,
}

impl ListClassifier {
    pub fn new(blocked: Vec<String>, news: Vec<String>) -> Self {
        Self {
            blocked: blocked.iter().map(|s| normalize_host(s)).collect(),
            news: news.iter().map(|s| normalize_host(s)).collect(),
        }
    }

    pub fn from_config(sites: &SitesConfig) -> Self {
        Self::new(sites.blocked.clone(), sites.news.clone())
    }

    fn matches(patterns: &[String], host: &str) -> bool {
        patterns.iter().any(|pattern| {
            !pattern.is_empty()
                && (host == pattern
                    || host
                        .strip_suffix(pattern.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.')))
        })
    }
}

impl SiteClassifier for ListClassifier {
    fn classify(&self, hostname: &str) -> SiteType {
        let host = normalize_host(hostname);
        SiteType {
            is_blocked: Self::matches(&self.blocked, &host),
            is_news: Self::matches(&self.news, &host),
        }
    }
}

/// Lowercase, drop a leading `www.` and a trailing root dot.
pub fn normalize_host(hostname: &str) -> String {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Extract the normalized hostname from a URL. Bare hostnames are accepted.
pub fn hostname_from_url(input: &str) -> Result<String, CoreError> {
    let parsed = match url::Url::parse(input) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse(&format!("https://{input}"))
            .map_err(|e| CoreError::InvalidUrl {
                url: input.to_string(),
                message: e.to_string(),
            })?,
        Err(e) => {
            return Err(CoreError::InvalidUrl {
                url: input.to_string(),
                message: e.to_string(),
            })
        }
    };

    parsed
        .host_str()
        .map(normalize_host)
        .ok_or_else(|| CoreError::InvalidUrl {
            url: input.to_string(),
            message: "URL has no host".to_string(),
        })
}
