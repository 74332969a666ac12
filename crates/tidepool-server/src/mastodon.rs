//! Mastodon implementation of the timeline source.
//!
//! Cursors travel in the RFC 5988 `Link` response header: the `rel="prev"`
//! URL carries a `min_id` continuation for newer statuses, and the echoed
//! `since_id` of the request reappears in the link query parameters.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use tidepool_core::{Account, Error, NotificationState, Result, StatusId};

use crate::fetcher::{NotificationSnapshot, TimelinePage, TimelineSource};

/// Notification page size; a full page means the count is truncated.
const NOTIFICATION_LIMIT: usize = 40;

/// Remote timeline client over the Mastodon REST API.
pub struct MastodonTimeline {
    client: reqwest::Client,
}

impl MastodonTimeline {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TimelineSource for MastodonTimeline {
    async fn home_page(
        &self,
        account: &Account,
        since: Option<&StatusId>,
        limit: i64,
    ) -> Result<TimelinePage> {
        let mut url = format!(
            "{}/api/v1/timelines/home?limit={limit}",
            account.server_address
        );
        if let Some(since) = since {
            url.push_str(&format!("&since_id={since}"));
        }

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&account.access_token)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Unavailable(format!(
                "timeline request returned {}",
                resp.status()
            )));
        }

        let link = resp
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let statuses: Vec<JsonValue> = resp
            .json()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let cursors = link.as_deref().map(parse_link_header).unwrap_or_default();

        Ok(TimelinePage {
            statuses,
            echoed_lower_bound: cursors.echoed_since.map(StatusId::from),
            continuation: cursors.prev_min.map(StatusId::from),
        })
    }

    async fn notifications(&self, account: &Account) -> Result<NotificationSnapshot> {
        let url = format!(
            "{}/api/v1/notifications?limit={NOTIFICATION_LIMIT}",
            account.server_address
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&account.access_token)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Unavailable(format!(
                "notification request returned {}",
                resp.status()
            )));
        }

        let notifications: Vec<JsonValue> = resp
            .json()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let state = if notifications.len() >= NOTIFICATION_LIMIT {
            NotificationState::Undercounted
        } else {
            NotificationState::Exact
        };
        Ok(NotificationSnapshot {
            state,
            count: notifications.len() as i64,
        })
    }
}

/// Cursors extracted from a `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LinkCursors {
    /// `min_id` of the rel="prev" link: continuation toward newer statuses.
    prev_min: Option<String>,
    /// `since_id` echoed anywhere in the links.
    echoed_since: Option<String>,
}

fn parse_link_header(header: &str) -> LinkCursors {
    let mut cursors = LinkCursors::default();
    for part in header.split(',') {
        let part = part.trim();
        let Some(url_end) = part.find('>') else { continue };
        let Some(url) = part.strip_prefix('<').map(|p| &p[..url_end - 1]) else {
            continue;
        };
        let is_prev = part[url_end..].contains("rel=\"prev\"");

        if let Some(since) = query_param(url, "since_id") {
            cursors.echoed_since.get_or_insert(since);
        }
        if is_prev {
            if let Some(min) = query_param(url, "min_id") {
                cursors.prev_min = Some(min);
            }
        }
    }
    cursors
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}
