use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Value};

use crate::error::{HttpError, PipelineError};
use crate::http::{RequestMethod, TokenRotatingClient};

const QUERY_ID: &str = "e111e3a11997";

/// Pagination-with-stop-set collector, ported from
/// `lib.api.post_collector.PostCollector`.
///
/// Fetches pages of a community's newest posts and buffers them in
/// `unprocessed_posts`, then drains them one at a time, stopping as
/// soon as a post already seen on a prior scan is reached.
pub struct PostCollector {
    community: String,
    stopping_post_ids: Vec<String>,
    http: Arc<TokenRotatingClient>,
    api_base_url: String,
    page_size: u32,
    unprocessed_posts: VecDeque<Value>,
    after: Option<String>,
}

impl PostCollector {
    pub fn new(
        community: String,
        stopping_post_ids: Vec<String>,
        http: Arc<TokenRotatingClient>,
        api_base_url: String,
        page_size: u32,
    ) -> Self {
        Self {
            community,
            stopping_post_ids,
            http,
            api_base_url,
            page_size,
            unprocessed_posts: VecDeque::new(),
            after: None,
        }
    }

    pub async fn collect_unseen_posts(mut self) -> Result<Vec<Value>, PipelineError> {
        let mut unseen = Vec::new();

        loop {
            if self.unprocessed_posts.is_empty() {
                self.fetch_page().await?;
            }

            let Some(next_post) = self.unprocessed_posts.pop_front() else {
                break;
            };

            let post_id = next_post.get("id").and_then(Value::as_str);
            if let Some(post_id) = post_id {
                if self.stopping_post_ids.iter().any(|id| id == post_id) {
                    break;
                }
            }

            unseen.push(next_post);
        }

        Ok(unseen)
    }

    async fn fetch_page(&mut self) -> Result<(), PipelineError> {
        let body = self.request_body();
        let response = self
            .http
            .send(
                &self.api_base_url,
                RequestMethod::Post,
                Some(body),
                true,
                true,
            )
            .await?
            .into_json()?;

        let edges = response
            .pointer("/data/subredditInfoByName/elements/edges")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PipelineError::from(HttpError::UnexpectedShape(
                    "missing data.subredditInfoByName.elements.edges".to_string(),
                ))
            })?;

        for edge in edges {
            let Some(node) = edge.get("node") else { continue };
            if node.get("__typename").and_then(Value::as_str) == Some("SubredditPost") {
                self.unprocessed_posts.push_back(node.clone());
            }
        }

        if let Some(last) = self.unprocessed_posts.back() {
            if let Some(id) = last.get("id").and_then(Value::as_str) {
                self.after = Some(id.to_string());
            }
        }

        tracing::info!(
            community = %self.community,
            fetched = self.unprocessed_posts.len(),
            after = ?self.after,
            "fetched page of posts"
        );

        Ok(())
    }

    fn request_body(&self) -> Value {
        let mut variables = json!({
            "name": self.community,
            "includeIdentity": false,
            "isFake": false,
            "includeDevPlatformMetadata": true,
            "includeRecents": false,
            "includeTrending": false,
            "includeSubredditRankings": true,
            "includeSubredditChannels": true,
            "isAdHocMulti": false,
            "isAll": false,
            "isLoggedOutGatedOptedin": false,
            "isLoggedOutQuarantineOptedin": false,
            "isPopular": false,
            "recentPostIds": [],
            "subredditNames": [],
            "sort": "NEW",
            "pageSize": self.page_size,
        });

        if let Some(after) = &self.after {
            variables["after"] = Value::String(
                base64::engine::general_purpose::STANDARD.encode(after.as_bytes()),
            );
        }

        json!({
            "id": QUERY_ID,
            "variables": variables,
        })
    }
}
