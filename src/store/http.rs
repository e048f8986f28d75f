use crate::config::Config;
use crate::error::{MarginError, PermissionError, Result};
use crate::identity::Identity;
use crate::models::{Annotation, LikeState};
use crate::store::{AnnotationStore, CreateRequest, ListQuery};
use async_trait::async_trait;
use reqwest::{Client, Request, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LikeRequest<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    firebase_user_id: Option<&'a str>,
    liked: bool,
}

/// Talks to the blog's annotation API.
pub struct HttpAnnotationStore {
    client: Client,
    base_url: String,
}

impl HttpAnnotationStore {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MarginError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpAnnotationStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_base_url, config.request_timeout_secs)
    }

    fn url(&self, segments: &[&str]) -> String {
        let path: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.base_url, path.join("/"))
    }

    pub fn list_request(&self, query: &ListQuery) -> Result<Request> {
        let mut params = identity_params(&query.identity);
        params.push(("sortBy", query.sort_by.as_str().to_string()));
        if let Some(parent) = &query.parent_id {
            params.push(("parentId", parent.clone()));
        }

        Ok(self
            .client
            .get(self.url(&["posts", &query.post_id, "annotations"]))
            .query(&params)
            .build()?)
    }

    pub fn create_request(&self, post_id: &str, body: &CreateRequest) -> Result<Request> {
        Ok(self
            .client
            .post(self.url(&["posts", post_id, "annotations"]))
            .json(body)
            .build()?)
    }

    pub fn like_request(&self, annotation_id: &str, identity: &Identity, liked: bool) -> Result<Request> {
        let body = LikeRequest {
            user_id: identity.anonymous_id(),
            firebase_user_id: identity.verified().map(|user| user.uid.as_str()),
            liked,
        };
        Ok(self
            .client
            .put(self.url(&["annotations", annotation_id, "like"]))
            .json(&body)
            .build()?)
    }

    pub fn delete_request(&self, annotation_id: &str, identity: &Identity) -> Result<Request> {
        Ok(self
            .client
            .delete(self.url(&["annotations", annotation_id]))
            .query(&identity_params(identity))
            .build()?)
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!("{} {}", method, url);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| MarginError::Transport(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("{} {} failed ({}): {}", method, url, status, error_text);
            return Err(status_error(status, error_text));
        }

        Ok(response)
    }
}

/// Maps a non-success status onto the error taxonomy readers see.
pub(crate) fn status_error(status: StatusCode, body: String) -> MarginError {
    match status {
        StatusCode::UNAUTHORIZED => PermissionError::AuthenticationRequired.into(),
        StatusCode::FORBIDDEN => PermissionError::NotAuthor.into(),
        StatusCode::NOT_FOUND => MarginError::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            MarginError::InvalidArgument(body)
        }
        other => MarginError::Transport(format!("API error ({}): {}", other, body)),
    }
}

fn identity_params(identity: &Identity) -> Vec<(&'static str, String)> {
    let mut params = vec![("userId", identity.anonymous_id().to_string())];
    if let Some(user) = identity.verified() {
        params.push(("firebaseUserId", user.uid.clone()));
    }
    params
}

#[async_trait]
impl AnnotationStore for HttpAnnotationStore {
    async fn list(&self, query: &ListQuery) -> Result<Vec<Annotation>> {
        let response = self.send(self.list_request(query)?).await?;
        response
            .json()
            .await
            .map_err(|e| MarginError::Transport(format!("Failed to parse response: {}", e)))
    }

    async fn create(&self, post_id: &str, request: &CreateRequest) -> Result<Annotation> {
        let response = self.send(self.create_request(post_id, request)?).await?;
        response
            .json()
            .await
            .map_err(|e| MarginError::Transport(format!("Failed to parse response: {}", e)))
    }

    async fn set_like(
        &self,
        annotation_id: &str,
        identity: &Identity,
        liked: bool,
    ) -> Result<LikeState> {
        let response = self
            .send(self.like_request(annotation_id, identity, liked)?)
            .await?;
        response
            .json()
            .await
            .map_err(|e| MarginError::Transport(format!("Failed to parse response: {}", e)))
    }

    async fn delete(&self, annotation_id: &str, identity: &Identity) -> Result<()> {
        self.send(self.delete_request(annotation_id, identity)?)
            .await?;
        Ok(())
    }
}
