//! Write side of the profile backend that confirmed conversations apply to.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kite_safety::redact_truncated;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation_types::{AttachmentRef, TargetSection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdateRequest {
    pub user_id: String,
    pub section: TargetSection,
    pub updates: BTreeMap<String, String>,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("profile backend rejected update with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("profile backend request failed: {0}")]
    Transport(String),
}

/// External collaborator that owns profile data.
#[async_trait]
pub trait ProfileSurface: Send + Sync {
    async fn apply_updates(&self, request: &ProfileUpdateRequest) -> Result<(), SurfaceError>;
}

#[derive(Debug, Serialize)]
struct ProfilePatchBody<'a> {
    updates: &'a BTreeMap<String, String>,
    attachments: &'a [AttachmentRef],
}

/// `PATCH {api_base}/api/profiles/{user_id}/{section}` client.
#[derive(Clone)]
pub struct HttpProfileSurface {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl HttpProfileSurface {
    pub fn new(api_base: &str, token: Option<String>, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("kite-gateway")
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create profile api client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }
}

#[async_trait]
impl ProfileSurface for HttpProfileSurface {
    async fn apply_updates(&self, request: &ProfileUpdateRequest) -> Result<(), SurfaceError> {
        let url = format!(
            "{}/api/profiles/{}/{}",
            self.api_base, request.user_id, request.section
        );
        let mut builder = self.http.patch(url).json(&ProfilePatchBody {
            updates: &request.updates,
            attachments: &request.attachments,
        });
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|error| SurfaceError::Transport(error.without_url().to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SurfaceError::Rejected {
            status: status.as_u16(),
            body: redact_truncated(&body, 300),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn request() -> ProfileUpdateRequest {
        let mut updates = BTreeMap::new();
        updates.insert("headline".to_string(), "Rust engineer".to_string());
        ProfileUpdateRequest {
            user_id: "user-42".to_string(),
            section: TargetSection::Profile,
            updates,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn integration_http_surface_patches_section_with_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/api/profiles/user-42/profile")
                .header("authorization", "Bearer backend-token")
                .json_body(json!({
                    "updates": {"headline": "Rust engineer"},
                    "attachments": []
                }));
            then.status(204);
        });
        let surface =
            HttpProfileSurface::new(&server.base_url(), Some("backend-token".to_string()), 5_000)
                .expect("surface");
        surface.apply_updates(&request()).await.expect("apply");
        mock.assert();
    }

    #[tokio::test]
    async fn functional_http_surface_reports_rejections() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PATCH).path("/api/profiles/user-42/profile");
            then.status(422).body("headline too long");
        });
        let surface = HttpProfileSurface::new(&server.base_url(), None, 5_000).expect("surface");
        let error = surface
            .apply_updates(&request())
            .await
            .expect_err("422 should fail");
        assert!(matches!(
            error,
            SurfaceError::Rejected { status: 422, ref body } if body == "headline too long"
        ));
    }
}
