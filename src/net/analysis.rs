//! Anti-cheat analysis service client
//!
//! Session lifecycle plus the two best-effort upload channels (JPEG frames
//! as multipart, PCM audio as raw bytes). No request timeouts: frame and
//! audio posts are fire-and-forget and never awaited before the next tick.

use super::{check, ServiceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response shape shared by the frame and audio endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub alerts: Option<Vec<String>>,

    #[serde(default)]
    pub metrics: Option<Value>,

    #[serde(default)]
    pub face: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStartRequest {
    exam_id: i64,
    student_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStartResponse {
    session_id: String,
}

/// Client for the remote analysis service
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AnalysisClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Start a remote analysis session, returning the server-issued id.
    pub async fn start_session(&self, exam_id: i64, student_id: i64) -> ServiceResult<String> {
        let response = self
            .post("/session/start")
            .json(&SessionStartRequest {
                exam_id,
                student_id,
            })
            .send()
            .await?;
        let body: SessionStartResponse = check(response).await?.json().await?;
        tracing::info!("Analysis session started: {}", body.session_id);
        Ok(body.session_id)
    }

    /// Stop the remote session. Callers treat this as best-effort.
    pub async fn stop_session(&self, session_id: &str) -> ServiceResult<()> {
        let response = self
            .post(&format!(
                "/session/stop?sessionId={}",
                urlencoding::encode(session_id)
            ))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Upload one JPEG frame as multipart form data.
    pub async fn post_frame(
        &self,
        session_id: &str,
        jpeg: Vec<u8>,
    ) -> ServiceResult<AnalysisResponse> {
        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .post("/frame")
            .header("X-Session-Id", session_id)
            .multipart(form)
            .send()
            .await?;
        Ok(check(response).await?.json().await.unwrap_or_default())
    }

    /// Upload one PCM16 audio chunk as raw bytes.
    pub async fn post_audio(
        &self,
        session_id: &str,
        pcm: Vec<u8>,
    ) -> ServiceResult<AnalysisResponse> {
        let response = self
            .post("/audio")
            .header("X-Session-Id", session_id)
            .header("Content-Type", "application/octet-stream")
            .body(pcm)
            .send()
            .await?;
        Ok(check(response).await?.json().await.unwrap_or_default())
    }
}
