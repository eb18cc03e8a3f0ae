//! Exam service client
//!
//! Paper retrieval, the two grading entry points (regular and
//! violation-forced), and the local recording upload.

use super::{check, ServiceResult};
use crate::exam::{AnswerChoice, ExamSnapshot, Grade};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GradeRequest<'a> {
    exam_id: i64,
    student_id: i64,
    answers: &'a [AnswerChoice],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForceSubmitRequest<'a> {
    exam_id: i64,
    student_id: i64,
    violation_type: &'a str,
}

/// Client for the exam/grading service
pub struct ExamClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ExamClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Fetch the immutable exam snapshot for one attempt.
    pub async fn fetch_paper(&self, exam_id: i64) -> ServiceResult<ExamSnapshot> {
        let response = self
            .with_auth(self.http.get(format!("{}/exam/paper/{exam_id}", self.base_url)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Submit the answer payload for grading.
    pub async fn grade(
        &self,
        exam_id: i64,
        student_id: i64,
        answers: &[AnswerChoice],
    ) -> ServiceResult<Grade> {
        let response = self
            .with_auth(self.http.post(format!("{}/exam/grade", self.base_url)))
            .json(&GradeRequest {
                exam_id,
                student_id,
                answers,
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Submit with zero credit after a violation.
    pub async fn force_submit(
        &self,
        exam_id: i64,
        student_id: i64,
        violation_type: &str,
    ) -> ServiceResult<Grade> {
        let response = self
            .with_auth(self.http.post(format!("{}/exam/force-submit", self.base_url)))
            .json(&ForceSubmitRequest {
                exam_id,
                student_id,
                violation_type,
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Upload the local session recording. Returns the stored URL.
    pub async fn upload_video(
        &self,
        exam_id: i64,
        student_id: i64,
        video: Vec<u8>,
    ) -> ServiceResult<String> {
        let part = reqwest::multipart::Part::bytes(video)
            .file_name(format!("exam-{exam_id}-student-{student_id}.webm"))
            .mime_str("video/webm")?;
        let form = reqwest::multipart::Form::new()
            .part("video", part)
            .text("examId", exam_id.to_string())
            .text("studentId", student_id.to_string());

        let response = self
            .with_auth(self.http.post(format!("{}/exam/upload-video", self.base_url)))
            .multipart(form)
            .send()
            .await?;
        Ok(check(response).await?.text().await?)
    }
}
