//! Face API (v1.0 person-group model) over blocking HTTP.
//!
//! Identification is detect → identify → resolve person ids to names.
//! Enrollment maps one visitor to one person in the configured group; the
//! group is retrained after every change.

use crate::gateway::{RecognitionService, ServiceError};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
/// `identify` accepts at most this many face ids per call.
const MAX_IDENTIFY_FACES: usize = 10;

#[derive(Debug, Clone)]
pub struct FaceApiConfig {
    /// Base URL up to and including `/face/v1.0`.
    pub endpoint: String,
    pub subscription_key: String,
    pub person_group: String,
    pub match_confidence: f32,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedFace {
    face_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyRequest<'a> {
    person_group_id: &'a str,
    face_ids: &'a [String],
    max_num_of_candidates_returned: u32,
    confidence_threshold: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyResult {
    #[allow(dead_code)]
    face_id: String,
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    person_id: String,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    person_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedPerson {
    person_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct FaceApiService {
    client: Client,
    config: FaceApiConfig,
}

impl FaceApiService {
    /// Build the HTTP client.
    ///
    /// The blocking client owns a runtime of its own; create and drop it
    /// outside async contexts.
    pub fn new(config: FaceApiConfig) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.subscription_key)
            .map_err(|e| ServiceError::Transport(format!("invalid subscription key: {e}")))?;
        headers.insert(SUBSCRIPTION_KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn group_url(&self, path: &str) -> String {
        if path.is_empty() {
            self.url(&format!("persongroups/{}", self.config.person_group))
        } else {
            self.url(&format!("persongroups/{}/{}", self.config.person_group, path))
        }
    }

    /// Create the person group if it does not exist yet.
    pub fn ensure_person_group(&self) -> Result<(), ServiceError> {
        let response = send(self.client.get(self.group_url("")))?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            return Err(rejected(response));
        }

        tracing::info!(group = %self.config.person_group, "creating person group");
        let body = serde_json::json!({ "name": self.config.person_group });
        expect_success(send(self.client.put(self.group_url("")).json(&body))?)?;
        Ok(())
    }

    fn detect(&self, jpeg: &[u8]) -> Result<Vec<String>, ServiceError> {
        let request = self
            .client
            .post(self.url("detect?returnFaceId=true"))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(jpeg.to_vec());
        let faces: Vec<DetectedFace> = json(send(request)?)?;
        Ok(faces.into_iter().map(|f| f.face_id).collect())
    }

    fn persons(&self) -> Result<Vec<Person>, ServiceError> {
        json(send(self.client.get(self.group_url("persons")))?)
    }

    fn person_id(&self, name: &str) -> Result<Option<String>, ServiceError> {
        Ok(self
            .persons()?
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.person_id))
    }

    fn upload_face(&self, person_id: &str, jpeg: &[u8]) -> Result<(), ServiceError> {
        let request = self
            .client
            .post(self.group_url(&format!("persons/{person_id}/persistedFaces")))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(jpeg.to_vec());
        expect_success(send(request)?)?;
        Ok(())
    }

    fn delete_person(&self, person_id: &str) -> Result<(), ServiceError> {
        expect_success(send(self.client.delete(self.group_url(&format!("persons/{person_id}"))))?)?;
        Ok(())
    }

    fn train(&self) -> Result<(), ServiceError> {
        expect_success(send(self.client.post(self.group_url("train")))?)?;
        tracing::debug!(group = %self.config.person_group, "person group training started");
        Ok(())
    }
}

impl RecognitionService for FaceApiService {
    fn identify(&self, jpeg: &[u8]) -> Result<Vec<String>, ServiceError> {
        let face_ids = self.detect(jpeg)?;
        if face_ids.is_empty() {
            return Err(ServiceError::NoFaceDetected);
        }

        let ids = &face_ids[..face_ids.len().min(MAX_IDENTIFY_FACES)];
        let request = IdentifyRequest {
            person_group_id: &self.config.person_group,
            face_ids: ids,
            max_num_of_candidates_returned: 1,
            confidence_threshold: self.config.match_confidence,
        };
        let results: Vec<IdentifyResult> = json(send(self.client.post(self.url("identify")).json(&request))?)?;
        let names: HashMap<String, String> = self
            .persons()?
            .into_iter()
            .map(|p| (p.person_id, p.name))
            .collect();
        Ok(resolve_matches(results, &names))
    }

    fn enroll(&self, name: &str, photos: &[Vec<u8>]) -> Result<(), ServiceError> {
        if let Some(existing) = self.person_id(name)? {
            self.delete_person(&existing)?;
        }
        let body = serde_json::json!({ "name": name });
        let created: CreatedPerson = json(send(self.client.post(self.group_url("persons")).json(&body))?)?;
        for photo in photos {
            self.upload_face(&created.person_id, photo)?;
        }
        tracing::info!(visitor = name, photos = photos.len(), "enrolled with Face API");
        self.train()
    }

    fn add_image(&self, name: &str, jpeg: &[u8]) -> Result<(), ServiceError> {
        let person_id = self
            .person_id(name)?
            .ok_or_else(|| ServiceError::UnknownVisitor(name.to_string()))?;
        self.upload_face(&person_id, jpeg)?;
        self.train()
    }

    fn remove(&self, name: &str) -> Result<(), ServiceError> {
        let person_id = self
            .person_id(name)?
            .ok_or_else(|| ServiceError::UnknownVisitor(name.to_string()))?;
        self.delete_person(&person_id)?;
        self.train()
    }
}

/// Highest-confidence candidate per face, mapped to names, best first.
fn resolve_matches(results: Vec<IdentifyResult>, names: &HashMap<String, String>) -> Vec<String> {
    let mut scored: Vec<(f32, &str)> = results
        .iter()
        .filter_map(|r| r.candidates.iter().max_by(|a, b| a.confidence.total_cmp(&b.confidence)))
        .filter_map(|c| names.get(&c.person_id).map(|n| (c.confidence, n.as_str())))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut out: Vec<String> = Vec::with_capacity(scored.len());
    for (_, name) in scored {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn send(request: RequestBuilder) -> Result<Response, ServiceError> {
    request.send().map_err(|e| ServiceError::Transport(e.to_string()))
}

fn expect_success(response: Response) -> Result<Response, ServiceError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(rejected(response))
    }
}

fn json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let response = expect_success(response)?;
    let body = response.text().map_err(|e| ServiceError::Transport(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
}

fn rejected(response: Response) -> ServiceError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    ServiceError::Rejected {
        status,
        message: error_message(&body),
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.code.is_empty() => {
            format!("{}: {}", envelope.error.code, envelope.error.message)
        }
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> HashMap<String, String> {
        [("p-alice", "Alice"), ("p-bob", "Bob")]
            .into_iter()
            .map(|(id, n)| (id.to_string(), n.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_orders_by_confidence() {
        let results: Vec<IdentifyResult> = serde_json::from_str(
            r#"[
                {"faceId": "f1", "candidates": [{"personId": "p-bob", "confidence": 0.62}]},
                {"faceId": "f2", "candidates": [{"personId": "p-alice", "confidence": 0.91}]},
                {"faceId": "f3", "candidates": []}
            ]"#,
        )
        .unwrap();
        assert_eq!(resolve_matches(results, &names()), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_resolve_skips_unknown_and_duplicates() {
        let results: Vec<IdentifyResult> = serde_json::from_str(
            r#"[
                {"faceId": "f1", "candidates": [{"personId": "p-ghost", "confidence": 0.99}]},
                {"faceId": "f2", "candidates": [{"personId": "p-alice", "confidence": 0.7}]},
                {"faceId": "f3", "candidates": [{"personId": "p-alice", "confidence": 0.8}]},
                {"faceId": "f4"}
            ]"#,
        )
        .unwrap();
        assert_eq!(resolve_matches(results, &names()), vec!["Alice"]);
    }

    #[test]
    fn test_identify_request_shape() {
        let ids = vec!["f1".to_string()];
        let body = serde_json::to_value(IdentifyRequest {
            person_group_id: "whitelist",
            face_ids: &ids,
            max_num_of_candidates_returned: 1,
            confidence_threshold: 0.5,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "personGroupId": "whitelist",
                "faceIds": ["f1"],
                "maxNumOfCandidatesReturned": 1,
                "confidenceThreshold": 0.5
            })
        );
    }

    #[test]
    fn test_detect_and_persons_parse() {
        let faces: Vec<DetectedFace> = serde_json::from_str(
            r#"[{"faceId": "abc", "faceRectangle": {"top": 1, "left": 2, "width": 3, "height": 4}}]"#,
        )
        .unwrap();
        assert_eq!(faces[0].face_id, "abc");

        let persons: Vec<Person> = serde_json::from_str(
            r#"[{"personId": "p1", "name": "Alice", "persistedFaceIds": ["x"], "userData": null}]"#,
        )
        .unwrap();
        assert_eq!((persons[0].person_id.as_str(), persons[0].name.as_str()), ("p1", "Alice"));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error": {"code": "PersonGroupNotFound", "message": "Person group is not found."}}"#),
            "PersonGroupNotFound: Person group is not found."
        );
        assert_eq!(error_message(r#"{"error": {"message": "Unspecified"}}"#), "Unspecified");
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_urls() {
        let service = FaceApiService::new(FaceApiConfig {
            endpoint: "https://example.test/face/v1.0/".into(),
            subscription_key: "key".into(),
            person_group: "whitelist".into(),
            match_confidence: 0.5,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(service.url("identify"), "https://example.test/face/v1.0/identify");
        assert_eq!(
            service.group_url("persons"),
            "https://example.test/face/v1.0/persongroups/whitelist/persons"
        );
        assert_eq!(service.group_url(""), "https://example.test/face/v1.0/persongroups/whitelist");
    }
}
