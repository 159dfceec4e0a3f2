//! Operator search: the detection service's `/search` when available, the
//! local relevance matcher otherwise.

use serde::Serialize;
use serde_json::Value;

use crate::detect::{DetectionService, RemoteMatch, SearchRequest};
use crate::matcher::{self, MatchResult, MAX_RESULTS, MAX_SCORE};
use crate::person::{PersonDescriptor, PersonRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Remote,
    Local,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub score: u32,
    pub explanation: String,
    pub highlighted_attributes: Vec<String>,
    pub descriptor: PersonDescriptor,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub source: SearchSource,
    pub results: Vec<SearchHit>,
}

impl From<MatchResult<'_>> for SearchHit {
    fn from(m: MatchResult<'_>) -> Self {
        Self {
            id: Some(m.record.id.clone()),
            score: m.score,
            explanation: m.explanation,
            highlighted_attributes: m.highlighted_attributes,
            descriptor: m.record.descriptor.clone(),
            metadata: serde_json::to_value(&m.record.metadata).unwrap_or(Value::Null),
            image_data: m.record.crop.clone(),
        }
    }
}

impl From<RemoteMatch> for SearchHit {
    fn from(m: RemoteMatch) -> Self {
        let score = if m.similarity.is_finite() {
            m.similarity.round().clamp(0.0, MAX_SCORE as f64) as u32
        } else {
            0
        };
        let id = m
            .metadata
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            id,
            score,
            explanation: format!("Service similarity {}", score),
            highlighted_attributes: Vec::new(),
            descriptor: m.descriptor(),
            metadata: m.metadata,
            image_data: m.image_data,
        }
    }
}

/// Rank the local records only.
pub fn search_local(query: &str, records: &[PersonRecord]) -> SearchOutcome {
    SearchOutcome {
        query: query.to_string(),
        source: SearchSource::Local,
        results: matcher::rank(query, records)
            .into_iter()
            .map(SearchHit::from)
            .collect(),
    }
}

/// Ask `remote` first; any service error falls back to the local matcher.
///
/// Pass `None` when no service is configured or its last probe failed.
pub fn search_people(
    query: &str,
    records: &[PersonRecord],
    remote: Option<&dyn DetectionService>,
) -> SearchOutcome {
    let Some(service) = remote else {
        return search_local(query, records);
    };
    if query.trim().is_empty() {
        return search_local(query, records);
    }
    let request = SearchRequest {
        description: query.to_string(),
    };
    match service.search(&request) {
        Ok(response) => {
            let mut results: Vec<SearchHit> =
                response.matches.into_iter().map(SearchHit::from).collect();
            results.sort_by(|a, b| b.score.cmp(&a.score));
            results.truncate(MAX_RESULTS);
            SearchOutcome {
                query: query.to_string(),
                source: SearchSource::Remote,
                results,
            }
        }
        Err(e) => {
            log::warn!("remote search failed, using local matcher: {}", e);
            search_local(query, records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ProcessFrameRequest, ProcessFrameResponse, SearchResponse};
    use crate::error::ServiceError;
    use crate::person::PersonMetadata;

    struct RemoteStub {
        answer: Result<&'static str, ServiceError>,
    }

    impl DetectionService for RemoteStub {
        fn process_frame(
            &self,
            _request: &ProcessFrameRequest,
        ) -> Result<ProcessFrameResponse, ServiceError> {
            Err(ServiceError::Status(404))
        }

        fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, ServiceError> {
            match &self.answer {
                Ok(body) => serde_json::from_str(body)
                    .map_err(|e| ServiceError::Malformed(e.to_string())),
                Err(e) => Err(e.clone()),
            }
        }

        fn probe(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn records() -> Vec<PersonRecord> {
        vec![PersonRecord {
            id: "local-1".into(),
            descriptor: PersonDescriptor::new().with("gender", "female"),
            metadata: PersonMetadata::new("cam-1", 1),
            crop: None,
        }]
    }

    #[test]
    fn remote_results_are_used_when_available() {
        let stub = RemoteStub {
            answer: Ok(r#"{"matches": [
                {"similarity": 40.4, "description": "Gender: male.", "metadata": {"id": "r-1"}},
                {"similarity": 140, "description": {"gender": "female"}, "metadata": {}}
            ]}"#),
        };
        let outcome = search_people("woman", &records(), Some(&stub));
        assert_eq!(outcome.source, SearchSource::Remote);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].score, 100);
        assert_eq!(outcome.results[1].score, 40);
        assert_eq!(outcome.results[1].id.as_deref(), Some("r-1"));
    }

    #[test]
    fn service_errors_fall_back_to_local() {
        let stub = RemoteStub {
            answer: Err(ServiceError::Transport("connection refused".into())),
        };
        let outcome = search_people("woman", &records(), Some(&stub));
        assert_eq!(outcome.source, SearchSource::Local);
        assert_eq!(outcome.results[0].id.as_deref(), Some("local-1"));
    }

    #[test]
    fn no_service_means_local() {
        let outcome = search_people("woman", &records(), None);
        assert_eq!(outcome.source, SearchSource::Local);
        assert_eq!(outcome.results.len(), 1);
    }
}
