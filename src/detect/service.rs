//! Detection service client.
//!
//! `DetectionService` is the seam between the pipeline and the external
//! detection/description service. `HttpDetectionService` speaks the JSON
//! contracts in `wire` over `ureq`, with an agent-level timeout on every call
//! so a hung request cannot starve a camera forever.

use std::time::Duration;

use url::Url;

use super::wire::{ProcessFrameRequest, ProcessFrameResponse, SearchRequest, SearchResponse};
use crate::error::ServiceError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub trait DetectionService: Send + Sync {
    /// `POST /process_frame`.
    fn process_frame(
        &self,
        request: &ProcessFrameRequest,
    ) -> Result<ProcessFrameResponse, ServiceError>;

    /// `POST /search`.
    fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ServiceError>;

    /// Liveness probe. `Ok` means healthy.
    fn probe(&self) -> Result<(), ServiceError>;
}

pub struct HttpDetectionService {
    base_url: Url,
    agent: ureq::Agent,
}

impl HttpDetectionService {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid detection service url '{}': {}", base_url, e))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "detection service url must be http(s), got '{}'",
                base_url.scheme()
            );
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { base_url, agent })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Transport(format!("bad endpoint {}: {}", path, e)))
    }
}

fn map_ureq(err: ureq::Error) -> ServiceError {
    match err {
        ureq::Error::Status(code, _) => ServiceError::Status(code),
        ureq::Error::Transport(transport) => ServiceError::Transport(transport.to_string()),
    }
}

impl DetectionService for HttpDetectionService {
    fn process_frame(
        &self,
        request: &ProcessFrameRequest,
    ) -> Result<ProcessFrameResponse, ServiceError> {
        let url = self.endpoint("process_frame")?;
        let response = self
            .agent
            .post(url.as_str())
            .send_json(request)
            .map_err(map_ureq)?;
        response
            .into_json::<ProcessFrameResponse>()
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ServiceError> {
        let url = self.endpoint("search")?;
        let response = self
            .agent
            .post(url.as_str())
            .send_json(request)
            .map_err(map_ureq)?;
        response
            .into_json::<SearchResponse>()
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    fn probe(&self) -> Result<(), ServiceError> {
        self.agent
            .get(self.base_url.as_str())
            .call()
            .map(|_| ())
            .map_err(map_ureq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let service = HttpDetectionService::new("http://127.0.0.1:5000/api", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            service.endpoint("process_frame").unwrap().as_str(),
            "http://127.0.0.1:5000/api/process_frame"
        );
    }

    /// Serve one canned HTTP response on a loopback port.
    fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        use std::io::{Read, Write};
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8192];
            let _ = stream.read(&mut buf);
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{}", addr)
    }

    fn frame_request() -> ProcessFrameRequest {
        ProcessFrameRequest {
            frame_data: "AAAA".to_string(),
            camera_id: "cam-1".to_string(),
        }
    }

    #[test]
    fn process_frame_decodes_response() {
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"detections": [{"bbox": [0, 0, 10, 20], "label": "person", "confidence": 0.8}]}"#,
        );
        let service = HttpDetectionService::new(&url, DEFAULT_TIMEOUT).unwrap();
        let response = service.process_frame(&frame_request()).unwrap();
        assert_eq!(response.detections.len(), 1);
        assert!(response.person_crops.is_empty());
    }

    #[test]
    fn non_2xx_maps_to_status() {
        let url = one_shot_server("HTTP/1.1 503 Service Unavailable", "{}");
        let service = HttpDetectionService::new(&url, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            service.process_frame(&frame_request()).unwrap_err(),
            ServiceError::Status(503)
        );
    }

    #[test]
    fn bad_json_maps_to_malformed() {
        let url = one_shot_server("HTTP/1.1 200 OK", "not json");
        let service = HttpDetectionService::new(&url, DEFAULT_TIMEOUT).unwrap();
        assert!(matches!(
            service.process_frame(&frame_request()),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[test]
    fn probe_fails_when_nothing_listens() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let service =
            HttpDetectionService::new(&format!("http://{}", addr), Duration::from_secs(1)).unwrap();
        assert!(matches!(service.probe(), Err(ServiceError::Transport(_))));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpDetectionService::new("ws://127.0.0.1:5000", DEFAULT_TIMEOUT).is_err());
        assert!(HttpDetectionService::new("not a url", DEFAULT_TIMEOUT).is_err());
    }
}
