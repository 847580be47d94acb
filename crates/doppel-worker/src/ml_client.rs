//! HTTP clients for the person detection and frame synthesis services.
//!
//! Images travel as base64-encoded PNG inside JSON bodies. The pipeline
//! calls collaborators synchronously, so both clients use the blocking
//! reqwest client and must be created, used and dropped off the async
//! runtime (inside `spawn_blocking`).

use std::io::Cursor;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use doppel_media::frame::{Frame, Mask};
use doppel_media::generation::ControlSignals;
use doppel_media::{Detection, FrameSynthesizer, PersonDetector, SynthesisError};
use doppel_models::PoseKeypoints;
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

const SERVICE_ERRORS_TOTAL: &str = "doppel_service_errors_total";

fn encode_png(image: DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(STANDARD.encode(buf))
}

fn decode_png(data: &str) -> Result<DynamicImage, String> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    image::load_from_memory(&bytes).map_err(|e| format!("invalid image: {}", e))
}

fn build_client(timeout: Duration) -> WorkerResult<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

#[derive(Debug, Serialize)]
struct DetectRequest {
    frame_index: usize,
    image: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    found: bool,
    /// Grayscale PNG, 255 = subject
    #[serde(default)]
    mask: Option<String>,
    /// COCO-ordered `[x, y, confidence]` triples
    #[serde(default)]
    keypoints: Option<Vec<[f64; 3]>>,
}

/// Person detector backed by the detection service.
pub struct HttpPersonDetector {
    client: Client,
    url: String,
}

impl HttpPersonDetector {
    pub fn new(base_url: &str, timeout: Duration) -> WorkerResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "detect"),
        })
    }

    fn request(&self, frame: &Frame) -> WorkerResult<Detection> {
        let body = DetectRequest {
            frame_index: frame.index,
            image: encode_png(DynamicImage::ImageRgb8(frame.image.clone()))?,
        };
        let response = self.client.post(&self.url).json(&body).send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(WorkerError::service_failed(format!(
                "detector returned {}: {}",
                status, text
            )));
        }
        let parsed: DetectResponse = response.json()?;
        if !parsed.found {
            return Ok(Detection::none());
        }

        let keypoints = parsed
            .keypoints
            .filter(|k| !k.is_empty())
            .map(|k| PoseKeypoints::from_coco(&k));
        let mask = match parsed.mask {
            Some(data) => {
                let gray = decode_png(&data)
                    .map_err(WorkerError::service_failed)?
                    .to_luma8();
                if gray.dimensions() != frame.dimensions() {
                    return Err(WorkerError::service_failed(format!(
                        "mask is {}x{}, frame is {}x{}",
                        gray.width(),
                        gray.height(),
                        frame.width(),
                        frame.height()
                    )));
                }
                Some(Mask::new(gray))
            }
            None => None,
        };
        Ok(Detection { mask, keypoints })
    }
}

impl PersonDetector for HttpPersonDetector {
    fn detect(&self, frame: &Frame) -> Detection {
        match self.request(frame) {
            Ok(detection) => detection,
            Err(e) => {
                // a failed detection is a miss; the processor reuses the last mask
                warn!(frame = frame.index, error = %e, "Detection request failed");
                metrics::counter!(SERVICE_ERRORS_TOTAL, "service" => "detector").increment(1);
                Detection::none()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    frame_index: usize,
    image: String,
    pose: String,
    depth: String,
    edges: String,
    style: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    image: String,
}

/// Frame synthesizer backed by the generation service.
pub struct HttpFrameSynthesizer {
    client: Client,
    url: String,
}

impl HttpFrameSynthesizer {
    pub fn new(base_url: &str, timeout: Duration) -> WorkerResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "synthesize"),
        })
    }

    fn failed(e: impl std::fmt::Display) -> SynthesisError {
        metrics::counter!(SERVICE_ERRORS_TOTAL, "service" => "synthesizer").increment(1);
        SynthesisError::Failed(e.to_string())
    }
}

/// Statuses the service uses to signal memory or capacity exhaustion.
fn is_exhaustion(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::INSUFFICIENT_STORAGE | StatusCode::TOO_MANY_REQUESTS
    )
}

impl FrameSynthesizer for HttpFrameSynthesizer {
    fn synthesize(
        &self,
        frame: &Frame,
        controls: &ControlSignals,
        style: &str,
    ) -> Result<RgbImage, SynthesisError> {
        let body = SynthesizeRequest {
            frame_index: frame.index,
            image: encode_png(DynamicImage::ImageRgb8(frame.image.clone())).map_err(Self::failed)?,
            pose: encode_png(DynamicImage::ImageRgb8(controls.pose.clone())).map_err(Self::failed)?,
            depth: encode_png(DynamicImage::ImageLuma8(controls.depth.clone())).map_err(Self::failed)?,
            edges: encode_png(DynamicImage::ImageLuma8(controls.edges.clone())).map_err(Self::failed)?,
            style,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(Self::failed)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            metrics::counter!(SERVICE_ERRORS_TOTAL, "service" => "synthesizer").increment(1);
            let message = format!("synthesizer returned {}: {}", status, text);
            return Err(if is_exhaustion(status) {
                SynthesisError::ResourceExhausted(message)
            } else {
                SynthesisError::Failed(message)
            });
        }

        let parsed: SynthesizeResponse = response
            .json()
            .map_err(|e| SynthesisError::InvalidOutput(e.to_string()))?;
        let image = decode_png(&parsed.image)
            .map_err(SynthesisError::InvalidOutput)?
            .to_rgb8();
        debug!(
            frame = frame.index,
            width = image.width(),
            height = image.height(),
            "Synthesized frame"
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame() -> Frame {
        Frame::new(7, 0.28, RgbImage::from_pixel(16, 12, Rgb([10, 20, 30])))
    }

    fn controls() -> ControlSignals {
        ControlSignals {
            pose: RgbImage::new(16, 12),
            depth: GrayImage::new(16, 12),
            edges: GrayImage::new(16, 12),
        }
    }

    fn png(image: DynamicImage) -> String {
        encode_png(image).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synthesize_returns_decoded_image() {
        let server = MockServer::start().await;
        let generated = RgbImage::from_pixel(16, 12, Rgb([200, 0, 0]));
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(body_partial_json(json!({"frame_index": 7, "style": "astronaut"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"image": png(DynamicImage::ImageRgb8(generated.clone()))})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            let client = HttpFrameSynthesizer::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.synthesize(&frame(), &controls(), "astronaut"))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.unwrap(), generated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synthesize_maps_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(503).set_body_string("CUDA out of memory"))
            .mount(&server)
            .await;

        let url = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            let client = HttpFrameSynthesizer::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.synthesize(&frame(), &controls(), ""))
        })
        .await
        .unwrap()
        .unwrap();
        match result {
            Err(SynthesisError::ResourceExhausted(msg)) => assert!(msg.contains("out of memory")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synthesize_rejects_garbage_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": "not png"})))
            .mount(&server)
            .await;

        let url = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            let client = HttpFrameSynthesizer::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.synthesize(&frame(), &controls(), ""))
        })
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(result, Err(SynthesisError::InvalidOutput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detect_parses_mask_and_keypoints() {
        let server = MockServer::start().await;
        let mask = GrayImage::from_fn(16, 12, |x, _| if x < 8 { Luma([255]) } else { Luma([0]) });
        let keypoints: Vec<[f64; 3]> = (0..17).map(|i| [i as f64, 5.0, 0.9]).collect();
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "found": true,
                "mask": png(DynamicImage::ImageLuma8(mask)),
                "keypoints": keypoints,
            })))
            .mount(&server)
            .await;

        let url = server.uri();
        let detection = tokio::task::spawn_blocking(move || {
            let client = HttpPersonDetector::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.detect(&frame()))
        })
        .await
        .unwrap()
        .unwrap();
        let mask = detection.mask.unwrap();
        assert!(mask.is_subject(2, 2));
        assert!(!mask.is_subject(12, 2));
        assert_eq!(detection.keypoints.unwrap().joints.len(), 17);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detector_failure_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = server.uri();
        let detection = tokio::task::spawn_blocking(move || {
            let client = HttpPersonDetector::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.detect(&frame()))
        })
        .await
        .unwrap()
        .unwrap();
        assert!(detection.is_miss());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detector_mask_size_mismatch_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "found": true,
                "mask": png(DynamicImage::ImageLuma8(GrayImage::new(8, 8))),
            })))
            .mount(&server)
            .await;

        let url = server.uri();
        let detection = tokio::task::spawn_blocking(move || {
            let client = HttpPersonDetector::new(&url, Duration::from_secs(5))?;
            Ok::<_, WorkerError>(client.detect(&frame()))
        })
        .await
        .unwrap()
        .unwrap();
        assert!(detection.is_miss());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("http://host:1/", "detect"), "http://host:1/detect");
        assert_eq!(endpoint("http://host:1", "synthesize"), "http://host:1/synthesize");
    }
}
