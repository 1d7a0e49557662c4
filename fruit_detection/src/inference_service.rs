use crate::{
    decoder::decode_image,
    error::{DetectionError, StartupError},
    model_service::ModelService,
    normalizer::Normalizer,
    state::ServiceLifecycle,
};
use bytes::Bytes;
use fruit_schema::DetectionResponse;
use std::{sync::Arc, time::Duration};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one request through validate, decode, infer and normalize.
///
/// Holds no per-request state; every call is independent and nothing is
/// retried here.
pub struct InferenceService<M: ModelService> {
    lifecycle: Arc<ServiceLifecycle<M>>,
    normalizer: Arc<Normalizer>,
    http_client: reqwest::Client,
    max_image_bytes: usize,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            normalizer: self.normalizer.clone(),
            http_client: self.http_client.clone(),
            max_image_bytes: self.max_image_bytes,
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(
        lifecycle: Arc<ServiceLifecycle<M>>,
        max_image_bytes: usize,
    ) -> Result<Self, StartupError> {
        let http_client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

        Ok(Self {
            lifecycle,
            normalizer: Arc::new(Normalizer::new()),
            http_client,
            max_image_bytes,
        })
    }

    pub fn lifecycle(&self) -> &ServiceLifecycle<M> {
        &self.lifecycle
    }

    pub async fn detect_upload(
        &self,
        content_type: Option<&str>,
        image_data: Bytes,
    ) -> Result<DetectionResponse, DetectionError> {
        validate_content_type(content_type)?;
        self.run_pipeline(image_data).await
    }

    pub async fn detect_url(&self, url: &str) -> Result<DetectionResponse, DetectionError> {
        let image_data = self.fetch_image(url).await?;
        self.run_pipeline(image_data).await
    }

    async fn run_pipeline(&self, image_data: Bytes) -> Result<DetectionResponse, DetectionError> {
        let model = self.lifecycle.model().ok_or(DetectionError::NotReady)?;

        let image = tokio::task::spawn_blocking(move || decode_image(&image_data))
            .await
            .map_err(|e| DetectionError::InvalidImage(format!("decode task failed: {}", e)))??;
        tracing::debug!("Decoded image {}x{}", image.width(), image.height());

        let detections = model.detect(image).await?;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: label={}, confidence={:.4}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_label,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(self.normalizer.normalize(detections))
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, DetectionError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| DetectionError::ImageFetch(format!("invalid url `{}`: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DetectionError::ImageFetch(format!(
                "unsupported url scheme `{}`",
                url.scheme()
            )));
        }

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DetectionError::ImageFetch(e.to_string()))?;

        if response
            .content_length()
            .is_some_and(|len| len as usize > self.max_image_bytes)
        {
            return Err(DetectionError::ImageFetch(format!(
                "image larger than {} bytes",
                self.max_image_bytes
            )));
        }

        let image_data = response
            .bytes()
            .await
            .map_err(|e| DetectionError::ImageFetch(e.to_string()))?;
        if image_data.len() > self.max_image_bytes {
            return Err(DetectionError::ImageFetch(format!(
                "image larger than {} bytes",
                self.max_image_bytes
            )));
        }

        Ok(image_data)
    }
}

/// Accepts any `image/*` media type, ignoring case and parameters.
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), DetectionError> {
    match content_type {
        Some(ct) if ct.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
        Some(ct) => Err(DetectionError::UnsupportedMediaType(ct.to_string())),
        None => Err(DetectionError::UnsupportedMediaType("none".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decoder::tests::encode_png, detection::RawDetection};
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports one detection spanning the whole image, labelled by its width.
    struct MockModelService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelService for MockModelService {
        async fn detect(&self, image: DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawDetection {
                class_id: 0,
                class_label: format!("width-{}", image.width()),
                confidence: 0.95,
                x1: 0.,
                y1: 0.,
                x2: image.width() as f32,
                y2: image.height() as f32,
            }])
        }
    }

    struct FailingModelService;

    #[async_trait]
    impl ModelService for FailingModelService {
        async fn detect(&self, _image: DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
            Err(DetectionError::Inference("accelerator fault".to_string()))
        }
    }

    fn service() -> InferenceService<MockModelService> {
        let lifecycle = ServiceLifecycle::ready(MockModelService {
            calls: AtomicUsize::new(0),
        });
        InferenceService::new(Arc::new(lifecycle), 1024 * 1024).unwrap()
    }

    fn calls(service: &InferenceService<MockModelService>) -> usize {
        service
            .lifecycle()
            .model()
            .map(|m| m.calls.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    #[test]
    fn test_validate_content_type() {
        assert!(validate_content_type(Some("image/png")).is_ok());
        assert!(validate_content_type(Some("Image/JPEG")).is_ok());
        assert!(validate_content_type(Some("image/jpeg; charset=binary")).is_ok());
        assert!(matches!(
            validate_content_type(Some("text/plain")),
            Err(DetectionError::UnsupportedMediaType(_))
        ));
        assert!(validate_content_type(Some("application/image/png")).is_err());
        assert!(validate_content_type(None).is_err());
    }

    #[tokio::test]
    async fn test_detect_upload() {
        let service = service();
        let response = service
            .detect_upload(Some("image/png"), Bytes::from(encode_png(40, 30, [0, 0, 0])))
            .await
            .unwrap();

        assert_eq!(response.total_fruits, 1);
        assert_eq!(response.fruits[0].fruit_type, "width-40");
        assert_eq!(response.fruits[0].bounding_box.xmax, 40.);
        assert_eq!(response.fruits[0].bounding_box.ymax, 30.);
    }

    #[tokio::test]
    async fn test_rejects_media_type_before_decoding() {
        let service = service();
        let err = service
            .detect_upload(Some("text/plain"), Bytes::from(encode_png(4, 4, [0, 0, 0])))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::UnsupportedMediaType(_)));
        assert_eq!(calls(&service), 0);
    }

    #[tokio::test]
    async fn test_empty_upload_is_invalid_image() {
        let service = service();
        let err = service
            .detect_upload(Some("image/png"), Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::InvalidImage(_)));
        assert_eq!(calls(&service), 0);
    }

    #[tokio::test]
    async fn test_inference_error_propagates() {
        let lifecycle = ServiceLifecycle::ready(FailingModelService);
        let service = InferenceService::new(Arc::new(lifecycle), 1024).unwrap();

        let err = service
            .detect_upload(Some("image/png"), Bytes::from(encode_png(4, 4, [0, 0, 0])))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::Inference(_)));
    }

    #[tokio::test]
    async fn test_not_ready_before_model_load() {
        let lifecycle = ServiceLifecycle::<MockModelService>::new();
        let service = InferenceService::new(Arc::new(lifecycle), 1024).unwrap();

        let err = service
            .detect_upload(Some("image/png"), Bytes::from(encode_png(4, 4, [0, 0, 0])))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::NotReady));
    }

    #[tokio::test]
    async fn test_detect_url_rejects_bad_urls() {
        let service = service();

        let err = service.detect_url("not a url").await.unwrap_err();
        assert!(matches!(err, DetectionError::ImageFetch(_)));

        let err = service.detect_url("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, DetectionError::ImageFetch(msg) if msg.contains("scheme")));
        assert_eq!(calls(&service), 0);
    }

    #[tokio::test]
    async fn test_fetch_client_reports_unreachable_host() {
        let lifecycle = ServiceLifecycle::ready(MockModelService {
            calls: AtomicUsize::new(0),
        });
        let service = InferenceService::new(Arc::new(lifecycle), 1024)
            .expect("client builds with the fetch timeout");

        let err = service
            .detect_url("http://127.0.0.1:1/apple.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::ImageFetch(_)));
        assert_eq!(calls(&service), 0);
    }
}
