use crate::{detection::RawDetection, error::DetectionError};
use async_trait::async_trait;
use image::DynamicImage;

/// A loaded detector. Implementations are shared read-only across requests.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn detect(&self, image: DynamicImage) -> Result<Vec<RawDetection>, DetectionError>;
}
