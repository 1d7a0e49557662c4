use crate::{
    config::{DevicePreference, ModelConfig, Validatable},
    detection::{non_max_suppression, round_confidence, Candidate, RawDetection},
    error::{DetectionError, StartupError},
    labels::ClassLabels,
    model_service::ModelService,
};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix4};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

pub const INPUT_SIZE: u32 = 640;
pub const CONFIDENCE_THRESHOLD: f32 = 0.10;
pub const IOU_THRESHOLD: f32 = 0.30;
pub const MAX_DETECTIONS: usize = 300;

const OUTPUT_NAME: &str = "output0";
const PAD_VALUE: f32 = 114. / 255.;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cuda,
    Cpu,
}

impl ComputeDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Cpu => "cpu",
        }
    }
}

/// Network input plus what is needed to map boxes back onto the source image.
#[derive(Debug)]
pub struct Letterbox {
    pub input: Array<f32, Ix4>,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub width: u32,
    pub height: u32,
}

/// Resizes so the long edge is `INPUT_SIZE`, keeps the aspect ratio and
/// centres the result on a grey square canvas.
pub fn letterbox(image: &DynamicImage) -> Result<Letterbox, DetectionError> {
    let DynamicImage::ImageRgb8(rgb) = image else {
        return Err(DetectionError::Inference(format!(
            "expected a 3-channel 8-bit image, got {:?}",
            image.color()
        )));
    };

    let (img_width, img_height) = rgb.dimensions();
    if img_width == 0 || img_height == 0 {
        return Err(DetectionError::Inference(format!(
            "degenerate image shape {}x{}",
            img_width, img_height
        )));
    }

    let target = INPUT_SIZE as f32;
    let scale = (target / img_width as f32).min(target / img_height as f32);
    let new_width = ((img_width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_height = ((img_height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let left = (((INPUT_SIZE - new_width) as f32 / 2.) - 0.1).round().max(0.) as u32;
    let top = (((INPUT_SIZE - new_height) as f32 / 2.) - 0.1).round().max(0.) as u32;

    let resized = if (new_width, new_height) == (img_width, img_height) {
        rgb.clone()
    } else {
        image::imageops::resize(rgb, new_width, new_height, FilterType::Triangle)
    };

    let size = INPUT_SIZE as usize;
    let mut input = Array::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = (x + left) as usize;
        let y = (y + top) as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(Letterbox {
        input,
        scale,
        pad_x: left as f32,
        pad_y: top as f32,
        width: img_width,
        height: img_height,
    })
}

/// Turns a `[1, 4 + classes, candidates]` output into detections on the
/// source image.
pub fn postprocess(
    output: ArrayViewD<f32>,
    frame: &Letterbox,
    labels: &ClassLabels,
) -> Result<Vec<RawDetection>, DetectionError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectionError::Inference(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }

    let output = output.index_axis(Axis(0), 0);
    let mut candidates = Vec::new();

    for (index, column) in output.axis_iter(Axis(1)).enumerate() {
        if column.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::Inference(format!(
                "non-finite value in output candidate {}",
                index
            )));
        }

        // First maximum wins on ties.
        let Some((class_id, prob)) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| match row.1.total_cmp(&accum.1) {
                std::cmp::Ordering::Greater => row,
                _ => accum,
            })
        else {
            continue;
        };

        if prob <= CONFIDENCE_THRESHOLD {
            continue;
        }

        candidates.push(Candidate::from_center(
            class_id,
            prob,
            column[0],
            column[1],
            column[2],
            column[3],
        ));
    }

    let kept = non_max_suppression(candidates, IOU_THRESHOLD, MAX_DETECTIONS);

    let max_x = frame.width as f32;
    let max_y = frame.height as f32;
    let unletterbox = |v: f32, pad: f32, max: f32| ((v - pad) / frame.scale).clamp(0., max);

    Ok(kept
        .into_iter()
        .map(|bbox| RawDetection {
            class_id: bbox.class_id,
            class_label: labels.label(bbox.class_id),
            confidence: round_confidence(bbox.confidence),
            x1: unletterbox(bbox.x1, frame.pad_x, max_x),
            y1: unletterbox(bbox.y1, frame.pad_y, max_y),
            x2: unletterbox(bbox.x2, frame.pad_x, max_x),
            y2: unletterbox(bbox.y2, frame.pad_y, max_y),
        })
        .collect())
}

fn build_session(model_path: &Path, device: ComputeDevice) -> Result<Session, ort::Error> {
    let provider = match device {
        ComputeDevice::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
        ComputeDevice::Cpu => CPUExecutionProvider::default().build(),
    };
    Session::builder()?
        .with_execution_providers([provider])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model_path)
}

/// Builds the first session, settling on a device for the whole pool.
fn build_first_session(
    model_path: &Path,
    preference: DevicePreference,
) -> Result<(Session, ComputeDevice), StartupError> {
    let load_error = |e: ort::Error| StartupError::ModelLoad(e.to_string());
    match preference {
        DevicePreference::Cpu => Ok((
            build_session(model_path, ComputeDevice::Cpu).map_err(load_error)?,
            ComputeDevice::Cpu,
        )),
        DevicePreference::Cuda => Ok((
            build_session(model_path, ComputeDevice::Cuda).map_err(load_error)?,
            ComputeDevice::Cuda,
        )),
        DevicePreference::Auto => match build_session(model_path, ComputeDevice::Cuda) {
            Ok(session) => Ok((session, ComputeDevice::Cuda)),
            Err(e) => {
                tracing::warn!("CUDA execution provider unavailable: {}", e);
                tracing::warn!("Falling back to CPU execution provider");
                Ok((
                    build_session(model_path, ComputeDevice::Cpu).map_err(load_error)?,
                    ComputeDevice::Cpu,
                ))
            }
        },
    }
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Arc<ClassLabels>,
    device: ComputeDevice,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig, labels: ClassLabels) -> Result<Self, StartupError> {
        let model_path = model_config.get_path();
        let num_instances = model_config.num_instances.max(1);

        let (first, device) = build_first_session(&model_path, model_config.device)?;
        let mut sessions = vec![Arc::new(Mutex::new(first))];
        for _ in 1..num_instances {
            let session = build_session(&model_path, device)
                .map_err(|e| StartupError::ModelLoad(e.to_string()))?;
            sessions.push(Arc::new(Mutex::new(session)));
        }

        tracing::info!(
            "Created {} ONNX sessions on {} from {:?}",
            num_instances,
            device.as_str(),
            model_path
        );

        let service = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels: Arc::new(labels),
            device,
        };
        service.warm_up()?;

        Ok(service)
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    /// Runs a blank frame through every session so a model with the wrong
    /// output layout fails at startup rather than on the first request.
    fn warm_up(&self) -> Result<(), StartupError> {
        let blank = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
        for _ in 0..self.sessions.len() {
            self.detect_blocking(&blank)
                .map_err(|e| StartupError::ModelLoad(format!("warm-up failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectionError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectionError::Inference(format!("model run failed: {}", e)))?;

        let output = outputs.get(OUTPUT_NAME).ok_or_else(|| {
            DetectionError::Inference(format!("model has no `{}` output", OUTPUT_NAME))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectionError::Inference(format!("invalid tensor shape: {}", e)))
    }

    fn detect_blocking(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
        let frame = letterbox(image)?;
        let output = self.run_inference(&frame.input)?;
        postprocess(output.view(), &frame, &self.labels)
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn detect(&self, image: DynamicImage) -> Result<Vec<RawDetection>, DetectionError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect_blocking(&image))
            .await
            .map_err(|e| DetectionError::Inference(format!("inference task failed: {}", e)))?
    }
}
