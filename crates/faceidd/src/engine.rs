use crate::config::Config;
use faceid_core::{
    ArcFaceModel, IdentityStore, MatchResult, MatchingPipeline, OnnxDeepfake, OnnxDemographics,
    PipelineError, ProjectionOutcome, ScrfdDetector,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("loading image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] faceid_core::detector::DetectorError),
    #[error("model error: {0}")]
    Model(#[from] faceid_core::onnx::ModelError),
    #[error("store error: {0}")]
    Store(#[from] faceid_core::StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    pub fn is_no_face(&self) -> bool {
        matches!(self, EngineError::Pipeline(PipelineError::NoFaceDetected))
    }

    pub fn is_unknown_identity(&self) -> bool {
        matches!(
            self,
            EngineError::Pipeline(PipelineError::Store(faceid_core::StoreError::NotFound(_)))
        )
    }
}

/// Snapshot reported by the `Status` method.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub identities: usize,
    pub detection_threshold: f32,
    pub match_threshold: f32,
    pub identify_threshold: f32,
    pub database: PathBuf,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        path: PathBuf,
        name: String,
        reply: Reply<u64>,
    },
    Identify {
        path: PathBuf,
        reply: Reply<MatchResult>,
    },
    RecognizeAll {
        path: PathBuf,
        reply: Reply<Vec<MatchResult>>,
    },
    Compare {
        first: PathBuf,
        second: PathBuf,
        reply: Reply<f32>,
    },
    Deepfake {
        path: PathBuf,
        reply: Reply<Vec<i32>>,
    },
    UpdateAttributes {
        path: PathBuf,
        id: u64,
        reply: Reply<()>,
    },
    Features {
        path: PathBuf,
        reply: Reply<Vec<f32>>,
    },
    Export {
        path: PathBuf,
        reply: Reply<u64>,
    },
    Snapshot {
        path: PathBuf,
        reply: Reply<u64>,
    },
    Reset {
        reply: Reply<()>,
    },
    Project {
        reply: Reply<ProjectionOutcome>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll the most confident face in `path` under `name`.
    pub async fn enroll(&self, path: PathBuf, name: String) -> Result<u64, EngineError> {
        self.call(|reply| EngineRequest::Enroll { path, name, reply }).await
    }

    pub async fn identify(&self, path: PathBuf) -> Result<MatchResult, EngineError> {
        self.call(|reply| EngineRequest::Identify { path, reply }).await
    }

    pub async fn recognize_all(&self, path: PathBuf) -> Result<Vec<MatchResult>, EngineError> {
        self.call(|reply| EngineRequest::RecognizeAll { path, reply }).await
    }

    pub async fn compare(&self, first: PathBuf, second: PathBuf) -> Result<f32, EngineError> {
        self.call(|reply| EngineRequest::Compare { first, second, reply })
            .await
    }

    pub async fn deepfake(&self, path: PathBuf) -> Result<Vec<i32>, EngineError> {
        self.call(|reply| EngineRequest::Deepfake { path, reply }).await
    }

    pub async fn update_attributes(&self, path: PathBuf, id: u64) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::UpdateAttributes { path, id, reply })
            .await
    }

    pub async fn features(&self, path: PathBuf) -> Result<Vec<f32>, EngineError> {
        self.call(|reply| EngineRequest::Features { path, reply }).await
    }

    /// Write the embedding of `path` to the next numbered export file.
    pub async fn export(&self, path: PathBuf) -> Result<u64, EngineError> {
        self.call(|reply| EngineRequest::Export { path, reply }).await
    }

    /// Save the normalized face of `path` for display.
    pub async fn snapshot(&self, path: PathBuf) -> Result<u64, EngineError> {
        self.call(|reply| EngineRequest::Snapshot { path, reply }).await
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Reset { reply }).await
    }

    pub async fn project(&self) -> Result<ProjectionOutcome, EngineError> {
        self.call(|reply| EngineRequest::Project { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Output locations the engine writes artifacts to.
struct Outputs {
    exports: PathBuf,
    display: PathBuf,
    projection: PathBuf,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads every ONNX model and opens the gallery synchronously, then enters
/// a request loop. Fails fast at startup if any resource is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

    let arcface_path = config.arcface_model_path();
    let recognizer = ArcFaceModel::load(&arcface_path)?;
    tracing::info!(path = %arcface_path.display(), "ArcFace recognizer loaded");

    let (sex, age, ethnicity) = config.demographic_model_paths();
    let demographics = OnnxDemographics::load(&sex, &age, &ethnicity)?;
    tracing::info!(dir = %config.model_dir.display(), "demographic classifiers loaded");

    let deepfake_path = config.deepfake_model_path();
    let deepfake = OnnxDeepfake::load(&deepfake_path)?;
    tracing::info!(path = %deepfake_path.display(), "deepfake classifier loaded");

    let store = IdentityStore::open(config.database_path(), config.faces_dir())?;

    let pipeline = MatchingPipeline::new(
        Box::new(detector),
        Box::new(recognizer),
        Box::new(demographics),
        Box::new(deepfake),
        Arc::new(store),
        config.settings,
    );
    let outputs = Outputs {
        exports: config.exports_dir(),
        display: config.display_dir(),
        projection: config.projection_path(),
    };

    let (tx, rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || run_loop(pipeline, outputs, rx))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_loop(mut pipeline: MatchingPipeline, outputs: Outputs, mut rx: mpsc::Receiver<EngineRequest>) {
    tracing::info!("engine thread started");
    while let Some(req) = rx.blocking_recv() {
        // A dropped receiver means the caller went away; nothing to report.
        match req {
            EngineRequest::Enroll { path, name, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.enroll(&img, &name)?)));
            }
            EngineRequest::Identify { path, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.identify(&img)?)));
            }
            EngineRequest::RecognizeAll { path, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.recognize_all(&img)?)));
            }
            EngineRequest::Compare { first, second, reply } => {
                let result = load(&first)
                    .and_then(|a| Ok((a, load(&second)?)))
                    .and_then(|(a, b)| Ok(pipeline.compare(&a, &b)?));
                let _ = reply.send(result);
            }
            EngineRequest::Deepfake { path, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.deepfake_scores(&img)?)));
            }
            EngineRequest::UpdateAttributes { path, id, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.update_attributes(&img, id)?)));
            }
            EngineRequest::Features { path, reply } => {
                let _ = reply.send(load(&path).and_then(|img| Ok(pipeline.features(&img)?.values)));
            }
            EngineRequest::Export { path, reply } => {
                let source = path.display().to_string();
                let result = load(&path)
                    .and_then(|img| Ok(pipeline.export_features(&img, &source, &outputs.exports)?));
                let _ = reply.send(result);
            }
            EngineRequest::Snapshot { path, reply } => {
                let result = load(&path).and_then(|img| Ok(pipeline.snapshot_face(&img, &outputs.display)?));
                let _ = reply.send(result);
            }
            EngineRequest::Reset { reply } => {
                let _ = reply.send(pipeline.reset().map_err(EngineError::from));
            }
            EngineRequest::Project { reply } => {
                let _ = reply.send(Ok(pipeline.project(&outputs.projection)));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(status(&pipeline));
            }
        }
    }
    tracing::info!("engine thread exiting");
}

fn status(pipeline: &MatchingPipeline) -> Result<EngineStatus, EngineError> {
    let settings = pipeline.settings();
    Ok(EngineStatus {
        identities: pipeline.store().len()?,
        detection_threshold: settings.detection_threshold,
        match_threshold: settings.match_threshold,
        identify_threshold: settings.identify_threshold,
        database: pipeline.store().path().to_path_buf(),
    })
}

fn load(path: &Path) -> Result<RgbImage, EngineError> {
    let image = image::open(path).map_err(|source| EngineError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "image loaded");
    Ok(image.to_rgb8())
}
