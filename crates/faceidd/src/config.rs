use faceid_core::PipelineSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Session,
    System,
}

impl Bus {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "session" => Some(Bus::Session),
            "system" => Some(Bus::System),
            _ => None,
        }
    }
}

/// Optional TOML file; every field overrides the built-in default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub detection_threshold: Option<f32>,
    pub match_threshold: Option<f32>,
    pub identify_threshold: Option<f32>,
    pub bus: Option<Bus>,
    pub warmup_image: Option<PathBuf>,
}

/// Daemon configuration: defaults, then the TOML file, then `FACEID_*` env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery document, face images and diagnostic artifacts live here.
    pub data_dir: PathBuf,
    pub settings: PipelineSettings,
    pub bus: Bus,
    /// Image identified once at startup so the first request does not pay model warm-up.
    pub warmup_image: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: xdg_dir("XDG_DATA_HOME", ".local/share").join("faceid/models"),
            data_dir: xdg_dir("XDG_DATA_HOME", ".local/share").join("faceid"),
            settings: PipelineSettings::default(),
            bus: Bus::Session,
            warmup_image: None,
        }
    }
}

impl Config {
    /// Load the config file (`FACEID_CONFIG` or the XDG default) if present,
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file_path = std::env::var("FACEID_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| xdg_dir("XDG_CONFIG_HOME", ".config").join("faceid/faceidd.toml"));
        if file_path.exists() {
            config.apply_file(read_file(&file_path)?);
            tracing::info!(path = %file_path.display(), "loaded config file");
        }

        config.apply_env();
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.detection_threshold {
            self.settings.detection_threshold = v;
        }
        if let Some(v) = file.match_threshold {
            self.settings.match_threshold = v;
        }
        if let Some(v) = file.identify_threshold {
            self.settings.identify_threshold = v;
        }
        if let Some(v) = file.bus {
            self.bus = v;
        }
        if file.warmup_image.is_some() {
            self.warmup_image = file.warmup_image;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FACEID_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACEID_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        let s = &mut self.settings;
        s.detection_threshold = env_f32("FACEID_DETECTION_THRESHOLD", s.detection_threshold);
        s.match_threshold = env_f32("FACEID_MATCH_THRESHOLD", s.match_threshold);
        s.identify_threshold = env_f32("FACEID_IDENTIFY_THRESHOLD", s.identify_threshold);
        if let Some(bus) = std::env::var("FACEID_BUS").ok().as_deref().and_then(Bus::parse) {
            self.bus = bus;
        }
        if let Ok(v) = std::env::var("FACEID_WARMUP_IMAGE") {
            self.warmup_image = Some(PathBuf::from(v));
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database.json")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("saved_outputs")
    }

    pub fn display_dir(&self) -> PathBuf {
        self.data_dir.join("faces2display")
    }

    pub fn projection_path(&self) -> PathBuf {
        self.data_dir.join("2d_space.jpg")
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    /// Paths to the sex, age and ethnicity classifiers.
    pub fn demographic_model_paths(&self) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.model_dir.join("sex.onnx"),
            self.model_dir.join("age.onnx"),
            self.model_dir.join("ethnicity.onnx"),
        )
    }

    pub fn deepfake_model_path(&self) -> PathBuf {
        self.model_dir.join("deepfake.onnx")
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(home_relative)
    })
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
