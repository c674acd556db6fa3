use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use draftdoc_engine::EngineOptions;
use draftdoc_engine::snap::SnapOptions;
use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "DRAFTDOC_CONFIG";

/// 应用配置的根结构，对应 `config/default.toml`，各段与字段均可省略。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub snap: SnapConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `DRAFTDOC_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 汇总各段配置，生成引擎参数。
    pub fn engine_options(&self) -> EngineOptions {
        let engine = &self.engine;
        EngineOptions {
            event_capacity: engine.event_capacity,
            spatial_cell_size: engine.spatial_cell_size,
            pick_tolerance: engine.pick_tolerance,
            drag_threshold: engine.drag_threshold,
            rotate_handle_offset: engine.rotate_handle_offset,
            min_entity_size: engine.min_entity_size,
            rotation_snap_degrees: engine.rotation_snap_degrees,
            text_advance_ratio: self.text.advance_ratio,
            text_line_height_ratio: self.text.line_height_ratio,
            snap: self.snap.options(),
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 引擎参数，缺省字段沿用引擎自身的默认值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub event_capacity: usize,
    pub spatial_cell_size: f32,
    pub pick_tolerance: f32,
    pub drag_threshold: f32,
    pub rotate_handle_offset: f32,
    pub min_entity_size: f32,
    pub rotation_snap_degrees: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            event_capacity: options.event_capacity,
            spatial_cell_size: options.spatial_cell_size,
            pick_tolerance: options.pick_tolerance,
            drag_threshold: options.drag_threshold,
            rotate_handle_offset: options.rotate_handle_offset,
            min_entity_size: options.min_entity_size,
            rotation_snap_degrees: options.rotation_snap_degrees,
        }
    }
}

/// 内置等宽排版器的参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub advance_ratio: f32,
    pub line_height_ratio: f32,
}

impl Default for TextConfig {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            advance_ratio: options.text_advance_ratio,
            line_height_ratio: options.text_line_height_ratio,
        }
    }
}

/// 变换会话的网格与对象捕捉。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    pub enabled: bool,
    pub grid_enabled: bool,
    pub grid_size: f32,
    pub endpoint: bool,
    pub midpoint: bool,
    pub center: bool,
    /// 屏幕单位。
    pub tolerance: f32,
}

impl SnapConfig {
    pub fn options(&self) -> SnapOptions {
        SnapOptions {
            enabled: self.enabled,
            grid_enabled: self.grid_enabled,
            grid_size: self.grid_size,
            endpoint: self.endpoint,
            midpoint: self.midpoint,
            center: self.center,
            tolerance: self.tolerance,
        }
    }
}

impl Default for SnapConfig {
    fn default() -> Self {
        let options = SnapOptions::default();
        Self {
            enabled: options.enabled,
            grid_enabled: options.grid_enabled,
            grid_size: options.grid_size,
            endpoint: options.endpoint,
            midpoint: options.midpoint,
            center: options.center,
            tolerance: options.tolerance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "SnapshotConfig::default_output")]
    pub default_output: PathBuf,
}

impl SnapshotConfig {
    fn default_output() -> PathBuf {
        PathBuf::from("document.esnp")
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            default_output: Self::default_output(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
