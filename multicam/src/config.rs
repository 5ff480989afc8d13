//! 相机配置的持久化
//!
//! JSON 文件，一个 `Default` 分区加上每台相机一个分区 (键为 "型号 序列号")：
//!
//! ```json
//! {
//!   "Default": { "target_frame_rate": 25.0, "display_pixel_format": "Mono8", ... },
//!   "acA1300-60gm 21234567": { ... }
//! }
//! ```
//!
//! 第一次见到的相机从 `Default` 复制一份并写回文件；
//! 解析失败或范围检查失败的分区用 `Default` 重建并记录警告。

use multicam_core::builder::CaptureConfig;
use multicam_core::error::{CaptureError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_SECTION: &str = "Default";

/// 按相机身份提供采集配置
pub trait ConfigProvider: Send + Sync {
    fn camera_config(&self, identity: &str) -> CaptureConfig;
}

/// 所有相机共用同一份配置
impl ConfigProvider for CaptureConfig {
    fn camera_config(&self, _identity: &str) -> CaptureConfig {
        self.clone()
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    document: Mutex<Map<String, Value>>,
}

fn to_value(config: &CaptureConfig) -> Result<Value> {
    serde_json::to_value(config).map_err(|e| CaptureError::Configuration(e.to_string()))
}

/// 分区能否解析为合法配置
fn parse_section(value: &Value) -> Result<CaptureConfig> {
    let config: CaptureConfig = serde_json::from_value(value.clone())
        .map_err(|e| CaptureError::Configuration(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl ConfigStore {
    /// 打开配置文件，不存在则创建只含 `Default` 的文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(CaptureError::Configuration(format!(
                        "{} is not a JSON object",
                        path.display()
                    )))
                }
                Err(e) => {
                    return Err(CaptureError::Configuration(format!(
                        "{}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        } else {
            tracing::info!(
                target: "multicam::config",
                "{} not found, creating it with default settings",
                path.display()
            );
            Map::new()
        };

        let store = Self {
            path: Some(path),
            document: Mutex::new(document),
        };
        if store.ensure_default()? {
            store.save()?;
        }
        Ok(store)
    }

    /// 不落盘的配置仓库
    pub fn in_memory() -> Self {
        let mut document = Map::new();
        if let Ok(value) = to_value(&CaptureConfig::default()) {
            document.insert(DEFAULT_SECTION.to_string(), value);
        }
        Self {
            path: None,
            document: Mutex::new(document),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 保证 `Default` 分区存在且合法。返回是否做了修改。
    fn ensure_default(&self) -> Result<bool> {
        let mut doc = self.lock();
        let valid = doc.get(DEFAULT_SECTION).map(parse_section);
        match valid {
            Some(Ok(_)) => Ok(false),
            Some(Err(err)) => {
                tracing::warn!(
                    target: "multicam::config",
                    "[{}] section is invalid ({}), recreating it",
                    DEFAULT_SECTION,
                    err
                );
                doc.insert(DEFAULT_SECTION.to_string(), to_value(&CaptureConfig::default())?);
                Ok(true)
            }
            None => {
                doc.insert(DEFAULT_SECTION.to_string(), to_value(&CaptureConfig::default())?);
                Ok(true)
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_config(&self) -> CaptureConfig {
        self.lock()
            .get(DEFAULT_SECTION)
            .and_then(|v| parse_section(v).ok())
            .unwrap_or_default()
    }

    /// 取得某台相机的配置 (缺失或非法时从 Default 补齐并写回)
    pub fn load(&self, identity: &str) -> Result<CaptureConfig> {
        let default = self.default_config();
        {
            let mut doc = self.lock();
            match doc.get(identity).map(parse_section) {
                Some(Ok(config)) => return Ok(config),
                Some(Err(err)) => {
                    tracing::warn!(
                        target: "multicam::config",
                        "[{}] section is invalid ({}), recreating it from [{}]",
                        identity,
                        err,
                        DEFAULT_SECTION
                    );
                }
                None => {
                    tracing::info!(
                        target: "multicam::config",
                        "New camera [{}], copying [{}] settings",
                        identity,
                        DEFAULT_SECTION
                    );
                }
            }
            doc.insert(identity.to_string(), to_value(&default)?);
        }
        self.save()?;
        Ok(default)
    }

    /// 覆盖某台相机的配置并写回
    pub fn store(&self, identity: &str, config: &CaptureConfig) -> Result<()> {
        config.validate()?;
        self.lock().insert(identity.to_string(), to_value(config)?);
        self.save()
    }

    pub fn identities(&self) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|k| k.as_str() != DEFAULT_SECTION)
            .cloned()
            .collect()
    }

    /// 写回文件 (内存仓库无操作)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = {
            let doc = self.lock();
            serde_json::to_string_pretty(&*doc)
                .map_err(|e| CaptureError::Configuration(e.to_string()))?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl ConfigProvider for ConfigStore {
    fn camera_config(&self, identity: &str) -> CaptureConfig {
        self.load(identity).unwrap_or_else(|err| {
            tracing::warn!(
                target: "multicam::config",
                "Failed to persist [{}]: {}",
                identity,
                err
            );
            self.default_config()
        })
    }
}
