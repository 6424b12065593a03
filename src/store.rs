//! # 本地持久化模块
//!
//! # 设计思路
//!
//! 设置、头像与服务配置缓存各占一个 JSON 文件，对应扩展本地存储区的
//! 三条记录。记录的所有权在范围之外的界面侧，核心只读设置与头像；
//! 服务配置缓存由代理读写。
//!
//! # 实现思路
//!
//! - 记录字段统一 camelCase 线上命名，与存储区格式一致。
//! - 文件不存在返回 `Ok(None)`，与"尚未写入"语义区分于读取失败。
//! - 写入前自动创建数据目录，所有可失败操作返回 `Result`。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::broker::ServiceConfig;

const SETTINGS_FILE: &str = "settings.json";
const AVATAR_FILE: &str = "avatar.json";
const SERVICE_CONFIG_FILE: &str = "service_config.json";

/// 持久化层错误。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("记录格式错误: {0}")]
    Format(String),

    #[error("数据目录不可用: {0}")]
    DataDir(String),
}

/// 存储的设置记录。
///
/// 核心读取前两项；`notifications_enabled` 由界面侧消费，这里只透传。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSettings {
    pub auto_detect_enabled: bool,
    pub manual_selection_enabled: bool,
    pub notifications_enabled: bool,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            auto_detect_enabled: false,
            manual_selection_enabled: false,
            notifications_enabled: true,
        }
    }
}

/// 存储的头像记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAvatar {
    /// 头像图片（Data URL 或裸 Base64）。
    pub base64: String,
    pub file_name: String,
    pub upload_date: DateTime<Utc>,
    pub file_size: u64,
}

/// 本地存储。
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    /// 在指定数据目录上打开存储。
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 使用平台默认数据目录。
    pub fn from_default_dir() -> Result<Self, StoreError> {
        let base = dirs::data_dir()
            .ok_or_else(|| StoreError::DataDir("无法确定平台数据目录".to_string()))?;
        Ok(Self::new(base.join("virtual-tryon")))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn load_settings(&self) -> Result<Option<StoredSettings>, StoreError> {
        self.load_json(SETTINGS_FILE)
    }

    pub fn save_settings(&self, settings: &StoredSettings) -> Result<(), StoreError> {
        self.save_json(SETTINGS_FILE, settings)
    }

    pub fn load_avatar(&self) -> Result<Option<StoredAvatar>, StoreError> {
        self.load_json(AVATAR_FILE)
    }

    pub fn save_avatar(&self, avatar: &StoredAvatar) -> Result<(), StoreError> {
        self.save_json(AVATAR_FILE, avatar)
    }

    pub fn load_service_config(&self) -> Result<Option<ServiceConfig>, StoreError> {
        self.load_json(SERVICE_CONFIG_FILE)
    }

    pub fn save_service_config(&self, config: &ServiceConfig) -> Result<(), StoreError> {
        self.save_json(SERVICE_CONFIG_FILE, config)
    }

    fn load_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StoreError> {
        let path = self.data_dir.join(file);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let parsed = serde_json::from_str(&content)
            .map_err(|e| StoreError::Format(format!("{}: {}", file, e)))?;

        Ok(Some(parsed))
    }

    fn save_json<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Format(format!("{}: {}", file, e)))?;

        fs::write(self.data_dir.join(file), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> Store {
        let dir = std::env::temp_dir()
            .join("virtual-tryon-test")
            .join(format!("{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        Store::new(dir)
    }

    #[test]
    fn missing_records_read_as_none() {
        let store = temp_store("missing");
        assert!(store.load_settings().expect("read should succeed").is_none());
        assert!(store.load_avatar().expect("read should succeed").is_none());
    }

    #[test]
    fn settings_round_trip_in_camel_case() {
        let store = temp_store("settings");
        let settings = StoredSettings {
            auto_detect_enabled: true,
            manual_selection_enabled: false,
            notifications_enabled: true,
        };

        store.save_settings(&settings).expect("save should succeed");

        let raw = fs::read_to_string(store.data_dir().join(SETTINGS_FILE))
            .expect("settings file should exist");
        assert!(raw.contains("autoDetectEnabled"));

        let loaded = store
            .load_settings()
            .expect("read should succeed")
            .expect("record should exist");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn avatar_round_trip_keeps_metadata() {
        let store = temp_store("avatar");
        let avatar = StoredAvatar {
            base64: "data:image/jpeg;base64,AAAA".to_string(),
            file_name: "me.jpg".to_string(),
            upload_date: Utc::now(),
            file_size: 4,
        };

        store.save_avatar(&avatar).expect("save should succeed");

        let loaded = store
            .load_avatar()
            .expect("read should succeed")
            .expect("record should exist");
        assert_eq!(loaded.file_name, "me.jpg");
        assert_eq!(loaded.file_size, 4);
    }

    #[test]
    fn corrupt_record_reports_format_error() {
        let store = temp_store("corrupt");
        fs::create_dir_all(store.data_dir()).expect("mkdir failed");
        fs::write(store.data_dir().join(SETTINGS_FILE), "{broken").expect("write failed");

        assert!(matches!(
            store.load_settings(),
            Err(StoreError::Format(_))
        ));
    }
}
