use config::{Config, ConfigError, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::url;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub service_center: ServiceCenterConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_output() -> String {
    "console".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub db: Option<u8>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub connection_timeout_ms: Option<u64>,
}

impl RedisConfig {
    /// 组装Redis连接地址，如 redis://:pwd@127.0.0.1:6379/0
    pub fn url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        let db = match self.db {
            Some(db) => format!("/{}", db),
            None => String::new(),
        };
        format!("redis://{}{}:{}{}", auth, self.host, self.port, db)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
}

impl ServerConfig {
    pub fn url(&self) -> String {
        url(self.secure, &self.host, self.port)
    }

    pub fn server_url(&self) -> String {
        format!("{}:{}", &self.host, self.port)
    }
}

/// 注册中心类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Consul,
    Eureka,
}

fn default_backend() -> RegistryKind {
    RegistryKind::Consul
}

/// 服务发现配置
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceCenterConfig {
    #[serde(default = "default_backend")]
    pub backend: RegistryKind,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: u64,
    #[serde(default = "default_fatal_exit_code")]
    pub fatal_exit_code: i32,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
}

impl ServiceCenterConfig {
    /// 注册中心基地址，如 http://127.0.0.1:8500
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_enabled() -> bool {
    true
}

/// 默认注册尝试总次数
fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}

fn default_query_interval_ms() -> u64 {
    30000
}

fn default_fatal_exit_code() -> i32 {
    1
}

/// Consul TTL健康检查配置
#[derive(Debug, Deserialize, Clone)]
pub struct CheckConfig {
    #[serde(default = "default_check_ttl")]
    pub ttl: String,
    #[serde(default = "default_check_timeout")]
    pub timeout: String,
    #[serde(default = "default_deregister_after")]
    pub deregister_after: String,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            ttl: default_check_ttl(),
            timeout: default_check_timeout(),
            deregister_after: default_deregister_after(),
        }
    }
}

fn default_check_ttl() -> String {
    "90s".to_string()
}

fn default_check_timeout() -> String {
    "10s".to_string()
}

fn default_deregister_after() -> String {
    "120s".to_string()
}

/// Eureka租约配置
#[derive(Debug, Deserialize, Clone)]
pub struct LeaseConfig {
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            renewal_interval_secs: default_renewal_interval_secs(),
            duration_secs: default_duration_secs(),
        }
    }
}

fn default_renewal_interval_secs() -> u64 {
    30
}

fn default_duration_secs() -> u64 {
    60
}

/// 订阅权限服务配置
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionConfig {
    #[serde(default = "default_subscription_service")]
    pub service_name: String,
    #[serde(default = "default_active_subs_path")]
    pub active_subs_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            service_name: default_subscription_service(),
            active_subs_path: default_active_subs_path(),
            request_timeout_ms: default_request_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

fn default_subscription_service() -> String {
    "urlshortener-subscription-service".to_string()
}

fn default_active_subs_path() -> String {
    "/api/v1/subscriptions/active".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_cache_ttl_ms() -> u64 {
    60000
}

impl AppConfig {
    // 创建一个新的AppConfig实例
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file(None)
    }

    // 从多个来源加载配置
    pub fn from_file(file_path: Option<&str>) -> Result<Self, ConfigError> {
        // 开始构建配置
        let mut builder = Config::builder();

        // 配置文件 (如果指定)
        if let Some(path) = file_path {
            if Path::new(path).exists() {
                let format = if path.ends_with(".json") {
                    FileFormat::Json
                } else if path.ends_with(".yaml") || path.ends_with(".yml") {
                    FileFormat::Yaml
                } else {
                    FileFormat::Toml
                };

                builder = builder.add_source(File::with_name(path).format(format));
            }
        } else {
            // 默认配置文件
            builder =
                builder.add_source(File::with_name("./config/config.yaml").format(FileFormat::Yaml));
        }

        // 读取环境变量 (最高优先级)
        builder = builder.add_source(config::Environment::default().separator("_"));

        // 构建配置
        let config = builder.build()?;

        // 转换为AppConfig结构体
        Ok(config.try_deserialize()?)
    }
}
