// 导入 serde 用于序列化和反序列化
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::utils;

/// 服务注册信息
///
/// 包含向服务注册中心注册服务所需的所有信息
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Registration {
    /// 服务实例的唯一标识
    pub id: String,
    /// 服务名称
    pub name: String,
    /// 服务主机地址
    pub host: String,
    /// 服务端口号
    pub port: u16,
    /// 是否以HTTPS对外提供服务
    pub secure: bool,
    /// 健康检查配置
    pub check: Option<HealthCheck>,
}

impl Registration {
    /// 根据配置构造本服务实例的注册信息
    ///
    /// 实例ID为服务名加随机UUID，注册地址取本机对外IPv4。
    pub fn from_config(config: &AppConfig) -> Self {
        let name = config.server.name.clone();
        Registration {
            id: utils::instance_id(&name),
            host: utils::local_ip(),
            port: config.server.port,
            secure: config.server.secure,
            check: Some(HealthCheck {
                name: format!("Service '{}' check", name),
                ttl: config.service_center.check.ttl.clone(),
                timeout: config.service_center.check.timeout.clone(),
                deregister_after: config.service_center.check.deregister_after.clone(),
            }),
            name,
        }
    }
}

/// TTL健康检查配置
///
/// 注册中心在TTL内未收到心跳即将服务标记为不健康
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct HealthCheck {
    /// 健康检查名称
    pub name: String,
    /// 注册中心等待心跳的TTL时长，如 "90s"
    pub ttl: String,
    /// 健康检查的超时时间
    pub timeout: String,
    /// 服务不健康后多久取消注册
    pub deregister_after: String,
}

impl HealthCheck {
    /// 某个服务的默认TTL检查配置
    pub fn for_service(service_name: &str) -> Self {
        HealthCheck {
            name: format!("Service '{}' check", service_name),
            ttl: "90s".to_string(),
            timeout: "10s".to_string(),
            deregister_after: "120s".to_string(),
        }
    }
}

/// 已解析的服务实例端点
///
/// 从服务注册中心获取的可访问实例信息
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// 所属服务名称
    pub service_name: String,
    /// 访问协议，http 或 https
    pub scheme: String,
    /// 实例IP地址
    pub ip: String,
    /// 实例端口
    pub port: u16,
}

impl ServiceEndpoint {
    /// 实例基地址，如 https://10.0.0.2:8443
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.ip, self.port)
    }
}
