// 导入标准库和必要的依赖
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, RegistryKind};
use crate::Error;

// 声明子模块
pub mod consul;
pub mod eureka;
pub mod typos;

// 导入类型定义
pub use crate::service_register_center::consul::Consul;
pub use crate::service_register_center::eureka::Eureka;
pub use crate::service_register_center::typos::{HealthCheck, Registration, ServiceEndpoint};

/// 服务注册与发现接口
///
/// 定义了服务注册、心跳续约、注销和实例查询的核心功能
#[async_trait]
pub trait ServiceRegister: Send + Sync + Debug {
    /// 向注册中心注册服务
    ///
    /// # 参数
    /// * `registration` - 包含服务信息的注册对象
    ///
    /// # 返回
    /// 成功返回 Ok(()), 连接失败返回 Error::Connectivity，
    /// 实例重复返回 Error::Conflict
    async fn register(&self, registration: &Registration) -> Result<(), Error>;

    /// 从注册中心注销服务
    ///
    /// # 参数
    /// * `service_id` - 服务实例的唯一标识
    ///
    /// # 返回
    /// 成功返回 Ok(()), 失败返回 Error
    async fn deregister(&self, service_id: &str) -> Result<(), Error>;

    /// 向注册中心上报一次心跳
    ///
    /// # 参数
    /// * `service_id` - 服务实例的唯一标识
    ///
    /// # 返回
    /// 注册信息已不被注册中心认可时返回 Error::RegistrationExpired，
    /// 调用方应重新注册
    async fn heartbeat(&self, service_id: &str) -> Result<(), Error>;

    /// 从注册中心获取某个服务的全部实例
    ///
    /// # 参数
    /// * `service_name` - 服务名称
    ///
    /// # 返回
    /// 返回该服务当前已知的实例端点列表，服务不存在时返回空列表
    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error>;
}

/// 创建服务注册中心实例
///
/// 根据配置创建服务注册中心的具体实现，后端类型只在此处分支
///
/// # 参数
/// * `config` - 应用配置对象
///
/// # 返回
/// 返回一个实现了 ServiceRegister 特征的 Arc 包装对象
pub fn service_register_center(config: &AppConfig) -> Arc<dyn ServiceRegister> {
    match config.service_center.backend {
        RegistryKind::Consul => Arc::new(Consul::from_config(config)),
        RegistryKind::Eureka => Arc::new(Eureka::from_config(config)),
    }
}
