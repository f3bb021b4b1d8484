use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, error};

use crate::service_register_center::{ServiceEndpoint, ServiceRegister};

/// 服务端点本地缓存
///
/// 保存各个被跟踪服务当前已知的实例端点，由刷新循环定期整体替换。
/// 读取方拿到的是快照副本，迭代期间不受并发刷新影响。
#[derive(Debug, Default)]
pub struct EndpointCache {
    /// 服务名 -> 端点列表
    endpoints: RwLock<HashMap<String, Vec<ServiceEndpoint>>>,
    /// 需要跟踪的服务名
    tracked: Vec<String>,
}

impl EndpointCache {
    /// 创建一个跟踪指定服务的端点缓存
    pub fn new(tracked: Vec<String>) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            tracked,
        }
    }

    /// 查询某个服务的端点快照
    ///
    /// 未知服务返回空列表
    pub fn lookup(&self, service_name: &str) -> Vec<ServiceEndpoint> {
        let endpoints = self.endpoints.read().unwrap();
        endpoints
            .get(service_name)
            .map(|list| {
                list.iter()
                    .filter(|endpoint| endpoint.service_name == service_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 刷新全部跟踪服务的端点
    ///
    /// 每个服务的端点列表整体替换；单个服务查询失败只记录日志，
    /// 该服务保留上一次的快照。
    pub async fn refresh(&self, register: &dyn ServiceRegister) {
        for service_name in &self.tracked {
            match register.list_instances(service_name).await {
                Ok(instances) => {
                    debug!(
                        "Refreshed {} endpoints for service: {}",
                        instances.len(),
                        service_name
                    );
                    self.endpoints
                        .write()
                        .unwrap()
                        .insert(service_name.clone(), instances);
                }
                Err(e) => {
                    error!("Error querying discovery server: {}", e);
                }
            }
        }
    }
}
