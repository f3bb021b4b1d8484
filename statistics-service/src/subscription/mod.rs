use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// 本模块有同名子模块，这里显式指向cache外部crate
use ::cache::KvCache;
use common::config::{AppConfig, SubscriptionConfig};
use common::service_discovery::EndpointCache;
use common::Error;

pub mod cache;
pub mod client;

pub use self::cache::SubscriptionCache;
pub use client::SubscriptionClient;

/// 统计类权限的前缀，其余权限与本服务无关
const ANALYTIC_PRIVILEGE_PREFIX: &str = "analytic:";

/// 放行全部统计资源的通配权限
const ALL_PRIVILEGE: &str = "analytic:*";

const DEVICE_PRIVILEGE: &str = "analytic:device";
const GEOGRAPHY_PRIVILEGE: &str = "analytic:geograph";
const URL_METRIC_PRIVILEGE: &str = "analytic:url_metric";

/// 受订阅权限保护的统计资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Device,
    Geography,
    Url,
}

impl ResourceKind {
    /// 访问该资源所需权限的前缀
    fn required_privilege(&self) -> &'static str {
        match self {
            ResourceKind::Device => DEVICE_PRIVILEGE,
            ResourceKind::Geography => GEOGRAPHY_PRIVILEGE,
            ResourceKind::Url => URL_METRIC_PRIVILEGE,
        }
    }
}

/// 用户的订阅详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDetails {
    pub subscription: Subscription,
    pub pack: SubscriptionPack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub pack_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPack {
    pub privileges: Vec<String>,
}

/// 订阅鉴权服务
///
/// 先查缓存，未命中时经端点缓存定位订阅服务并带故障转移回源。
/// 两条路都查不到订阅时拒绝访问，宁可错杀不可放过。
#[derive(Debug)]
pub struct SubscriptionService {
    service_name: String,
    endpoints: Arc<EndpointCache>,
    client: SubscriptionClient,
    cache: SubscriptionCache,
}

impl SubscriptionService {
    /// 根据配置构造订阅鉴权服务，内部建立Redis缓存连接
    pub async fn from_config(
        config: &AppConfig,
        endpoints: Arc<EndpointCache>,
    ) -> Result<Self, Error> {
        let kv = ::cache::kv_cache(config).await?;
        Ok(Self::new(&config.subscription, kv, endpoints))
    }

    pub fn new(
        config: &SubscriptionConfig,
        kv: Arc<dyn KvCache>,
        endpoints: Arc<EndpointCache>,
    ) -> Self {
        Self {
            service_name: config.service_name.clone(),
            endpoints,
            client: SubscriptionClient::from_config(config),
            cache: SubscriptionCache::new(kv, config.cache_ttl_ms),
        }
    }

    /// 判断用户是否有权访问指定的统计资源
    ///
    /// 查不到订阅信息一律拒绝
    pub async fn is_user_allowed_to_access_resource(
        &self,
        request_id: Option<&str>,
        user_id: &str,
        resource: ResourceKind,
    ) -> bool {
        debug!(
            request_id = ?request_id,
            "Checking if user {} is allowed to access {:?} metrics", user_id, resource
        );

        let Some(details) = self
            .fetch_subscription_details_for_user(request_id, user_id)
            .await
        else {
            info!(
                request_id = ?request_id,
                "No subscription details found for userId {}", user_id
            );
            return false;
        };

        let privileges: Vec<&String> = details
            .pack
            .privileges
            .iter()
            .filter(|entry| entry.starts_with(ANALYTIC_PRIVILEGE_PREFIX))
            .collect();

        if privileges.iter().any(|entry| entry.as_str() == ALL_PRIVILEGE) {
            return true;
        }

        let required = resource.required_privilege();
        privileges.iter().any(|entry| entry.starts_with(required))
    }

    /// 缓存旁路读取订阅详情
    ///
    /// 未命中时回源订阅服务并写回缓存
    async fn fetch_subscription_details_for_user(
        &self,
        request_id: Option<&str>,
        user_id: &str,
    ) -> Option<SubscriptionDetails> {
        if let Some(details) = self.cache.get(request_id, user_id).await {
            return Some(details);
        }

        let candidates = self.endpoints.lookup(&self.service_name);
        let details = self
            .client
            .fetch_active(&candidates, request_id, user_id)
            .await?;

        debug!(
            request_id = ?request_id,
            "Subscription details fetched: {:?}", details
        );
        self.cache.put(request_id, user_id, &details).await;
        Some(details)
    }
}
