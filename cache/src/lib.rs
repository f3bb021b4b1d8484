/**
 * 缓存模块
 *
 * 本模块提供带TTL的键值缓存接口和Redis实现，
 * 供上层服务缓存订阅信息等短生命周期数据。
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use common::config::AppConfig;
use common::error::Error;

mod redis;

/// 键值缓存特征
///
/// 所有值以字符串形式存取，过期由缓存后端负责
#[async_trait]
pub trait KvCache: Sync + Send + Debug {
    /// 读取键对应的值
    ///
    /// # 参数
    /// * `key` - 缓存键
    ///
    /// # 返回
    /// * 键存在则返回对应的值，不存在或已过期则返回None
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// 写入键值并设置过期时间
    ///
    /// # 参数
    /// * `key` - 缓存键
    /// * `value` - 缓存值
    /// * `ttl_ms` - 过期时间（毫秒）
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), Error>;
}

/// 根据配置创建缓存实例
///
/// 启动时即建立Redis连接，连接失败直接返回错误由调用方决定去留
///
/// # 参数
/// * `config` - 应用配置
///
/// # 返回
/// * 实现了KvCache特征的实例，被Arc包裹以便共享
pub async fn kv_cache(config: &AppConfig) -> Result<Arc<dyn KvCache>, Error> {
    Ok(Arc::new(redis::RedisKvCache::from_config(config).await?))
}
