/**
 * Redis缓存模块实现
 *
 * 基于Redis实现带TTL的键值缓存。写入使用SET ... PX，
 * 过期完全交给Redis处理，读取到None即视为未命中。
 *
 * 该实现采用异步编程模式，通过连接复用和信号量机制控制并发。
 */
use crate::KvCache;
use async_trait::async_trait;
use common::config::AppConfig;
use common::error::Error;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// 默认最大并发连接获取数
const DEFAULT_MAX_CONNECTIONS: usize = 20;

/// Redis键值缓存实现
pub struct RedisKvCache {
    /// 连接管理器，复用同一条多路复用连接
    connection_manager: Mutex<MultiplexedConnection>,
    /// 限制并发连接获取的信号量
    connection_semaphore: Arc<Semaphore>,
}

/// 为RedisKvCache实现Debug特征
impl Debug for RedisKvCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKvCache")
            .field("connection_semaphore", &self.connection_semaphore)
            .finish()
    }
}

impl RedisKvCache {
    /// 从配置创建RedisKvCache实例
    ///
    /// 立即建立连接，配置了connection_timeout_ms时连接超时同样报错
    ///
    /// # 参数
    /// * `config` - 应用配置对象
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let client = Client::open(config.redis.url())?;

        let connect = client.get_multiplexed_async_connection();
        let connection = match config.redis.connection_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), connect)
                .await
                .map_err(|_| Error::Redis(format!("连接Redis超时: {}ms", ms)))??,
            None => connect.await?,
        };

        Ok(Self {
            connection_manager: Mutex::new(connection),
            connection_semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
        })
    }

    /// 获取连接的辅助方法，使用信号量限制并发连接获取
    async fn get_connection(&self) -> Result<MultiplexedConnection, Error> {
        let _permit = self
            .connection_semaphore
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("获取连接信号量失败: {}", e)))?;

        let conn = self.connection_manager.lock().await;
        Ok(conn.clone())
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    /// 读取键对应的值
    ///
    /// # 参数
    /// * `key` - 缓存键
    ///
    /// # 返回
    /// * 键存在则返回值，不存在或已过期则返回None
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.get_connection().await?;
        let result = conn.get::<_, Option<String>>(key).await?;
        Ok(result)
    }

    /// 写入键值并以毫秒为单位设置过期时间
    ///
    /// # 参数
    /// * `key` - 缓存键
    /// * `value` - 缓存值
    /// * `ttl_ms` - 过期时间（毫秒）
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
