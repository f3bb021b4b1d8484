use std::sync::Arc;

use ::cache::KvCache;
use rand::Rng;
use tracing::{debug, error};

use crate::subscription::SubscriptionDetails;

/// 缓存键前缀
const SUBSCRIPTION_KEY_PREFIX: &str = "stats:subs:";

/// TTL抖动下界（毫秒）
const TTL_JITTER_MIN_MS: u64 = 1000;

/// TTL抖动上界（毫秒，不含）
const TTL_JITTER_MAX_MS: u64 = 5000;

/// 订阅信息的按用户缓存
///
/// 写入时在基础TTL上叠加随机抖动，避免大量键同时过期后
/// 集中回源订阅服务。缓存读写失败都按未命中处理，不向上传播。
#[derive(Debug)]
pub struct SubscriptionCache {
    kv: Arc<dyn KvCache>,
    base_ttl_ms: u64,
}

impl SubscriptionCache {
    pub fn new(kv: Arc<dyn KvCache>, base_ttl_ms: u64) -> Self {
        Self { kv, base_ttl_ms }
    }

    /// 读取用户的订阅信息，未命中或出错返回None
    pub async fn get(
        &self,
        request_id: Option<&str>,
        user_id: &str,
    ) -> Option<SubscriptionDetails> {
        debug!(
            request_id = ?request_id,
            "Fetching subscription details for userId {}", user_id
        );

        let key = subscription_key(user_id);
        match self.kv.get(&key).await {
            Ok(Some(value)) => match serde_json::from_str(&value) {
                Ok(details) => Some(details),
                Err(e) => {
                    error!(
                        request_id = ?request_id,
                        "Error parsing cached subscription details: {}", e
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!(
                    request_id = ?request_id,
                    "Error retrieving cached subscription details: {}", e
                );
                None
            }
        }
    }

    /// 写入用户的订阅信息，失败只记录日志
    pub async fn put(
        &self,
        request_id: Option<&str>,
        user_id: &str,
        details: &SubscriptionDetails,
    ) {
        debug!(
            request_id = ?request_id,
            "Adding subscription details for userId {}", user_id
        );

        let value = match serde_json::to_string(details) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    request_id = ?request_id,
                    "Error serializing subscription details: {}", e
                );
                return;
            }
        };

        let key = subscription_key(user_id);
        let ttl = jittered_ttl(self.base_ttl_ms);
        if let Err(e) = self.kv.set_with_ttl(&key, &value, ttl).await {
            error!(
                request_id = ?request_id,
                "Error adding subscription in cache: {}", e
            );
        }
    }
}

fn subscription_key(user_id: &str) -> String {
    format!("{}{}", SUBSCRIPTION_KEY_PREFIX, user_id)
}

/// 基础TTL加上[1000, 5000)毫秒的均匀随机抖动
fn jittered_ttl(base_ms: u64) -> u64 {
    base_ms + rand::rng().random_range(TTL_JITTER_MIN_MS..TTL_JITTER_MAX_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{Subscription, SubscriptionPack};
    use async_trait::async_trait;
    use common::Error;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 记录写入参数的内存缓存替身
    #[derive(Debug, Default)]
    struct RecordingKv {
        store: Mutex<HashMap<String, String>>,
        ttls: Mutex<Vec<u64>>,
        fail_reads: bool,
    }

    #[async_trait]
    impl KvCache for RecordingKv {
        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            if self.fail_reads {
                return Err(Error::Redis("connection reset".to_string()));
            }
            Ok(self.store.lock().unwrap().get(key).cloned())
        }

        async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), Error> {
            self.store
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            self.ttls.lock().unwrap().push(ttl_ms);
            Ok(())
        }
    }

    fn sample_details() -> SubscriptionDetails {
        SubscriptionDetails {
            subscription: Subscription {
                subscription_id: "sub-1".to_string(),
                pack_id: "pack-1".to_string(),
                expires_at: 1893456000000,
            },
            pack: SubscriptionPack {
                privileges: vec!["analytic:*".to_string()],
            },
        }
    }

    #[tokio::test]
    async fn test_round_trip_uses_prefixed_key() {
        let kv = Arc::new(RecordingKv::default());
        let cache = SubscriptionCache::new(kv.clone(), 60000);

        cache.put(Some("req-1"), "user-1", &sample_details()).await;
        assert!(kv.store.lock().unwrap().contains_key("stats:subs:user-1"));

        let cached = cache.get(Some("req-1"), "user-1").await;
        assert_eq!(cached, Some(sample_details()));
    }

    #[tokio::test]
    async fn test_ttl_jitter_bounds() {
        let kv = Arc::new(RecordingKv::default());
        let base = 60000;
        let cache = SubscriptionCache::new(kv.clone(), base);

        for i in 0..25 {
            cache
                .put(None, &format!("user-{}", i), &sample_details())
                .await;
        }

        let ttls = kv.ttls.lock().unwrap().clone();
        assert_eq!(ttls.len(), 25);
        for ttl in &ttls {
            assert!(*ttl >= base + TTL_JITTER_MIN_MS, "ttl too small: {}", ttl);
            assert!(*ttl < base + TTL_JITTER_MAX_MS, "ttl too large: {}", ttl);
        }
        // 抖动必须真正随机，不能退化为常量
        assert!(ttls.iter().any(|ttl| *ttl != ttls[0]));
    }

    #[tokio::test]
    async fn test_read_error_is_a_miss() {
        let kv = Arc::new(RecordingKv {
            fail_reads: true,
            ..Default::default()
        });
        let cache = SubscriptionCache::new(kv, 60000);

        assert_eq!(cache.get(None, "user-1").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let kv = Arc::new(RecordingKv::default());
        kv.store
            .lock()
            .unwrap()
            .insert("stats:subs:user-1".to_string(), "not json".to_string());
        let cache = SubscriptionCache::new(kv, 60000);

        assert_eq!(cache.get(None, "user-1").await, None);
    }
}
