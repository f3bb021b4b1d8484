use std::time::Duration;

use tracing::{debug, error};

use common::config::SubscriptionConfig;
use common::service_register_center::ServiceEndpoint;

use crate::subscription::SubscriptionDetails;

/// 订阅服务客户端
///
/// 按候选端点顺序逐个尝试，第一个返回完整订阅信息的端点胜出。
/// 每次尝试带独立超时，单个不可达端点不会拖垮整条链路。
/// 所有候选都失败时返回None，由调用方按无订阅处理。
#[derive(Debug)]
pub struct SubscriptionClient {
    client: reqwest::Client,
    active_subs_path: String,
    request_timeout: Duration,
}

impl SubscriptionClient {
    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            active_subs_path: config.active_subs_path.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// 逐个候选端点查询用户的有效订阅
    pub async fn fetch_active(
        &self,
        candidates: &[ServiceEndpoint],
        request_id: Option<&str>,
        user_id: &str,
    ) -> Option<SubscriptionDetails> {
        for endpoint in candidates {
            let url = self.active_subs_url(endpoint, user_id);
            debug!(request_id = ?request_id, "Subscription details endpoint: {}", url);

            let mut request = self
                .client
                .get(&url)
                .header("X-User-ID", user_id)
                .timeout(self.request_timeout);
            if let Some(request_id) = request_id {
                request = request.header("X-Request-Id", request_id);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<SubscriptionDetails>().await {
                        Ok(details) => return Some(details),
                        Err(e) => {
                            error!(
                                request_id = ?request_id,
                                "Error parsing subscription details from {}: {}", url, e
                            );
                        }
                    }
                }
                Ok(response) => {
                    error!(
                        request_id = ?request_id,
                        "Subscription service response code: {}",
                        response.status()
                    );
                }
                Err(e) => {
                    error!(
                        request_id = ?request_id,
                        "Error fetching subscription details: {}", e
                    );
                }
            }
        }

        None
    }

    fn active_subs_url(&self, endpoint: &ServiceEndpoint, user_id: &str) -> String {
        let path = if self.active_subs_path.starts_with('/') {
            self.active_subs_path.clone()
        } else {
            format!("/{}", self.active_subs_path)
        };
        format!("{}{}?userId={}", endpoint.base_url(), path, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// 单个模拟订阅服务实例的状态
    #[derive(Debug)]
    struct AuthorityState {
        hits: AtomicU32,
        seen_user_header: AtomicU32,
        behavior: Behavior,
    }

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Ok,
        ServerError,
        IncompleteBody,
        SlowOk,
    }

    async fn active_subscriptions(
        State(state): State<Arc<AuthorityState>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<serde_json::Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if headers.contains_key("X-User-ID") {
            state.seen_user_header.fetch_add(1, Ordering::SeqCst);
        }

        match state.behavior {
            Behavior::Ok => (StatusCode::OK, Json(subscription_body())),
            Behavior::ServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "boom"})),
            ),
            Behavior::IncompleteBody => (
                StatusCode::OK,
                Json(json!({"subscription": {
                    "subscription_id": "sub-9",
                    "pack_id": "pack-9",
                    "expires_at": 1893456000000i64,
                }})),
            ),
            Behavior::SlowOk => {
                tokio::time::sleep(Duration::from_millis(600)).await;
                (StatusCode::OK, Json(subscription_body()))
            }
        }
    }

    fn subscription_body() -> serde_json::Value {
        json!({
            "subscription": {
                "subscription_id": "sub-1",
                "pack_id": "pack-1",
                "expires_at": 1893456000000i64,
            },
            "pack": {
                "privileges": ["analytic:*"],
            },
        })
    }

    async fn spawn_authority(behavior: Behavior) -> (ServiceEndpoint, Arc<AuthorityState>) {
        let state = Arc::new(AuthorityState {
            hits: AtomicU32::new(0),
            seen_user_header: AtomicU32::new(0),
            behavior,
        });
        let app = Router::new()
            .route("/api/v1/subscriptions/active", get(active_subscriptions))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (endpoint_for(addr), state)
    }

    fn endpoint_for(addr: SocketAddr) -> ServiceEndpoint {
        ServiceEndpoint {
            service_name: "urlshortener-subscription-service".to_string(),
            scheme: "http".to_string(),
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// 绑定后立刻释放，得到一个必然连接失败的端点
    async fn dead_endpoint() -> ServiceEndpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        endpoint_for(addr)
    }

    fn test_client(timeout_ms: u64) -> SubscriptionClient {
        let config = SubscriptionConfig {
            request_timeout_ms: timeout_ms,
            ..Default::default()
        };
        SubscriptionClient::from_config(&config)
    }

    #[tokio::test]
    async fn test_failover_first_success_wins() {
        let dead = dead_endpoint().await;
        let (erroring, error_state) = spawn_authority(Behavior::ServerError).await;
        let (healthy, healthy_state) = spawn_authority(Behavior::Ok).await;

        let client = test_client(3000);
        let details = client
            .fetch_active(&[dead, erroring, healthy], Some("req-1"), "user-1")
            .await;

        assert!(details.is_some());
        assert_eq!(
            details.unwrap().pack.privileges,
            vec!["analytic:*".to_string()]
        );
        assert_eq!(error_state.hits.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_state.hits.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_state.seen_user_header.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_candidates_exhausted_is_none() {
        let dead = dead_endpoint().await;
        let (erroring, error_state) = spawn_authority(Behavior::ServerError).await;

        let client = test_client(3000);
        let details = client.fetch_active(&[dead, erroring], None, "user-1").await;

        assert!(details.is_none());
        assert_eq!(error_state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incomplete_body_moves_to_next_candidate() {
        let (incomplete, incomplete_state) = spawn_authority(Behavior::IncompleteBody).await;
        let (healthy, healthy_state) = spawn_authority(Behavior::Ok).await;

        let client = test_client(3000);
        let details = client
            .fetch_active(&[incomplete, healthy], None, "user-1")
            .await;

        assert!(details.is_some());
        assert_eq!(incomplete_state.hits.load(Ordering::SeqCst), 1);
        assert_eq!(healthy_state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_candidate_times_out_and_fails_over() {
        let (slow, _slow_state) = spawn_authority(Behavior::SlowOk).await;
        let (healthy, healthy_state) = spawn_authority(Behavior::Ok).await;

        // 200毫秒超时，慢端点600毫秒才应答
        let client = test_client(200);
        let details = client.fetch_active(&[slow, healthy], None, "user-1").await;

        assert!(details.is_some());
        assert_eq!(healthy_state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_none() {
        let client = test_client(3000);
        assert!(client.fetch_active(&[], None, "user-1").await.is_none());
    }

    #[test]
    fn test_path_gets_leading_slash() {
        let config = SubscriptionConfig {
            active_subs_path: "api/v1/subscriptions/active".to_string(),
            ..Default::default()
        };
        let client = SubscriptionClient::from_config(&config);

        let endpoint = ServiceEndpoint {
            service_name: "svc".to_string(),
            scheme: "https".to_string(),
            ip: "10.0.0.5".to_string(),
            port: 8443,
        };
        assert_eq!(
            client.active_subs_url(&endpoint, "user-1"),
            "https://10.0.0.5:8443/api/v1/subscriptions/active?userId=user-1"
        );
    }
}
