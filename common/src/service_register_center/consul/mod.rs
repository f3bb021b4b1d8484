use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::service_register_center::typos::{HealthCheck, Registration, ServiceEndpoint};
use crate::service_register_center::ServiceRegister;
use crate::Error;

/// Consul client configuration options
#[derive(Debug, Clone)]
pub struct ConsulOptions {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub timeout_ms: u64,
}

impl ConsulOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.service_center.host.clone(),
            port: config.service_center.port,
            timeout_ms: config.service_center.timeout_ms,
            protocol: config.service_center.protocol.clone(),
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Consul service registry implementation
///
/// 通过agent HTTP API注册服务并维护TTL健康检查，
/// 心跳即是一次 check pass 上报
#[derive(Debug)]
pub struct Consul {
    pub options: ConsulOptions,
    client: reqwest::Client,
}

impl Consul {
    /// Create a new Consul client from application config
    pub fn from_config(config: &AppConfig) -> Self {
        let options = ConsulOptions::from_config(config);

        Self {
            options,
            client: reqwest::Client::new(),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }
}

#[async_trait]
impl ServiceRegister for Consul {
    async fn register(&self, registration: &Registration) -> Result<(), Error> {
        // 直接使用HTTP API与Consul交互
        let url = format!("{}/v1/agent/service/register", self.options.base_url());

        debug!(
            "Registering service: {} ({}:{})",
            registration.name, registration.host, registration.port
        );

        let check = registration
            .check
            .clone()
            .unwrap_or_else(|| HealthCheck::for_service(&registration.name));

        // 构建服务注册JSON，secure以Meta元数据下发，供发现方推导协议
        let payload = json!({
            "ID": registration.id,
            "Name": registration.name,
            "Address": registration.host,
            "Port": registration.port,
            "Meta": {
                "secure": registration.secure.to_string(),
            },
            "Check": {
                "Name": check.name,
                "TTL": check.ttl,
                "Timeout": check.timeout,
                "DeregisterCriticalServiceAfter": check.deregister_after,
            }
        });

        // 发送HTTP请求
        let response = self
            .client
            .put(&url)
            .json(&payload)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            info!("Service registered successfully: {}", registration.id);
            return Ok(());
        }

        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("Failed to register service: HTTP {}: {}", status, error_text);

        if status == StatusCode::CONFLICT {
            return Err(Error::Conflict(format!(
                "service instance already registered: {}",
                error_text
            )));
        }
        Err(Error::Connectivity(format!("HTTP {}: {}", status, error_text)))
    }

    async fn deregister(&self, service_id: &str) -> Result<(), Error> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.options.base_url(),
            service_id
        );

        debug!("Deregistering service: {}", service_id);

        let response = self
            .client
            .put(&url)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            info!("Service deregistered successfully: {}", service_id);
            Ok(())
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                "Failed to deregister service: HTTP {}: {}",
                status, error_text
            );
            Err(Error::RemoteCall(format!("HTTP {}: {}", status, error_text)))
        }
    }

    async fn heartbeat(&self, service_id: &str) -> Result<(), Error> {
        let url = format!(
            "{}/v1/agent/check/pass/service:{}",
            self.options.base_url(),
            service_id
        );

        let response = self
            .client
            .put(&url)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("TTL health check updated for service: {}", service_id);
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        // agent不再认识该检查时要求调用方重新注册
        if status == StatusCode::NOT_FOUND
            || error_text.contains("Unknown check")
            || error_text.contains("CheckID")
        {
            return Err(Error::RegistrationExpired(format!(
                "check for service {} is not known to the agent: {}",
                service_id, error_text
            )));
        }

        Err(Error::RemoteCall(format!("HTTP {}: {}", status, error_text)))
    }

    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error> {
        let url = format!("{}/v1/agent/services", self.options.base_url());

        debug!("Querying discovery server for service: {}", service_name);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Failed to list services: HTTP {}: {}", status, error_text);
            return Err(Error::RemoteCall(format!("HTTP {}: {}", status, error_text)));
        }

        // 响应为 实例ID -> 服务描述 的映射
        let services: HashMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::RemoteCall(format!("Failed to parse response: {}", e)))?;

        let mut endpoints = Vec::new();
        for (id, service) in services {
            let name = match service.get("Service").and_then(|v| v.as_str()) {
                Some(name) => name,
                None => {
                    debug!("Skipping malformed directory entry: {}", id);
                    continue;
                }
            };
            if name != service_name {
                continue;
            }

            let address = match service.get("Address").and_then(|v| v.as_str()) {
                Some(address) if !address.is_empty() => address,
                _ => {
                    debug!("Skipping directory entry without address: {}", id);
                    continue;
                }
            };
            let port = match service
                .get("Port")
                .and_then(|v| v.as_u64())
                .and_then(|p| u16::try_from(p).ok())
            {
                Some(port) => port,
                None => {
                    debug!("Skipping directory entry without valid port: {}", id);
                    continue;
                }
            };

            // Meta.secure允许bool或字符串两种写法
            let secure = service
                .get("Meta")
                .and_then(|meta| meta.get("secure"))
                .map(|v| v.as_bool() == Some(true) || v.as_str() == Some("true"))
                .unwrap_or(false);

            let endpoint = ServiceEndpoint {
                service_name: service_name.to_string(),
                scheme: if secure { "https" } else { "http" }.to_string(),
                ip: address.to_string(),
                port,
            };

            debug!("Instance fetched from discovery server: {:?}", endpoint);
            endpoints.push(endpoint);
        }

        if endpoints.is_empty() {
            debug!("No instances found for service: {}", service_name);
        } else {
            info!(
                "Found {} instances of service: {}",
                endpoints.len(),
                service_name
            );
        }

        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CheckConfig, LeaseConfig, LogConfig, RedisConfig, RegistryKind, ServerConfig,
        ServiceCenterConfig, SubscriptionConfig,
    };
    use axum::extract::{Path, State};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct AgentState {
        registrations: Mutex<Vec<serde_json::Value>>,
        passes: Mutex<Vec<String>>,
        deregistrations: Mutex<Vec<String>>,
        services: Mutex<serde_json::Value>,
        known_checks: Mutex<Vec<String>>,
    }

    /// 内嵌一个模拟Consul agent的HTTP服务
    async fn spawn_mock_agent(state: Arc<AgentState>) -> SocketAddr {
        async fn register(
            State(state): State<Arc<AgentState>>,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            let id = body["ID"].as_str().unwrap_or_default().to_string();
            let mut registrations = state.registrations.lock().unwrap();
            if registrations
                .iter()
                .any(|r| r["ID"].as_str() == Some(id.as_str()))
            {
                return StatusCode::CONFLICT;
            }
            state.known_checks.lock().unwrap().push(id);
            registrations.push(body);
            StatusCode::OK
        }

        async fn pass(
            State(state): State<Arc<AgentState>>,
            Path(check_id): Path<String>,
        ) -> (StatusCode, String) {
            let service_id = check_id.trim_start_matches("service:").to_string();
            if state
                .known_checks
                .lock()
                .unwrap()
                .contains(&service_id)
            {
                state.passes.lock().unwrap().push(service_id);
                (StatusCode::OK, String::new())
            } else {
                (
                    StatusCode::NOT_FOUND,
                    format!("Unknown check \"{}\"", check_id),
                )
            }
        }

        async fn deregister(
            State(state): State<Arc<AgentState>>,
            Path(service_id): Path<String>,
        ) -> StatusCode {
            state.deregistrations.lock().unwrap().push(service_id);
            StatusCode::OK
        }

        async fn services(State(state): State<Arc<AgentState>>) -> Json<serde_json::Value> {
            Json(state.services.lock().unwrap().clone())
        }

        let app = Router::new()
            .route("/v1/agent/service/register", put(register))
            .route("/v1/agent/check/pass/{check_id}", put(pass))
            .route("/v1/agent/service/deregister/{service_id}", put(deregister))
            .route("/v1/agent/services", get(services))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn test_config(agent: SocketAddr) -> AppConfig {
        AppConfig {
            log: LogConfig {
                level: "debug".to_string(),
                format: None,
                output: "console".to_string(),
            },
            server: ServerConfig {
                name: "statistics-service".to_string(),
                host: "127.0.0.1".to_string(),
                port: 7979,
                secure: false,
            },
            service_center: ServiceCenterConfig {
                backend: RegistryKind::Consul,
                host: agent.ip().to_string(),
                port: agent.port(),
                protocol: "http".to_string(),
                timeout_ms: 2000,
                enabled: true,
                max_retries: 5,
                initial_backoff_ms: 1000,
                heartbeat_interval_ms: 30000,
                query_interval_ms: 30000,
                fatal_exit_code: 1,
                check: CheckConfig::default(),
                lease: LeaseConfig::default(),
            },
            redis: RedisConfig {
                host: "127.0.0.1".to_string(),
                port: 6379,
                db: None,
                password: None,
                connection_timeout_ms: None,
            },
            subscription: SubscriptionConfig::default(),
        }
    }

    fn test_registration(id: &str) -> Registration {
        Registration {
            id: id.to_string(),
            name: "statistics-service".to_string(),
            host: "10.0.0.5".to_string(),
            port: 7979,
            secure: false,
            check: Some(HealthCheck::for_service("statistics-service")),
        }
    }

    #[tokio::test]
    async fn register_sends_ttl_check_payload() {
        let state = Arc::new(AgentState::default());
        let addr = spawn_mock_agent(state.clone()).await;
        let consul = Consul::from_config(&test_config(addr));

        consul
            .register(&test_registration("stats-1"))
            .await
            .unwrap();

        let registrations = state.registrations.lock().unwrap();
        assert_eq!(registrations.len(), 1);
        let body = &registrations[0];
        assert_eq!(body["ID"], "stats-1");
        assert_eq!(body["Name"], "statistics-service");
        assert_eq!(body["Address"], "10.0.0.5");
        assert_eq!(body["Port"], 7979);
        assert_eq!(body["Meta"]["secure"], "false");
        assert_eq!(body["Check"]["TTL"], "90s");
        assert_eq!(body["Check"]["DeregisterCriticalServiceAfter"], "120s");
    }

    #[tokio::test]
    async fn register_duplicate_is_conflict() {
        let state = Arc::new(AgentState::default());
        let addr = spawn_mock_agent(state).await;
        let consul = Consul::from_config(&test_config(addr));

        consul
            .register(&test_registration("stats-dup"))
            .await
            .unwrap();
        let err = consul
            .register(&test_registration("stats-dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn register_unreachable_agent_is_connectivity() {
        // 拿到一个当前未被监听的端口
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let consul = Consul::from_config(&test_config(addr));
        let err = consul
            .register(&test_registration("stats-x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }

    #[tokio::test]
    async fn heartbeat_passes_known_check() {
        let state = Arc::new(AgentState::default());
        let addr = spawn_mock_agent(state.clone()).await;
        let consul = Consul::from_config(&test_config(addr));

        consul
            .register(&test_registration("stats-hb"))
            .await
            .unwrap();
        consul.heartbeat("stats-hb").await.unwrap();

        assert_eq!(state.passes.lock().unwrap().as_slice(), ["stats-hb"]);
    }

    #[tokio::test]
    async fn heartbeat_unknown_check_is_registration_expired() {
        let state = Arc::new(AgentState::default());
        let addr = spawn_mock_agent(state).await;
        let consul = Consul::from_config(&test_config(addr));

        let err = consul.heartbeat("never-registered").await.unwrap_err();
        assert!(matches!(err, Error::RegistrationExpired(_)));
    }

    #[tokio::test]
    async fn deregister_targets_service_id() {
        let state = Arc::new(AgentState::default());
        let addr = spawn_mock_agent(state.clone()).await;
        let consul = Consul::from_config(&test_config(addr));

        consul.deregister("stats-gone").await.unwrap();
        assert_eq!(
            state.deregistrations.lock().unwrap().as_slice(),
            ["stats-gone"]
        );
    }

    #[tokio::test]
    async fn list_instances_filters_and_maps_scheme() {
        let state = Arc::new(AgentState::default());
        *state.services.lock().unwrap() = json!({
            "subs-1": {
                "ID": "subs-1",
                "Service": "urlshortener-subscription-service",
                "Address": "10.0.0.7",
                "Port": 8443,
                "Meta": { "secure": "true" }
            },
            "subs-2": {
                "ID": "subs-2",
                "Service": "urlshortener-subscription-service",
                "Address": "10.0.0.8",
                "Port": 8080,
                "Meta": { "secure": false }
            },
            "other-1": {
                "ID": "other-1",
                "Service": "urlshortener-redirect-service",
                "Address": "10.0.0.9",
                "Port": 8080
            },
            "broken-1": {
                "ID": "broken-1",
                "Service": "urlshortener-subscription-service"
            }
        });
        let addr = spawn_mock_agent(state).await;
        let consul = Consul::from_config(&test_config(addr));

        let mut endpoints = consul
            .list_instances("urlshortener-subscription-service")
            .await
            .unwrap();
        endpoints.sort_by(|a, b| a.ip.cmp(&b.ip));

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].ip, "10.0.0.7");
        assert_eq!(endpoints[0].scheme, "https");
        assert_eq!(endpoints[0].port, 8443);
        assert_eq!(endpoints[1].ip, "10.0.0.8");
        assert_eq!(endpoints[1].scheme, "http");
        assert!(endpoints
            .iter()
            .all(|e| e.service_name == "urlshortener-subscription-service"));
    }
}
