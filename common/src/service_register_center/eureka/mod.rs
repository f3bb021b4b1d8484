use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::service_register_center::typos::{Registration, ServiceEndpoint};
use crate::service_register_center::ServiceRegister;
use crate::Error;

/// Eureka client configuration options
#[derive(Debug, Clone)]
pub struct EurekaOptions {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub timeout_ms: u64,
    pub renewal_interval: Duration,
    pub lease_duration_secs: u64,
    pub fetch_interval: Duration,
}

impl EurekaOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.service_center.host.clone(),
            port: config.service_center.port,
            protocol: config.service_center.protocol.clone(),
            timeout_ms: config.service_center.timeout_ms,
            renewal_interval: Duration::from_secs(config.service_center.lease.renewal_interval_secs),
            lease_duration_secs: config.service_center.lease.duration_secs,
            fetch_interval: Duration::from_millis(config.service_center.query_interval_ms),
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// 注册后台任务句柄
///
/// 续约与快照任务随注册启动，注销时终止
#[derive(Debug, Default)]
struct LeaseTasks {
    app: Option<String>,
    renewal: Option<JoinHandle<()>>,
    fetch: Option<JoinHandle<()>>,
}

impl LeaseTasks {
    fn abort_all(&mut self) {
        if let Some(handle) = self.renewal.take() {
            handle.abort();
        }
        if let Some(handle) = self.fetch.take() {
            handle.abort();
        }
    }
}

/// Eureka service registry implementation
///
/// 租约模式：注册后由后台任务定期续约并抓取注册表快照，
/// heartbeat 无需额外动作，list_instances 只读本地快照
#[derive(Debug)]
pub struct Eureka {
    pub options: EurekaOptions,
    client: reqwest::Client,
    /// 注册表快照: 应用名(小写) -> 实例端点
    apps: Arc<RwLock<HashMap<String, Vec<ServiceEndpoint>>>>,
    tasks: Mutex<LeaseTasks>,
}

impl Eureka {
    /// Create a new Eureka client from application config
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            options: EurekaOptions::from_config(config),
            client: reqwest::Client::new(),
            apps: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(LeaseTasks::default()),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }

    /// 构建Eureka实例文档
    fn instance_document(&self, registration: &Registration) -> serde_json::Value {
        let scheme = if registration.secure { "https" } else { "http" };
        json!({
            "instance": {
                "instanceId": registration.id,
                "hostName": registration.host,
                "app": registration.name,
                "ipAddr": registration.host,
                "status": "UP",
                "port": {
                    "$": registration.port,
                    "@enabled": true,
                },
                "vipAddress": registration.name,
                "secureVipAddress": registration.name,
                "statusPageUrl": format!(
                    "{}://{}:{}/info",
                    scheme, registration.host, registration.port
                ),
                "dataCenterInfo": {
                    "name": "MyOwn",
                    "@class": "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo",
                },
                "leaseInfo": {
                    "renewalIntervalInSecs": self.options.renewal_interval.as_secs(),
                    "durationInSecs": self.options.lease_duration_secs,
                },
            }
        })
    }

    /// 抓取一次注册表快照并替换本地缓存
    async fn refresh_snapshot(&self) -> Result<(), Error> {
        let url = format!("{}/eureka/apps", self.options.base_url());
        let snapshot = fetch_snapshot(&self.client, &url, self.request_timeout()).await?;
        *self.apps.write().unwrap() = snapshot;
        Ok(())
    }

    /// 启动续约与快照后台任务，旧任务先终止
    async fn start_lease_tasks(&self, registration: &Registration) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        tasks.app = Some(registration.name.clone());

        let timeout = self.request_timeout();
        let base_url = self.options.base_url();

        // 续约任务，租约失效时重新注册
        let client = self.client.clone();
        let renew_url = format!("{}/eureka/apps/{}/{}", base_url, registration.name, registration.id);
        let register_url = format!("{}/eureka/apps/{}", base_url, registration.name);
        let document = self.instance_document(registration);
        let interval = self.options.renewal_interval;
        let service_id = registration.id.clone();
        tasks.renewal = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match client.put(&renew_url).timeout(timeout).send().await {
                    Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                        warn!(
                            "Lease for service {} is unknown to Eureka, re-registering",
                            service_id
                        );
                        match client
                            .post(&register_url)
                            .json(&document)
                            .timeout(timeout)
                            .send()
                            .await
                        {
                            Ok(response) if response.status().is_success() => {
                                info!("Service re-registered with Eureka: {}", service_id);
                            }
                            Ok(response) => error!(
                                "Failed to re-register service {}: HTTP {}",
                                service_id,
                                response.status()
                            ),
                            Err(e) => {
                                error!("Failed to re-register service {}: {}", service_id, e)
                            }
                        }
                    }
                    Ok(response) if response.status().is_success() => {
                        debug!("Lease renewed for service: {}", service_id);
                    }
                    Ok(response) => error!(
                        "Lease renewal for service {} failed: HTTP {}",
                        service_id,
                        response.status()
                    ),
                    Err(e) => error!("Lease renewal for service {} failed: {}", service_id, e),
                }
            }
        }));

        // 注册表快照任务
        let client = self.client.clone();
        let apps = self.apps.clone();
        let fetch_url = format!("{}/eureka/apps", base_url);
        let interval = self.options.fetch_interval;
        tasks.fetch = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match fetch_snapshot(&client, &fetch_url, timeout).await {
                    Ok(snapshot) => {
                        *apps.write().unwrap() = snapshot;
                    }
                    Err(e) => error!("Error querying discovery server: {}", e),
                }
            }
        }));

        info!(
            "Started Eureka lease tasks for service: {} (renewal: {:?}, fetch: {:?})",
            registration.id, self.options.renewal_interval, self.options.fetch_interval
        );
    }
}

#[async_trait]
impl ServiceRegister for Eureka {
    async fn register(&self, registration: &Registration) -> Result<(), Error> {
        let url = format!("{}/eureka/apps/{}", self.options.base_url(), registration.name);

        debug!(
            "Registering service with Eureka: {} ({}:{})",
            registration.name, registration.host, registration.port
        );

        let document = self.instance_document(registration);
        let response = self
            .client
            .post(&url)
            .json(&document)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
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
            return Err(Error::Connectivity(format!("HTTP {}: {}", status, error_text)));
        }

        info!("Service registered successfully: {}", registration.id);

        // 注册完成即抓取一次快照，保证首次端点解析可用
        if let Err(e) = self.refresh_snapshot().await {
            warn!("Initial registry snapshot fetch failed: {}", e);
        }

        self.start_lease_tasks(registration).await;
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), Error> {
        // 先停掉续约与快照任务
        let app = {
            let mut tasks = self.tasks.lock().await;
            tasks.abort_all();
            tasks.app.take()
        };

        let app = match app {
            Some(app) => app,
            None => {
                warn!("Service {} was never registered with Eureka, skipping", service_id);
                return Ok(());
            }
        };

        let url = format!("{}/eureka/apps/{}/{}", self.options.base_url(), app, service_id);

        debug!("Deregistering service: {}", service_id);

        let response = self
            .client
            .delete(&url)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            info!("Service deregistered successfully: {}", service_id);
            Ok(())
        } else {
            let status = response.status();
            error!("Failed to deregister service: HTTP {}", status);
            Err(Error::RemoteCall(format!("HTTP {}", status)))
        }
    }

    async fn heartbeat(&self, service_id: &str) -> Result<(), Error> {
        // 租约续约由后台任务负责，这里无需额外动作
        debug!("Heartbeat is a no-op for Eureka service: {}", service_id);
        Ok(())
    }

    async fn list_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error> {
        let apps = self.apps.read().unwrap();
        Ok(apps
            .get(&service_name.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// 抓取并解析 GET /eureka/apps 的注册表
async fn fetch_snapshot(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<HashMap<String, Vec<ServiceEndpoint>>, Error> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .timeout(timeout)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::RemoteCall(format!("HTTP {}", response.status())));
    }

    let body: serde_json::Value = response.json().await?;
    Ok(parse_applications(&body))
}

/// 解析注册表JSON为本地快照
///
/// 只保留状态为UP的实例，字段残缺的实例跳过
fn parse_applications(body: &serde_json::Value) -> HashMap<String, Vec<ServiceEndpoint>> {
    let mut snapshot: HashMap<String, Vec<ServiceEndpoint>> = HashMap::new();

    let applications = body
        .get("applications")
        .and_then(|a| a.get("application"));

    for application in as_items(applications) {
        let name = match application.get("name").and_then(|v| v.as_str()) {
            Some(name) => name.to_lowercase(),
            None => continue,
        };

        let endpoints = snapshot.entry(name.clone()).or_default();
        for instance in as_items(application.get("instance")) {
            if instance.get("status").and_then(|v| v.as_str()) != Some("UP") {
                continue;
            }

            let ip = match instance
                .get("ipAddr")
                .and_then(|v| v.as_str())
                .or_else(|| instance.get("hostName").and_then(|v| v.as_str()))
            {
                Some(ip) => ip,
                None => {
                    debug!("Skipping Eureka instance without address");
                    continue;
                }
            };
            let port = match instance
                .get("port")
                .and_then(|p| p.get("$"))
                .and_then(|v| v.as_u64())
                .and_then(|p| u16::try_from(p).ok())
            {
                Some(port) => port,
                None => {
                    debug!("Skipping Eureka instance without valid port");
                    continue;
                }
            };

            let secure = instance
                .get("securePort")
                .and_then(|p| p.get("@enabled"))
                .map(|v| v.as_bool() == Some(true) || v.as_str() == Some("true"))
                .unwrap_or(false);

            let endpoint = ServiceEndpoint {
                service_name: name.clone(),
                scheme: if secure { "https" } else { "http" }.to_string(),
                ip: ip.to_string(),
                port,
            };

            debug!("Instance fetched from discovery server: {:?}", endpoint);
            endpoints.push(endpoint);
        }
    }

    snapshot
}

/// Eureka对单元素集合可能省略数组层，统一为列表
fn as_items(value: Option<&serde_json::Value>) -> Vec<&serde_json::Value> {
    match value {
        Some(serde_json::Value::Array(items)) => items.iter().collect(),
        Some(object @ serde_json::Value::Object(_)) => vec![object],
        _ => Vec::new(),
    }
}
