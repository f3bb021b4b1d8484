use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::service_discovery::endpoint_cache::EndpointCache;
use crate::service_register_center::{service_register_center, Registration, ServiceRegister};
use crate::Error;

/// 注册状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// 尚未注册或注册已失效
    Unregistered,
    /// 注册请求进行中（含重试）
    Registering,
    /// 注册中心已认可本实例
    Registered,
    /// 重试次数耗尽，终态
    Failed,
}

/// 注册重试策略：指数退避
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 注册尝试总次数上限
    pub max_retries: u32,
    /// 首次失败后的退避时长
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// 第n次失败后的退避时长（n从0开始）: initial × 2^n
    pub fn backoff_delay(&self, failure: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(failure)
    }
}

/// 服务发现运行参数
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub retry_policy: RetryPolicy,
    pub heartbeat_interval: Duration,
    pub refresh_interval: Duration,
    pub enabled: bool,
    pub fatal_exit_code: i32,
}

impl DiscoveryOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry_policy: RetryPolicy {
                max_retries: config.service_center.max_retries,
                initial_backoff: Duration::from_millis(config.service_center.initial_backoff_ms),
            },
            heartbeat_interval: Duration::from_millis(config.service_center.heartbeat_interval_ms),
            refresh_interval: Duration::from_millis(config.service_center.query_interval_ms),
            enabled: config.service_center.enabled,
            fatal_exit_code: config.service_center.fatal_exit_code,
        }
    }
}

/// 心跳与端点刷新定时任务句柄
#[derive(Debug, Default)]
struct TimerHandles {
    heartbeat: Option<JoinHandle<()>>,
    refresh: Option<JoinHandle<()>>,
}

impl TimerHandles {
    fn abort_all(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
    }
}

/// 服务发现上下文
///
/// 持有注册后端、本服务注册信息与端点缓存，驱动整个注册生命周期：
/// 带指数退避的注册重试、心跳保活、注册失效后的自愈重注册、
/// 端点缓存的定时刷新。重试耗尽时通过关闭通道通知主流程退出。
#[derive(Debug)]
pub struct ServiceDiscovery {
    register: Arc<dyn ServiceRegister>,
    registration: Registration,
    endpoint_cache: Arc<EndpointCache>,
    options: DiscoveryOptions,
    timers: Mutex<TimerHandles>,
    state_tx: watch::Sender<RegistrationState>,
    shutdown_tx: mpsc::Sender<i32>,
    shutdown_fired: AtomicBool,
}

impl ServiceDiscovery {
    /// 根据配置构造服务发现上下文
    ///
    /// 返回上下文和致命错误通知接收端，接收端交由主流程监听
    pub fn from_config(
        config: &AppConfig,
        endpoint_cache: Arc<EndpointCache>,
    ) -> (Arc<Self>, mpsc::Receiver<i32>) {
        Self::new(
            service_register_center(config),
            Registration::from_config(config),
            endpoint_cache,
            DiscoveryOptions::from_config(config),
        )
    }

    pub fn new(
        register: Arc<dyn ServiceRegister>,
        registration: Registration,
        endpoint_cache: Arc<EndpointCache>,
        options: DiscoveryOptions,
    ) -> (Arc<Self>, mpsc::Receiver<i32>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (state_tx, _) = watch::channel(RegistrationState::Unregistered);

        let discovery = Arc::new(Self {
            register,
            registration,
            endpoint_cache,
            options,
            timers: Mutex::new(TimerHandles::default()),
            state_tx,
            shutdown_tx,
            shutdown_fired: AtomicBool::new(false),
        });
        (discovery, shutdown_rx)
    }

    /// 当前注册状态的观察端
    pub fn subscribe_state(&self) -> watch::Receiver<RegistrationState> {
        self.state_tx.subscribe()
    }

    /// 本实例的注册信息
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// 启动注册流程
    ///
    /// 服务发现未启用时直接返回。注册成功后先同步刷新一次端点缓存，
    /// 再启动心跳与端点刷新定时任务。
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        if !self.options.enabled {
            info!("Service discovery is disabled, skipping registration");
            return Ok(());
        }
        self.register_with_retry().await
    }

    /// 关停服务发现
    ///
    /// 终止定时任务并尽力注销，注销失败只记录日志
    pub async fn shutdown(&self) {
        if !self.options.enabled {
            return;
        }

        {
            let mut timers = self.timers.lock().await;
            timers.abort_all();
        }

        if *self.state_tx.borrow() == RegistrationState::Unregistered {
            warn!("Service was never registered, skipping deregistration");
            return;
        }

        match self.register.deregister(&self.registration.id).await {
            Ok(()) => info!("已从服务注册中心注销服务: {}", self.registration.id),
            Err(e) => error!("从服务注册中心注销服务失败: {}", e),
        }
        self.set_state(RegistrationState::Unregistered);
    }

    /// 带指数退避的注册循环
    ///
    /// 连续失败达到尝试上限后进入 Failed 终态并触发致命关停通知
    async fn register_with_retry(self: &Arc<Self>) -> Result<(), Error> {
        let max_retries = self.options.retry_policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                info!(
                    "Retrying discovery client registration: {}/{}",
                    attempt, max_retries
                );
            }
            self.set_state(RegistrationState::Registering);

            match self.register.register(&self.registration).await {
                Ok(()) => {
                    info!("Discovery client initialized successfully");
                    self.set_state(RegistrationState::Registered);

                    // 注册成功后立刻刷新端点，首次查询不能落空
                    self.endpoint_cache.refresh(self.register.as_ref()).await;
                    self.start_timers().await;
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to initialize discovery client: {}", e);

                    if attempt >= max_retries {
                        error!(
                            "Discovery client retries exceeded the configured retry attempts: {}. Terminating application",
                            max_retries
                        );
                        self.set_state(RegistrationState::Failed);
                        self.fire_shutdown().await;
                        return Err(e);
                    }

                    let delay = self.options.retry_policy.backoff_delay(attempt - 1);
                    warn!("Retrying registration in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 启动心跳与端点刷新定时任务
    ///
    /// 旧定时任务先全部终止，任何时刻至多一组任务在运行
    async fn start_timers(self: &Arc<Self>) {
        let mut timers = self.timers.lock().await;
        timers.abort_all();

        let discovery = self.clone();
        timers.heartbeat = Some(tokio::spawn(async move {
            discovery.heartbeat_loop().await;
        }));

        let discovery = self.clone();
        timers.refresh = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(discovery.options.refresh_interval).await;
                discovery
                    .endpoint_cache
                    .refresh(discovery.register.as_ref())
                    .await;
            }
        }));

        info!(
            "Started heartbeat ({:?}) and endpoint refresh ({:?}) timers",
            self.options.heartbeat_interval, self.options.refresh_interval
        );
    }

    /// 心跳循环
    ///
    /// 注册失效时终止刷新任务、把状态退回 Unregistered 并重新注册；
    /// 循环随后返回，重注册成功后仍然只有一组定时任务。
    /// 其他心跳错误只记录日志，循环继续。
    ///
    /// 经 register_with_retry → start_timers 间接递归回自身，
    /// 返回签名层面装箱以打断 Send auto-trait 推导环
    fn heartbeat_loop(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                tokio::time::sleep(self.options.heartbeat_interval).await;

                match self.register.heartbeat(&self.registration.id).await {
                    Ok(()) => {
                        debug!("Heartbeat sent for service: {}", self.registration.id);
                    }
                    Err(Error::RegistrationExpired(reason)) => {
                        warn!(
                            "Registration for service {} expired ({}), re-registering",
                            self.registration.id, reason
                        );

                        {
                            let mut timers = self.timers.lock().await;
                            if let Some(handle) = timers.refresh.take() {
                                handle.abort();
                            }
                            // 当前任务即将返回，句柄直接丢弃
                            timers.heartbeat.take();
                        }

                        self.set_state(RegistrationState::Unregistered);
                        if let Err(e) = self.register_with_retry().await {
                            error!("Re-registration failed: {}", e);
                        }
                        return;
                    }
                    Err(e) => {
                        error!(
                            "Heartbeat for service {} failed: {}",
                            self.registration.id, e
                        );
                    }
                }
            }
        })
    }

    fn set_state(&self, state: RegistrationState) {
        if *self.state_tx.borrow() != state {
            debug!("Registration state changed to {:?}", state);
            self.state_tx.send_replace(state);
        }
    }

    /// 通知主流程以致命退出码关停，至多触发一次
    async fn fire_shutdown(&self) {
        if self.shutdown_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if self
            .shutdown_tx
            .send(self.options.fatal_exit_code)
            .await
            .is_err()
        {
            warn!(
                "Shutdown receiver dropped, exit code {} not delivered",
                self.options.fatal_exit_code
            );
        }
    }
}
