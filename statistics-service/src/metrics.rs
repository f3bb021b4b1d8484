use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use common::Error;

/// 指标注册表，/metrics端点输出的唯一来源
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// HTTP请求总数
static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status_code"],
    )
    .expect("创建http_requests_total指标失败");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("注册http_requests_total指标失败");
    counter
});

/// HTTP请求时延直方图（秒）
static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "Histogram of HTTP request durations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path", "status_code"],
    )
    .expect("创建http_request_duration_seconds指标失败");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("注册http_request_duration_seconds指标失败");
    histogram
});

/// 进程级指标（CPU、内存、fd数等）
#[cfg(target_os = "linux")]
static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    REGISTRY
        .register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))
        .expect("注册进程指标失败");
});

/// 初始化Prometheus指标
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION_SECONDS);
    #[cfg(target_os = "linux")]
    Lazy::force(&PROCESS_COLLECTOR);
}

/// 请求指标中间件
///
/// 按方法、路由模板和状态码记录请求数与时延
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    // 用路由模板而不是原始路径，避免标签基数爆炸
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;

    let status_code = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status_code])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path, &status_code])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// 渲染注册表里的全部指标
pub fn render() -> Result<String, Error> {
    let encoder = TextEncoder::new();
    let mut buffer = String::new();
    encoder
        .encode_utf8(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("编码指标失败: {}", e)))?;
    Ok(buffer)
}

/// GET /metrics
pub async fn metrics_handler() -> Result<impl IntoResponse, Error> {
    let body = render()?;
    Ok((
        [(
            header::CONTENT_TYPE,
            TextEncoder::new().format_type().to_string(),
        )],
        body,
    ))
}
