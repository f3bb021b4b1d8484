use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("内部服务错误: {0}")]
    Internal(String),

    #[error("连接注册中心失败: {0}")]
    Connectivity(String),

    #[error("服务实例冲突: {0}")]
    Conflict(String),

    #[error("注册信息已失效: {0}")]
    RegistrationExpired(String),

    #[error("远程调用失败: {0}")]
    RemoteCall(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("请求无效: {0}")]
    BadRequest(String),

    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Redis错误: {0}")]
    Redis(String),

    #[error("IO错误: {0}")]
    IO(#[from] std::io::Error),

    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Internal(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Internal(err.to_string())
    }
}

// Redis错误转换实现
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(format!("Redis错误: {}", err))
    }
}

// 传输层故障归类为Connectivity，其余HTTP客户端错误归类为RemoteCall
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::Connectivity(err.to_string())
        } else {
            Error::RemoteCall(err.to_string())
        }
    }
}

// 从Error转换为axum::http::StatusCode，用于HTTP响应
impl From<Error> for axum::http::StatusCode {
    fn from(error: Error) -> Self {
        use axum::http::StatusCode;
        match error {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RegistrationExpired(_) => StatusCode::GONE,
            Error::Connectivity(_) | Error::RemoteCall(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, format!("资源不存在: {}", msg)),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, format!("请求无效: {}", msg)),
            Error::Conflict(msg) => (StatusCode::CONFLICT, format!("服务实例冲突: {}", msg)),
            Error::Connectivity(msg) => (
                StatusCode::BAD_GATEWAY,
                format!("连接注册中心失败: {}", msg),
            ),
            Error::RemoteCall(msg) => (StatusCode::BAD_GATEWAY, format!("远程调用失败: {}", msg)),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("内部服务错误: {}", msg),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "服务器内部错误".to_string(),
            ),
        };

        let json = Json(json!({
            "error": status.as_u16(),
            "message": message,
        }));

        (status, json).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
