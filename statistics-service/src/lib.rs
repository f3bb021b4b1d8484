// 导出模块
pub mod metrics;
pub mod routes;
pub mod subscription;

// 重新导出一些常用的类型
pub use subscription::{ResourceKind, SubscriptionService};
