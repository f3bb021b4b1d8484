use std::net::UdpSocket;

use uuid::Uuid;

/// 拼接服务地址，如 http://127.0.0.1:7979
pub fn url(https: bool, host: &str, port: u16) -> String {
    let scheme = if https { "https" } else { "http" };
    format!("{}://{}:{}", scheme, host, port)
}

/// 生成服务实例ID：服务名 + 32位无连字符UUID
pub fn instance_id(service_name: &str) -> String {
    format!("{}-{}", service_name, Uuid::new_v4().simple())
}

/// 获取本机对外IPv4地址，失败时回退到127.0.0.1
///
/// 通过UDP connect读取内核选择的出口地址，不会真正发包。
pub fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
