/// 工具函数集合

use crate::models::constants::DEFAULT_API_PORT;

/// 生成数据中心标识
///
/// 由端点与凭据派生，重新加载配置后保持不变
pub fn datacenter_id(username: &str, realm: &str, hostname: &str) -> String {
    format!("{}@{} - {}", username, realm, hostname)
}

/// 拆分 `host:port`，未带端口时返回 None
pub fn split_host_port(hostname: &str) -> (String, Option<u16>) {
    // IPv6 字面量: [::1]:8006
    if let Some(rest) = hostname.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (format!("[{}]", host), port);
        }
    }

    match hostname.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (hostname.to_string(), None),
        },
        _ => (hostname.to_string(), None),
    }
}

/// 构建 Proxmox API 基础地址
pub fn api_base_url(hostname: &str, port: Option<u16>) -> String {
    let (host, embedded_port) = split_host_port(hostname);
    let port = port.or(embedded_port).unwrap_or(DEFAULT_API_PORT);
    format!("https://{}:{}/api2/json/", host, port)
}
