/// Proxmox 认证会话
///
/// 持有 API 地址与凭据，缓存 2 小时有效的认证票据和 CSRF 令牌，
/// 并提供带认证的 HTTP 调用原语

use std::fmt;
use std::time::Duration;

use common::models::constants::{DEFAULT_HTTP_TIMEOUT_SECS, TICKET_LIFETIME_SECS};
use common::{Error, Result};
use reqwest::header::COOKIE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CSRF_HEADER: &str = "CSRFPreventionToken";

/// 登录凭据
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub realm: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        realm: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            realm: realm.into(),
            password: password.into(),
        }
    }

    /// `username@realm`
    pub fn login_name(&self) -> String {
        format!("{}@{}", self.username, self.realm)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("password", &"***")
            .finish()
    }
}

/// 会话选项
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 关闭后跳过本会话的证书与主机名校验，不影响其他会话
    pub verify_tls: bool,
    /// 单次 HTTP 请求超时
    pub http_timeout: Duration,
    pub ticket_lifetime: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            ticket_lifetime: Duration::from_secs(TICKET_LIFETIME_SECS),
        }
    }
}

/// 认证票据
#[derive(Clone)]
struct AuthTicket {
    ticket: String,
    csrf_token: String,
    issued_at: Instant,
}

impl AuthTicket {
    fn is_fresh(&self, lifetime: Duration) -> bool {
        self.issued_at.elapsed() < lifetime
    }
}

/// API 响应信封: `{"data": ...}`
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_prevention_token: String,
}

/// Proxmox 认证会话
pub struct PveSession {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    ticket_lifetime: Duration,
    /// 票据续期在锁内串行进行，拿到票据后的调用可以并行
    ticket: Mutex<Option<AuthTicket>>,
}

impl PveSession {
    /// 创建会话，`base_url` 形如 `https://host:8006/api2/json/`
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        if !options.verify_tls {
            warn!("⚠️ 已关闭 TLS 校验: {}", base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .map_err(|e| Error::Config(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            ticket_lifetime: options.ticket_lifetime,
            ticket: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 登录并返回新票据
    ///
    /// 明文密码只在这一次请求中发送
    async fn login(&self) -> Result<AuthTicket> {
        let login_name = self.credentials.login_name();
        info!("🔐 登录 Proxmox: {} ({})", login_name, self.base_url);

        let form = [
            ("username", login_name.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let response = self
            .http
            .post(self.url("access/ticket"))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("登录请求失败: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("读取登录响应失败: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Authentication(format!(
                "登录失败 {}: HTTP {}",
                login_name, status
            )));
        }

        // 认证失败时部分版本返回 200 且 data 为 null
        let envelope: ApiResponse<Option<TicketData>> = serde_json::from_str(&body)
            .map_err(|e| Error::Authentication(format!("无法解析登录响应: {}", e)))?;
        let data = envelope
            .data
            .ok_or_else(|| Error::Authentication(format!("登录失败 {}: 未返回票据", login_name)))?;

        debug!("登录成功: {}", login_name);
        Ok(AuthTicket {
            ticket: data.ticket,
            csrf_token: data.csrf_prevention_token,
            issued_at: Instant::now(),
        })
    }

    /// 确保票据在有效期内，否则重新登录
    pub async fn ensure_valid(&self) -> Result<()> {
        self.current_ticket().await.map(|_| ())
    }

    async fn current_ticket(&self) -> Result<AuthTicket> {
        let mut slot = self.ticket.lock().await;
        if let Some(ticket) = slot.as_ref() {
            if ticket.is_fresh(self.ticket_lifetime) {
                return Ok(ticket.clone());
            }
            debug!("认证票据已过期，重新登录");
        }

        let ticket = self.login().await?;
        *slot = Some(ticket.clone());
        Ok(ticket)
    }

    /// 丢弃被拒绝的票据
    ///
    /// 缓存已换成新票据时保留，迟到的 401 不会触发多余的登录
    async fn invalidate(&self, rejected: &str) {
        let mut slot = self.ticket.lock().await;
        if slot.as_ref().is_some_and(|t| t.ticket == rejected) {
            slot.take();
        }
    }

    /// 带认证的 GET 请求，返回 `data` 字段
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path).await
    }

    /// 带认证的 POST 请求（空表单），返回 `data` 字段
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::POST, path).await
    }

    /// 发送带会话 Cookie 和 CSRF 头的请求
    pub async fn request<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        let ticket = self.current_ticket().await?;
        let url = self.url(path);
        debug!("➡️ {} {}", method, url);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(COOKIE, format!("PVEAuthCookie={}", ticket.ticket))
            .header(CSRF_HEADER, ticket.csrf_token.as_str());
        if method == Method::POST {
            let empty: [(&str, &str); 0] = [];
            request = request.form(&empty);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {} 失败: {}", method, url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("读取响应失败 {}: {}", url, e)))?;

        if status == StatusCode::UNAUTHORIZED {
            // 票据被服务端拒绝，下次调用重新登录
            self.invalidate(&ticket.ticket).await;
            return Err(Error::Authentication(format!("票据被拒绝: {} {}", method, url)));
        }

        if !status.is_success() {
            return Err(Error::Transport(format!(
                "{} {} 返回 HTTP {}: {}",
                method,
                url,
                status,
                body.trim()
            )));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("{} {} 响应格式错误: {}", method, url, e)))?;
        Ok(envelope.data)
    }
}
