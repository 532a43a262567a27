use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 登录失败或认证响应无法解析
    #[error("认证错误: {0}")]
    Authentication(String),

    /// 网络或 HTTP 层失败
    #[error("传输错误: {0}")]
    Transport(String),

    /// 响应不是预期的 JSON 结构（API 不匹配）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 阻塞等待被取消
    #[error("等待被中断: {0}")]
    Interrupted(String),

    #[error("等待超时: {0}")]
    Timeout(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl Error {
    /// 是否为等待中断
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }

    /// 是否为认证失败
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
