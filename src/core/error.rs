use crate::core::types::StreamKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("配置解析失败: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("解封装错误: {0}")]
    DemuxError(String),

    #[error("{kind} 解码错误: {reason}")]
    DecodeError { kind: StreamKind, reason: String },

    #[error("{kind} 流格式中途变化: 期望 {expected}, 实际 {found}")]
    FormatChanged {
        kind: StreamKind,
        expected: String,
        found: String,
    },

    #[error("{0} 包队列内存分配失败")]
    QueueAlloc(StreamKind),

    #[error("{0} 包队列已关闭")]
    QueueClosed(StreamKind),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("没有可播放的音频或视频流")]
    NoPlayableStream,

    #[error("缺少 {0} 解码器")]
    MissingDecoder(StreamKind),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 单个包级别的错误（可恢复，丢弃该包继续）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlayerError::DecodeError { .. } | PlayerError::QueueAlloc(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
