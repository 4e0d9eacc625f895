use thiserror::Error;

use crate::core::types::MediaType;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("容器错误: {0}")]
    ContainerError(String),

    #[error("解码错误 [{media_type:?}]: {message}")]
    DecoderError {
        media_type: MediaType,
        message: String,
    },

    #[error("块缓冲分配失败: {0}")]
    AllocationError(String),

    #[error("状态错误: {0}")]
    StateError(String),

    #[error("操作被中断")]
    Cancelled,

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl EngineError {
    pub fn decoder(media_type: MediaType, message: impl Into<String>) -> Self {
        EngineError::DecoderError {
            media_type,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
