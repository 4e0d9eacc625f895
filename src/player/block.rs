use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaType, PixelFormat, SampleFormat, Timestamp};

/// 解码器与渲染器之间传递的字节区域
///
/// 单写多读：写入方必须先拿到独占写锁；渲染器读取期间内容不可变。
/// 克隆只复制句柄（Arc），字节本体共享。
#[derive(Clone)]
pub struct SharedBuffer {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 尝试获取独占写锁；渲染器正在读取时返回 None（调用方按"锁失败"处理）
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        self.bytes.try_write().ok()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read().unwrap()
    }

    pub fn len(&self) -> usize {
        self.bytes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 保证容量并把长度调整到 `len`
    ///
    /// 分配失败走 `try_reserve`，返回 AllocationError 而不是 abort，
    /// 调用方（materialize）据此拒绝本帧。
    pub fn ensure_len(guard: &mut RwLockWriteGuard<'_, Vec<u8>>, len: usize) -> Result<()> {
        if len > guard.capacity() {
            let additional = len - guard.len();
            guard
                .try_reserve(additional)
                .map_err(|e| EngineError::AllocationError(format!("申请 {} 字节失败: {}", len, e)))?;
        }
        guard.resize(len, 0);
        Ok(())
    }
}

impl Default for SharedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// 块的类型化附加信息
#[derive(Debug, Clone)]
pub enum BlockKind {
    Audio {
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        /// 每声道采样数
        samples_per_channel: usize,
    },
    Video {
        pixel_width: u32,
        pixel_height: u32,
        stride: usize,
        pixel_format: PixelFormat,
        aspect_width: u32,
        aspect_height: u32,
    },
    Subtitle {
        text: String,
    },
}

/// 已物化、可渲染的媒体块
///
/// 占据挂钟时间 `[start, end)`；`end = start + duration` 恒成立。
/// 字节本体在 `buffer` 中共享，克隆块是廉价操作。
#[derive(Clone)]
pub struct Block {
    pub media_type: MediaType,
    pub start: Timestamp,
    pub duration: Timestamp,
    pub stream_index: usize,
    /// 起始时间来自前块推算（源帧没有有效 PTS 时）
    pub is_start_time_guessed: bool,
    /// 声明的有效字节数（buffer 实际长度 >= 它）
    pub declared_size: usize,
    pub buffer: SharedBuffer,
    pub kind: BlockKind,
}

impl Block {
    /// 空槽位（等待组件物化填充）
    pub fn empty(media_type: MediaType) -> Self {
        Self {
            media_type,
            start: Timestamp::ZERO,
            duration: Timestamp::ZERO,
            stream_index: 0,
            is_start_time_guessed: false,
            declared_size: 0,
            buffer: SharedBuffer::new(),
            kind: BlockKind::Subtitle {
                text: String::new(),
            },
        }
    }

    pub fn end(&self) -> Timestamp {
        self.start + self.duration
    }

    /// `t` 是否落在本块的 [start, end) 区间内
    pub fn contains(&self, t: Timestamp) -> bool {
        t >= self.start && t < self.end()
    }

    /// 用外部字幕条目临时构造一个块（不占字节缓冲）
    pub fn from_subtitle_cue(start: Timestamp, duration: Timestamp, text: String) -> Self {
        Self {
            media_type: MediaType::Subtitle,
            start,
            duration,
            stream_index: 0,
            is_start_time_guessed: false,
            declared_size: text.len(),
            buffer: SharedBuffer::new(),
            kind: BlockKind::Subtitle { text },
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("media_type", &self.media_type)
            .field("start", &self.start)
            .field("duration", &self.duration)
            .field("declared_size", &self.declared_size)
            .field("guessed", &self.is_start_time_guessed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_is_start_plus_duration() {
        let mut b = Block::empty(MediaType::Video);
        b.start = Timestamp::from_millis(100);
        b.duration = Timestamp::from_millis(40);
        assert_eq!(b.end(), Timestamp::from_millis(140));
        assert!(b.contains(Timestamp::from_millis(100)));
        assert!(b.contains(Timestamp::from_millis(139)));
        assert!(!b.contains(Timestamp::from_millis(140)));
    }

    #[test]
    fn writer_lock_is_exclusive() {
        let buf = SharedBuffer::new();
        {
            let mut w = buf.try_write().expect("无读者时写锁应可得");
            SharedBuffer::ensure_len(&mut w, 16).unwrap();
            w[0] = 42;
        }

        // 读者持有期间，写锁必须失败
        let reader = buf.read();
        assert_eq!(reader[0], 42);
        assert!(buf.try_write().is_none());
        drop(reader);
        assert!(buf.try_write().is_some());
    }

    #[test]
    fn clone_shares_bytes() {
        let buf = SharedBuffer::new();
        {
            let mut w = buf.try_write().unwrap();
            SharedBuffer::ensure_len(&mut w, 4).unwrap();
            w.copy_from_slice(&[1, 2, 3, 4]);
        }
        let cloned = buf.clone();
        assert_eq!(&*cloned.read(), &[1, 2, 3, 4]);
    }
}
