use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use ffmpeg_next as ffmpeg;

use crate::core::error::Result;
use crate::core::types::{MediaType, Timestamp};
use crate::player::block::Block;
use crate::player::source::MediaPacket;

/// 组件的包队列 - 读取工作者生产，解码工作者消费
///
/// 字节计数用于聚合缓冲量统计（网络流的 16 MiB 上限判断）。
pub struct PacketQueue {
    queue: SegQueue<MediaPacket>,
    bytes: AtomicUsize,
    count: AtomicUsize,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            bytes: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, packet: MediaPacket) {
        self.bytes.fetch_add(packet.size(), Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
        self.queue.push(packet);
    }

    pub fn pop(&self) -> Option<MediaPacket> {
        let packet = self.queue.pop()?;
        self.bytes.fetch_sub(packet.size(), Ordering::SeqCst);
        self.count.fetch_sub(1, Ordering::SeqCst);
        Some(packet)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 队列中包的总字节数
    pub fn byte_len(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        while self.pop().is_some() {
            cleared += 1;
        }
        cleared
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 外部/内嵌字幕条目
#[derive(Debug, Clone)]
pub struct SubtitleCue {
    pub start: Timestamp,
    pub duration: Timestamp,
    pub text: String,
}

/// 解码帧的载荷 - 对流水线不透明，只有产出它的组件会拆开
pub enum FramePayload {
    Video(ffmpeg::util::frame::Video),
    Audio(ffmpeg::util::frame::Audio),
    Subtitle(SubtitleCue),
}

/// 已解码、未物化的帧
pub struct DecodedFrame {
    pub start: Timestamp,
    pub duration: Timestamp,
    /// 源帧是否带有效 PTS；没有时物化阶段用前块推算起始时间
    pub has_valid_start_time: bool,
    pub payload: FramePayload,
}

impl DecodedFrame {
    /// 占位帧（无载荷语义，自测用）
    pub fn stub(start: Timestamp, duration: Timestamp) -> Self {
        Self {
            start,
            duration,
            has_valid_start_time: true,
            payload: FramePayload::Subtitle(SubtitleCue {
                start,
                duration,
                text: String::new(),
            }),
        }
    }
}

/// 媒体组件 - 一条流的解码器与物化逻辑
///
/// 拥有自己的编解码资源（codec context / 重采样器 / 滤镜图），
/// 在 `dispose` 时确定性释放；Drop 作为兜底。
pub trait MediaComponent: Send {
    fn media_type(&self) -> MediaType;

    fn stream_index(&self) -> usize;

    fn packet_queue(&self) -> &Arc<PacketQueue>;

    /// 拉取下一个解码帧；编解码器需要更多包时返回 None
    fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// 把帧转换为可渲染块
    ///
    /// `prev` 仅在帧没有有效起始时间时用于推算；成功返回 true，
    /// 分配或写锁失败返回 false（块不会被加入缓冲）。
    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool;

    /// 已送入编解码器、可能尚未吐出的包是否存在
    fn has_packets_in_codec(&self) -> bool {
        false
    }

    /// 队列中待解码的包数
    fn buffer_count(&self) -> usize {
        self.packet_queue().len()
    }

    /// 队列中待解码的字节数
    fn buffer_length(&self) -> usize {
        self.packet_queue().byte_len()
    }

    fn has_enough_packets(&self) -> bool {
        self.buffer_count() >= self.media_type().packet_threshold()
    }

    /// Seek 后清空编解码器内部缓冲
    fn flush(&mut self) {}

    /// 释放全部原生资源
    fn dispose(&mut self) {}
}

/// 物化的公共计时规则
///
/// 源帧没有有效 PTS 时：起始 = 前块结束 + 1 tick，时长取帧时长
/// （为正时）否则沿用前块时长，并标记为推算值。
pub fn resolve_block_timing(frame: &DecodedFrame, prev: Option<&Block>, target: &mut Block) {
    match prev {
        Some(prev) if !frame.has_valid_start_time => {
            target.start = prev.end() + Timestamp::ONE_TICK;
            target.duration = if frame.duration > Timestamp::ZERO {
                frame.duration
            } else {
                prev.duration
            };
            target.is_start_time_guessed = true;
        }
        _ => {
            target.start = frame.start;
            target.duration = frame.duration;
            target.is_start_time_guessed = !frame.has_valid_start_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MediaType;

    #[test]
    fn packet_queue_tracks_bytes_and_count() {
        let queue = PacketQueue::new();
        let data = vec![0u8; 100];
        let mut packet = ffmpeg::Packet::copy(&data);
        packet.set_pts(Some(0));
        queue.push(MediaPacket {
            packet,
            media_type: MediaType::Video,
            stream_index: 0,
        });
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.byte_len(), 100);

        let popped = queue.pop().unwrap();
        assert_eq!(popped.size(), 100);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.byte_len(), 0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn timing_uses_frame_when_pts_valid() {
        let frame = DecodedFrame::stub(Timestamp::from_millis(100), Timestamp::from_millis(40));
        let mut target = Block::empty(MediaType::Video);
        let mut prev = Block::empty(MediaType::Video);
        prev.start = Timestamp::from_millis(0);
        prev.duration = Timestamp::from_millis(40);

        resolve_block_timing(&frame, Some(&prev), &mut target);
        assert_eq!(target.start.as_millis(), 100);
        assert!(!target.is_start_time_guessed);
    }

    #[test]
    fn timing_guesses_from_prev_block() {
        let mut frame = DecodedFrame::stub(Timestamp::ZERO, Timestamp::ZERO);
        frame.has_valid_start_time = false;

        let mut prev = Block::empty(MediaType::Video);
        prev.start = Timestamp::from_millis(80);
        prev.duration = Timestamp::from_millis(40);

        let mut target = Block::empty(MediaType::Video);
        resolve_block_timing(&frame, Some(&prev), &mut target);
        // 前块结束 + 1 tick
        assert_eq!(target.start.as_nanos(), 120_000_001);
        // 帧时长非正，沿用前块时长
        assert_eq!(target.duration.as_millis(), 40);
        assert!(target.is_start_time_guessed);
    }

    #[test]
    fn timing_without_prev_marks_guessed() {
        let mut frame = DecodedFrame::stub(Timestamp::from_millis(7), Timestamp::from_millis(40));
        frame.has_valid_start_time = false;
        let mut target = Block::empty(MediaType::Video);
        resolve_block_timing(&frame, None, &mut target);
        assert_eq!(target.start.as_millis(), 7);
        assert!(target.is_start_time_guessed);
    }
}
