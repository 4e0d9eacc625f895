//! 合成媒体源 - 自测与基准用
//!
//! 不走编解码库的解码路径：包的 PTS 即帧序号，组件按固定间隔
//! 产出帧并物化为确定性的字节图样。流水线行为（缓冲、滞回、
//! Seek、结束检测）与真实源完全一致。

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaOptions, MediaType, PixelFormat, SampleFormat, Timestamp};
use crate::player::block::{Block, BlockKind, SharedBuffer};
use crate::player::component::{
    resolve_block_timing, DecodedFrame, FramePayload, MediaComponent, PacketQueue,
};
use crate::player::source::{MediaPacket, PacketSource};

/// 合成源配置
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub has_video: bool,
    pub has_audio: bool,
    /// 每条流的总帧数
    pub total_frames: usize,
    /// 帧间隔（音频帧也按它切块）
    pub frame_interval: Timestamp,
    pub video_size: (u32, u32),
    pub sample_rate: u32,
    /// 模拟的单包字节数
    pub packet_size: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            has_video: true,
            has_audio: false,
            total_frames: 10,
            frame_interval: Timestamp::from_millis(40),
            video_size: (32, 24),
            sample_rate: 48000,
            packet_size: 512,
        }
    }
}

/// 合成包源
pub struct SyntheticSource {
    config: SyntheticConfig,
    cursors: HashMap<MediaType, usize>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut cursors = HashMap::new();
        if config.has_video {
            cursors.insert(MediaType::Video, 0);
        }
        if config.has_audio {
            cursors.insert(MediaType::Audio, 0);
        }
        Self { config, cursors }
    }

    fn make_packet(&self, media_type: MediaType, index: usize) -> MediaPacket {
        let payload = vec![media_type as u8; self.config.packet_size];
        let mut packet = ffmpeg::Packet::copy(&payload);
        packet.set_pts(Some(index as i64));
        packet.set_duration(1);
        MediaPacket {
            packet,
            media_type,
            stream_index: media_type as usize,
        }
    }
}

impl PacketSource for SyntheticSource {
    fn media_types(&self) -> Vec<MediaType> {
        let mut types = Vec::new();
        if self.config.has_video {
            types.push(MediaType::Video);
        }
        if self.config.has_audio {
            types.push(MediaType::Audio);
        }
        types
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        // 按时间交错：总是先给进度最慢的流
        let next = self
            .cursors
            .iter()
            .filter(|(_, &cursor)| cursor < self.config.total_frames)
            .min_by_key(|(_, &cursor)| cursor)
            .map(|(&t, &cursor)| (t, cursor));

        match next {
            Some((media_type, cursor)) => {
                self.cursors.insert(media_type, cursor + 1);
                Ok(Some(self.make_packet(media_type, cursor)))
            }
            None => Ok(None),
        }
    }

    fn seek(&mut self, target: Timestamp) -> Result<()> {
        let interval = self.config.frame_interval.as_nanos().max(1);
        let index = (target.as_nanos() / interval).clamp(0, self.config.total_frames as i64);
        debug!("合成源 Seek: {} → 帧 {}", target, index);
        for cursor in self.cursors.values_mut() {
            *cursor = index as usize;
        }
        Ok(())
    }

    fn create_component(
        &mut self,
        media_type: MediaType,
        queue: Arc<PacketQueue>,
        options: &MediaOptions,
    ) -> Result<Box<dyn MediaComponent>> {
        match media_type {
            MediaType::Video => Ok(Box::new(SyntheticVideoComponent {
                queue,
                frame_interval: self.config.frame_interval,
                width: self.config.video_size.0,
                height: self.config.video_size.1,
                pixel_format: options.target_pixel_format,
            })),
            MediaType::Audio => Ok(Box::new(SyntheticAudioComponent {
                queue,
                frame_interval: self.config.frame_interval,
                sample_rate: options.target_sample_rate,
                channels: options.target_channels,
                sample_format: options.target_sample_format,
            })),
            MediaType::Subtitle => Err(EngineError::ContainerError(
                "合成源不提供字幕流".to_string(),
            )),
        }
    }

    fn duration(&self) -> Option<Timestamp> {
        Some(Timestamp(
            self.config.frame_interval.as_nanos() * self.config.total_frames as i64,
        ))
    }

    fn description(&self) -> String {
        format!(
            "合成源: {} 帧 × {} (video={}, audio={})",
            self.config.total_frames,
            self.config.frame_interval,
            self.config.has_video,
            self.config.has_audio
        )
    }
}

/// 合成视频组件：一包一帧，像素填充为帧序号的确定性图样
pub struct SyntheticVideoComponent {
    queue: Arc<PacketQueue>,
    frame_interval: Timestamp,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl MediaComponent for SyntheticVideoComponent {
    fn media_type(&self) -> MediaType {
        MediaType::Video
    }

    fn stream_index(&self) -> usize {
        MediaType::Video as usize
    }

    fn packet_queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(media_packet) = self.queue.pop() else {
            return Ok(None);
        };
        let index = media_packet.packet.pts().unwrap_or(0);
        Ok(Some(DecodedFrame {
            start: Timestamp(index * self.frame_interval.as_nanos()),
            duration: self.frame_interval,
            has_valid_start_time: true,
            payload: FramePayload::Video(ffmpeg::util::frame::Video::empty()),
        }))
    }

    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool {
        if !matches!(frame.payload, FramePayload::Video(_)) {
            return false;
        }
        // 像素图样由帧序号决定，渲染侧可据此校验
        let index = (frame.start.as_nanos() / self.frame_interval.as_nanos().max(1)) as u8;

        let row_bytes = self.width as usize * self.pixel_format.bytes_per_pixel();
        let needed = row_bytes * self.height as usize;

        let Some(mut guard) = target.buffer.try_write() else {
            return false;
        };
        if SharedBuffer::ensure_len(&mut guard, needed).is_err() {
            return false;
        }
        guard[..needed].fill(index);
        drop(guard);

        resolve_block_timing(frame, prev, target);
        target.stream_index = self.stream_index();
        target.declared_size = needed;
        target.kind = BlockKind::Video {
            pixel_width: self.width,
            pixel_height: self.height,
            stride: row_bytes,
            pixel_format: self.pixel_format,
            aspect_width: self.width,
            aspect_height: self.height,
        };
        true
    }
}

/// 合成音频组件：按帧间隔切出定长 PCM 块
pub struct SyntheticAudioComponent {
    queue: Arc<PacketQueue>,
    frame_interval: Timestamp,
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
}

impl MediaComponent for SyntheticAudioComponent {
    fn media_type(&self) -> MediaType {
        MediaType::Audio
    }

    fn stream_index(&self) -> usize {
        MediaType::Audio as usize
    }

    fn packet_queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(media_packet) = self.queue.pop() else {
            return Ok(None);
        };
        let index = media_packet.packet.pts().unwrap_or(0);
        Ok(Some(DecodedFrame {
            start: Timestamp(index * self.frame_interval.as_nanos()),
            duration: self.frame_interval,
            has_valid_start_time: true,
            payload: FramePayload::Audio(ffmpeg::util::frame::Audio::empty()),
        }))
    }

    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool {
        if !matches!(frame.payload, FramePayload::Audio(_)) {
            return false;
        }
        // 每声道采样数 = 帧间隔 × 采样率
        let samples_per_channel =
            (self.frame_interval.as_secs_f64() * self.sample_rate as f64) as usize;
        let needed =
            samples_per_channel * self.channels as usize * self.sample_format.bytes_per_sample();

        let Some(mut guard) = target.buffer.try_write() else {
            return false;
        };
        if SharedBuffer::ensure_len(&mut guard, needed).is_err() {
            return false;
        }
        guard[..needed].fill(0);
        drop(guard);

        resolve_block_timing(frame, prev, target);
        target.stream_index = self.stream_index();
        target.declared_size = needed;
        target.kind = BlockKind::Audio {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_format: self.sample_format,
            samples_per_channel,
        };
        true
    }
}
