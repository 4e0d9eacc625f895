use log::{debug, info};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaOptions, MediaType, Timestamp};
use crate::player::audio_component::AudioComponent;
use crate::player::component::{MediaComponent, PacketQueue};
use crate::player::source::{MediaPacket, PacketSource};
use crate::player::subtitle_component::SubtitleComponent;
use crate::player::video_component::VideoComponent;

/// FFmpeg 解封装源
pub struct FfmpegSource {
    input: format::context::Input,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    subtitle_stream_index: Option<usize>,
    source_path: String,
    is_network: bool,
    is_live: bool,
}

impl FfmpegSource {
    /// 打开媒体文件或网络流
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开媒体源: {}", path);

        let is_network = path.starts_with("http://")
            || path.starts_with("https://")
            || path.starts_with("rtsp://")
            || path.starts_with("rtmp://")
            || path.contains(".m3u8");
        // RTSP/RTMP 视为直播（不限时长、持续读取）
        let is_live = path.starts_with("rtsp://") || path.starts_with("rtmp://");

        let input = if is_network {
            info!("🌐 检测到网络流，应用优化选项");

            let mut options = ffmpeg::Dictionary::new();
            // discardcorrupt: 丢弃损坏的帧
            // genpts: 生成 PTS（防止时间戳问题）
            // nobuffer: 减少缓冲延迟
            options.set("fflags", "+discardcorrupt+genpts+nobuffer");
            options.set("analyzeduration", "5000000");
            options.set("probesize", "10000000");
            options.set("timeout", "15000000");
            options.set("buffer_size", "8388608");
            options.set("max_delay", "500000");
            options.set("rw_timeout", "8000000");
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");

            if path.contains(".m3u8") {
                info!("🎬 HLS 流检测，应用 HLS 优化");
                options.set("live_start_index", "-1");
                options.set("http_persistent", "1");
            }

            format::input_with_dictionary(&path, options)
                .map_err(|e| EngineError::ContainerError(format!("无法打开网络流: {}", e)))?
        } else {
            format::input(&path)
                .map_err(|e| EngineError::ContainerError(format!("无法打开文件: {}", e)))?
        };

        let video_stream_index = input.streams().best(media::Type::Video).map(|s| s.index());
        let audio_stream_index = input.streams().best(media::Type::Audio).map(|s| s.index());
        let subtitle_stream_index = input
            .streams()
            .find(|s| s.parameters().medium() == media::Type::Subtitle)
            .map(|s| s.index());

        debug!("视频流索引: {:?}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);
        debug!("字幕流索引: {:?}", subtitle_stream_index);

        if video_stream_index.is_none() && audio_stream_index.is_none() {
            return Err(EngineError::ContainerError(format!(
                "媒体源既无视频流也无音频流: {}",
                path
            )));
        }

        Ok(Self {
            input,
            video_stream_index,
            audio_stream_index,
            subtitle_stream_index,
            source_path: path.to_string(),
            is_network,
            is_live,
        })
    }

    fn media_type_of(&self, stream_index: usize) -> Option<MediaType> {
        if Some(stream_index) == self.video_stream_index {
            Some(MediaType::Video)
        } else if Some(stream_index) == self.audio_stream_index {
            Some(MediaType::Audio)
        } else if Some(stream_index) == self.subtitle_stream_index {
            Some(MediaType::Subtitle)
        } else {
            None
        }
    }

    fn stream_index_of(&self, media_type: MediaType) -> Option<usize> {
        match media_type {
            MediaType::Video => self.video_stream_index,
            MediaType::Audio => self.audio_stream_index,
            MediaType::Subtitle => self.subtitle_stream_index,
        }
    }
}

impl PacketSource for FfmpegSource {
    fn media_types(&self) -> Vec<MediaType> {
        let mut types = Vec::new();
        if self.video_stream_index.is_some() {
            types.push(MediaType::Video);
        }
        if self.audio_stream_index.is_some() {
            types.push(MediaType::Audio);
        }
        if self.subtitle_stream_index.is_some() {
            types.push(MediaType::Subtitle);
        }
        types
    }

    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        loop {
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    let stream_index = stream.index();
                    if let Some(media_type) = self.media_type_of(stream_index) {
                        return Ok(Some(MediaPacket {
                            packet,
                            media_type,
                            stream_index,
                        }));
                    }
                    // 其他流的包直接跳过
                }
                None => return Ok(None),
            }
        }
    }

    fn seek(&mut self, target: Timestamp) -> Result<()> {
        // AV_TIME_BASE 单位（微秒），向前找关键帧
        let ts = target.as_nanos() / 1_000;
        self.input.seek(ts, ..ts)?;
        Ok(())
    }

    fn create_component(
        &mut self,
        media_type: MediaType,
        queue: Arc<PacketQueue>,
        options: &MediaOptions,
    ) -> Result<Box<dyn MediaComponent>> {
        let stream_index = self.stream_index_of(media_type).ok_or_else(|| {
            EngineError::ContainerError(format!("源中不存在 {} 流", media_type))
        })?;
        let stream = self
            .input
            .stream(stream_index)
            .ok_or_else(|| EngineError::ContainerError(format!("无法获取流 {}", stream_index)))?;

        match media_type {
            MediaType::Video => Ok(Box::new(VideoComponent::from_stream(
                stream,
                stream_index,
                queue,
                options,
            )?)),
            MediaType::Audio => Ok(Box::new(AudioComponent::from_stream(
                stream,
                stream_index,
                queue,
                options,
            )?)),
            MediaType::Subtitle => Ok(Box::new(SubtitleComponent::from_stream(
                stream,
                stream_index,
                queue,
            )?)),
        }
    }

    fn duration(&self) -> Option<Timestamp> {
        let micros = self.input.duration();
        if micros > 0 {
            Some(Timestamp::from_micros(micros))
        } else {
            None
        }
    }

    fn is_live_stream(&self) -> bool {
        self.is_live
    }

    fn is_network_stream(&self) -> bool {
        self.is_network
    }

    fn is_seekable(&self) -> bool {
        !self.is_live
    }

    fn description(&self) -> String {
        format!("FFmpeg 源: {}", self.source_path)
    }
}
