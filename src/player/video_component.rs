use log::{debug, warn};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaOptions, MediaType, PixelFormat, Timestamp};
use crate::player::block::{Block, BlockKind, SharedBuffer};
use crate::player::component::{
    resolve_block_timing, DecodedFrame, FramePayload, MediaComponent, PacketQueue,
};

/// 缩放器的源端规格；变化时重建
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerSpec {
    format: util::format::Pixel,
    width: u32,
    height: u32,
}

/// 视频组件 - 解码 + 像素格式转换
pub struct VideoComponent {
    stream_index: usize,
    queue: Arc<PacketQueue>,
    decoder: Option<codec::decoder::Video>,
    scaler: Option<software::scaling::Context>,
    scaler_spec: Option<ScalerSpec>,
    time_base: f64,
    /// 帧时长兜底：1 / 平均帧率
    avg_frame_duration: Timestamp,
    /// 采样宽高比（0 视为 1:1）
    sar: (u32, u32),
    target_format: PixelFormat,
    has_packets_in_codec: bool,
}

// SwsContext 不是 Send，但组件只在解码工作者线程中使用
unsafe impl Send for VideoComponent {}

impl VideoComponent {
    pub fn from_stream(
        stream: format::stream::Stream,
        stream_index: usize,
        queue: Arc<PacketQueue>,
        options: &MediaOptions,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;

        let fps = stream.avg_frame_rate();
        let avg_frame_duration = if fps.numerator() > 0 {
            Timestamp::from_secs_f64(fps.denominator() as f64 / fps.numerator() as f64)
        } else {
            Timestamp::from_millis(40)
        };

        let aspect = decoder.aspect_ratio();
        let sar = if aspect.numerator() > 0 && aspect.denominator() > 0 {
            (aspect.numerator() as u32, aspect.denominator() as u32)
        } else {
            (1, 1)
        };

        debug!(
            "视频解码器: {}x{}, 格式 {:?}, SAR {}:{}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            sar.0,
            sar.1
        );

        Ok(Self {
            stream_index,
            queue,
            decoder: Some(decoder),
            scaler: None,
            scaler_spec: None,
            time_base,
            avg_frame_duration,
            sar,
            target_format: options.target_pixel_format,
            has_packets_in_codec: false,
        })
    }

    fn target_ffmpeg_pixel(&self) -> util::format::Pixel {
        match self.target_format {
            PixelFormat::Bgr0 => util::format::Pixel::BGRZ,
            PixelFormat::Bgra => util::format::Pixel::BGRA,
            PixelFormat::Rgba => util::format::Pixel::RGBA,
        }
    }

    /// 按源规格（懒）初始化缩放器；分辨率或像素格式变化时重建
    fn ensure_scaler(&mut self, frame: &util::frame::Video) -> bool {
        let spec = ScalerSpec {
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        };
        if self.scaler.is_some() && self.scaler_spec == Some(spec) {
            return true;
        }

        match software::scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            self.target_ffmpeg_pixel(),
            frame.width(),
            frame.height(),
            software::scaling::Flags::BILINEAR,
        ) {
            Ok(ctx) => {
                self.scaler = Some(ctx);
                self.scaler_spec = Some(spec);
                true
            }
            Err(e) => {
                warn!("视频缩放器初始化失败，拒绝本帧: {}", e);
                self.scaler = None;
                self.scaler_spec = None;
                false
            }
        }
    }
}

impl MediaComponent for VideoComponent {
    fn media_type(&self) -> MediaType {
        MediaType::Video
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn packet_queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        loop {
            let mut decoded = util::frame::Video::empty();
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let (start, has_valid_start_time) = match decoded.timestamp() {
                        Some(ts) => (
                            Timestamp::from_secs_f64(ts as f64 * self.time_base),
                            true,
                        ),
                        None => (Timestamp::ZERO, false),
                    };
                    let dur_units = decoded.packet().duration;
                    let duration = if dur_units > 0 {
                        Timestamp::from_secs_f64(dur_units as f64 * self.time_base)
                    } else {
                        self.avg_frame_duration
                    };
                    return Ok(Some(DecodedFrame {
                        start,
                        duration,
                        has_valid_start_time,
                        payload: FramePayload::Video(decoded),
                    }));
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => {
                    // EAGAIN：编解码器要更多包
                    self.has_packets_in_codec = false;
                    match self.queue.pop() {
                        Some(media_packet) => match decoder.send_packet(&media_packet.packet) {
                            Ok(()) => self.has_packets_in_codec = true,
                            Err(ffmpeg::Error::Eof) => {
                                debug!("视频解码器 send_packet 收到 EOF，执行 flush");
                                decoder.flush();
                            }
                            Err(e) => {
                                // 网络流中个别包损坏可以容忍，跳过继续
                                warn!("视频 send_packet 失败（已跳过）: {}", e);
                            }
                        },
                        None => return Ok(None),
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.has_packets_in_codec = false;
                    return Ok(None);
                }
                Err(e) => return Err(EngineError::decoder(MediaType::Video, e.to_string())),
            }
        }
    }

    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool {
        let FramePayload::Video(ref raw) = frame.payload else {
            return false;
        };

        let width = raw.width();
        let height = raw.height();
        if width == 0 || height == 0 {
            return false;
        }

        if !self.ensure_scaler(raw) {
            return false;
        }

        let mut converted = util::frame::Video::empty();
        if let Err(e) = self.scaler.as_mut().unwrap().run(raw, &mut converted) {
            warn!("视频像素转换失败: {}", e);
            return false;
        }

        let bytes_per_pixel = self.target_format.bytes_per_pixel();
        let row_bytes = width as usize * bytes_per_pixel;
        let needed = row_bytes * height as usize;

        let Some(mut guard) = target.buffer.try_write() else {
            debug!("视频块写锁被占用，拒绝本帧");
            return false;
        };
        // 先保证互操作缓冲足够大；扩容失败时拒绝本帧，直到扩容成功为止
        if SharedBuffer::ensure_len(&mut guard, needed).is_err() {
            return false;
        }

        // 去掉行对齐填充，拷成紧凑行
        let src_stride = converted.stride(0);
        let src = converted.data(0);
        for y in 0..height as usize {
            let src_offset = y * src_stride;
            let dst_offset = y * row_bytes;
            guard[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&src[src_offset..src_offset + row_bytes]);
        }
        drop(guard);

        resolve_block_timing(frame, prev, target);
        target.stream_index = self.stream_index;
        target.declared_size = needed;
        target.kind = BlockKind::Video {
            pixel_width: width,
            pixel_height: height,
            stride: row_bytes,
            pixel_format: self.target_format,
            aspect_width: width * self.sar.0,
            aspect_height: height * self.sar.1,
        };
        true
    }

    fn has_packets_in_codec(&self) -> bool {
        self.has_packets_in_codec
    }

    fn flush(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.has_packets_in_codec = false;
    }

    fn dispose(&mut self) {
        self.scaler = None;
        self.scaler_spec = None;
        self.decoder = None;
        self.queue.clear();
    }
}

impl Drop for VideoComponent {
    fn drop(&mut self) {
        self.dispose();
    }
}
