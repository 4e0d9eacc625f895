use log::{debug, warn};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, filter, format, software, util};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaOptions, MediaType, SampleFormat, Timestamp};
use crate::player::block::{Block, BlockKind, SharedBuffer};
use crate::player::component::{
    resolve_block_timing, DecodedFrame, FramePayload, MediaComponent, PacketQueue,
};

/// 重采样器的源端规格；任一项变化都要重建重采样器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResamplerSpec {
    format: util::format::Sample,
    layout_bits: u64,
    rate: u32,
}

/// 音频滤镜图（abuffer → 用户滤镜链 → abuffersink）
///
/// 每流参数串（time_base / sample_rate / sample_fmt / channel_layout）
/// 变化时整图重建。
struct AudioFilterGraph {
    graph: filter::Graph,
    args: String,
}

impl AudioFilterGraph {
    /// 源帧对应的 abuffer 参数串
    fn args_for(frame: &util::frame::Audio) -> String {
        format!(
            "time_base=1/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            frame.rate(),
            frame.rate(),
            frame.format().name(),
            frame.channel_layout().bits()
        )
    }

    fn build(chain: &str, args: &str) -> Result<Self> {
        let mut graph = filter::Graph::new();

        let abuffer = filter::find("abuffer")
            .ok_or_else(|| EngineError::decoder(MediaType::Audio, "找不到 abuffer 滤镜"))?;
        let abuffersink = filter::find("abuffersink")
            .ok_or_else(|| EngineError::decoder(MediaType::Audio, "找不到 abuffersink 滤镜"))?;

        graph.add(&abuffer, "in", args)?;
        graph.add(&abuffersink, "out", "")?;
        graph.output("in", 0)?.input("out", 0)?.parse(chain)?;
        graph.validate()?;

        debug!("🔧 音频滤镜图已构建: chain=\"{}\" args=\"{}\"", chain, args);
        Ok(Self {
            graph,
            args: args.to_string(),
        })
    }

    fn push(&mut self, frame: &util::frame::Audio) -> Result<()> {
        self.graph
            .get("in")
            .ok_or_else(|| EngineError::decoder(MediaType::Audio, "滤镜图缺少输入端"))?
            .source()
            .add(frame)?;
        Ok(())
    }

    /// 排空 sink，返回最后一个非空输出帧
    fn drain(&mut self) -> Option<util::frame::Audio> {
        let mut output: Option<util::frame::Audio> = None;
        let mut sink = self.graph.get("out")?;
        loop {
            let mut filtered = util::frame::Audio::empty();
            if sink.sink().frame(&mut filtered).is_err() {
                break;
            }
            if filtered.samples() > 0 {
                output = Some(filtered);
            }
        }
        output
    }
}

/// 音频组件 - 解码 + 重采样 + 可选滤镜链
pub struct AudioComponent {
    stream_index: usize,
    queue: Arc<PacketQueue>,
    decoder: Option<codec::decoder::Audio>,
    time_base: f64,

    resampler: Option<software::resampling::Context>,
    resampler_spec: Option<ResamplerSpec>,

    /// 用户滤镜链；构建失败后禁用（透传）
    filter_chain: Option<String>,
    filter: Option<AudioFilterGraph>,
    filter_disabled: bool,
    filter_rebuilds: u64,

    target_rate: u32,
    target_channels: u16,
    target_format: SampleFormat,

    has_packets_in_codec: bool,
}

// 重采样/滤镜上下文只在解码工作者线程中使用，不会并发访问
unsafe impl Send for AudioComponent {}

impl AudioComponent {
    pub fn from_stream(
        stream: format::stream::Stream,
        stream_index: usize,
        queue: Arc<PacketQueue>,
        options: &MediaOptions,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;

        debug!(
            "音频解码器: {} Hz, {} 声道, 格式 {:?} → 目标 {} Hz / {} 声道",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            options.target_sample_rate,
            options.target_channels,
        );

        Ok(Self {
            stream_index,
            queue,
            decoder: Some(decoder),
            time_base,
            resampler: None,
            resampler_spec: None,
            filter_chain: options.audio_filter.clone(),
            filter: None,
            filter_disabled: false,
            filter_rebuilds: 0,
            target_rate: options.target_sample_rate,
            target_channels: options.target_channels,
            target_format: options.target_sample_format,
            has_packets_in_codec: false,
        })
    }

    /// 滤镜图重建次数（规格变化可观测）
    pub fn filter_rebuild_count(&self) -> u64 {
        self.filter_rebuilds
    }

    fn target_ffmpeg_format(&self) -> util::format::Sample {
        match self.target_format {
            SampleFormat::F32 => {
                util::format::Sample::F32(util::format::sample::Type::Packed)
            }
            SampleFormat::I16 => {
                util::format::Sample::I16(util::format::sample::Type::Packed)
            }
        }
    }

    fn target_layout(&self) -> util::channel_layout::ChannelLayout {
        match self.target_channels {
            1 => util::channel_layout::ChannelLayout::MONO,
            2 => util::channel_layout::ChannelLayout::STEREO,
            6 => util::channel_layout::ChannelLayout::_5POINT1,
            _ => util::channel_layout::ChannelLayout::STEREO,
        }
    }

    /// 滤镜链激活时把帧送入图并取回输出；无输出时回落到原始帧
    fn run_filter(&mut self, frame: &util::frame::Audio) -> Option<util::frame::Audio> {
        let chain = self.filter_chain.clone()?;
        if self.filter_disabled {
            return None;
        }

        let args = AudioFilterGraph::args_for(frame);
        let needs_rebuild = self
            .filter
            .as_ref()
            .map(|g| g.args != args)
            .unwrap_or(true);

        if needs_rebuild {
            match AudioFilterGraph::build(&chain, &args) {
                Ok(graph) => {
                    self.filter = Some(graph);
                    self.filter_rebuilds += 1;
                }
                Err(e) => {
                    // 滤镜不可用不阻断播放：降级为透传
                    warn!("音频滤镜图构建失败，禁用滤镜: {}", e);
                    self.filter_disabled = true;
                    self.filter = None;
                    return None;
                }
            }
        }

        let graph = self.filter.as_mut()?;
        if let Err(e) = graph.push(frame) {
            warn!("送帧进滤镜图失败: {}", e);
            return None;
        }
        graph.drain()
    }

    /// 按源规格（懒）初始化重采样器；规格变化时重建
    fn ensure_resampler(&mut self, frame: &util::frame::Audio) -> bool {
        let spec = ResamplerSpec {
            format: frame.format(),
            layout_bits: frame.channel_layout().bits(),
            rate: frame.rate(),
        };
        if self.resampler.is_some() && self.resampler_spec == Some(spec) {
            return true;
        }

        debug!(
            "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
            frame.rate(),
            frame.channels(),
            self.target_rate,
            self.target_channels
        );

        match software::resampling::Context::get(
            frame.format(),
            frame.channel_layout(),
            frame.rate(),
            self.target_ffmpeg_format(),
            self.target_layout(),
            self.target_rate,
        ) {
            Ok(ctx) => {
                self.resampler = Some(ctx);
                self.resampler_spec = Some(spec);
                true
            }
            Err(e) => {
                // 本帧拒绝，下一帧重试初始化
                warn!("重采样器初始化失败，拒绝本帧: {}", e);
                self.resampler = None;
                self.resampler_spec = None;
                false
            }
        }
    }
}

impl MediaComponent for AudioComponent {
    fn media_type(&self) -> MediaType {
        MediaType::Audio
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
            let mut decoded = util::frame::Audio::empty();
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let (start, has_valid_start_time) = match decoded.timestamp() {
                        Some(ts) => (
                            Timestamp::from_secs_f64(ts as f64 * self.time_base),
                            true,
                        ),
                        None => (Timestamp::ZERO, false),
                    };
                    // 优先取帧自带的时长，缺失时按采样数推算
                    let dur_units = decoded.packet().duration;
                    let duration = if dur_units > 0 {
                        Timestamp::from_secs_f64(dur_units as f64 * self.time_base)
                    } else if decoded.rate() > 0 {
                        Timestamp::from_secs_f64(
                            decoded.samples() as f64 / decoded.rate() as f64,
                        )
                    } else {
                        Timestamp::ZERO
                    };
                    return Ok(Some(DecodedFrame {
                        start,
                        duration,
                        has_valid_start_time,
                        payload: FramePayload::Audio(decoded),
                    }));
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => {
                    // EAGAIN：编解码器要更多包
                    self.has_packets_in_codec = false;
                    match self.queue.pop() {
                        Some(media_packet) => match decoder.send_packet(&media_packet.packet) {
                            Ok(()) => self.has_packets_in_codec = true,
                            Err(ffmpeg::Error::Eof) => {
                                debug!("音频解码器 send_packet 收到 EOF，执行 flush");
                                decoder.flush();
                            }
                            Err(e) => {
                                return Err(EngineError::decoder(
                                    MediaType::Audio,
                                    e.to_string(),
                                ))
                            }
                        },
                        None => return Ok(None),
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.has_packets_in_codec = false;
                    return Ok(None);
                }
                Err(e) => return Err(EngineError::decoder(MediaType::Audio, e.to_string())),
            }
        }
    }

    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool {
        let FramePayload::Audio(ref raw) = frame.payload else {
            return false;
        };

        // 源帧基本校验：任一参数非法即拒绝
        if raw.channels() == 0 || raw.samples() == 0 || raw.rate() == 0 {
            debug!(
                "拒绝非法音频帧: channels={} samples={} rate={}",
                raw.channels(),
                raw.samples(),
                raw.rate()
            );
            return false;
        }

        // 滤镜链：有输出用输出，没有回落到原始帧
        let filtered = self.run_filter(raw);
        let chosen: &util::frame::Audio = filtered.as_ref().unwrap_or(raw);

        if !self.ensure_resampler(chosen) {
            return false;
        }

        let mut resampled = util::frame::Audio::empty();
        if let Err(e) = self.resampler.as_mut().unwrap().run(chosen, &mut resampled) {
            warn!("音频重采样失败: {}", e);
            return false;
        }
        if resampled.samples() == 0 {
            return false;
        }

        // 输出缓冲长度 = 每声道采样数 × 声道数 × 每采样字节数
        let samples_per_channel = resampled.samples();
        let channels = self.target_channels as usize;
        let bytes_per_sample = self.target_format.bytes_per_sample();
        let needed = samples_per_channel * channels * bytes_per_sample;

        let Some(mut guard) = target.buffer.try_write() else {
            debug!("音频块写锁被占用，拒绝本帧");
            return false;
        };
        if SharedBuffer::ensure_len(&mut guard, needed).is_err() {
            return false;
        }
        guard[..needed].copy_from_slice(&resampled.data(0)[..needed]);
        drop(guard);

        resolve_block_timing(frame, prev, target);
        target.stream_index = self.stream_index;
        target.declared_size = needed;
        target.kind = BlockKind::Audio {
            sample_rate: self.target_rate,
            channels: self.target_channels,
            sample_format: self.target_format,
            samples_per_channel,
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
        self.filter = None;
        self.resampler = None;
        self.resampler_spec = None;
        self.decoder = None;
        self.queue.clear();
    }
}

impl Drop for AudioComponent {
    fn drop(&mut self) {
        self.dispose();
    }
}
