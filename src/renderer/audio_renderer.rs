use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use crate::core::error::{EngineError, Result};
use crate::core::types::{SampleFormat, Timestamp};
use crate::player::block::{Block, BlockKind};
use crate::renderer::Renderer;

/// 环形缓冲上限（样本数），超过则跳帧防止延迟累积
const MAX_BUFFERED_SAMPLES: usize = 48000 * 2 * 2;

/// cpal 音频渲染器 - 把音频块送进系统输出设备
///
/// `render` 只是把样本压入无锁队列，立即返回；
/// 实际回放发生在 cpal 的回调线程里。
pub struct CpalAudioRenderer {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
}

// cpal::Stream 本身不是 Send，但渲染器的所有调用都来自渲染工作者
// 这一条线程，不会并发访问
unsafe impl Send for CpalAudioRenderer {}

impl CpalAudioRenderer {
    /// 创建音频渲染器（设备不支持请求配置时自动回退标准配置）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频渲染器: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::RenderError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let mut config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| EngineError::RenderError(format!("无法获取音频配置: {}", e)))?;
        let is_supported = supported
            .into_iter()
            .any(|s| Self::is_config_compatible(&config, &s));

        if !is_supported {
            warn!(
                "⚠️  音频设备不支持 {} Hz / {} 声道，回退标准配置",
                sample_rate, channels
            );
            let fallbacks = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            let mut found = false;
            for (rate, ch) in fallbacks {
                let candidate = StreamConfig {
                    channels: ch,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                let supported = device
                    .supported_output_configs()
                    .map_err(|e| EngineError::RenderError(format!("无法获取音频配置: {}", e)))?;
                if supported
                    .into_iter()
                    .any(|s| Self::is_config_compatible(&candidate, &s))
                {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", rate, ch);
                    config = candidate;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(EngineError::RenderError(format!(
                    "音频设备不支持任何标准配置 (原请求 {} Hz / {} 声道)",
                    sample_rate, channels
                )));
            }
        }

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0
            && config.channels == supported.channels()
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    fn clear_buffer(&self) {
        while self.buffer.pop().is_some() {}
    }

    fn start_stream(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock().unwrap();
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().map(|v| v * vol).unwrap_or(0.0);
                    }
                },
                move |err| {
                    warn!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::RenderError(format!("创建音频流失败: {}", e)))?;
        stream
            .play()
            .map_err(|e| EngineError::RenderError(format!("启动音频流失败: {}", e)))?;
        self.stream = Some(stream);
        info!("🔊 音频输出已启动");
        Ok(())
    }
}

impl Renderer for CpalAudioRenderer {
    fn wait_for_ready(&mut self) {
        if let Err(e) = self.start_stream() {
            warn!("音频流启动失败: {}", e);
        }
    }

    fn play(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.play();
        }
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
        // 清掉残余样本，避免恢复时"拖尾"
        self.clear_buffer();
    }

    fn stop(&mut self) {
        self.clear_buffer();
    }

    fn seek(&mut self) {
        self.clear_buffer();
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("🔊 音频输出已停止");
        }
        self.clear_buffer();
    }

    fn render(&mut self, block: &Block, _wall_clock: Timestamp) -> Result<()> {
        let BlockKind::Audio {
            sample_format,
            samples_per_channel,
            channels,
            ..
        } = block.kind
        else {
            return Err(EngineError::RenderError(
                "音频渲染器收到非音频块".to_string(),
            ));
        };

        // 队列过深则跳帧，避免音频延迟无限累积
        if self.buffer.len() > MAX_BUFFERED_SAMPLES {
            debug!("音频缓冲过深（{} 样本），跳过本块", self.buffer.len());
            return Ok(());
        }

        let total = samples_per_channel * channels as usize;
        let bytes = block.buffer.read();
        match sample_format {
            SampleFormat::F32 => {
                for chunk in bytes[..block.declared_size].chunks_exact(4).take(total) {
                    let v = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    self.buffer.push(v);
                }
            }
            SampleFormat::I16 => {
                for chunk in bytes[..block.declared_size].chunks_exact(2).take(total) {
                    let v = i16::from_ne_bytes([chunk[0], chunk[1]]) as f32 / 32768.0;
                    self.buffer.push(v);
                }
            }
        }
        Ok(())
    }
}

impl Drop for CpalAudioRenderer {
    fn drop(&mut self) {
        self.close();
    }
}
