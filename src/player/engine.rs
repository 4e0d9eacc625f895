use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use ffmpeg_next as ffmpeg;

use crate::core::error::{EngineError, Result};
use crate::core::types::{
    MediaOptions, MediaType, PlaybackStatus, Timestamp, DECODING_CYCLE_MS, READING_CYCLE_MS,
    RENDERING_CYCLE_MS,
};
use crate::player::block_buffer::BlockBuffer;
use crate::player::component::SubtitleCue;
use crate::player::container::MediaContainer;
use crate::player::decoding_worker::DecodingCycle;
use crate::player::ffmpeg_source::FfmpegSource;
use crate::player::pipeline::{
    EngineCallbacks, PipelineState, PipelineStats, PreloadedSubtitles, Session,
};
use crate::player::reading_worker::ReadingCycle;
use crate::player::rendering_worker::RenderingCycle;
use crate::player::source::PacketSource;
use crate::player::worker::Worker;
use crate::renderer::Renderer;

static FFMPEG_INIT: Once = Once::new();

fn ensure_ffmpeg_initialized() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            warn!("FFmpeg 初始化失败: {}", e);
        }
    });
}

/// 渲染器工厂 - 会话开始时按媒体类型创建宿主渲染器
pub type RendererFactory = Box<dyn Fn(MediaType) -> Box<dyn Renderer> + Send + Sync>;

/// 块缓冲的瞬时统计（宿主可读）
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferStatistics {
    pub count: usize,
    pub capacity: usize,
    pub range_start: Timestamp,
    pub range_end: Timestamp,
    pub is_full: bool,
}

struct PipelineWorkers {
    reading: Worker,
    decoding: Worker,
    rendering: Worker,
}

impl PipelineWorkers {
    fn suspend_all(&self) {
        self.reading.suspend();
        self.decoding.suspend();
        self.rendering.suspend();
    }

    fn resume_all(&self) {
        self.reading.resume();
        self.decoding.resume();
        self.rendering.resume();
    }

    fn dispose_all(&mut self) {
        // 先停读取，再停解码，最后停渲染
        self.reading.dispose();
        self.decoding.dispose();
        self.rendering.dispose();
    }
}

/// 媒体引擎 - 三级流水线（读取/解码/渲染）的装配与命令入口
///
/// 一个引擎实例同一时刻至多一个会话。生命周期：
/// 打开容器 → 创建组件 → 分配块缓冲 → 创建渲染器 → 启动工作者
/// →（播放）→ 停工作者 → 关渲染器 → 释放组件 → 关容器。
pub struct MediaEngine {
    state: Arc<PipelineState>,
    renderer_factory: RendererFactory,
    workers: Option<PipelineWorkers>,
    status: PlaybackStatus,
}

impl MediaEngine {
    pub fn new(
        options: MediaOptions,
        callbacks: EngineCallbacks,
        renderer_factory: RendererFactory,
    ) -> Self {
        Self {
            state: Arc::new(PipelineState::new(options, callbacks)),
            renderer_factory,
            workers: None,
            status: PlaybackStatus::Idle,
        }
    }

    // ---------- 会话生命周期 ----------

    /// 打开本地文件或网络流（FFmpeg 源）
    pub fn open(&mut self, path: &str) -> Result<()> {
        ensure_ffmpeg_initialized();
        let source = match FfmpegSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                self.state.notify_media_failed(&e);
                return Err(e);
            }
        };
        self.open_source(Box::new(source))
    }

    /// 用任意包源打开会话
    pub fn open_source(&mut self, source: Box<dyn PacketSource>) -> Result<()> {
        if self.workers.is_some() {
            return Err(EngineError::StateError(
                "已有会话打开，请先 close".to_string(),
            ));
        }
        self.status = PlaybackStatus::Opening;

        let container = match MediaContainer::open(source, &self.state.options) {
            Ok(container) => Arc::new(container),
            Err(e) => {
                self.status = PlaybackStatus::Idle;
                self.state.notify_media_failed(&e);
                return Err(e);
            }
        };

        // 按容器中的流分配块缓冲并创建渲染器
        let mut buffers = HashMap::new();
        let mut renderers = HashMap::new();
        for &media_type in container.media_types() {
            buffers.insert(
                media_type,
                Arc::new(Mutex::new(BlockBuffer::new(
                    media_type,
                    media_type.block_capacity(),
                ))),
            );
            renderers.insert(
                media_type,
                Arc::new(Mutex::new((self.renderer_factory)(media_type))),
            );
        }
        // 声明了外部字幕但容器没有字幕流：仍需要字幕渲染器消费预加载表
        if self.state.options.subtitles_url.is_some()
            && !self.state.options.is_subtitle_disabled
            && !renderers.contains_key(&MediaType::Subtitle)
        {
            renderers.insert(
                MediaType::Subtitle,
                Arc::new(Mutex::new((self.renderer_factory)(MediaType::Subtitle))),
            );
        }

        let session = Arc::new(Session {
            main_media_type: container.main_media_type(),
            container,
            buffers,
            renderers,
        });

        // 会话状态复位
        self.state.last_render_time.lock().unwrap().clear();
        self.state.has_decoding_ended.store(false, Ordering::SeqCst);
        self.state.media_ended_fired.store(false, Ordering::SeqCst);
        self.state.is_playing_desired.store(false, Ordering::SeqCst);
        self.state
            .has_started_rendering
            .store(false, Ordering::SeqCst);
        self.state.set_buffering(false);
        *self.state.stats.lock().unwrap() = PipelineStats::default();
        self.state.clock.reset();
        *self.state.session.write().unwrap() = Some(session);

        // 启动三个工作者：读取 → 解码 → 渲染
        let mut workers = PipelineWorkers {
            reading: Worker::new(
                "读取",
                Duration::from_millis(READING_CYCLE_MS),
                ReadingCycle {
                    state: self.state.clone(),
                },
            ),
            decoding: Worker::new(
                "解码",
                Duration::from_millis(DECODING_CYCLE_MS),
                DecodingCycle {
                    state: self.state.clone(),
                },
            ),
            rendering: Worker::new(
                "渲染",
                Duration::from_millis(RENDERING_CYCLE_MS),
                RenderingCycle {
                    state: self.state.clone(),
                },
            ),
        };
        workers.reading.start();
        workers.decoding.start();
        workers.rendering.start();
        self.workers = Some(workers);

        self.status = PlaybackStatus::Paused;
        info!("✅ 会话已打开");
        Ok(())
    }

    /// 关闭会话，确定性释放所有资源
    pub fn close(&mut self) -> Result<()> {
        let Some(mut workers) = self.workers.take() else {
            self.status = PlaybackStatus::Idle;
            return Ok(());
        };
        info!("⏹️  关闭会话");
        self.state.commands.begin_close();

        if let Some(session) = self.state.session() {
            session.container.signal_abort_reads(true);
        }
        workers.dispose_all();

        if let Some(session) = self.state.session() {
            for renderer in session.renderers.values() {
                renderer.lock().unwrap().close();
            }
            session.container.dispose();
        }

        *self.state.session.write().unwrap() = None;
        self.state.last_render_time.lock().unwrap().clear();
        *self.state.preloaded_subtitles.write().unwrap() = None;
        self.state.clock.reset();
        self.state.commands.reset();
        self.status = PlaybackStatus::Idle;
        info!("✅ 会话已关闭");
        Ok(())
    }

    // ---------- 播放命令 ----------

    /// 直接命令的公共骨架：悬挂工作者 → 做事 → 恢复
    fn run_direct(&mut self, f: impl FnOnce(&PipelineState)) -> Result<()> {
        let Some(workers) = &self.workers else {
            return Err(EngineError::StateError("没有打开的会话".to_string()));
        };
        self.state.commands.begin_direct();
        workers.suspend_all();
        f(&self.state);
        workers.resume_all();
        self.state.commands.end_direct();
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        info!("🎬 播放");
        self.run_direct(|state| {
            state.is_playing_desired.store(true, Ordering::SeqCst);
            if let Some(session) = state.session() {
                for renderer in session.renderers.values() {
                    renderer.lock().unwrap().play();
                }
            }
            state.clock.play();
        })?;
        self.status = PlaybackStatus::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        info!("🎬 暂停");
        self.run_direct(|state| {
            state.is_playing_desired.store(false, Ordering::SeqCst);
            state.clock.pause();
            if let Some(session) = state.session() {
                for renderer in session.renderers.values() {
                    renderer.lock().unwrap().pause();
                }
            }
        })?;
        self.status = PlaybackStatus::Paused;
        Ok(())
    }

    /// Seek 是间接命令：入队后由解码工作者在下一轮周期头部执行
    pub fn seek(&mut self, target: Timestamp) -> Result<()> {
        if self.workers.is_none() {
            return Err(EngineError::StateError("没有打开的会话".to_string()));
        }
        self.state.commands.queue_seek(target);
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if speed <= 0.0 {
            return Err(EngineError::StateError(format!(
                "播放速率必须为正: {}",
                speed
            )));
        }
        self.run_direct(|state| state.clock.set_speed(speed))
    }

    /// 停止：暂停 + 回到起点
    pub fn stop(&mut self) -> Result<()> {
        info!("⏹️  停止");
        self.run_direct(|state| {
            state.is_playing_desired.store(false, Ordering::SeqCst);
            state.clock.pause();
            if let Some(session) = state.session() {
                for renderer in session.renderers.values() {
                    renderer.lock().unwrap().stop();
                }
            }
        })?;
        self.state.commands.queue_seek(Timestamp::ZERO);
        self.status = PlaybackStatus::Stopped;
        Ok(())
    }

    /// 注入已解析的外部字幕表（优先于字幕流组件）
    pub fn preload_subtitles(&mut self, cues: Vec<SubtitleCue>) {
        let delay = Timestamp::from_millis(self.state.options.subtitles_delay_ms);
        let preloaded = PreloadedSubtitles::new(cues, delay);
        info!("📝 预加载外部字幕: {} 条", preloaded.len());
        *self.state.preloaded_subtitles.write().unwrap() = Some(Arc::new(preloaded));
    }

    // ---------- 状态查询 ----------

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn position(&self) -> Timestamp {
        self.state.clock.position()
    }

    pub fn speed(&self) -> f64 {
        self.state.clock.speed()
    }

    pub fn duration(&self) -> Option<Timestamp> {
        self.state.session().and_then(|s| s.container.duration())
    }

    pub fn is_seeking(&self) -> bool {
        self.state.commands.is_seeking()
    }

    pub fn is_buffering(&self) -> bool {
        self.state.is_buffering.load(Ordering::SeqCst)
    }

    pub fn has_decoding_ended(&self) -> bool {
        self.state.has_decoding_ended.load(Ordering::SeqCst)
    }

    pub fn has_media_ended(&self) -> bool {
        self.state.media_ended_fired.load(Ordering::SeqCst)
    }

    pub fn main_media_type(&self) -> Option<MediaType> {
        self.state.session().map(|s| s.main_media_type)
    }

    pub fn stats(&self) -> PipelineStats {
        *self.state.stats.lock().unwrap()
    }

    pub fn buffer_statistics(&self, media_type: MediaType) -> Option<BufferStatistics> {
        let session = self.state.session()?;
        let buffer = session.buffers.get(&media_type)?;
        let blocks = buffer.lock().unwrap();
        Some(BufferStatistics {
            count: blocks.count(),
            capacity: blocks.capacity(),
            range_start: blocks.range_start(),
            range_end: blocks.range_end(),
            is_full: blocks.is_full(),
        })
    }
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        // 显式 close 是主路径，这里兜底
        let _ = self.close();
    }
}
