use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::clock::RealTimeClock;
use crate::core::error::EngineError;
use crate::core::types::{
    MediaOptions, MediaType, PacketBufferState, PacketQueueOp, Timestamp,
};
use crate::player::block::Block;
use crate::player::block_buffer::BlockBuffer;
use crate::player::commands::CommandManager;
use crate::player::component::SubtitleCue;
use crate::player::container::MediaContainer;
use crate::renderer::Renderer;

/// 宿主回调集合
///
/// 全部在所属工作者线程上调用，宿主自行调度到 UI 线程。
#[derive(Default)]
pub struct EngineCallbacks {
    pub on_packet_queue_changed:
        Option<Box<dyn Fn(PacketQueueOp, MediaType, PacketBufferState) + Send + Sync>>,
    pub on_media_ended: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_position_changed: Option<Box<dyn Fn(Timestamp) + Send + Sync>>,
    pub on_media_failed: Option<Box<dyn Fn(&EngineError) + Send + Sync>>,
    pub on_buffering_changed: Option<Box<dyn Fn(bool) + Send + Sync>>,
}

/// 预加载的外部字幕表
///
/// 存在时优先于字幕流组件（字幕流被忽略）。条目按起始时间排序，
/// 整体偏移在构造时一次性施加。
pub struct PreloadedSubtitles {
    cues: Vec<SubtitleCue>,
}

impl PreloadedSubtitles {
    pub fn new(mut cues: Vec<SubtitleCue>, delay: Timestamp) -> Self {
        for cue in &mut cues {
            cue.start = cue.start + delay;
        }
        cues.sort_by_key(|c| c.start);
        Self { cues }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// 取 `t` 时刻应显示的条目对应的块
    pub fn lookup_block(&self, t: Timestamp) -> Option<Block> {
        if self.cues.is_empty() || t < self.cues[0].start {
            return None;
        }
        let idx = self.cues.partition_point(|c| c.start <= t) - 1;
        let cue = &self.cues[idx];
        if t < cue.start + cue.duration {
            Some(Block::from_subtitle_cue(
                cue.start,
                cue.duration,
                cue.text.clone(),
            ))
        } else {
            None
        }
    }
}

/// 解码统计（宿主可读）
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub decoded_frames: u64,
    /// 各解码窗口码率之和（bit/s）
    pub decode_bit_rate: u64,
}

/// 一次会话的共享对象：容器 + 块缓冲 + 渲染器
pub(crate) struct Session {
    pub container: Arc<MediaContainer>,
    pub buffers: HashMap<MediaType, Arc<Mutex<BlockBuffer>>>,
    pub renderers: HashMap<MediaType, Arc<Mutex<Box<dyn Renderer>>>>,
    pub main_media_type: MediaType,
}

/// 流水线共享状态 - 三个工作者与命令侧的交汇点
///
/// 时钟是"当前时刻"的唯一来源；单字原子做工作者间信号，
/// 粗粒度锁只落在命令管理器和块缓冲上。
pub(crate) struct PipelineState {
    pub clock: RealTimeClock,
    pub commands: CommandManager,
    pub options: MediaOptions,
    pub callbacks: EngineCallbacks,

    pub session: RwLock<Option<Arc<Session>>>,
    pub last_render_time: Mutex<HashMap<MediaType, Timestamp>>,
    pub preloaded_subtitles: RwLock<Option<Arc<PreloadedSubtitles>>>,

    pub has_decoding_ended: AtomicBool,
    pub is_buffering: AtomicBool,
    pub media_ended_fired: AtomicBool,
    pub is_playing_desired: AtomicBool,
    pub has_started_rendering: AtomicBool,

    pub stats: Mutex<PipelineStats>,
}

impl PipelineState {
    pub fn new(options: MediaOptions, callbacks: EngineCallbacks) -> Self {
        Self {
            clock: RealTimeClock::new(),
            commands: CommandManager::new(),
            options,
            callbacks,
            session: RwLock::new(None),
            last_render_time: Mutex::new(HashMap::new()),
            preloaded_subtitles: RwLock::new(None),
            has_decoding_ended: AtomicBool::new(false),
            is_buffering: AtomicBool::new(false),
            media_ended_fired: AtomicBool::new(false),
            is_playing_desired: AtomicBool::new(false),
            has_started_rendering: AtomicBool::new(false),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap().clone()
    }

    pub fn last_render_time_of(&self, media_type: MediaType) -> Timestamp {
        self.last_render_time
            .lock()
            .unwrap()
            .get(&media_type)
            .copied()
            .unwrap_or(Timestamp::UNSET)
    }

    /// 使渲染器失效：下一个匹配块必须重新送达
    ///
    /// 幂等：重复调用与调用一次等价。
    pub fn invalidate_renderer(&self, session: &Session, media_type: MediaType) {
        self.last_render_time
            .lock()
            .unwrap()
            .insert(media_type, Timestamp::UNSET);
        if let Some(renderer) = session.renderers.get(&media_type) {
            renderer.lock().unwrap().seek();
        }
    }

    pub fn invalidate_all_renderers(&self, session: &Session) {
        for &media_type in session.renderers.keys() {
            self.invalidate_renderer(session, media_type);
        }
    }

    /// Seek 的实际执行（解码工作者在周期头部调用）
    pub fn perform_seek(&self, target: Timestamp) {
        let Some(session) = self.session() else {
            return;
        };
        info!("🎯 执行 Seek: {}", target);

        if let Err(e) = session.container.seek(target) {
            error!("容器 Seek 失败: {}", e);
        }

        for (&media_type, buffer) in &session.buffers {
            buffer.lock().unwrap().clear();
            self.notify_queue_changed(
                PacketQueueOp::Cleared,
                media_type,
                PacketBufferState::default(),
            );
        }

        self.invalidate_all_renderers(&session);
        self.clock.update(target);
        self.has_decoding_ended.store(false, Ordering::SeqCst);
        self.media_ended_fired.store(false, Ordering::SeqCst);
    }

    // ---------- 宿主通知 ----------

    pub fn notify_queue_changed(
        &self,
        op: PacketQueueOp,
        media_type: MediaType,
        state: PacketBufferState,
    ) {
        if let Some(cb) = &self.callbacks.on_packet_queue_changed {
            cb(op, media_type, state);
        }
    }

    pub fn notify_position(&self, position: Timestamp) {
        if let Some(cb) = &self.callbacks.on_position_changed {
            cb(position);
        }
    }

    pub fn notify_media_ended(&self) {
        info!("🏁 播放结束");
        if let Some(cb) = &self.callbacks.on_media_ended {
            cb();
        }
    }

    pub fn notify_media_failed(&self, error: &EngineError) {
        warn!("媒体加载失败: {}", error);
        if let Some(cb) = &self.callbacks.on_media_failed {
            cb(error);
        }
    }

    /// 缓冲状态变迁（去抖：只在翻转时回调）
    pub fn set_buffering(&self, buffering: bool) {
        if self.is_buffering.swap(buffering, Ordering::SeqCst) != buffering {
            info!(
                "{}",
                if buffering {
                    "⏳ 进入缓冲状态"
                } else {
                    "✅ 缓冲完成"
                }
            );
            if let Some(cb) = &self.callbacks.on_buffering_changed {
                cb(buffering);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start_ms: i64, dur_ms: i64, text: &str) -> SubtitleCue {
        SubtitleCue {
            start: Timestamp::from_millis(start_ms),
            duration: Timestamp::from_millis(dur_ms),
            text: text.to_string(),
        }
    }

    #[test]
    fn preloaded_subtitles_lookup() {
        let subs = PreloadedSubtitles::new(
            vec![cue(2000, 1000, "第二条"), cue(0, 1000, "第一条")],
            Timestamp::ZERO,
        );
        assert_eq!(subs.len(), 2);

        let hit = subs.lookup_block(Timestamp::from_millis(500)).unwrap();
        assert!(matches!(
            hit.kind,
            crate::player::block::BlockKind::Subtitle { ref text } if text == "第一条"
        ));
        // 两条之间的空档
        assert!(subs.lookup_block(Timestamp::from_millis(1500)).is_none());
        // 第一条之前
        assert!(subs.lookup_block(Timestamp::from_millis(-10)).is_none());
    }

    #[test]
    fn preloaded_subtitles_apply_delay() {
        let subs = PreloadedSubtitles::new(vec![cue(0, 1000, "晚到")], Timestamp::from_millis(500));
        assert!(subs.lookup_block(Timestamp::from_millis(100)).is_none());
        assert!(subs.lookup_block(Timestamp::from_millis(700)).is_some());
    }
}
