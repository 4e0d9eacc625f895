use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{MediaType, Timestamp};
use crate::player::block::Block;
use crate::player::pipeline::{PipelineState, Session};
use crate::player::worker::WorkerCycle;

/// 渲染工作者的周期体（周期 30 ms）
///
/// 快照挂钟 → 逐类型选出覆盖挂钟的块 → 起始时间变化（或被强制
/// 失效）才送渲染器 → 每轮 update → 末尾做播放结束检测与位置发布。
pub(crate) struct RenderingCycle {
    pub state: Arc<PipelineState>,
}

impl RenderingCycle {
    /// 启动前导：主缓冲出现首块（或解码已结束）后对齐时钟、等渲染器就绪
    fn try_begin(&self, session: &Session, interrupt: &AtomicBool) -> bool {
        if self.state.has_started_rendering.load(Ordering::SeqCst) {
            return true;
        }

        let main_ready = session
            .buffers
            .get(&session.main_media_type)
            .map(|b| b.lock().unwrap().count() > 0)
            .unwrap_or(false);
        if !main_ready
            && !self.state.has_decoding_ended.load(Ordering::SeqCst)
            && !interrupt.load(Ordering::SeqCst)
        {
            return false;
        }

        if let Some(buffer) = session.buffers.get(&session.main_media_type) {
            let range_start = buffer.lock().unwrap().range_start();
            info!("🎬 渲染启动，时钟对齐到窗口起点 {}", range_start);
            self.state.clock.update(range_start);
        }
        for renderer in session.renderers.values() {
            renderer.lock().unwrap().wait_for_ready();
        }
        self.state
            .has_started_rendering
            .store(true, Ordering::SeqCst);
        true
    }

    /// 为 `media_type` 选出挂钟时刻应显示的块
    fn pick_current(&self, session: &Session, media_type: MediaType, wall: Timestamp) -> Option<Block> {
        if media_type == MediaType::Subtitle {
            // 预加载字幕表存在时优先，字幕流组件被忽略
            if let Some(preloaded) = self.state.preloaded_subtitles.read().unwrap().clone() {
                return preloaded.lookup_block(wall);
            }
        }
        session
            .buffers
            .get(&media_type)
            .and_then(|b| b.lock().unwrap().lookup(wall).cloned())
    }

    fn send_block_to_renderer(
        &self,
        session: &Session,
        media_type: MediaType,
        block: &Block,
        wall: Timestamp,
    ) {
        let Some(renderer) = session.renderers.get(&media_type) else {
            return;
        };
        debug!(
            "📺 送块到渲染器 [{}]: start={} wall={}",
            media_type, block.start, wall
        );
        // 渲染失败不拖垮流水线：记录后继续
        if let Err(e) = renderer.lock().unwrap().render(block, wall) {
            warn!("渲染器 [{}] render 失败: {}", media_type, e);
        }
    }

    /// 播放结束检测：解码排干且挂钟越过主窗口末端
    fn detect_media_ended(&self, session: &Session, wall: Timestamp) {
        let state = &self.state;
        if !state.has_decoding_ended.load(Ordering::SeqCst)
            || state.commands.is_seeking()
            || state.media_ended_fired.load(Ordering::SeqCst)
        {
            return;
        }

        let main = session.main_media_type;
        let Some(buffer) = session.buffers.get(&main) else {
            return;
        };
        let range_end = buffer.lock().unwrap().range_end();

        let last_rendered = state.last_render_time_of(main);
        let past_last_render = last_rendered.is_unset() || wall >= last_rendered;
        if past_last_render && wall >= range_end {
            state.clock.pause();
            state.clock.update(range_end);
            state.media_ended_fired.store(true, Ordering::SeqCst);
            state.is_playing_desired.store(false, Ordering::SeqCst);
            state.notify_media_ended();
            state.invalidate_all_renderers(session);
        }
    }
}

impl WorkerCycle for RenderingCycle {
    fn execute_cycle(&mut self, interrupt: &AtomicBool) -> bool {
        let state = &self.state;

        // 1. 直接命令在途则让路；活动的 Seek 给一小段时间落定
        if state.commands.is_executing_direct_command() {
            return false;
        }
        if state.commands.is_seeking()
            && !state
                .commands
                .wait_for_seek_settled(Duration::from_millis(100))
        {
            return false;
        }

        let Some(session) = state.session() else {
            return false;
        };
        if !self.try_begin(&session, interrupt) {
            return false;
        }

        // 2. 快照挂钟
        let wall = state.clock.position();

        // 3/4. 选块并按"起始时间变化或被失效"的门控送渲染器
        let media_types: Vec<MediaType> = session.renderers.keys().copied().collect();
        for media_type in media_types {
            if let Some(block) = self.pick_current(&session, media_type, wall) {
                let last = state.last_render_time_of(media_type);
                if last.is_unset() || block.start != last {
                    state
                        .last_render_time
                        .lock()
                        .unwrap()
                        .insert(media_type, block.start);
                    self.send_block_to_renderer(&session, media_type, &block, wall);
                }
            }

            // 5. 无论是否送块，每轮都 update
            if let Some(renderer) = session.renderers.get(&media_type) {
                renderer.lock().unwrap().update(wall);
            }
        }

        // 6. 播放结束检测
        self.detect_media_ended(&session, wall);

        // 7. 发布位置（中断或缓冲中不发）
        if !interrupt.load(Ordering::SeqCst) && !state.is_buffering.load(Ordering::SeqCst) {
            state.notify_position(wall);
        }
        false
    }
}
