use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::types::{MediaType, PacketBufferState, PacketQueueOp};
use crate::player::block_buffer::BlockBuffer;
use crate::player::pipeline::{PipelineState, Session};
use crate::player::worker::WorkerCycle;

/// 解码窗口的滞回带：挂钟越过窗口 75% 才继续追加解码，
/// 回落到 25% 容量以上且覆盖挂钟即可提前收手。
/// 窗口偏在挂钟前方，同时给反向 Seek 留余量，缓冲健康时不霸占 CPU。
const RANGE_HIGH_WATER: f64 = 0.75;
const CAPACITY_LOW_WATER: f64 = 0.25;

/// 解码工作者的周期体（周期 20 ms）
///
/// 周期头部执行排队的 Seek；随后逐类型把解码窗口补到滞回带内；
/// 主缓冲脱离挂钟时做兜底（校钟或进入缓冲暂停）；最后判定解码结束。
pub(crate) struct DecodingCycle {
    pub state: Arc<PipelineState>,
}

impl DecodingCycle {
    fn interrupted(&self, interrupt: &AtomicBool) -> bool {
        interrupt.load(Ordering::SeqCst) || self.state.commands.interrupt_requested()
    }

    /// 解一帧并入块缓冲；false 表示本类型这轮到头了
    fn add_next_block(
        &self,
        session: &Session,
        media_type: MediaType,
        buffer: &Arc<Mutex<BlockBuffer>>,
    ) -> bool {
        let received = session
            .container
            .with_component(media_type, |c| c.receive_next_frame());

        let frame = match received {
            Some(Ok(Some(frame))) => frame,
            Some(Ok(None)) => return false,
            Some(Err(e)) => {
                // 错误在周期边界捕获：记录后结束本轮
                error!("[{}] 解码失败: {}", media_type, e);
                return false;
            }
            None => return false,
        };

        let added = session
            .container
            .with_component(media_type, |c| {
                let mut blocks = buffer.lock().unwrap();
                blocks.add(frame, c).is_some()
            })
            .unwrap_or(false);

        if added {
            let queue_state = session
                .container
                .with_component(media_type, |c| PacketBufferState {
                    count: c.buffer_count(),
                    bytes: c.buffer_length(),
                })
                .unwrap_or_default();
            self.state
                .notify_queue_changed(PacketQueueOp::Dequeued, media_type, queue_state);
        }
        added
    }
}

impl WorkerCycle for DecodingCycle {
    fn execute_cycle(&mut self, interrupt: &AtomicBool) -> bool {
        let state = &self.state;

        // 1. 命令仲裁：直接命令在途则让路；排队的 Seek 在这里执行
        if state.commands.is_executing_direct_command() {
            return false;
        }
        if let Some(target) = state.commands.take_pending_seek() {
            state.perform_seek(target);
            state.commands.complete_seek();
        }

        // 2. 解码已结束则无事可做
        if state.has_decoding_ended.load(Ordering::SeqCst) {
            return false;
        }
        let Some(session) = state.session() else {
            return false;
        };

        let wall = state.clock.position();
        let mut decoded_this_cycle = 0usize;
        let mut bit_rate_total = 0u64;

        // 3. 逐类型把解码窗口补进滞回带
        for &media_type in session.container.media_types() {
            let Some(buffer) = session.buffers.get(&media_type) else {
                continue;
            };
            bit_rate_total += buffer.lock().unwrap().range_bit_rate();

            loop {
                if self.interrupted(interrupt) {
                    break;
                }

                let (is_full, range_percent) = {
                    let blocks = buffer.lock().unwrap();
                    (blocks.is_full(), blocks.range_percent(wall))
                };
                // 继续条件：窗口未满，或挂钟已越过窗口的 75%
                if is_full && range_percent <= RANGE_HIGH_WATER {
                    break;
                }

                let has_more = session
                    .container
                    .with_component(media_type, |c| {
                        c.buffer_count() > 0 || c.has_packets_in_codec()
                    })
                    .unwrap_or(false);
                if !has_more {
                    break;
                }

                if !self.add_next_block(&session, media_type, buffer) {
                    break;
                }
                decoded_this_cycle += 1;

                // 缓冲已有足够余量：提前收手
                let blocks = buffer.lock().unwrap();
                let pct = blocks.range_percent(wall);
                if pct > 0.0
                    && pct <= RANGE_HIGH_WATER
                    && !blocks.is_full()
                    && blocks.capacity_percent() >= CAPACITY_LOW_WATER
                    && blocks.is_in_range(wall)
                {
                    break;
                }
            }
        }

        // 4. 主缓冲脱离挂钟的兜底
        let main = session.main_media_type;
        if let Some(main_buffer) = session.buffers.get(&main) {
            let blocks = main_buffer.lock().unwrap();
            if !blocks.is_in_range(wall) {
                if blocks.count() > 0 {
                    // 把挂钟搬回包含它的块（窗口之前则取窗口起点）
                    let target = blocks.get_snap_position(wall).unwrap_or(blocks.range_start());
                    drop(blocks);
                    debug!("🕰️  主缓冲脱离挂钟，校正到 {}", target);
                    state.clock.update(target);
                } else {
                    // 饥饿：暂停时钟等解码追上
                    drop(blocks);
                    state.clock.pause();
                    state.set_buffering(true);
                }
            } else {
                drop(blocks);
                if state.is_buffering.load(Ordering::SeqCst) {
                    state.set_buffering(false);
                    if state.is_playing_desired.load(Ordering::SeqCst)
                        && !state.media_ended_fired.load(Ordering::SeqCst)
                    {
                        state.clock.play();
                    }
                }
            }
        }

        // 5. 统计与解码结束判定
        {
            let mut stats = state.stats.lock().unwrap();
            stats.decoded_frames += decoded_this_cycle as u64;
            stats.decode_bit_rate = bit_rate_total;
        }

        let ended = decoded_this_cycle == 0
            && !self.interrupted(interrupt)
            && !session.container.can_read_more_frames_of(main)
            && session
                .buffers
                .get(&main)
                .map(|buffer| {
                    let blocks = buffer.lock().unwrap();
                    let idx = blocks
                        .index_of(wall)
                        .map(|i| i as i64)
                        .unwrap_or(-1);
                    idx >= blocks.count() as i64 - 1
                })
                .unwrap_or(true);
        if ended && !state.has_decoding_ended.swap(true, Ordering::SeqCst) {
            debug!("📭 解码结束（主类型 {} 无更多帧）", main);
        }

        decoded_this_cycle > 0
    }
}
