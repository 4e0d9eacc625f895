use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::types::PacketQueueOp;
use crate::player::container::ReadOutcome;
use crate::player::pipeline::PipelineState;
use crate::player::worker::WorkerCycle;

/// 读取工作者的周期体（周期 10 ms）
///
/// 每轮最多读一个包；产出包时请求立即下一轮，把突发源排干。
/// 读多少由容器的判据决定（直播恒读、网络流按 16 MiB 上限、
/// 本地文件按组件包量阈值）。
pub(crate) struct ReadingCycle {
    pub state: Arc<PipelineState>,
}

impl WorkerCycle for ReadingCycle {
    fn execute_cycle(&mut self, interrupt: &AtomicBool) -> bool {
        if interrupt.load(Ordering::SeqCst) || self.state.commands.interrupt_requested() {
            return false;
        }
        let Some(session) = self.state.session() else {
            return false;
        };
        if !session.container.should_read_more_packets() {
            return false;
        }

        match session.container.read() {
            Ok(ReadOutcome::Packet {
                media_type,
                queue_state,
            }) => {
                self.state
                    .notify_queue_changed(PacketQueueOp::Enqueued, media_type, queue_state);
                true
            }
            Ok(ReadOutcome::Skipped) => true,
            Ok(ReadOutcome::EndOfStream) => false,
            // 容器已记录错误并转入 EOF 化状态，周期边界到此为止
            Err(_) => false,
        }
    }
}
