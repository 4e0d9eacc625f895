use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::core::types::Timestamp;

/// 命令管理器 - 生命周期命令相对流水线的串行化
///
/// 直接命令（Open/Close/Pause/Play/ChangeSpeed）由宿主线程执行：
/// 先悬挂工作者、做事、再恢复。Seek 是间接命令：入队后由解码
/// 工作者在下一轮周期头部执行，渲染工作者等待其完成信号。
/// 工作者通过 `interrupt_requested` 轮询这些标志。
pub struct CommandManager {
    seeking: AtomicBool,
    closing: AtomicBool,
    stop_workers_pending: AtomicBool,
    executing_direct: AtomicBool,

    /// 待执行的 Seek 目标；堆积时只保留最后一个
    pending_seek: Mutex<Option<Timestamp>>,
    cond: Condvar,
}

impl CommandManager {
    pub fn new() -> Self {
        Self {
            seeking: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            stop_workers_pending: AtomicBool::new(false),
            executing_direct: AtomicBool::new(false),
            pending_seek: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    // ---------- 标志（工作者轮询） ----------

    pub fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn is_stop_workers_pending(&self) -> bool {
        self.stop_workers_pending.load(Ordering::SeqCst)
    }

    pub fn is_executing_direct_command(&self) -> bool {
        self.executing_direct.load(Ordering::SeqCst)
    }

    /// 工作者中断条件：任一命令标志被置位
    pub fn interrupt_requested(&self) -> bool {
        self.is_seeking() || self.is_closing() || self.is_stop_workers_pending()
    }

    // ---------- Seek（间接命令） ----------

    /// 入队 Seek；多个目标堆积时最后一个为准（与解封装侧合并行为一致）
    pub fn queue_seek(&self, target: Timestamp) {
        let mut pending = self.pending_seek.lock().unwrap();
        if let Some(old) = pending.replace(target) {
            debug!("⏩ 合并堆积的 Seek 命令: {} → {}", old, target);
        }
        self.seeking.store(true, Ordering::SeqCst);
        info!("🎯 Seek 入队: {}", target);
    }

    /// 解码工作者在周期头部取走待执行的 Seek
    pub fn take_pending_seek(&self) -> Option<Timestamp> {
        self.pending_seek.lock().unwrap().take()
    }

    /// Seek 执行完毕，唤醒等待者（渲染工作者）
    pub fn complete_seek(&self) {
        self.seeking.store(false, Ordering::SeqCst);
        let _g = self.pending_seek.lock().unwrap();
        self.cond.notify_all();
        info!("✅ Seek 完成");
    }

    /// 短暂等待进行中的 Seek 落定；返回 true 表示已无 Seek 在途
    pub fn wait_for_seek_settled(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut pending = self.pending_seek.lock().unwrap();
        while self.seeking.load(Ordering::SeqCst) {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _) = self.cond.wait_timeout(pending, deadline - now).unwrap();
            pending = g;
        }
        true
    }

    // ---------- 直接命令 ----------

    pub fn begin_direct(&self) {
        self.executing_direct.store(true, Ordering::SeqCst);
    }

    pub fn end_direct(&self) {
        self.executing_direct.store(false, Ordering::SeqCst);
    }

    pub fn begin_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.stop_workers_pending.store(true, Ordering::SeqCst);
    }

    /// 会话关闭后所有标志复位
    pub fn reset(&self) {
        self.seeking.store(false, Ordering::SeqCst);
        self.closing.store(false, Ordering::SeqCst);
        self.stop_workers_pending.store(false, Ordering::SeqCst);
        self.executing_direct.store(false, Ordering::SeqCst);
        let mut pending = self.pending_seek.lock().unwrap();
        pending.take();
        self.cond.notify_all();
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn seek_queue_keeps_latest_target() {
        let cmd = CommandManager::new();
        cmd.queue_seek(Timestamp::from_millis(1000));
        cmd.queue_seek(Timestamp::from_millis(2500));
        assert!(cmd.is_seeking());
        assert!(cmd.interrupt_requested());

        // 堆积的命令只执行最后一个
        assert_eq!(cmd.take_pending_seek(), Some(Timestamp::from_millis(2500)));
        assert_eq!(cmd.take_pending_seek(), None);

        cmd.complete_seek();
        assert!(!cmd.is_seeking());
        assert!(!cmd.interrupt_requested());
    }

    #[test]
    fn wait_for_seek_settles_on_completion() {
        let cmd = Arc::new(CommandManager::new());
        cmd.queue_seek(Timestamp::from_millis(500));

        let c = cmd.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            c.take_pending_seek();
            c.complete_seek();
        });

        assert!(cmd.wait_for_seek_settled(Duration::from_secs(1)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_seek_times_out() {
        let cmd = CommandManager::new();
        cmd.queue_seek(Timestamp::ZERO);
        assert!(!cmd.wait_for_seek_settled(Duration::from_millis(20)));
    }

    #[test]
    fn close_sets_stop_pending() {
        let cmd = CommandManager::new();
        cmd.begin_close();
        assert!(cmd.is_closing());
        assert!(cmd.is_stop_workers_pending());
        assert!(cmd.interrupt_requested());
        cmd.reset();
        assert!(!cmd.interrupt_requested());
    }

    #[test]
    fn direct_command_flag() {
        let cmd = CommandManager::new();
        assert!(!cmd.is_executing_direct_command());
        cmd.begin_direct();
        assert!(cmd.is_executing_direct_command());
        // 直接命令不算中断条件（工作者此时已被悬挂）
        assert!(!cmd.interrupt_requested());
        cmd.end_direct();
        assert!(!cmd.is_executing_direct_command());
    }
}
