use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 工作者状态机：Unstarted → Running ⇄ Suspended → Stopped → Disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unstarted,
    Running,
    Suspended,
    Stopped,
    Disposed,
}

/// 周期体 - 返回 true 表示不等周期、立即再来一轮（解码器清积压用）
///
/// 长循环必须轮询 `interrupt`，在悬挂点及时退出。
pub trait WorkerCycle: Send + 'static {
    fn execute_cycle(&mut self, interrupt: &AtomicBool) -> bool;
}

impl<F> WorkerCycle for F
where
    F: FnMut(&AtomicBool) -> bool + Send + 'static,
{
    fn execute_cycle(&mut self, interrupt: &AtomicBool) -> bool {
        self(interrupt)
    }
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    cond: Condvar,
    interrupt: AtomicBool,
    in_cycle: AtomicBool,
    cycle_serial: AtomicU64,
    has_started: AtomicBool,
}

/// 周期性协作工作者
///
/// 每个工作者一条专属线程，同一工作者同时至多一轮在途（线程本身即重入保护）。
/// 周期必须在构造时显式给出。
pub struct Worker {
    name: String,
    period: Duration,
    shared: Arc<WorkerShared>,
    body: Option<Box<dyn WorkerCycle>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, period: Duration, body: impl WorkerCycle) -> Self {
        Self {
            name: name.into(),
            period,
            shared: Arc::new(WorkerShared {
                state: Mutex::new(WorkerState::Unstarted),
                cond: Condvar::new(),
                interrupt: AtomicBool::new(false),
                in_cycle: AtomicBool::new(false),
                cycle_serial: AtomicU64::new(0),
                has_started: AtomicBool::new(false),
            }),
            body: Some(Box::new(body)),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock().unwrap()
    }

    /// 本工作者自身的中断标志（命令管理器的标志由周期体自行合并轮询）
    pub fn interrupt_requested(&self) -> bool {
        self.shared.interrupt.load(Ordering::SeqCst)
    }

    /// 启动：进入 Running 并等第一轮开始后返回
    pub fn start(&mut self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            if *st != WorkerState::Unstarted {
                warn!("⚠️  工作者 [{}] 已启动过，忽略 start", self.name);
                return;
            }
            *st = WorkerState::Running;
        }

        let shared = self.shared.clone();
        let mut body = self.body.take().expect("周期体只能启动一次");
        let name = self.name.clone();
        let period = self.period;

        self.handle = Some(thread::spawn(move || {
            info!("🧵 工作者 [{}] 启动（周期 {:?}）", name, period);
            loop {
                // 状态门：Running 才进入下一轮；Suspended 在此停驻
                {
                    let mut st = shared.state.lock().unwrap();
                    loop {
                        match *st {
                            WorkerState::Running => break,
                            WorkerState::Suspended | WorkerState::Unstarted => {
                                st = shared.cond.wait(st).unwrap();
                            }
                            WorkerState::Stopped | WorkerState::Disposed => {
                                info!("🛑 工作者 [{}] 退出", name);
                                return;
                            }
                        }
                    }
                }

                if !shared.has_started.swap(true, Ordering::SeqCst) {
                    let _g = shared.state.lock().unwrap();
                    shared.cond.notify_all();
                }

                shared.in_cycle.store(true, Ordering::SeqCst);
                let immediate = body.execute_cycle(&shared.interrupt);
                shared.in_cycle.store(false, Ordering::SeqCst);
                shared.cycle_serial.fetch_add(1, Ordering::SeqCst);
                {
                    let _g = shared.state.lock().unwrap();
                    shared.cond.notify_all();
                }

                if !immediate {
                    // 可中断的周期等待：状态变化会提前唤醒
                    let st = shared.state.lock().unwrap();
                    if *st == WorkerState::Running && !shared.interrupt.load(Ordering::SeqCst) {
                        let _ = shared.cond.wait_timeout(st, period).unwrap();
                    }
                }
            }
        }));

        // 等第一轮真正开始
        let mut st = self.shared.state.lock().unwrap();
        while !self.shared.has_started.load(Ordering::SeqCst) {
            let (g, _) = self
                .shared
                .cond
                .wait_timeout(st, Duration::from_millis(50))
                .unwrap();
            st = g;
            if matches!(*st, WorkerState::Stopped | WorkerState::Disposed) {
                break;
            }
        }
        debug!("✅ 工作者 [{}] 首轮已开始", self.name);
    }

    /// 悬挂：置中断标志，等在途周期跑到悬挂点退出
    pub fn suspend(&self) {
        let mut st = self.shared.state.lock().unwrap();
        if *st != WorkerState::Running {
            return;
        }
        self.shared.interrupt.store(true, Ordering::SeqCst);
        *st = WorkerState::Suspended;
        self.shared.cond.notify_all();

        while self.shared.in_cycle.load(Ordering::SeqCst) {
            let (g, _) = self
                .shared
                .cond
                .wait_timeout(st, Duration::from_millis(5))
                .unwrap();
            st = g;
        }
        debug!("⏸️  工作者 [{}] 已悬挂", self.name);
    }

    /// 恢复：清中断标志，继续周期
    pub fn resume(&self) {
        let mut st = self.shared.state.lock().unwrap();
        if *st != WorkerState::Suspended {
            return;
        }
        self.shared.interrupt.store(false, Ordering::SeqCst);
        *st = WorkerState::Running;
        self.shared.cond.notify_all();
        debug!("▶️  工作者 [{}] 已恢复", self.name);
    }

    /// 停止：悬挂语义 + 结束线程（join 在途周期）
    pub fn stop(&mut self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            match *st {
                WorkerState::Stopped | WorkerState::Disposed => return,
                WorkerState::Unstarted => {
                    *st = WorkerState::Stopped;
                    return;
                }
                _ => {}
            }
            self.shared.interrupt.store(true, Ordering::SeqCst);
            *st = WorkerState::Stopped;
            self.shared.cond.notify_all();
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("✅ 工作者 [{}] 已停止", self.name);
    }

    /// 阻塞到下一个周期边界（工作者已停止/释放时立即返回）
    pub fn wait_one(&self) {
        let start_serial = self.shared.cycle_serial.load(Ordering::SeqCst);
        let mut st = self.shared.state.lock().unwrap();
        loop {
            if self.shared.cycle_serial.load(Ordering::SeqCst) > start_serial {
                return;
            }
            if matches!(*st, WorkerState::Stopped | WorkerState::Disposed) {
                return;
            }
            let (g, _) = self
                .shared
                .cond
                .wait_timeout(st, Duration::from_millis(50))
                .unwrap();
            st = g;
        }
    }

    /// 带超时的周期边界等待；等到边界返回 true
    pub fn wait_one_timeout(&self, timeout: Duration) -> bool {
        let start_serial = self.shared.cycle_serial.load(Ordering::SeqCst);
        let deadline = std::time::Instant::now() + timeout;

        let mut st = self.shared.state.lock().unwrap();
        loop {
            if self.shared.cycle_serial.load(Ordering::SeqCst) > start_serial {
                return true;
            }
            if matches!(*st, WorkerState::Stopped | WorkerState::Disposed) {
                return false;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            let (g, _) = self.shared.cond.wait_timeout(st, wait).unwrap();
            st = g;
        }
    }

    /// 停止并释放
    pub fn dispose(&mut self) {
        self.stop();
        let mut st = self.shared.state.lock().unwrap();
        *st = WorkerState::Disposed;
        self.shared.cond.notify_all();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("⚠️  工作者 [{}] 被 drop 但未显式停止，执行兜底清理", self.name);
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    fn counting_worker(period_ms: u64) -> (Worker, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        let worker = Worker::new(
            "test",
            Duration::from_millis(period_ms),
            move |_: &AtomicBool| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            },
        );
        (worker, counter)
    }

    #[test]
    fn lifecycle_start_suspend_resume_stop() {
        let (mut worker, counter) = counting_worker(10);
        assert_eq!(worker.state(), WorkerState::Unstarted);

        worker.start();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(worker.wait_one_timeout(Duration::from_secs(1)));
        assert!(counter.load(Ordering::SeqCst) >= 1);

        worker.suspend();
        assert_eq!(worker.state(), WorkerState::Suspended);
        let frozen = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(counter.load(Ordering::SeqCst), frozen, "悬挂期间不应再跑周期");

        worker.resume();
        assert!(worker.wait_one_timeout(Duration::from_secs(1)));
        assert!(counter.load(Ordering::SeqCst) > frozen);

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn immediate_loop_skips_period_wait() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        // 前 5 轮请求立即继续，之后按周期
        let mut worker = Worker::new(
            "burst",
            Duration::from_millis(200),
            move |_: &AtomicBool| {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                n < 5
            },
        );
        let t0 = Instant::now();
        worker.start();
        while counter.load(Ordering::SeqCst) < 5 && t0.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(5));
        }
        // 若每轮都等 200ms 周期，5 轮至少要 800ms
        assert!(counter.load(Ordering::SeqCst) >= 5);
        assert!(t0.elapsed() < Duration::from_millis(500));
        worker.dispose();
    }

    #[test]
    fn suspend_interrupts_long_cycle_promptly() {
        let entered = Arc::new(AtomicBool::new(false));
        let e = entered.clone();
        let mut worker = Worker::new(
            "long",
            Duration::from_millis(10),
            move |interrupt: &AtomicBool| {
                e.store(true, Ordering::SeqCst);
                // 长内循环：必须轮询中断
                while !interrupt.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                false
            },
        );
        worker.start();
        while !entered.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        let t0 = Instant::now();
        worker.suspend();
        assert!(
            t0.elapsed() < Duration::from_millis(200),
            "悬挂应在一次轮询间隔内生效"
        );
        assert_eq!(worker.state(), WorkerState::Suspended);
        worker.dispose();
    }

    #[test]
    fn wait_one_returns_when_stopped() {
        let (mut worker, _) = counting_worker(10);
        worker.start();
        worker.stop();
        // 已停止的工作者不再有周期边界，立即返回
        assert!(!worker.wait_one_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn dispose_is_idempotent() {
        let (mut worker, _) = counting_worker(10);
        worker.start();
        worker.dispose();
        worker.dispose();
        assert_eq!(worker.state(), WorkerState::Disposed);
    }
}
