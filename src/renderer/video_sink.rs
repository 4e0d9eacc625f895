use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::error::{EngineError, Result};
use crate::core::types::{PixelFormat, Timestamp};
use crate::player::block::{Block, BlockKind};
use crate::renderer::Renderer;

/// 拷贝出的一帧视频画面（交给呈现线程）
#[derive(Clone)]
pub struct VideoPicture {
    pub start: Timestamp,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub aspect_width: u32,
    pub aspect_height: u32,
    pub data: Vec<u8>,
}

/// 呈现回调 - 宿主把画面画到屏幕上（通常在 GUI 线程侧做实际上屏）
pub type PresentFn = Box<dyn Fn(&VideoPicture) + Send + 'static>;

/// 视频帧槽渲染器 - 非阻塞送帧 + 忙碌跳帧
///
/// `render` 把块拷入画面结构并交给内部呈现线程后立即返回；
/// 忙标志（原子）置位期间到达的新帧直接跳过并记数（debug 日志）。
/// 呈现回调里的 panic 被捕获并释放忙标志，坏帧不会卡死流水线。
pub struct VideoSinkRenderer {
    busy: Arc<AtomicBool>,
    presented: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    tx: Option<Sender<VideoPicture>>,
    present_thread: Option<JoinHandle<()>>,
}

impl VideoSinkRenderer {
    pub fn new(present: PresentFn) -> Self {
        let (tx, rx): (Sender<VideoPicture>, Receiver<VideoPicture>) = unbounded();
        let busy = Arc::new(AtomicBool::new(false));
        let presented = Arc::new(AtomicU64::new(0));

        let busy_for_thread = busy.clone();
        let presented_for_thread = presented.clone();
        let present_thread = thread::spawn(move || {
            info!("🎨 视频呈现线程启动");
            while let Ok(picture) = rx.recv() {
                let result = catch_unwind(AssertUnwindSafe(|| present(&picture)));
                if result.is_err() {
                    warn!("呈现回调 panic（帧 {} 已丢弃）", picture.start);
                }
                presented_for_thread.fetch_add(1, Ordering::SeqCst);
                // 无论成败都要释放忙标志
                busy_for_thread.store(false, Ordering::SeqCst);
            }
            info!("🎨 视频呈现线程退出");
        });

        Self {
            busy,
            presented,
            skipped: Arc::new(AtomicU64::new(0)),
            tx: Some(tx),
            present_thread: Some(present_thread),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

impl Renderer for VideoSinkRenderer {
    fn render(&mut self, block: &Block, _wall_clock: Timestamp) -> Result<()> {
        let BlockKind::Video {
            pixel_width,
            pixel_height,
            stride,
            pixel_format,
            aspect_width,
            aspect_height,
        } = block.kind
        else {
            return Err(EngineError::RenderError(
                "视频渲染器收到非视频块".to_string(),
            ));
        };

        // 忙碌跳帧：上一帧还在呈现就放弃本帧，不进入任何 GUI 工作
        if self.busy.swap(true, Ordering::SeqCst) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            debug!("⏭️  呈现忙碌，跳过帧 start={}", block.start);
            return Ok(());
        }

        let bytes = block.buffer.read();
        let picture = VideoPicture {
            start: block.start,
            width: pixel_width,
            height: pixel_height,
            stride,
            pixel_format,
            aspect_width,
            aspect_height,
            data: bytes[..block.declared_size].to_vec(),
        };
        drop(bytes);

        match &self.tx {
            Some(tx) if tx.send(picture).is_ok() => Ok(()),
            _ => {
                self.busy.store(false, Ordering::SeqCst);
                Err(EngineError::RenderError("呈现线程已退出".to_string()))
            }
        }
    }

    fn close(&mut self) {
        // drop 发送端让呈现线程退出，然后 join
        self.tx.take();
        if let Some(handle) = self.present_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VideoSinkRenderer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MediaType;
    use crate::player::block::SharedBuffer;
    use std::time::Duration;

    fn video_block(start_ms: i64, width: u32, height: u32) -> Block {
        let mut block = Block::empty(MediaType::Video);
        block.start = Timestamp::from_millis(start_ms);
        block.duration = Timestamp::from_millis(33);
        let needed = (width * height * 4) as usize;
        {
            let mut guard = block.buffer.try_write().unwrap();
            SharedBuffer::ensure_len(&mut guard, needed).unwrap();
        }
        block.declared_size = needed;
        block.kind = BlockKind::Video {
            pixel_width: width,
            pixel_height: height,
            stride: (width * 4) as usize,
            pixel_format: PixelFormat::Bgr0,
            aspect_width: width,
            aspect_height: height,
        };
        block
    }

    #[test]
    fn skips_frames_while_busy() {
        // 模拟慢 GUI：每帧呈现 100ms
        let mut renderer = VideoSinkRenderer::new(Box::new(|_| {
            thread::sleep(Duration::from_millis(100));
        }));

        // 1 秒 30 帧的节奏送帧
        for i in 0..30 {
            renderer
                .render(&video_block(i * 33, 8, 8), Timestamp::from_millis(i * 33))
                .unwrap();
            thread::sleep(Duration::from_millis(33));
        }

        // 等最后一帧呈现完
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while renderer.is_busy() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let presented = renderer.presented_count();
        let skipped = renderer.skipped_count();
        assert_eq!(presented + skipped, 30);
        assert!(skipped >= 1, "慢呈现下必须有跳帧");
        assert!(skipped <= 29, "不能全部跳掉");
        assert!(!renderer.is_busy(), "结束后忙标志必须复位");
        renderer.close();
    }

    #[test]
    fn present_panic_releases_busy_flag() {
        let mut renderer = VideoSinkRenderer::new(Box::new(|picture| {
            if picture.start == Timestamp::ZERO {
                panic!("坏帧");
            }
        }));

        renderer.render(&video_block(0, 4, 4), Timestamp::ZERO).unwrap();
        // panic 被捕获后忙标志必须释放，后续帧照常呈现
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while renderer.is_busy() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!renderer.is_busy());

        renderer
            .render(&video_block(33, 4, 4), Timestamp::from_millis(33))
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while renderer.presented_count() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(renderer.presented_count(), 2);
        renderer.close();
    }

    #[test]
    fn rejects_non_video_block() {
        let mut renderer = VideoSinkRenderer::new(Box::new(|_| {}));
        let block = Block::empty(MediaType::Subtitle);
        assert!(renderer.render(&block, Timestamp::ZERO).is_err());
        renderer.close();
    }
}
