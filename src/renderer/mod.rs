// 渲染器接口与内置实现
//
// 引擎对渲染器是单向拥有关系：会话开始时创建，结束时关闭；
// 渲染器通过构造时注入的宿主句柄输出，不回探引擎内部。

pub mod audio_renderer;
pub mod video_sink;

pub use audio_renderer::CpalAudioRenderer;
pub use video_sink::{VideoPicture, VideoSinkRenderer};

use crate::core::error::Result;
use crate::core::types::Timestamp;
use crate::player::block::Block;

/// 渲染器契约 - 每种媒体类型一个实例，由宿主实现
///
/// `render` 必须立即返回：把块拷入待渲染槽位后将呈现工作交给
/// GUI 线程。忙标志置位期间到达的新块直接跳过。
pub trait Renderer: Send {
    /// 会话启动时等待渲染器就绪
    fn wait_for_ready(&mut self) {}

    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    /// Seek 后重置内部状态（下一个匹配块必须重新送达）
    fn seek(&mut self) {}

    fn close(&mut self) {}

    /// 送达一个块；不允许阻塞调度线程
    fn render(&mut self, block: &Block, wall_clock: Timestamp) -> Result<()>;

    /// 每个渲染周期都会调用，无论是否送块
    fn update(&mut self, wall_clock: Timestamp) {
        let _ = wall_clock;
    }
}
