use std::sync::Arc;

use ffmpeg_next as ffmpeg;

use crate::core::error::Result;
use crate::core::types::{MediaOptions, MediaType, Timestamp};
use crate::player::component::{MediaComponent, PacketQueue};

/// 压缩数据包 - 解封装产物
///
/// `packet` 是编解码库的不透明所有权句柄，附带媒体类型标签。
pub struct MediaPacket {
    pub packet: ffmpeg::Packet,
    pub media_type: MediaType,
    pub stream_index: usize,
}

impl MediaPacket {
    pub fn size(&self) -> usize {
        self.packet.size()
    }
}

/// 包来源抽象 - 容器通过它与具体解封装实现解耦
///
/// 生产实现是 FFmpeg 解封装器；合成实现用于自测与基准。
pub trait PacketSource: Send {
    /// 本源包含的媒体类型（决定创建哪些组件）
    fn media_types(&self) -> Vec<MediaType>;

    /// 读取下一个数据包；EOF 返回 None
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// 定位到目标时间（后续读取从最近的可解码点开始）
    fn seek(&mut self, target: Timestamp) -> Result<()>;

    /// 为指定媒体类型创建解码组件，组件从 `queue` 消费本源路由的包
    fn create_component(
        &mut self,
        media_type: MediaType,
        queue: Arc<PacketQueue>,
        options: &MediaOptions,
    ) -> Result<Box<dyn MediaComponent>>;

    /// 总时长（直播流为 None）
    fn duration(&self) -> Option<Timestamp> {
        None
    }

    fn is_live_stream(&self) -> bool {
        false
    }

    fn is_network_stream(&self) -> bool {
        false
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn description(&self) -> String;
}
