use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaOptions, MediaType, PacketBufferState, Timestamp, BUFFER_MAX_BYTES};
use crate::player::component::{MediaComponent, PacketQueue};
use crate::player::source::PacketSource;

/// 一次读包的结果
pub enum ReadOutcome {
    /// 包已路由进对应组件的队列
    Packet {
        media_type: MediaType,
        queue_state: PacketBufferState,
    },
    /// 包属于未打开的流，已丢弃
    Skipped,
    EndOfStream,
}

/// 媒体容器 - 拥有解封装源，把包路由进各组件队列
///
/// 读取工作者是 `read` 的唯一调用方；解码工作者通过 `with_component`
/// 驱动各组件。源句柄在 Mutex 内，锁不跨越会阻塞的编解码库调用之外的逻辑。
pub struct MediaContainer {
    source: Mutex<Box<dyn PacketSource>>,
    queues: HashMap<MediaType, Arc<PacketQueue>>,
    components: HashMap<MediaType, Mutex<Box<dyn MediaComponent>>>,
    ordered_types: Vec<MediaType>,
    main_media_type: MediaType,
    read_aborted: AtomicBool,
    at_end_of_stream: AtomicBool,
    is_live: bool,
    is_network: bool,
    duration: Option<Timestamp>,
    description: String,
}

impl MediaContainer {
    /// 打开容器：按源中存在的流创建组件与包队列
    pub fn open(mut source: Box<dyn PacketSource>, options: &MediaOptions) -> Result<Self> {
        let description = source.description();
        info!("📦 打开媒体容器: {}", description);

        let mut queues = HashMap::new();
        let mut components = HashMap::new();
        let mut ordered_types = Vec::new();

        // 固定遍历顺序，保证解码循环的确定性
        for media_type in [MediaType::Video, MediaType::Audio, MediaType::Subtitle] {
            if !source.media_types().contains(&media_type) {
                continue;
            }
            if media_type == MediaType::Subtitle && options.is_subtitle_disabled {
                info!("字幕流已按配置禁用");
                continue;
            }

            let queue = Arc::new(PacketQueue::new());
            match source.create_component(media_type, queue.clone(), options) {
                Ok(component) => {
                    queues.insert(media_type, queue);
                    components.insert(media_type, Mutex::new(component));
                    ordered_types.push(media_type);
                }
                Err(e) if media_type == MediaType::Subtitle => {
                    // 字幕解码器创建失败不致命，继续无字幕播放
                    warn!("创建字幕组件失败: {}，继续播放（无字幕）", e);
                }
                Err(e) => return Err(e),
            }
        }

        if components.is_empty() {
            return Err(EngineError::ContainerError(format!(
                "媒体源没有可播放的流: {}",
                description
            )));
        }

        // 主媒体类型：有视频取视频，否则取音频
        let main_media_type = if components.contains_key(&MediaType::Video) {
            MediaType::Video
        } else if components.contains_key(&MediaType::Audio) {
            MediaType::Audio
        } else {
            MediaType::Subtitle
        };

        let is_live = source.is_live_stream();
        let is_network = source.is_network_stream();
        let duration = source.duration();
        info!(
            "📦 容器就绪: 流 {:?}, 主类型 {}, 直播={}, 网络={}",
            ordered_types, main_media_type, is_live, is_network
        );

        Ok(Self {
            source: Mutex::new(source),
            queues,
            components,
            ordered_types,
            main_media_type,
            read_aborted: AtomicBool::new(false),
            at_end_of_stream: AtomicBool::new(false),
            is_live,
            is_network,
            duration,
            description,
        })
    }

    pub fn media_types(&self) -> &[MediaType] {
        &self.ordered_types
    }

    pub fn main_media_type(&self) -> MediaType {
        self.main_media_type
    }

    pub fn duration(&self) -> Option<Timestamp> {
        self.duration
    }

    pub fn is_live_stream(&self) -> bool {
        self.is_live
    }

    pub fn is_network_stream(&self) -> bool {
        self.is_network
    }

    pub fn read_aborted(&self) -> bool {
        self.read_aborted.load(Ordering::SeqCst)
    }

    pub fn at_end_of_stream(&self) -> bool {
        self.at_end_of_stream.load(Ordering::SeqCst)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// 读一轮包并路由；读失败按 EOF 化处理（解码侧把余量排干）
    pub fn read(&self) -> Result<ReadOutcome> {
        if self.read_aborted() || self.at_end_of_stream() {
            return Ok(ReadOutcome::EndOfStream);
        }

        let mut source = self.source.lock().unwrap();
        match source.read_packet() {
            Ok(Some(packet)) => {
                let media_type = packet.media_type;
                if let Some(queue) = self.queues.get(&media_type) {
                    queue.push(packet);
                    Ok(ReadOutcome::Packet {
                        media_type,
                        queue_state: PacketBufferState {
                            count: queue.len(),
                            bytes: queue.byte_len(),
                        },
                    })
                } else {
                    Ok(ReadOutcome::Skipped)
                }
            }
            Ok(None) => {
                info!("📄 容器到达流末尾");
                self.at_end_of_stream.store(true, Ordering::SeqCst);
                Ok(ReadOutcome::EndOfStream)
            }
            Err(e) => {
                error!("读取数据包失败，按 EOF 处理: {}", e);
                self.at_end_of_stream.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// 定位：源 seek + 清空包队列 + 冲洗各组件编解码器
    pub fn seek(&self, target: Timestamp) -> Result<()> {
        {
            let mut source = self.source.lock().unwrap();
            source.seek(target)?;
        }

        let mut cleared = 0;
        for queue in self.queues.values() {
            cleared += queue.clear();
        }
        if cleared > 0 {
            debug!("🧹 Seek 清空包队列: {} 个包", cleared);
        }

        for component in self.components.values() {
            component.lock().unwrap().flush();
        }

        self.at_end_of_stream.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// 解除阻塞中的读取；非优雅中止连同队列一起清空
    pub fn signal_abort_reads(&self, graceful: bool) {
        info!("🛑 中止容器读取 (graceful={})", graceful);
        self.read_aborted.store(true, Ordering::SeqCst);
        if !graceful {
            for queue in self.queues.values() {
                queue.clear();
            }
        }
    }

    /// 聚合包缓冲字节数
    pub fn buffer_length(&self) -> usize {
        self.queues.values().map(|q| q.byte_len()).sum()
    }

    pub fn buffer_count(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// 所有组件的包量都达到阈值
    pub fn has_enough_packets(&self) -> bool {
        self.queues
            .iter()
            .all(|(t, q)| q.len() >= t.packet_threshold())
    }

    /// 读取工作者的读取判据
    pub fn should_read_more_packets(&self) -> bool {
        if self.read_aborted() || self.at_end_of_stream() {
            return false;
        }
        if self.is_live {
            return true;
        }
        if self.is_network {
            return self.buffer_length() < BUFFER_MAX_BYTES;
        }
        !self.has_enough_packets()
    }

    /// 在组件锁内执行闭包（解码工作者的驱动入口）
    pub fn with_component<R>(
        &self,
        media_type: MediaType,
        f: impl FnOnce(&mut dyn MediaComponent) -> R,
    ) -> Option<R> {
        let component = self.components.get(&media_type)?;
        let mut guard = component.lock().unwrap();
        Some(f(guard.as_mut()))
    }

    /// 该类型是否还可能产出新帧
    pub fn can_read_more_frames_of(&self, media_type: MediaType) -> bool {
        if !self.at_end_of_stream() {
            return true;
        }
        self.with_component(media_type, |c| c.buffer_count() > 0 || c.has_packets_in_codec())
            .unwrap_or(false)
    }

    /// 释放全部组件资源
    pub fn dispose(&self) {
        info!("🧹 释放容器组件");
        for component in self.components.values() {
            component.lock().unwrap().dispose();
        }
        for queue in self.queues.values() {
            queue.clear();
        }
    }
}

impl Drop for MediaContainer {
    fn drop(&mut self) {
        // 显式 dispose 是主路径，这里只兜底
        self.dispose();
    }
}
