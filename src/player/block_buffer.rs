use log::debug;

use crate::core::types::{MediaType, Timestamp};
use crate::player::block::Block;
use crate::player::component::{DecodedFrame, MediaComponent};

/// 块缓冲 - 单一媒体类型的有界有序解码窗口
///
/// 块按起始时间排序；起始时间相同的块原地替换（新块为准）；
/// 容量满时淘汰最旧的块，其字节缓冲回收进池。
/// 单写（该类型的解码工作者）单读（该类型的渲染工作者）。
pub struct BlockBuffer {
    media_type: MediaType,
    capacity: usize,
    blocks: Vec<Block>,
    pool: Vec<Block>,
}

impl BlockBuffer {
    pub fn new(media_type: MediaType, capacity: usize) -> Self {
        assert!(capacity > 0, "块缓冲容量必须大于 0");
        Self {
            media_type,
            capacity,
            blocks: Vec::with_capacity(capacity),
            pool: Vec::new(),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.capacity
    }

    pub fn capacity_percent(&self) -> f64 {
        self.blocks.len() as f64 / self.capacity as f64
    }

    pub fn range_start(&self) -> Timestamp {
        self.blocks.first().map(|b| b.start).unwrap_or(Timestamp::ZERO)
    }

    pub fn range_end(&self) -> Timestamp {
        self.blocks.last().map(|b| b.end()).unwrap_or(Timestamp::ZERO)
    }

    pub fn range_duration(&self) -> Timestamp {
        self.range_end() - self.range_start()
    }

    /// 挂钟在解码窗口中的位置比例，钳制到 [0, ∞)
    pub fn range_percent(&self, t: Timestamp) -> f64 {
        let duration = self.range_duration();
        if duration.as_nanos() <= 0 {
            return 0.0;
        }
        let offset = (t - self.range_start()).as_nanos() as f64;
        (offset / duration.as_nanos() as f64).max(0.0)
    }

    /// 窗口平均码率（bit/s）
    pub fn range_bit_rate(&self) -> u64 {
        let secs = self.range_duration().as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        let total_bytes: usize = self.blocks.iter().map(|b| b.declared_size).sum();
        ((total_bytes as f64 * 8.0) / secs) as u64
    }

    pub fn is_in_range(&self, t: Timestamp) -> bool {
        !self.blocks.is_empty() && t >= self.range_start() && t <= self.range_end()
    }

    /// 取包含 `t` 的块；没有则取最近的前一个块；再没有返回 None
    pub fn lookup(&self, t: Timestamp) -> Option<&Block> {
        self.index_of(t).map(|i| &self.blocks[i])
    }

    /// `lookup` 命中块的序号
    pub fn index_of(&self, t: Timestamp) -> Option<usize> {
        if self.blocks.is_empty() || t < self.blocks[0].start {
            return None;
        }
        // 第一个 start > t 的位置的前一个，即最后一个 start <= t 的块
        let idx = self.blocks.partition_point(|b| b.start <= t);
        Some(idx - 1)
    }

    /// `t` 处或之前最近的块起始时间
    pub fn get_snap_position(&self, t: Timestamp) -> Option<Timestamp> {
        self.lookup(t).map(|b| b.start)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// 物化一帧并按序插入
    ///
    /// 槽位来源依次为：回收池 → 新分配（未达容量）→ 淘汰最旧块。
    /// 组件物化失败时槽位退回池中，本次不产出块。
    pub fn add(
        &mut self,
        frame: DecodedFrame,
        component: &mut dyn MediaComponent,
    ) -> Option<&Block> {
        let mut slot = if self.blocks.len() >= self.capacity {
            // 容量已满：淘汰起始时间最小的块，槽位连同字节缓冲复用
            let evicted = self.blocks.remove(0);
            debug!(
                "♻️  [{}] 块缓冲已满，淘汰最旧块 start={}",
                self.media_type, evicted.start
            );
            evicted
        } else if let Some(recycled) = self.pool.pop() {
            recycled
        } else {
            Block::empty(self.media_type)
        };

        slot.media_type = self.media_type;
        if !component.materialize(&frame, self.blocks.last(), &mut slot) {
            self.pool.push(slot);
            return None;
        }

        let start = slot.start;
        match self.blocks.binary_search_by(|b| b.start.cmp(&start)) {
            Ok(i) => {
                // 起始时间重复：新块为准，旧块回池
                let old = std::mem::replace(&mut self.blocks[i], slot);
                self.pool.push(old);
                Some(&self.blocks[i])
            }
            Err(i) => {
                self.blocks.insert(i, slot);
                Some(&self.blocks[i])
            }
        }
    }

    /// 清空窗口（Seek / 关闭会话时），所有块回池复用
    pub fn clear(&mut self) {
        self.pool.append(&mut self.blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::player::block::SharedBuffer;
    use crate::player::component::{resolve_block_timing, PacketQueue};
    use std::sync::Arc;

    /// 每次物化固定写 1000 字节的测试组件
    struct ByteStubComponent {
        media_type: MediaType,
        queue: Arc<PacketQueue>,
        fail_next_materialize: bool,
    }

    impl ByteStubComponent {
        fn new(media_type: MediaType) -> Self {
            Self {
                media_type,
                queue: Arc::new(PacketQueue::new()),
                fail_next_materialize: false,
            }
        }
    }

    impl MediaComponent for ByteStubComponent {
        fn media_type(&self) -> MediaType {
            self.media_type
        }

        fn stream_index(&self) -> usize {
            0
        }

        fn packet_queue(&self) -> &Arc<PacketQueue> {
            &self.queue
        }

        fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
            Ok(None)
        }

        fn materialize(
            &mut self,
            frame: &DecodedFrame,
            prev: Option<&Block>,
            target: &mut Block,
        ) -> bool {
            if self.fail_next_materialize {
                self.fail_next_materialize = false;
                return false;
            }
            let Some(mut guard) = target.buffer.try_write() else {
                return false;
            };
            if SharedBuffer::ensure_len(&mut guard, 1000).is_err() {
                return false;
            }
            drop(guard);
            resolve_block_timing(frame, prev, target);
            target.declared_size = 1000;
            true
        }
    }

    fn frame_at(ms: i64, duration_ms: i64) -> DecodedFrame {
        DecodedFrame::stub(Timestamp::from_millis(ms), Timestamp::from_millis(duration_ms))
    }

    fn filled(capacity: usize, frames: &[(i64, i64)]) -> (BlockBuffer, ByteStubComponent) {
        let mut buf = BlockBuffer::new(MediaType::Video, capacity);
        let mut comp = ByteStubComponent::new(MediaType::Video);
        for &(start, dur) in frames {
            buf.add(frame_at(start, dur), &mut comp);
        }
        (buf, comp)
    }

    #[test]
    fn blocks_stay_sorted_by_start() {
        let (buf, _) = filled(10, &[(80, 40), (0, 40), (40, 40), (120, 40)]);
        let starts: Vec<i64> = buf.blocks().iter().map(|b| b.start.as_millis()).collect();
        assert_eq!(starts, vec![0, 40, 80, 120]);
        for w in buf.blocks().windows(2) {
            assert!(w[0].start < w[1].start);
        }
    }

    #[test]
    fn duplicate_start_replaces_in_place() {
        let (mut buf, mut comp) = filled(10, &[(0, 40), (40, 40)]);
        buf.add(frame_at(40, 30), &mut comp);
        assert_eq!(buf.count(), 2);
        assert_eq!(buf.blocks()[1].duration.as_millis(), 30);
    }

    #[test]
    fn eviction_removes_smallest_start() {
        // 即使插入远超容量，窗口也必须稳定在上限内，淘汰总是落在最旧块上
        let mut buf = BlockBuffer::new(MediaType::Video, 50);
        let mut comp = ByteStubComponent::new(MediaType::Video);
        for i in 0..500 {
            buf.add(frame_at(i * 40, 40), &mut comp);
            assert!(buf.count() <= 50, "容量不变式被破坏");
        }
        assert_eq!(buf.count(), 50);
        // 留下的应是最后 50 帧
        assert_eq!(buf.range_start().as_millis(), 450 * 40);
        assert_eq!(buf.range_end().as_millis(), 500 * 40);
    }

    #[test]
    fn lookup_containing_then_prior_then_none() {
        let (buf, _) = filled(10, &[(0, 40), (40, 40), (200, 40)]);
        // 命中 [40, 80)
        assert_eq!(buf.lookup(Timestamp::from_millis(50)).unwrap().start.as_millis(), 40);
        // 落在缝隙 [80, 200)：取最近的前块
        assert_eq!(buf.lookup(Timestamp::from_millis(100)).unwrap().start.as_millis(), 40);
        // 窗口之前：None
        assert!(buf.lookup(Timestamp::from_millis(-10)).is_none());
        // 窗口之后：取最后一块
        assert_eq!(buf.lookup(Timestamp::from_millis(999)).unwrap().start.as_millis(), 200);
    }

    #[test]
    fn index_of_matches_lookup() {
        let (buf, _) = filled(10, &[(0, 40), (40, 40), (80, 40)]);
        assert_eq!(buf.index_of(Timestamp::from_millis(85)), Some(2));
        assert_eq!(buf.index_of(Timestamp::from_millis(0)), Some(0));
        assert_eq!(buf.index_of(Timestamp::from_millis(-1)), None);
    }

    #[test]
    fn range_queries() {
        let (buf, _) = filled(10, &[(0, 40), (40, 40), (80, 40), (120, 40)]);
        assert_eq!(buf.range_start().as_millis(), 0);
        assert_eq!(buf.range_end().as_millis(), 160);
        assert_eq!(buf.range_duration().as_millis(), 160);
        assert!((buf.range_percent(Timestamp::from_millis(80)) - 0.5).abs() < 1e-9);
        // 挂钟在窗口之前：钳制到 0
        assert_eq!(buf.range_percent(Timestamp::from_millis(-100)), 0.0);
        // 挂钟超出窗口：允许 > 1
        assert!(buf.range_percent(Timestamp::from_millis(320)) > 1.0);
        assert!(buf.is_in_range(Timestamp::from_millis(160)));
        assert!(!buf.is_in_range(Timestamp::from_millis(161)));
        assert_eq!(buf.get_snap_position(Timestamp::from_millis(70)).unwrap().as_millis(), 40);
    }

    #[test]
    fn range_bit_rate_counts_declared_bytes() {
        let (buf, _) = filled(10, &[(0, 500), (500, 500)]);
        // ByteStubComponent 每块写 1000 字节，窗口 1s → 16000 bit/s
        assert_eq!(buf.range_bit_rate(), 16000);
    }

    #[test]
    fn empty_buffer_behavior() {
        let buf = BlockBuffer::new(MediaType::Audio, 4);
        assert_eq!(buf.count(), 0);
        assert!(!buf.is_full());
        assert!(buf.lookup(Timestamp::ZERO).is_none());
        assert_eq!(buf.range_percent(Timestamp::from_millis(10)), 0.0);
        assert_eq!(buf.range_bit_rate(), 0);
        assert!(!buf.is_in_range(Timestamp::ZERO));
    }

    #[test]
    fn failed_materialize_yields_nothing() {
        let mut buf = BlockBuffer::new(MediaType::Video, 4);
        let mut comp = ByteStubComponent::new(MediaType::Video);
        comp.fail_next_materialize = true;
        assert!(buf.add(frame_at(0, 40), &mut comp).is_none());
        assert_eq!(buf.count(), 0);
        // 槽位应已回池，下一次成功复用
        assert!(buf.add(frame_at(0, 40), &mut comp).is_some());
        assert_eq!(buf.count(), 1);
    }

    #[test]
    fn clear_recycles_all_blocks() {
        let (mut buf, mut comp) = filled(4, &[(0, 40), (40, 40), (80, 40)]);
        buf.clear();
        assert_eq!(buf.count(), 0);
        // 池中的块应被复用而不是重新分配
        buf.add(frame_at(0, 40), &mut comp);
        assert_eq!(buf.count(), 1);
    }
}
