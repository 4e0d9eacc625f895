use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// 媒体类型 - 引擎支持的三种流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Subtitle => "subtitle",
        }
    }

    /// 块缓冲容量（按媒体类型固定）
    pub fn block_capacity(&self) -> usize {
        match self {
            MediaType::Video => 50,
            MediaType::Audio => 120,
            MediaType::Subtitle => 90,
        }
    }

    /// 组件"包已足够"的阈值（字幕流稀疏，不参与限流）
    pub fn packet_threshold(&self) -> usize {
        match self {
            MediaType::Subtitle => 0,
            _ => 25,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 播放时间戳 - 有符号纳秒
///
/// 支持负值（某些流的起始 PTS 为负）；`UNSET` 是哨兵值，
/// 渲染侧用它表示"强制渲染下一个块"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// 哨兵值："未设置/强制下一次渲染"
    pub const UNSET: Timestamp = Timestamp(i64::MIN);
    pub const ZERO: Timestamp = Timestamp(0);
    /// 最小时间步长（1 纳秒）
    pub const ONE_TICK: Timestamp = Timestamp(1);

    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms * 1_000_000)
    }

    pub fn from_micros(us: i64) -> Self {
        Timestamp(us * 1_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs * 1_000_000_000.0) as i64)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn is_unset(&self) -> bool {
        *self == Timestamp::UNSET
    }

    pub fn max(self, other: Timestamp) -> Timestamp {
        if self >= other {
            self
        } else {
            other
        }
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Timestamp {
    type Output = Timestamp;

    fn neg(self) -> Timestamp {
        Timestamp(-self.0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            f.write_str("UNSET")
        } else {
            write!(f, "{}ms", self.as_millis())
        }
    }
}

/// 像素格式（渲染目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32 位 BGR0（默认渲染目标）
    Bgr0,
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// 音频采样格式（渲染目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    F32,
    I16,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
        }
    }
}

/// 引擎配置项
///
/// 未知字段一律拒绝（serde `deny_unknown_fields`），缺省字段按文档默认。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaOptions {
    /// 可选的 libav 音频滤镜链，例如 "volume=0.5"
    pub audio_filter: Option<String>,

    /// 外部字幕地址（解析由宿主完成，引擎只消费解析结果）
    pub subtitles_url: Option<String>,

    /// 外部字幕整体偏移（毫秒）
    pub subtitles_delay_ms: i64,

    /// 是否禁用字幕流
    pub is_subtitle_disabled: bool,

    /// 目标音频配置
    pub target_sample_rate: u32,
    pub target_channels: u16,
    pub target_sample_format: SampleFormat,

    /// 目标视频像素格式
    pub target_pixel_format: PixelFormat,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            audio_filter: None,
            subtitles_url: None,
            subtitles_delay_ms: 0,
            is_subtitle_disabled: false,
            target_sample_rate: 48000,
            target_channels: 2,
            target_sample_format: SampleFormat::F32,
            target_pixel_format: PixelFormat::Bgr0,
        }
    }
}

/// 网络流在聚合包缓冲上的读取上限（16 MiB）
pub const BUFFER_MAX_BYTES: usize = 16 * 1024 * 1024;

/// 三个流水线工作者的周期
pub const READING_CYCLE_MS: u64 = 10;
pub const DECODING_CYCLE_MS: u64 = 20;
pub const RENDERING_CYCLE_MS: u64 = 30;

/// 包队列变更类型（宿主回调用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketQueueOp {
    Enqueued,
    Dequeued,
    Cleared,
}

/// 包队列瞬时状态（宿主回调用）
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketBufferState {
    pub count: usize,
    pub bytes: usize,
}

/// 引擎播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Opening,
    Paused,
    Playing,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(40);
        assert_eq!((a + b).as_millis(), 140);
        assert_eq!((a - b).as_millis(), 60);
        assert_eq!((b - a).as_millis(), -60);
        assert!(a > b);
        assert_eq!((-b).as_millis(), -40);
    }

    #[test]
    fn timestamp_unset_sentinel() {
        assert!(Timestamp::UNSET.is_unset());
        assert!(!Timestamp::ZERO.is_unset());
        // 哨兵值不参与普通比较语义，必须显式判断
        assert!(Timestamp::UNSET < Timestamp::from_millis(-1_000_000));
    }

    #[test]
    fn timestamp_one_tick() {
        let t = Timestamp::from_millis(10) + Timestamp::ONE_TICK;
        assert_eq!(t.as_nanos(), 10_000_001);
    }

    #[test]
    fn options_defaults() {
        let opts = MediaOptions::default();
        assert_eq!(opts.target_sample_rate, 48000);
        assert_eq!(opts.target_channels, 2);
        assert_eq!(opts.target_sample_format, SampleFormat::F32);
        assert_eq!(opts.target_pixel_format, PixelFormat::Bgr0);
        assert!(!opts.is_subtitle_disabled);
    }

    #[test]
    fn options_reject_unknown_fields() {
        let err = serde_json::from_str::<MediaOptions>(r#"{"no_such_field": 1}"#);
        assert!(err.is_err());

        let ok = serde_json::from_str::<MediaOptions>(r#"{"audio_filter": "volume=0.5"}"#);
        assert_eq!(ok.unwrap().audio_filter.as_deref(), Some("volume=0.5"));
    }

    #[test]
    fn sample_format_sizes() {
        assert_eq!(SampleFormat::F32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::I16.bytes_per_sample(), 2);
    }
}
