// 播放流水线核心模块

pub mod block;
pub mod block_buffer;
pub mod commands;
pub mod component;
pub mod container;
pub mod decoding_worker;
pub mod engine;
pub mod pipeline;
pub mod reading_worker;
pub mod rendering_worker;
pub mod source;
pub mod synthetic;
pub mod worker;

pub mod audio_component;
pub mod ffmpeg_source;
pub mod subtitle_component;
pub mod video_component;

pub use block::{Block, BlockKind, SharedBuffer};
pub use block_buffer::BlockBuffer;
pub use commands::CommandManager;
pub use component::{DecodedFrame, FramePayload, MediaComponent, PacketQueue, SubtitleCue};
pub use container::{MediaContainer, ReadOutcome};
pub use engine::{BufferStatistics, MediaEngine, RendererFactory};
pub use ffmpeg_source::FfmpegSource;
pub use pipeline::{EngineCallbacks, PipelineStats, PreloadedSubtitles};
pub use source::{MediaPacket, PacketSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use worker::{Worker, WorkerCycle, WorkerState};
