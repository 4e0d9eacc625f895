//! 喜洋洋媒体引擎 - 读取 / 解码 / 渲染三级流水线
//!
//! 引擎消费可解封装的音视频容器（FFmpeg），驱动音频、视频、字幕
//! 三类流的同步呈现。挂钟是唯一的"当前时刻"来源：读取工作者往
//! 组件包队列里灌包，解码工作者把包变成围绕挂钟的有界块窗口，
//! 渲染工作者在每个周期为每种媒体类型挑出覆盖挂钟的块送给渲染器。
//!
//! ```no_run
//! use myy_engine::core::MediaOptions;
//! use myy_engine::player::{EngineCallbacks, MediaEngine};
//! use myy_engine::renderer::{CpalAudioRenderer, VideoSinkRenderer};
//!
//! let engine = MediaEngine::new(
//!     MediaOptions::default(),
//!     EngineCallbacks::default(),
//!     Box::new(|media_type| match media_type {
//!         myy_engine::core::MediaType::Audio => {
//!             Box::new(CpalAudioRenderer::new(48000, 2).expect("音频设备"))
//!         }
//!         _ => Box::new(VideoSinkRenderer::new(Box::new(|_picture| {
//!             // 宿主在这里上屏
//!         }))),
//!     }),
//! );
//! # let _ = engine;
//! ```

pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::{EngineError, MediaOptions, MediaType, RealTimeClock, Result, Timestamp};
pub use crate::player::{EngineCallbacks, MediaEngine};
pub use crate::renderer::Renderer;
