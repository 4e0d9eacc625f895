//! 流水线端到端测试 - 合成源驱动真实的三个工作者
//!
//! 不依赖媒体文件：合成源按固定帧间隔产包，合成组件把包物化为
//! 确定性的块，记录型渲染器收集送达情况。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use myy_engine::core::types::{MediaOptions, MediaType, SampleFormat};
use myy_engine::core::Timestamp;
use myy_engine::player::synthetic::{SyntheticConfig, SyntheticSource};
use myy_engine::player::{
    Block, BlockKind, EngineCallbacks, MediaEngine, MediaPacket, PacketQueue, PacketSource,
};
use myy_engine::renderer::Renderer;
use myy_engine::Result;

/// 渲染器收到的事件流
#[derive(Debug, Clone, PartialEq)]
enum RenderEvent {
    Render(MediaType, Timestamp),
    Seek(MediaType),
}

#[derive(Clone, Default)]
struct RenderLog {
    events: Arc<Mutex<Vec<RenderEvent>>>,
}

impl RenderLog {
    fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().unwrap().clone()
    }

    fn renders_of(&self, media_type: MediaType) -> Vec<Timestamp> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                RenderEvent::Render(t, start) if *t == media_type => Some(*start),
                _ => None,
            })
            .collect()
    }

    fn seek_count(&self, media_type: MediaType) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == RenderEvent::Seek(media_type))
            .count()
    }

}

/// 记录型渲染器：只记事件，永不阻塞
struct CountingRenderer {
    media_type: MediaType,
    log: RenderLog,
}

impl Renderer for CountingRenderer {
    fn render(&mut self, block: &Block, _wall_clock: Timestamp) -> Result<()> {
        self.log
            .events
            .lock()
            .unwrap()
            .push(RenderEvent::Render(self.media_type, block.start));
        Ok(())
    }

    fn seek(&mut self) {
        self.log
            .events
            .lock()
            .unwrap()
            .push(RenderEvent::Seek(self.media_type));
    }
}

fn engine_with_log_opts(
    config: SyntheticConfig,
    options: MediaOptions,
) -> (MediaEngine, RenderLog, Arc<AtomicU64>) {
    let log = RenderLog::default();
    let ended_count = Arc::new(AtomicU64::new(0));

    let callbacks = EngineCallbacks {
        on_media_ended: Some(Box::new({
            let ended = ended_count.clone();
            move || {
                ended.fetch_add(1, Ordering::SeqCst);
            }
        })),
        ..Default::default()
    };

    let factory_log = log.clone();
    let mut engine = MediaEngine::new(
        options,
        callbacks,
        Box::new(move |media_type| {
            Box::new(CountingRenderer {
                media_type,
                log: factory_log.clone(),
            })
        }),
    );
    engine
        .open_source(Box::new(SyntheticSource::new(config)))
        .expect("打开合成源失败");
    (engine, log, ended_count)
}

fn engine_with_log(config: SyntheticConfig) -> (MediaEngine, RenderLog, Arc<AtomicU64>) {
    engine_with_log_opts(config, MediaOptions::default())
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// 冷启动：纯视频 10 帧 25fps，从打开一路播到 media_ended
#[test]
fn cold_start_video_only_reaches_media_ended() {
    let (mut engine, log, ended_count) = engine_with_log(SyntheticConfig {
        total_frames: 10,
        frame_interval: Timestamp::from_millis(40),
        ..Default::default()
    });

    engine.play().unwrap();

    // 1 秒内全部 10 帧应进入块缓冲
    assert!(
        wait_until(Duration::from_secs(1), || {
            engine
                .buffer_statistics(MediaType::Video)
                .map(|s| s.count >= 10)
                .unwrap_or(false)
        }),
        "块缓冲未装满全部帧"
    );

    // 播放到结束（400ms 素材，给足余量）
    assert!(
        wait_until(Duration::from_secs(5), || {
            ended_count.load(Ordering::SeqCst) >= 1
        }),
        "media_ended 未触发"
    );

    // 结束后：时钟停住、位置钉在窗口末端
    let stats = engine.buffer_statistics(MediaType::Video).unwrap();
    assert_eq!(stats.count, 10);
    assert_eq!(stats.range_end.as_millis(), 400);
    assert_eq!(engine.position(), stats.range_end);
    assert!(engine.has_media_ended());

    // media_ended 只触发一次
    thread::sleep(Duration::from_millis(200));
    assert_eq!(ended_count.load(Ordering::SeqCst), 1);

    // 渲染门控：失效前每个起始时间至多送一次
    // （结束时的失效会把最后一块再送一次，允许一次重复）
    let renders = log.renders_of(MediaType::Video);
    assert!(!renders.is_empty());
    assert_eq!(renders[0], stats.range_start, "首次渲染必须对齐窗口起点");
    let mut unique = renders.clone();
    unique.sort();
    unique.dedup();
    assert!(
        renders.len() - unique.len() <= 1,
        "出现重复渲染: {:?}",
        renders
    );

    engine.close().unwrap();
}

/// 播放中 Seek 到 2.5s：旧窗口清空、渲染器失效、在目标附近重建
#[test]
fn seek_during_playback_repositions_window() {
    let (mut engine, log, _) = engine_with_log(SyntheticConfig {
        total_frames: 250, // 10 秒素材
        frame_interval: Timestamp::from_millis(40),
        ..Default::default()
    });

    engine.play().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        !log.renders_of(MediaType::Video).is_empty()
    }));

    // Seek 后立刻暂停，让断言不受实时推进影响
    engine.seek(Timestamp::from_millis(2500)).unwrap();
    engine.pause().unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || !engine.is_seeking()),
        "Seek 未落定"
    );

    // 中断被观察到：渲染器收到 seek()（失效）
    assert!(
        wait_until(Duration::from_secs(1), || {
            log.seek_count(MediaType::Video) >= 1
        }),
        "渲染器未被失效"
    );

    // 旧窗口已被清掉并在目标附近重建
    assert!(wait_until(Duration::from_secs(2), || {
        engine
            .buffer_statistics(MediaType::Video)
            .map(|s| s.count > 0 && s.range_start >= Timestamp::from_millis(2400))
            .unwrap_or(false)
    }));

    // 失效后的第一次渲染：起始时间距目标一帧以内
    let first_after_invalidate = || {
        let events = log.events();
        let last_seek = events
            .iter()
            .rposition(|e| *e == RenderEvent::Seek(MediaType::Video))?;
        events[last_seek..].iter().find_map(|e| match e {
            RenderEvent::Render(MediaType::Video, start) => Some(*start),
            _ => None,
        })
    };
    assert!(
        wait_until(Duration::from_secs(2), || first_after_invalidate().is_some()),
        "失效后没有渲染"
    );
    let first = first_after_invalidate().unwrap();
    let delta = (first - Timestamp::from_millis(2500)).as_millis().abs();
    assert!(delta <= 40, "Seek 后首帧偏差 {}ms", delta);

    engine.close().unwrap();
}

/// 长素材（500 帧）下容量 50 的块缓冲：计数恒不超上限，窗口跟着挂钟走
#[test]
fn long_playback_respects_buffer_capacity() {
    let (mut engine, _log, _) = engine_with_log(SyntheticConfig {
        total_frames: 500,
        frame_interval: Timestamp::from_millis(40),
        ..Default::default()
    });

    engine.play().unwrap();

    // 播放一段时间，期间容量不变式必须始终成立
    let deadline = Instant::now() + Duration::from_millis(1500);
    let mut saw_full = false;
    while Instant::now() < deadline {
        if let Some(stats) = engine.buffer_statistics(MediaType::Video) {
            assert!(stats.count <= stats.capacity, "容量不变式被破坏");
            if stats.is_full {
                saw_full = true;
                // 淘汰最旧：窗口起点必须跟着挂钟往前走（不为 0）
                assert!(stats.range_start >= Timestamp::ZERO);
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(saw_full, "500 帧素材下容量 50 的缓冲应到达满状态");

    // 解码窗口始终围绕挂钟（滞回的外在表现）
    let stats = engine.buffer_statistics(MediaType::Video).unwrap();
    let wall = engine.position();
    assert!(
        wall >= stats.range_start && wall <= stats.range_end,
        "挂钟 {} 脱离解码窗口 [{}, {}]",
        wall,
        stats.range_start,
        stats.range_end
    );

    engine.close().unwrap();
}

/// 音视频双流：音频块长度不变式 + 两条流独立推进
#[test]
fn audio_video_streams_advance_together() {
    let (mut engine, log, _) = engine_with_log(SyntheticConfig {
        has_video: true,
        has_audio: true,
        total_frames: 100,
        frame_interval: Timestamp::from_millis(40),
        ..Default::default()
    });

    engine.play().unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !log.renders_of(MediaType::Video).is_empty()
            && !log.renders_of(MediaType::Audio).is_empty()
    }));

    // 主类型是视频
    assert_eq!(engine.main_media_type(), Some(MediaType::Video));

    // 同一时刻两条流送出的块应贴近（时钟是唯一顺序来源）
    let video_first = log.renders_of(MediaType::Video)[0];
    let audio_first = log.renders_of(MediaType::Audio)[0];
    assert!((video_first - audio_first).as_millis().abs() <= 40);

    engine.close().unwrap();
}

/// 音频物化输出长度 = 每声道采样数 × 声道数 × 每采样字节数
#[test]
fn audio_materialization_length_invariant() {
    let mut source = SyntheticSource::new(SyntheticConfig {
        has_video: false,
        has_audio: true,
        total_frames: 4,
        frame_interval: Timestamp::from_millis(20),
        ..Default::default()
    });
    let options = MediaOptions::default();
    let queue = Arc::new(PacketQueue::new());
    let mut component = source
        .create_component(MediaType::Audio, queue.clone(), &options)
        .unwrap();

    // 手动驱动：灌一个包 → 收帧 → 物化
    let packet: MediaPacket = source.read_packet().unwrap().unwrap();
    queue.push(packet);
    let frame = component.receive_next_frame().unwrap().expect("应有帧");

    let mut block = Block::empty(MediaType::Audio);
    assert!(component.materialize(&frame, None, &mut block));

    // 20ms @ 48kHz 立体声 f32
    let expected_samples = (0.020 * 48000.0) as usize;
    let BlockKind::Audio {
        samples_per_channel,
        channels,
        sample_format,
        ..
    } = block.kind
    else {
        panic!("期望音频块");
    };
    assert_eq!(samples_per_channel, expected_samples);
    assert_eq!(sample_format, SampleFormat::F32);
    assert_eq!(
        block.declared_size,
        samples_per_channel * channels as usize * sample_format.bytes_per_sample()
    );
    assert!(block.buffer.len() >= block.declared_size);
}

/// 会话互斥：已有会话时再次打开必须失败
#[test]
fn sessions_are_mutually_exclusive() {
    let (mut engine, _log, _) = engine_with_log(SyntheticConfig::default());

    let err = engine.open_source(Box::new(SyntheticSource::new(SyntheticConfig::default())));
    assert!(err.is_err(), "重复打开应报状态错误");

    engine.close().unwrap();
    // 关闭后可以重新打开
    engine
        .open_source(Box::new(SyntheticSource::new(SyntheticConfig::default())))
        .unwrap();
    engine.close().unwrap();
}

/// 停止命令：回到起点并保持暂停
#[test]
fn stop_returns_to_origin() {
    let (mut engine, _log, _) = engine_with_log(SyntheticConfig {
        total_frames: 250,
        frame_interval: Timestamp::from_millis(40),
        ..Default::default()
    });

    engine.play().unwrap();
    thread::sleep(Duration::from_millis(300));
    engine.stop().unwrap();

    assert!(wait_until(Duration::from_secs(2), || !engine.is_seeking()));
    assert!(wait_until(Duration::from_secs(1), || {
        engine.position().as_millis() <= 40
    }));

    engine.close().unwrap();
}

/// 预加载字幕表被渲染（声明外部字幕 → 即使没有字幕流也有字幕渲染器）
#[test]
fn preloaded_subtitles_are_rendered() {
    use myy_engine::player::SubtitleCue;

    let options = MediaOptions {
        subtitles_url: Some("movie.srt".to_string()),
        ..Default::default()
    };
    let (mut engine, log, _) = engine_with_log_opts(
        SyntheticConfig {
            total_frames: 100,
            frame_interval: Timestamp::from_millis(40),
            ..Default::default()
        },
        options,
    );

    engine.preload_subtitles(vec![SubtitleCue {
        start: Timestamp::ZERO,
        duration: Timestamp::from_millis(2000),
        text: "你好，世界".to_string(),
    }]);

    engine.play().unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            !log.renders_of(MediaType::Subtitle).is_empty()
        }),
        "预加载字幕未被送达渲染器"
    );
    // 同一条字幕只送一次（门控按起始时间）
    thread::sleep(Duration::from_millis(200));
    assert_eq!(log.renders_of(MediaType::Subtitle).len(), 1);

    engine.close().unwrap();
}
