use log::{debug, error};
use std::ffi::CStr;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi::AVSubtitleType;
use ffmpeg_next::{codec, format};

use crate::core::error::{EngineError, Result};
use crate::core::types::{MediaType, Timestamp};
use crate::player::block::{Block, BlockKind};
use crate::player::component::{
    resolve_block_timing, DecodedFrame, FramePayload, MediaComponent, PacketQueue, SubtitleCue,
};

/// 没有结束时间的字幕默认显示 3 秒
const DEFAULT_CUE_DURATION: Timestamp = Timestamp(3_000_000_000);

/// 字幕组件 - 解码内嵌字幕流为文本条目
pub struct SubtitleComponent {
    stream_index: usize,
    queue: Arc<PacketQueue>,
    decoder: Option<codec::decoder::Subtitle>,
    time_base: f64,
}

impl SubtitleComponent {
    pub fn from_stream(
        stream: format::stream::Stream,
        stream_index: usize,
        queue: Arc<PacketQueue>,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().subtitle()?;

        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;
        debug!("字幕解码器初始化: time_base = {}", time_base);

        Ok(Self {
            stream_index,
            queue,
            decoder: Some(decoder),
            time_base,
        })
    }

    /// 解一个包 → 0 或 1 条字幕
    fn decode_packet(&mut self, packet: &ffmpeg::Packet) -> Result<Option<SubtitleCue>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let mut subtitle = ffmpeg::codec::subtitle::Subtitle::default();
        if let Err(e) = decoder.decode(packet, &mut subtitle) {
            // EAGAIN 不算错误
            if !matches!(e, ffmpeg::Error::Other { errno: 11 }) {
                error!("字幕解码失败: {}", e);
                return Err(EngineError::decoder(MediaType::Subtitle, e.to_string()));
            }
            return Ok(None);
        }

        let start =
            Timestamp::from_secs_f64(subtitle.pts().unwrap_or(0) as f64 * self.time_base);

        // AVSubtitle 的 end_display_time 单位是毫秒
        let duration = unsafe {
            let raw = subtitle.as_ptr();
            let end_ms = (*raw).end_display_time;
            if end_ms > 0 {
                Timestamp::from_millis(end_ms as i64)
            } else {
                DEFAULT_CUE_DURATION
            }
        };

        let mut text = String::new();
        for rect in subtitle.rects() {
            unsafe {
                let raw = rect.as_ptr();
                match (*raw).type_ {
                    AVSubtitleType::SUBTITLE_TEXT => {
                        if !(*raw).text.is_null() {
                            text.push_str(&CStr::from_ptr((*raw).text).to_string_lossy());
                            text.push('\n');
                        }
                    }
                    AVSubtitleType::SUBTITLE_ASS => {
                        if !(*raw).ass.is_null() {
                            text.push_str(&CStr::from_ptr((*raw).ass).to_string_lossy());
                            text.push('\n');
                        }
                    }
                    AVSubtitleType::SUBTITLE_BITMAP => {
                        debug!("跳过位图字幕（当前仅支持文本字幕）");
                    }
                    _ => {}
                }
            }
        }

        // AVSubtitle 必须手动释放，否则泄漏
        unsafe {
            ffmpeg::ffi::avsubtitle_free(subtitle.as_mut_ptr());
        }

        let cleaned = strip_subtitle_markup(&text);
        if cleaned.is_empty() {
            return Ok(None);
        }
        Ok(Some(SubtitleCue {
            start,
            duration,
            text: cleaned,
        }))
    }
}

impl MediaComponent for SubtitleComponent {
    fn media_type(&self) -> MediaType {
        MediaType::Subtitle
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn packet_queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    fn receive_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        // 字幕没有"留在编解码器里"的状态：一包进、至多一条出
        while let Some(media_packet) = self.queue.pop() {
            if let Some(cue) = self.decode_packet(&media_packet.packet)? {
                return Ok(Some(DecodedFrame {
                    start: cue.start,
                    duration: cue.duration,
                    has_valid_start_time: true,
                    payload: FramePayload::Subtitle(cue),
                }));
            }
        }
        Ok(None)
    }

    fn materialize(
        &mut self,
        frame: &DecodedFrame,
        prev: Option<&Block>,
        target: &mut Block,
    ) -> bool {
        let FramePayload::Subtitle(ref cue) = frame.payload else {
            return false;
        };

        resolve_block_timing(frame, prev, target);
        target.stream_index = self.stream_index;
        target.declared_size = cue.text.len();
        target.kind = BlockKind::Subtitle {
            text: cue.text.clone(),
        };
        true
    }

    fn dispose(&mut self) {
        self.decoder = None;
        self.queue.clear();
    }
}

impl Drop for SubtitleComponent {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 清理字幕文本：去掉 ASS/SSA 花括号标签与简单 HTML 标签，
/// 处理 \N/\n/\t 转义，规范化空白行
pub fn strip_subtitle_markup(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_brace_tag = false;
    let mut in_angle_tag = false;

    while let Some(ch) = chars.next() {
        match ch {
            '{' => in_brace_tag = true,
            '}' => in_brace_tag = false,
            '<' if !in_brace_tag => in_angle_tag = true,
            '>' if in_angle_tag => in_angle_tag = false,
            '\\' if !in_brace_tag && !in_angle_tag => match chars.peek() {
                Some('N') | Some('n') => {
                    chars.next();
                    result.push('\n');
                }
                Some('t') => {
                    chars.next();
                    result.push('\t');
                }
                Some('r') => {
                    chars.next();
                }
                _ => result.push(ch),
            },
            '\r' => {}
            _ if in_brace_tag || in_angle_tag => {}
            _ => result.push(ch),
        }
    }

    result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ass_tags() {
        assert_eq!(strip_subtitle_markup(r"{\an8}你好"), "你好");
        assert_eq!(strip_subtitle_markup(r"{\pos(100,200)}第一行\N第二行"), "第一行\n第二行");
    }

    #[test]
    fn strips_html_tags() {
        assert_eq!(strip_subtitle_markup("<i>italic</i> text"), "italic text");
    }

    #[test]
    fn normalizes_blank_lines() {
        assert_eq!(strip_subtitle_markup("a\r\n\r\n\r\nb"), "a\nb");
        assert_eq!(strip_subtitle_markup("   "), "");
    }

    #[test]
    fn keeps_plain_backslash() {
        assert_eq!(strip_subtitle_markup(r"a\b"), r"a\b");
    }
}
