//! stream 时间轴 <-> 采样帧索引映射，以及 codec 相关的寻址修正。
//!
//! 对调用方暴露的帧索引一律从 0 开始，与容器的 start_time 无关；
//! 映射在这里一次性吸收掉起始偏移，所有支持的文件呈现同一个原点。

use crate::codec::demuxer::demuxer_interface::{AudioCodecId, StreamInfo};
use crate::common::audio::audio::{rescale_q, ChannelLayout, Rational};
use crate::common::audio::index_range::IndexRange;
use tracing::{info, trace};

/// 暴露给调用方的最小帧索引（0 基）。
pub const MIN_FRAME_INDEX: i64 = 0;

// ---- codec 常量表（集中放置，不要散落） ----

/// AAC 编码器固定延迟，单位为采样帧。
///
/// "AAC Audio - Encoder Delay and Synchronization: The 2112 Sample Assumption"
/// https://developer.apple.com/library/ios/technotes/tn2258/_index.html
pub(crate) const AAC_DECODER_DELAY_FRAMES: i64 = 2112;

/// 一个 MP3 codec 帧的采样数。
pub(crate) const MP3_SAMPLES_PER_FRAME: i64 = 1152;

/// 一个压缩包最多预期解出的 codec 帧数。
/// 估小了只会多转几圈循环（同一个包重复喂给解码器），不影响正确性。
pub(crate) const MAX_DECODED_FRAMES_PER_PACKET: i64 = 4;

const STREAM_DEFAULT_START_TIME: i64 = 0;

/// 流的有效起始时间（时间基单位）。
///
/// 容器没给 start_time 时（WAV 很常见），默认取 0；AAC 例外：
/// 没有显式值时播放端假定要掐掉 2112 帧解码器延迟，按此折算。
pub fn effective_start_time(stream: &StreamInfo) -> i64 {
    match stream.start_time {
        Some(t) => t,
        None => {
            let start_time = match stream.codec_id {
                AudioCodecId::Aac | AudioCodecId::AacLatm => {
                    // 并非所有 M4A 都把 start_time 编对；显式为 0 的
                    // 文件无法与缺省情形区分，只能统一按延迟补偿
                    STREAM_DEFAULT_START_TIME.max(AAC_DECODER_DELAY_FRAMES)
                }
                _ => STREAM_DEFAULT_START_TIME,
            };
            trace!("unknown start time -> using default value {}", start_time);
            start_time
        }
    }
}

/// 流的有效结束时间（时间基单位）。
///
/// 容器的 duration 字段实际存的是流的结束时间；小于起始时间的
/// 流按空流处理。
pub fn effective_end_time(stream: &StreamInfo) -> i64 {
    let start_time = effective_start_time(stream);
    match stream.duration {
        Some(d) if d >= start_time => d,
        _ => start_time,
    }
}

/// 流的声道布局，带缺省修补。
///
/// 某些容器（比如单声道 WAV）不声明布局，此时按声道数套默认布局。
pub fn stream_channel_layout(stream: &StreamInfo) -> ChannelLayout {
    if stream.channel_layout.is_undefined() {
        let layout = ChannelLayout::default_for_channels(stream.channel_layout.channels);
        info!(
            "unknown channel layout -> using default layout for {} channel(s)",
            layout.channels
        );
        return layout;
    }
    stream.channel_layout
}

const fn sample_rate_time_base(stream: &StreamInfo) -> Rational {
    Rational::new(1, stream.sample_rate as i32)
}

/// stream 时间戳 -> 帧索引。有效起始时间映射到 `MIN_FRAME_INDEX`。
pub fn pts_to_frame_index(stream: &StreamInfo, pts: i64) -> i64 {
    MIN_FRAME_INDEX
        + rescale_q(
            pts - effective_start_time(stream),
            stream.time_base,
            sample_rate_time_base(stream),
        )
}

/// 帧索引 -> stream 时间戳（`pts_to_frame_index` 的逆映射）。
pub fn frame_index_to_pts(stream: &StreamInfo, frame_index: i64) -> i64 {
    effective_start_time(stream)
        + rescale_q(
            frame_index - MIN_FRAME_INDEX,
            sample_rate_time_base(stream),
            stream.time_base,
        )
}

/// 流自身的帧索引范围（尚未平移到 0 原点）。
pub fn stream_frame_index_range(stream: &StreamInfo) -> IndexRange {
    IndexRange::between(
        pts_to_frame_index(stream, effective_start_time(stream)),
        pts_to_frame_index(stream, effective_end_time(stream)),
    )
}

/// seek 之后为保证采样精确需要预解码的帧数。
///
/// 容器声明的 seek_preroll 往往不够，按 codec 取两者较大值：
/// - MP3: 理论上最坏要 29 个 codec 帧才能重建 bit reservoir，
///   但实测 9 帧对 VBR/CBR 都已逐样本精确；预解码越多 seek 越慢，
///   卡顿比微小偏差更伤，不再加码
/// - AAC: 固定 2112 帧解码器延迟
pub fn seek_preroll_frame_count(stream: &StreamInfo) -> i64 {
    let default_preroll = stream.seek_preroll.max(0);
    match stream.codec_id {
        AudioCodecId::Mp3 | AudioCodecId::Mp3On4 => {
            // 按声道折算只对 <= 2 声道成立
            let channels = (stream.channel_layout.channels as i64).clamp(1, 2);
            let mp3_preroll = 9 * (MP3_SAMPLES_PER_FRAME / channels);
            mp3_preroll.max(default_preroll)
        }
        AudioCodecId::Aac | AudioCodecId::AacLatm => {
            AAC_DECODER_DELAY_FRAMES.max(default_preroll)
        }
        AudioCodecId::Other => default_preroll,
    }
}
