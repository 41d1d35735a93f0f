// Media Input / Backend Interface
use std::path::Path;

use crate::codec::decoder::decoder_interface::AudioDecoder;
use crate::codec::error::CodecResult;
use crate::codec::packet::CodecPacket;
use crate::common::audio::audio::{ChannelLayout, Rational, SampleFormat};

/// 读取侧关心的音频 codec 标识。
///
/// 只细分需要专门处理（seek preroll / start_time 修正）的条目，
/// 其余一律归入 `Other`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioCodecId {
    Mp3,
    Mp3On4,
    Aac,
    AacLatm,
    Other,
}

/// 选中音频流的静态描述（打开后不变）。
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    /// 流在容器内的序号。
    pub index: i32,

    pub codec_id: AudioCodecId,

    /// pts/duration 的时间基。
    pub time_base: Rational,

    /// 流的起始时间（时间基单位）；容器没给则为 None。
    pub start_time: Option<i64>,

    /// 流的结束时间（时间基单位；字段名沿用容器惯例 duration）。
    pub duration: Option<i64>,

    pub sample_rate: u32,

    /// 声道布局；mask=0 表示容器未声明布局。
    pub channel_layout: ChannelLayout,

    /// 解码输出的采样格式。
    pub sample_format: SampleFormat,

    /// bit/s；<= 0 表示未知。
    pub bit_rate: i64,

    /// codec 固定帧长（每声道采样数）；0 表示不固定/未知。
    pub frame_size: i32,

    /// 容器声明的 seek preroll 帧数（常为 0，不足以保证采样精确）。
    pub seek_preroll: i64,
}

/// 解码器构造参数。
#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// 期望的输出采样格式（解码器尽力满足，不保证）。
    pub request_sample_format: SampleFormat,

    /// 期望的输出声道数（advisory；解码器可忽略）。
    pub request_channel_count: Option<u16>,
}

/// backend 已编入的一个 demuxer 的能力描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFormatInfo {
    /// demuxer 短名；逗号分隔的别名保持原样（例如
    /// "mov,mp4,m4a,3gp,3g2,mj2"）。
    pub name: String,

    /// 是否支持按 pts 精确寻址（采样精确 seek 的前提）。
    pub seek_to_pts: bool,
}

/// demux/decode backend 的入口。
///
/// 进程内可以存在多个实例；`init_once` 必须幂等（内部用一次性屏障），
/// 全局初始化只发生一次。
pub trait MediaBackend: Send + Sync {
    /// backend 名（用于日志/诊断）。
    fn name(&self) -> &'static str;

    /// 一次性全局初始化屏障；任何 `open_input` 之前必须已调用过。
    fn init_once(&self);

    /// 打开输入并完成流信息扫描。
    fn open_input(&self, path: &Path) -> CodecResult<Box<dyn MediaInput>>;

    /// 列出 backend 内置的全部 demuxer 及其能力。
    fn input_formats(&self) -> Vec<InputFormatInfo>;
}

/// 一个已打开的输入（demuxer 会话）。
pub trait MediaInput: Send {
    /// 选出最合适的音频流。
    ///
    /// - 没有音频流 / 找不到解码器 => `Err(Unsupported)`（输入本身没坏，
    ///   只是这里不支持）
    /// - 其它 demux 故障 => `Err(Other)`
    fn select_best_audio_stream(&mut self) -> CodecResult<StreamInfo>;

    /// 为选中的流构造解码器。必须在 `select_best_audio_stream` 之后调用。
    fn new_stream_decoder(&mut self, config: &DecoderConfig) -> CodecResult<Box<dyn AudioDecoder>>;

    /// 读下一个包（任意流，调用方自行过滤）。
    ///
    /// - 输入结束 => `Err(Eof)`
    /// - 读取故障 => `Err(Other)`
    fn read_packet(&mut self) -> CodecResult<CodecPacket>;

    /// 把选中流寻址到 `pts` 处或其之前最近的同步点
    /// （对齐 `AVSEEK_FLAG_BACKWARD` 语义）。
    fn seek_backward(&mut self, pts: i64) -> CodecResult<()>;
}
