// Codec Packet Types
use crate::common::audio::audio::Rational;

/// demux 出来的一个压缩数据包。
///
/// - `stream_index` 标记来源流；读取侧按选中的音频流过滤
/// - `pts/dts/duration` 的单位由 `time_base` 决定
/// - `data` 的内容由具体 codec 定义
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecPacket {
    pub stream_index: i32,

    pub data: Vec<u8>,

    /// 时间基（pts/dts/duration 的单位）。
    pub time_base: Rational,

    /// 显示时间戳（可选）。
    pub pts: Option<i64>,

    /// 解码时间戳（可选）。
    pub dts: Option<i64>,

    /// 包持续时间（可选）。
    pub duration: Option<i64>,
}

impl CodecPacket {
    pub fn new(stream_index: i32, data: Vec<u8>, time_base: Rational) -> Self {
        Self {
            stream_index,
            data,
            time_base,
            pts: None,
            dts: None,
            duration: None,
        }
    }
}
