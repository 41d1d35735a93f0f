// Audio Decoder Interface
use crate::codec::error::CodecResult;
use crate::codec::packet::CodecPacket;
use crate::common::audio::audio::AudioFrame;

/// ## 调用约束
/// - 正常解码：
///   - `send_packet(Some(pkt))` 成功后，反复 `receive_frame()` 直到返回 `Again`
/// - 如果 `send_packet` 返回 `Again`：
///   - 内部输出队列未取空；调用方保留该包，先 `receive_frame()`，
///     下一轮把同一个包重新送入（不可丢弃）
/// - drain：
///   - `send_packet(None)` 表示输入结束
///   - 然后反复 `receive_frame()`，直到返回 `Eof`
/// - seek 之后必须 `reset()` 丢弃解码器内部缓存，否则输出时间线错乱
pub trait AudioDecoder: Send {
    /// 解码器名（用于日志/调试）。
    fn name(&self) -> &'static str;

    /// 送入一个压缩包。
    ///
    /// - `Some(pkt)`: 正常输入
    /// - `None`: drain（输入结束，冲刷内部缓存帧）
    fn send_packet(&mut self, packet: Option<CodecPacket>) -> CodecResult<()>;

    /// 取出一个解码后的音频帧。
    ///
    /// - `Ok(frame)`: 成功得到一帧
    /// - `Err(Again)`: 需要更多输入包
    /// - `Err(Eof)`: drain 后已无更多输出
    fn receive_frame(&mut self) -> CodecResult<AudioFrame>;

    /// 重置内部状态（丢弃缓存帧，回到初始态；对齐 `avcodec_flush_buffers`）。
    fn reset(&mut self) -> CodecResult<()>;
}
