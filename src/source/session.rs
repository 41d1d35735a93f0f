//! 随机访问的采样帧读取会话。
//!
//! 对宿主引擎暴露一个帧索引定址、定格式（interleaved f32）的 PCM 流，
//! 把压缩音频的各种毛刺（codec preroll、起始偏移、解码器滞后、
//! 帧重叠/缺失、结尾超量）都收敛在这一层。
//!
//! 单个会话内所有操作严格串行，不做内部加锁；并发由调用方保证。

use crate::codec::decoder::decoder_interface::AudioDecoder;
use crate::codec::demuxer::demuxer_interface::{
    DecoderConfig, MediaBackend, MediaInput, StreamInfo,
};
use crate::codec::error::{CodecError, CodecResult};
use crate::codec::packet::CodecPacket;
use crate::common::audio::audio::{AudioFrame, AudioFrameView, SampleFormat};
use crate::common::audio::index_range::{IndexRange, Orientation};
use crate::source::converter::{copy_interleaved_f32, FrameConverter};
use crate::source::frame_buffer::{BufferingMode, ReadAheadFrameBuffer};
use crate::source::sample_frames::{
    ReadableSampleFrames, SampleWriter, SignalInfo, WritableSampleFrames,
};
use crate::source::stream_map::{
    frame_index_to_pts, pts_to_frame_index, seek_preroll_frame_count, stream_channel_layout,
    stream_frame_index_range, MAX_DECODED_FRAMES_PER_PACKET, MIN_FRAME_INDEX,
    MP3_SAMPLES_PER_FRAME,
};
use core::fmt;
use std::path::Path;
use tracing::{debug, info, trace, warn};

/// 解码输出统一请求成 interleaved f32。
const TARGET_SAMPLE_FORMAT: SampleFormat = SampleFormat::F32 { planar: false };

#[derive(Clone, Debug, Default)]
pub struct OpenParams {
    /// 期望的输出声道数（advisory，仅转发给解码器；不做后处理混音）。
    pub channel_count: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenError {
    /// backend 打不开该输入（坏路径、未知格式、解码器初始化失败、
    /// 时长未知）。
    Failed,
    /// 输入本身完好但此处不支持（没有音频流 / 没有解码器）。
    Aborted,
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::Failed => write!(f, "failed to open input"),
            OpenError::Aborted => write!(f, "unsupported input"),
        }
    }
}

impl std::error::Error for OpenError {}

/// Unsupported/InvalidData/InvalidState 归为「输入没坏但不支持」，
/// 其余一律按打开失败处理。
fn open_error_from(err: &CodecError) -> OpenError {
    match err {
        CodecError::Unsupported(_) | CodecError::InvalidData(_) | CodecError::InvalidState(_) => {
            OpenError::Aborted
        }
        _ => OpenError::Failed,
    }
}

/// packet pump 的在途包。
///
/// 解码器 send 返回 `Again` 时包必须保留，下一轮重发；
/// `Drain` 是 EOF 后用于冲刷解码器的空包哨兵。
enum PendingPacket {
    Data(CodecPacket),
    Drain,
}

/// 一个已打开的解码会话（生命周期 = open..drop）。
///
/// 字段声明顺序即析构顺序：缓冲/转换器先走，解码器次之，demuxer 最后。
pub struct AudioFileSource {
    signal_info: SignalInfo,
    bitrate_kbps: Option<i64>,
    frame_index_range: IndexRange,
    seek_preroll_frame_count: i64,
    stream: StreamInfo,

    decode_scratch: Vec<f32>,
    converter: Option<FrameConverter>,
    frame_buffer: ReadAheadFrameBuffer,
    decoder: Box<dyn AudioDecoder>,
    input: Box<dyn MediaInput>,
}

impl AudioFileSource {
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        params: &OpenParams,
    ) -> Result<Self, OpenError> {
        backend.init_once();

        let mut input = backend.open_input(path).map_err(|e| {
            warn!("failed to open input file {}: {}", path.display(), e);
            OpenError::Failed
        })?;

        let stream = input.select_best_audio_stream().map_err(|e| {
            warn!("failed to select audio stream: {}", e);
            open_error_from(&e)
        })?;

        debug!(
            "opened stream for decoding {{ index {} | codec {:?} | channels {} | channel_layout {:#x} | sample_format {:?} | sample_rate {} | bit_rate {} | frame_size {} | seek_preroll {} | start_time {:?} | duration {:?} | time_base {}/{} }}",
            stream.index,
            stream.codec_id,
            stream.channel_layout.channels,
            stream.channel_layout.mask,
            stream.sample_format,
            stream.sample_rate,
            stream.bit_rate,
            stream.frame_size,
            stream.seek_preroll,
            stream.start_time,
            stream.duration,
            stream.time_base.num,
            stream.time_base.den,
        );

        let decoder_config = DecoderConfig {
            request_sample_format: TARGET_SAMPLE_FORMAT,
            request_channel_count: params.channel_count,
        };
        let decoder = input.new_stream_decoder(&decoder_config).map_err(|e| {
            warn!("failed to open decoder: {}", e);
            open_error_from(&e)
        })?;

        if stream.sample_rate == 0 || stream.channel_layout.channels == 0 {
            warn!(
                "invalid signal info: {} channel(s) at {} Hz",
                stream.channel_layout.channels, stream.sample_rate
            );
            return Err(OpenError::Aborted);
        }

        if stream.duration.is_none() {
            // 未知/无限时长的流（暂）不支持
            warn!("unknown or unlimited stream duration");
            return Err(OpenError::Failed);
        }

        let stream_layout = stream_channel_layout(&stream);
        let signal_info = SignalInfo::new(stream_layout.channels, stream.sample_rate);

        // 采样率从不改变，声道数保持与流一致；只在采样格式或布局
        // 需要归一化时走转换
        let converter = if stream.sample_format != TARGET_SAMPLE_FORMAT
            || stream.channel_layout.is_undefined()
        {
            debug!(
                "decoded stream needs to be resampled: sample_format {:?} -> {:?}, channel_layout {:#x}",
                stream.sample_format, TARGET_SAMPLE_FORMAT, stream_layout.mask
            );
            Some(FrameConverter::new(stream_layout))
        } else {
            None
        };

        let bitrate_kbps = match stream.bit_rate / 1000 {
            kbps if kbps > 0 => Some(kbps),
            _ => None,
        };

        let stream_range = stream_frame_index_range(&stream);
        if stream_range.orientation() == Orientation::Backward {
            warn!(
                "stream with unsupported or invalid frame index range {:?}",
                stream_range
            );
            return Err(OpenError::Failed);
        }
        // 把流的名义范围平移到 0 原点，起始偏移被映射吸收
        let frame_index_range = IndexRange::forward(MIN_FRAME_INDEX, stream_range.length());

        // 采样精确的 seek 需要按 codec 在目标之前预解码
        let seek_preroll = seek_preroll_frame_count(&stream);
        trace!("seek preroll frame count: {}", seek_preroll);

        let typical_frame_size = if stream.frame_size > 0 {
            stream.frame_size as i64
        } else {
            MP3_SAMPLES_PER_FRAME
        };
        let frame_buffer = ReadAheadFrameBuffer::new(
            signal_info,
            MAX_DECODED_FRAMES_PER_PACKET * typical_frame_size,
        );

        Ok(Self {
            signal_info,
            bitrate_kbps,
            frame_index_range,
            seek_preroll_frame_count: seek_preroll,
            stream,
            decode_scratch: Vec::new(),
            converter,
            frame_buffer,
            decoder,
            input,
        })
    }

    pub fn signal_info(&self) -> SignalInfo {
        self.signal_info
    }

    pub fn bitrate_kbps(&self) -> Option<i64> {
        self.bitrate_kbps
    }

    /// 对调用方有效的帧索引范围 `[0, total_frames)`。
    pub fn frame_index_range(&self) -> IndexRange {
        self.frame_index_range
    }

    /// 把流位置调整到 `start_index`，必要时触发 backend seek。
    ///
    /// 目标落在预读缓冲内时只丢弃缓冲前缀，不碰 backend。
    fn adjust_current_position(&mut self, start_index: i64) -> bool {
        debug_assert!(self.frame_index_range.contains_index(start_index));

        if self.frame_buffer.is_ready() {
            if self.frame_buffer.try_seek_to_first_frame(start_index) {
                return true;
            }
            self.frame_buffer.discard_all_buffered_frames();
        }

        // 先于目标 preroll，再对齐到 codec 帧边界
        let mut seek_frame_index =
            MIN_FRAME_INDEX.max(start_index - self.seek_preroll_frame_count);
        if self.stream.frame_size > 0 {
            seek_frame_index -=
                (seek_frame_index - MIN_FRAME_INDEX) % self.stream.frame_size as i64;
        }
        debug_assert!(seek_frame_index >= MIN_FRAME_INDEX);
        debug_assert!(seek_frame_index <= start_index);

        let need_seek = match self.frame_buffer.first_frame() {
            Some(first_frame) => first_frame > start_index || first_frame < seek_frame_index,
            None => true,
        };
        if need_seek {
            // 丢掉解码器内部滞留的帧
            if let Err(e) = self.decoder.reset() {
                warn!("failed to flush decoder: {}", e);
                self.frame_buffer.invalidate();
                return false;
            }
            let seek_pts = frame_index_to_pts(&self.stream, seek_frame_index);
            if let Err(e) = self.input.seek_backward(seek_pts) {
                // seek 不可恢复：当前位置作废，本次读取中止
                warn!("failed to seek stream: {}", e);
                self.frame_buffer.invalidate();
                return false;
            }
        }

        // 真正读到数据之前位置未知
        self.frame_buffer.reset();
        true
    }

    /// 读取选中流的下一个压缩包。
    ///
    /// - 其它流的包直接释放跳过
    /// - EOF 时进入 drain 模式（返回空包哨兵）
    fn read_next_packet(&mut self) -> CodecResult<PendingPacket> {
        loop {
            match self.input.read_packet() {
                Ok(packet) => {
                    if packet.stream_index != self.stream.index {
                        continue;
                    }
                    match packet.pts {
                        Some(pts) => trace!(
                            "packet at frame index {}",
                            pts_to_frame_index(&self.stream, pts)
                        ),
                        None => trace!("packet with unknown frame index"),
                    }
                    return Ok(PendingPacket::Data(packet));
                }
                Err(e) if e.is_eof() => {
                    debug!("EOF: entering drain mode");
                    return Ok(PendingPacket::Drain);
                }
                Err(e) => {
                    warn!("failed to read packet: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// 把在途包喂给解码器；没有在途包就先读一个。
    ///
    /// 返回 false 表示发生不可恢复错误（缓冲已作废）。
    fn consume_next_packet(&mut self, pending: &mut Option<PendingPacket>) -> bool {
        if pending.is_none() {
            match self.read_next_packet() {
                Ok(next) => *pending = Some(next),
                Err(_) => {
                    self.frame_buffer.invalidate();
                    return false;
                }
            }
        }
        let Some(next) = pending.as_ref() else {
            return false;
        };
        let packet = match next {
            PendingPacket::Data(packet) => Some(packet.clone()),
            PendingPacket::Drain => None,
        };
        match self.decoder.send_packet(packet) {
            Ok(()) => {
                // 包已被解码器吃下，释放所有权
                *pending = None;
                true
            }
            Err(CodecError::Again) => {
                // 输出队列未取空：保留此包，先去 receive，下一轮重发
                trace!("packet needs to be sent again to decoder");
                true
            }
            Err(e) => {
                warn!("failed to send packet to decoder: {}", e);
                *pending = None;
                self.frame_buffer.invalidate();
                false
            }
        }
    }

    /// 解码帧 -> interleaved f32 scratch（必要时过转换器）。
    fn convert_decoded_frame(&mut self, frame: &AudioFrame) -> CodecResult<()> {
        if frame.channels() != self.signal_info.channel_count() {
            return Err(CodecError::InvalidData(
                "decoded frame channel count mismatch",
            ));
        }
        self.decode_scratch.clear();
        match &self.converter {
            Some(converter) => converter.convert(frame, &mut self.decode_scratch),
            None => copy_interleaved_f32(frame, &mut self.decode_scratch),
        }
    }

    /// 读取入口：向 `writable` 填充 `[start, end)` 的采样帧。
    ///
    /// 返回实际产出的范围与数据视图；范围短于请求即提前终止
    /// （EOF 或不可恢复错误）。
    pub fn read_sample_frames<'a>(
        &mut self,
        writable: WritableSampleFrames<'a>,
    ) -> ReadableSampleFrames<'a> {
        let (requested, samples) = writable.into_parts();
        debug_assert!(self.frame_index_range.contains_range(&requested));

        // 收到有效范围与缓冲容量之内
        let mut writable_range = requested.intersect(&self.frame_index_range);
        let capacity_frames = self.signal_info.samples_to_frames(samples.len());
        if writable_range.length() > capacity_frames {
            writable_range = IndexRange::forward(writable_range.start(), capacity_frames);
        }

        let readable_start = writable_range.start();
        let mut writer = SampleWriter::new(self.signal_info, samples);

        // 先消费预读缓冲，再考虑任何解码动作
        writable_range = self
            .frame_buffer
            .consume_buffered_frames(writable_range, &mut writer);
        if writable_range.is_empty() {
            let readable_range = IndexRange::between(readable_start, writable_range.start());
            return ReadableSampleFrames::new(readable_range, writer.finish());
        }

        // 调整流位置；seek 失败时本次读取作废
        if !self.adjust_current_position(writable_range.start()) {
            return ReadableSampleFrames::empty();
        }

        // 本轮解码负责的起点（回卷计算的下界）
        let call_start = writable_range.start();
        let mut pending: Option<PendingPacket> = None;
        let mut read_frame_index = self.frame_buffer.first_frame();

        while self.frame_buffer.is_valid()                       // 没有解码错误
            && (pending.is_some() || !writable_range.is_empty()) // 还没读完
            && self.consume_next_packet(&mut pending)
        {
            // 一个包可能解出多帧；取空为止
            loop {
                let frame = match self.decoder.receive_frame() {
                    Ok(frame) => frame,
                    Err(CodecError::Again) => {
                        // 需要继续喂包
                        break;
                    }
                    Err(e) if e.is_eof() => {
                        if let Some(read_index) = read_frame_index {
                            // 带 lead-in 的文件实际可解码长度可能比名义
                            // duration 短；结尾补静音换取 lead-in 处理的
                            // 一致性（只影响结尾静音，不影响任何位置标记）
                            debug!(
                                "stream ends at sample frame {} instead of {} -> padding with silence",
                                read_index,
                                self.frame_index_range.end()
                            );
                            if !writable_range.is_empty() {
                                writer.fill_silence(writable_range.length());
                                let n = writable_range.length();
                                writable_range.shrink_front(n);
                            }
                        }
                        self.frame_buffer.invalidate();
                        break;
                    }
                    Err(e) => {
                        warn!("failed to receive frame from decoder: {}", e);
                        self.frame_buffer.invalidate();
                        break;
                    }
                };

                let decoded_count = frame.nb_samples() as i64;
                if decoded_count == 0 {
                    continue;
                }
                let Some(pts) = frame.pts() else {
                    warn!("decoded frame without presentation timestamp");
                    self.frame_buffer.invalidate();
                    break;
                };
                let mut decoded_range =
                    IndexRange::forward(pts_to_frame_index(&self.stream, pts), decoded_count);
                let mut read_index = *read_frame_index.get_or_insert(decoded_range.start());

                if decoded_range.start() < read_index {
                    // 解码器给出了比预期更早的采样。流头部的这类重叠是
                    // 正常 lead-in（如 320kbps MP3 从 -1105 开始解码），
                    // 不值得告警；其余位置要告警
                    let overlap_range =
                        IndexRange::between(decoded_range.start(), read_index);
                    if read_index > MIN_FRAME_INDEX {
                        warn!(
                            "overlapping sample frames in the stream: {:?}",
                            overlap_range
                        );
                    }
                    // preroll 期间 read_index 可能还在本轮起点之前
                    let consumed_range =
                        IndexRange::between(call_start, read_index.max(call_start));
                    let mut rewind_range = overlap_range.intersect(&consumed_range);
                    if !rewind_range.is_empty() {
                        debug_assert_eq!(rewind_range.end(), read_index);
                        warn!(
                            "rewinding current position: {} -> {}",
                            read_index,
                            rewind_range.start()
                        );
                        // 先回卷内部缓冲的尾部...
                        let discarded = self
                            .frame_buffer
                            .discard_last_buffered_frames(rewind_range.length());
                        rewind_range.shrink_back(discarded);
                        // ...剩余部分从输出回卷重写
                        if !rewind_range.is_empty() {
                            writer.rewind_frames(rewind_range.length());
                            writable_range = IndexRange::between(
                                rewind_range.start(),
                                writable_range.end(),
                            );
                            debug_assert!(
                                writable_range.orientation() != Orientation::Backward
                            );
                        }
                    }
                    read_index = decoded_range.start();
                }

                if let Err(e) = self.convert_decoded_frame(&frame) {
                    // 不可恢复：丢帧并中止本次读取
                    warn!("failed to convert decoded frame: {}", e);
                    self.frame_buffer.invalidate();
                    break;
                }
                // 已消费的 scratch 帧数
                let mut decoded_offset: i64 = 0;

                //                    read_index
                //                        |
                //                        v
                //       | missing frames | skipped frames |<- decoded_range ->|
                //       ^
                //       |
                // writable_range.start()

                // 第 1 步：writable 起点落后于 read_index 时用静音垫平
                if writable_range.start() < read_index {
                    let missing_range = IndexRange::between(
                        writable_range.start(),
                        read_index.min(writable_range.end()),
                    );
                    debug_assert!(missing_range.orientation() != Orientation::Backward);
                    if !missing_range.is_empty() {
                        warn!(
                            "generating silence for missing sample data {:?}",
                            missing_range
                        );
                        writer.fill_silence(missing_range.length());
                        writable_range.shrink_front(missing_range.length());
                    }
                }

                // 第 2 步：解码器跳帧只记录；具体怎么消化取决于后面
                // 两步中 writable 的相对位置
                debug_assert!(read_index <= decoded_range.start());
                if read_index < decoded_range.start() {
                    let skipped_range =
                        IndexRange::between(read_index, decoded_range.start());
                    if read_index <= MIN_FRAME_INDEX {
                        // 首帧解码从负索引起步时必然出现，属预期
                        debug!(
                            "generating silence for skipped sample data {:?} at the start of the audio stream",
                            skipped_range
                        );
                    } else {
                        warn!(
                            "generating silence for skipped sample data {:?}",
                            skipped_range
                        );
                    }
                }

                // 第 3 步：丢弃位于 writable 之前、不会被消费的解码数据
                if writable_range.start() > read_index {
                    let excessive_range = IndexRange::between(
                        decoded_range.start(),
                        writable_range.start().min(decoded_range.end()),
                    );
                    if excessive_range.orientation() == Orientation::Forward {
                        trace!("discarding excessive sample data {:?}", excessive_range);
                        decoded_offset += excessive_range.length();
                        decoded_range.shrink_front(excessive_range.length());
                    }
                    debug_assert!(read_index <= excessive_range.end());
                    read_index = excessive_range.end();
                    if decoded_range.is_empty() {
                        // 本帧全部在消费点之前，记录位置后继续收帧
                        self.frame_buffer.reset_to(read_index);
                        read_frame_index = Some(read_index);
                        continue;
                    }
                }

                // 第 4 步：消化与 writable 重叠的部分；先补跳帧的静音，
                // 再拷贝解码数据
                if !writable_range.is_empty() {
                    let skippable_range = IndexRange::between(
                        writable_range.start(),
                        decoded_range.start().min(writable_range.end()),
                    );
                    if skippable_range.orientation() == Orientation::Forward
                        && !skippable_range.is_empty()
                    {
                        writer.fill_silence(skippable_range.length());
                        writable_range.shrink_front(skippable_range.length());
                        read_index += skippable_range.length();
                    }
                }
                debug_assert!(
                    writable_range.is_empty() || read_index == decoded_range.start()
                );
                read_index = decoded_range.start();
                if !writable_range.is_empty() {
                    debug_assert_eq!(writable_range.start(), decoded_range.start());
                    let copyable_range = IndexRange::between(
                        read_index,
                        decoded_range.end().min(writable_range.end()),
                    );
                    if copyable_range.orientation() == Orientation::Forward {
                        let copy_frames = copyable_range.length();
                        let from = self.signal_info.frames_to_samples(decoded_offset);
                        let to = from + self.signal_info.frames_to_samples(copy_frames);
                        writer.copy_samples(&self.decode_scratch[from..to]);
                        decoded_offset += copy_frames;
                        decoded_range.shrink_front(copy_frames);
                        writable_range.shrink_front(copy_frames);
                        read_index += copy_frames;
                    }
                }

                // 缓冲为空时在当前消费点重新锚定流位置；非空时位置
                // 保持在缓冲首帧（同一个包的后续帧继续往后追加）
                if self.frame_buffer.is_empty() {
                    self.frame_buffer.reset_to(read_index);
                }
                // 没消费完的尾巴进预读缓冲，跳帧留下的空隙补静音
                let from = self.signal_info.frames_to_samples(decoded_offset);
                let to = from
                    + self
                        .signal_info
                        .frames_to_samples(decoded_range.length().max(0));
                let unbuffered = self.frame_buffer.buffer_frames(
                    BufferingMode::FillGapWithSilence,
                    decoded_range,
                    &self.decode_scratch[from..to],
                );
                debug_assert!(unbuffered.is_empty());
                read_index = read_index.max(self.frame_buffer.buffered_range().end());
                read_frame_index = Some(read_index);

                // 某些编码器（MP3 VBR、部分 AAC）会在 duration 之外多解出
                // 几帧；直接丢掉，流长度保持打开时发布的值
                let buffered_end = self.frame_buffer.buffered_range().end();
                if buffered_end > self.frame_index_range.end() {
                    let overflow_count = buffered_end - self.frame_index_range.end();
                    info!(
                        "discarding {} sample frames at the end of the audio stream",
                        overflow_count
                    );
                    self.frame_buffer
                        .discard_last_buffered_frames(overflow_count);
                }

                if !self.frame_buffer.is_valid() {
                    break;
                }
            }
        }
        debug_assert!(pending.is_none() || !self.frame_buffer.is_valid());

        let readable_range = IndexRange::between(readable_start, writable_range.start());
        debug_assert!(readable_range.orientation() != Orientation::Backward);
        ReadableSampleFrames::new(readable_range, writer.finish())
    }
}
