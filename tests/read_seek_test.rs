//! 读取/寻址状态机的端到端测试。
//!
//! 用一个脚本化的 fake backend 模拟真实压缩音频的各种毛刺：
//! lead-in、start_time 缺失、结尾超量、解码错误、EAGAIN 重发等，
//! 逐样本断言读取结果。

use audiosource::codec::decoder::decoder_interface::AudioDecoder;
use audiosource::codec::demuxer::demuxer_interface::{
    AudioCodecId, DecoderConfig, InputFormatInfo, MediaBackend, MediaInput, StreamInfo,
};
use audiosource::codec::error::{CodecError, CodecResult};
use audiosource::codec::packet::CodecPacket;
use audiosource::common::audio::audio::{
    AudioFormat, AudioFrame, ChannelLayout, Rational, SampleFormat,
};
use audiosource::common::audio::index_range::IndexRange;
use audiosource::source::sample_frames::WritableSampleFrames;
use audiosource::source::session::{AudioFileSource, OpenParams};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

/// 确定性的样本值：按 pts（1/sample_rate 时间基）与声道编码。
fn sample_value(pts: i64, channel: u16, channels: u16) -> f32 {
    (pts * channels as i64 + channel as i64) as f32
}

/// 帧索引区间 [start, end) 的期望输出（帧索引 + 有效起始时间 = pts）。
fn expected_samples(start: i64, end: i64, effective_start: i64, channels: u16) -> Vec<f32> {
    let mut out = Vec::new();
    for idx in start..end {
        for c in 0..channels {
            out.push(sample_value(idx + effective_start, c, channels));
        }
    }
    out
}

#[derive(Clone)]
struct FakeConfig {
    stream: StreamInfo,
    /// 解码器第一帧的 pts（lead-in 为负或带 start_time 偏移）。
    decode_start_pts: i64,
    /// 解码器实际能输出的总帧数。
    total_decoded_frames: i64,
    /// 每个包解出的帧数（最后一包可能不足）。
    packet_frames: i64,
    /// 解码器把一个包拆成多个更小的帧时，单帧的采样数。
    decoded_frame_samples: Option<i64>,
    /// pts 达到该值起解码持续报错（确定性故障）。
    fail_at_pts: Option<i64>,
    /// 每次 reset 后第一次 send 返回 Again（验证包保留重发）。
    again_on_first_send: bool,
    /// 穿插其它流的包（验证 packet pump 的过滤）。
    other_stream_noise: bool,
    /// 该序号的包重复发一次（验证 overlap 回卷）。
    duplicate_packet_at: Option<i64>,
}

impl FakeConfig {
    fn packet_count(&self) -> i64 {
        (self.total_decoded_frames + self.packet_frames - 1) / self.packet_frames
    }

    fn packet_pts(&self, index: i64) -> i64 {
        self.decode_start_pts + index * self.packet_frames
    }
}

struct BackendStats {
    init: Once,
    init_calls: AtomicUsize,
    seek_calls: AtomicUsize,
    last_seek_pts: Mutex<Option<i64>>,
}

impl BackendStats {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            init: Once::new(),
            init_calls: AtomicUsize::new(0),
            seek_calls: AtomicUsize::new(0),
            last_seek_pts: Mutex::new(None),
        })
    }

    fn seeks(&self) -> usize {
        self.seek_calls.load(Ordering::SeqCst)
    }
}

struct FakeBackend {
    cfg: FakeConfig,
    stats: Arc<BackendStats>,
}

impl MediaBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn init_once(&self) {
        self.stats.init.call_once(|| {
            self.stats.init_calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    fn open_input(&self, _path: &Path) -> CodecResult<Box<dyn MediaInput>> {
        Ok(Box::new(FakeInput {
            cfg: self.cfg.clone(),
            stats: self.stats.clone(),
            cursor: 0,
            noise_pending: self.cfg.other_stream_noise,
            duplicated: false,
        }))
    }

    fn input_formats(&self) -> Vec<InputFormatInfo> {
        Vec::new()
    }
}

struct FakeInput {
    cfg: FakeConfig,
    stats: Arc<BackendStats>,
    cursor: i64,
    noise_pending: bool,
    duplicated: bool,
}

impl MediaInput for FakeInput {
    fn select_best_audio_stream(&mut self) -> CodecResult<StreamInfo> {
        Ok(self.cfg.stream.clone())
    }

    fn new_stream_decoder(
        &mut self,
        _config: &DecoderConfig,
    ) -> CodecResult<Box<dyn AudioDecoder>> {
        Ok(Box::new(FakeDecoder {
            cfg: self.cfg.clone(),
            queue: VecDeque::new(),
            draining: false,
            again_pending: self.cfg.again_on_first_send,
        }))
    }

    fn read_packet(&mut self) -> CodecResult<CodecPacket> {
        if self.cursor >= self.cfg.packet_count() {
            return Err(CodecError::Eof);
        }
        if self.noise_pending {
            self.noise_pending = false;
            let mut pkt = CodecPacket::new(99, vec![0u8; 4], self.cfg.stream.time_base);
            pkt.pts = None;
            return Ok(pkt);
        }
        let pts = self.cfg.packet_pts(self.cursor);
        if Some(self.cursor) == self.cfg.duplicate_packet_at && !self.duplicated {
            // 本包重复发一次，游标原地不动
            self.duplicated = true;
        } else {
            self.cursor += 1;
            self.noise_pending = self.cfg.other_stream_noise;
        }
        let mut pkt = CodecPacket::new(
            self.cfg.stream.index,
            vec![0u8; 4],
            self.cfg.stream.time_base,
        );
        pkt.pts = Some(pts);
        pkt.dts = Some(pts);
        pkt.duration = Some(self.cfg.packet_frames);
        Ok(pkt)
    }

    fn seek_backward(&mut self, pts: i64) -> CodecResult<()> {
        self.stats.seek_calls.fetch_add(1, Ordering::SeqCst);
        *self.stats.last_seek_pts.lock().unwrap() = Some(pts);
        // 定位到 pts 处或之前最近的包边界
        let mut target = 0;
        for k in 0..self.cfg.packet_count() {
            if self.cfg.packet_pts(k) <= pts {
                target = k;
            } else {
                break;
            }
        }
        self.cursor = target;
        self.duplicated = false;
        Ok(())
    }
}

struct FakeDecoder {
    cfg: FakeConfig,
    queue: VecDeque<i64>,
    draining: bool,
    again_pending: bool,
}

impl FakeDecoder {
    fn build_frame(&self, pts: i64, nb_samples: i64) -> AudioFrame {
        let channels = self.cfg.stream.channel_layout.channels;
        let format = AudioFormat {
            sample_rate: self.cfg.stream.sample_rate,
            sample_format: SampleFormat::F32 { planar: false },
            // 布局照搬流声明（可能 unspecified，由读取侧修补）
            channel_layout: self.cfg.stream.channel_layout,
        };
        let mut bytes = Vec::with_capacity(nb_samples as usize * channels as usize * 4);
        for i in 0..nb_samples {
            for c in 0..channels {
                bytes.extend_from_slice(&sample_value(pts + i, c, channels).to_ne_bytes());
            }
        }
        AudioFrame::from_planes(
            format,
            nb_samples as usize,
            self.cfg.stream.time_base,
            Some(pts),
            vec![bytes],
        )
        .unwrap()
    }
}

impl AudioDecoder for FakeDecoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn send_packet(&mut self, packet: Option<CodecPacket>) -> CodecResult<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.again_pending {
            self.again_pending = false;
            return Err(CodecError::Again);
        }
        if self.draining {
            return Err(CodecError::InvalidState("send after drain"));
        }
        let Some(pts) = packet.pts else {
            return Err(CodecError::InvalidData("packet without pts"));
        };
        let end_pts = self.cfg.decode_start_pts + self.cfg.total_decoded_frames;
        let step = self
            .cfg
            .decoded_frame_samples
            .unwrap_or(self.cfg.packet_frames);
        let mut frame_pts = pts;
        while frame_pts < (pts + self.cfg.packet_frames).min(end_pts) {
            self.queue.push_back(frame_pts);
            frame_pts += step;
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> CodecResult<AudioFrame> {
        let Some(pts) = self.queue.pop_front() else {
            return Err(if self.draining {
                CodecError::Eof
            } else {
                CodecError::Again
            });
        };
        if let Some(fail_at) = self.cfg.fail_at_pts {
            if pts >= fail_at {
                return Err(CodecError::Other("injected decode fault".into()));
            }
        }
        let end_pts = self.cfg.decode_start_pts + self.cfg.total_decoded_frames;
        let step = self
            .cfg
            .decoded_frame_samples
            .unwrap_or(self.cfg.packet_frames);
        let nb_samples = (end_pts - pts).min(step);
        assert!(nb_samples > 0);
        Ok(self.build_frame(pts, nb_samples))
    }

    fn reset(&mut self) -> CodecResult<()> {
        self.queue.clear();
        self.draining = false;
        self.again_pending = self.cfg.again_on_first_send;
        Ok(())
    }
}

// ---- 配置工厂 ----

fn stream_info(
    codec_id: AudioCodecId,
    channel_layout: ChannelLayout,
    duration: Option<i64>,
    start_time: Option<i64>,
    frame_size: i32,
) -> StreamInfo {
    StreamInfo {
        index: 0,
        codec_id,
        time_base: Rational::new(1, 44100),
        start_time,
        duration,
        sample_rate: 44100,
        channel_layout,
        sample_format: SampleFormat::F32 { planar: false },
        bit_rate: 320_000,
        frame_size,
        seek_preroll: 0,
    }
}

/// 44.1kHz 立体声 MP3，时长 `length` 帧，解码从 `-lead_in` 起步。
fn mp3_config(length: i64, lead_in: i64) -> FakeConfig {
    FakeConfig {
        stream: stream_info(
            AudioCodecId::Mp3,
            ChannelLayout::stereo(),
            Some(length),
            Some(0),
            1152,
        ),
        decode_start_pts: -lead_in,
        total_decoded_frames: length + lead_in,
        packet_frames: 1152,
        decoded_frame_samples: None,
        fail_at_pts: None,
        again_on_first_send: false,
        other_stream_noise: false,
        duplicate_packet_at: None,
    }
}

fn open_source(cfg: FakeConfig) -> (AudioFileSource, Arc<BackendStats>) {
    let stats = BackendStats::new();
    let backend = FakeBackend {
        cfg,
        stats: stats.clone(),
    };
    let source = AudioFileSource::open(&backend, Path::new("fake://input"), &OpenParams::default())
        .expect("open failed");
    (source, stats)
}

/// 读取 [start, end) 并返回 (实际范围, 样本拷贝)；顺带检查不越界。
fn read_range(source: &mut AudioFileSource, start: i64, end: i64) -> (IndexRange, Vec<f32>) {
    let channels = source.signal_info().channel_count() as usize;
    let mut buf = vec![f32::NAN; (end - start) as usize * channels];
    let writable = WritableSampleFrames::new(IndexRange::between(start, end), &mut buf);
    let readable = source.read_sample_frames(writable);
    let range = readable.frame_range();
    assert!(range.start() == start || readable.is_empty());
    assert!(range.end() <= end);
    assert_eq!(
        readable.samples().len(),
        range.length() as usize * channels
    );
    (range, readable.samples().to_vec())
}

/// 统计作用域内 WARN 级事件数量。
struct WarnCounter(Arc<AtomicUsize>);

impl tracing::Subscriber for WarnCounter {
    fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
        tracing::span::Id::from_u64(1)
    }

    fn record(&self, _id: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

    fn record_follows_from(&self, _id: &tracing::span::Id, _follows: &tracing::span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn enter(&self, _id: &tracing::span::Id) {}

    fn exit(&self, _id: &tracing::span::Id) {}
}

fn count_warnings<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let result =
        tracing::subscriber::with_default(WarnCounter(count.clone()), f);
    let warnings = count.load(Ordering::SeqCst);
    (result, warnings)
}

// ---- 场景 ----

#[test]
fn mp3_lead_in_is_absorbed_without_warnings() {
    // 320kbps MP3 的典型 lead-in：解码从 -1105 起步
    let ((range, samples), warnings) = count_warnings(|| {
        let (mut source, _) = open_source(mp3_config(40000, 1105));
        assert_eq!(source.frame_index_range(), IndexRange::between(0, 40000));
        read_range(&mut source, 0, 4096)
    });
    assert_eq!(warnings, 0);
    assert_eq!(range, IndexRange::between(0, 4096));
    // 第一帧输出 == 原始解码输出偏移 1105 处（pts 0）
    assert_eq!(samples, expected_samples(0, 4096, 0, 2));
}

#[test]
fn aac_missing_start_time_shifts_origin() {
    let length = 30000;
    let mut stream = stream_info(
        AudioCodecId::Aac,
        ChannelLayout::stereo(),
        Some(2112 + length),
        None,
        1024,
    );
    stream.bit_rate = 256_000;
    let cfg = FakeConfig {
        stream,
        decode_start_pts: 2112,
        total_decoded_frames: length,
        packet_frames: 1024,
        decoded_frame_samples: None,
        fail_at_pts: None,
        again_on_first_send: false,
        other_stream_noise: false,
        duplicate_packet_at: None,
    };
    let (mut source, _) = open_source(cfg);
    assert_eq!(source.frame_index_range(), IndexRange::between(0, length));
    assert_eq!(source.bitrate_kbps(), Some(256));

    let (range, samples) = read_range(&mut source, 0, 1024);
    assert_eq!(range, IndexRange::between(0, 1024));
    // 帧索引 0 对应解码输出 pts 2112
    assert_eq!(samples, expected_samples(0, 1024, 2112, 2));
}

#[test]
fn mono_wav_undefined_layout_opens_and_reads_exactly() {
    let length = 3000;
    let cfg = FakeConfig {
        stream: stream_info(
            AudioCodecId::Other,
            ChannelLayout::unspecified(1),
            Some(length),
            Some(0),
            0,
        ),
        decode_start_pts: 0,
        total_decoded_frames: length,
        packet_frames: 1000,
        decoded_frame_samples: None,
        fail_at_pts: None,
        again_on_first_send: false,
        other_stream_noise: false,
        duplicate_packet_at: None,
    };
    let (mut source, _) = open_source(cfg);
    assert_eq!(source.signal_info().channel_count(), 1);
    assert_eq!(source.signal_info().sample_rate(), 44100);

    let (range, samples) = read_range(&mut source, 0, length);
    assert_eq!(range, IndexRange::between(0, length));
    assert_eq!(samples, expected_samples(0, length, 0, 1));
}

#[test]
fn mp3_seek_preroll_snaps_to_codec_frame_boundary() {
    let (mut source, stats) = open_source(mp3_config(120000, 0));

    let (range, samples) = read_range(&mut source, 100000, 100512);
    assert_eq!(range, IndexRange::between(100000, 100512));
    // preroll 5184 帧，再对齐 1152 的倍数：100000 - 5184 = 94816 -> 94464
    assert_eq!(*stats.last_seek_pts.lock().unwrap(), Some(94464));
    assert_eq!(stats.seeks(), 1);
    // 逐样本等于整读后的切片
    assert_eq!(samples, expected_samples(100000, 100512, 0, 2));
}

#[test]
fn trailing_overflow_is_discarded() {
    // duration 说 10000，解码器实际多吐 17 帧
    let mut cfg = mp3_config(10000, 0);
    cfg.total_decoded_frames = 10017;
    let (mut source, _) = open_source(cfg);

    let mut total = 0i64;
    let mut all = Vec::new();
    for (start, end) in [(0i64, 4096i64), (4096, 8192), (8192, 10000)] {
        let (range, samples) = read_range(&mut source, start, end);
        assert_eq!(range, IndexRange::between(start, end));
        total += range.length();
        all.extend(samples);
    }
    // 全程只产出名义长度，结尾 17 帧被丢弃
    assert_eq!(total, 10000);
    assert_eq!(all, expected_samples(0, 10000, 0, 2));
}

#[test]
fn decode_error_invalidates_and_explicit_reseek_recovers() {
    let mut cfg = mp3_config(20000, 0);
    cfg.fail_at_pts = Some(11520);
    let (mut source, _) = open_source(cfg);

    // 跨越故障点的读取在故障前截断
    let (range, samples) = read_range(&mut source, 0, 20000);
    assert_eq!(range, IndexRange::between(0, 11520));
    assert_eq!(samples, expected_samples(0, 11520, 0, 2));

    // 不回退的后续读取拿不到数据
    let (range, samples) = read_range(&mut source, 11520, 12000);
    assert!(range.is_empty());
    assert!(samples.is_empty());

    // 回到 0 重读，与基线逐位一致
    let (range, samples) = read_range(&mut source, 0, 11520);
    assert_eq!(range, IndexRange::between(0, 11520));
    assert_eq!(samples, expected_samples(0, 11520, 0, 2));
}

#[test]
fn sequential_chunks_match_single_read() {
    let length = 30000;
    // 带 lead-in、穿插其它流的包、reset 后首次 send 返回 Again
    let mut cfg = mp3_config(length, 1105);
    cfg.other_stream_noise = true;
    cfg.again_on_first_send = true;

    let (mut single, _) = open_source(cfg.clone());
    let (range, whole) = read_range(&mut single, 0, length);
    assert_eq!(range, IndexRange::between(0, length));

    let (mut chunked, _) = open_source(cfg);
    let mut concat = Vec::new();
    let mut start = 0;
    while start < length {
        let end = (start + 1000).min(length);
        let (range, samples) = read_range(&mut chunked, start, end);
        assert_eq!(range, IndexRange::between(start, end));
        concat.extend(samples);
        start = end;
    }
    assert_eq!(concat, whole);
    assert_eq!(whole, expected_samples(0, length, 0, 2));
}

#[test]
fn repeated_read_is_bit_identical() {
    let (mut source, _) = open_source(mp3_config(20000, 1105));

    let (range_a, first) = read_range(&mut source, 5000, 6000);
    let (range_b, second) = read_range(&mut source, 5000, 6000);
    assert_eq!(range_a, IndexRange::between(5000, 6000));
    assert_eq!(range_b, range_a);
    assert_eq!(first, second);
}

#[test]
fn seek_within_buffered_range_skips_backend_seek() {
    let length = 20000;
    let cfg = FakeConfig {
        stream: stream_info(
            AudioCodecId::Other,
            ChannelLayout::stereo(),
            Some(length),
            Some(0),
            0,
        ),
        decode_start_pts: 0,
        total_decoded_frames: length,
        packet_frames: 4096,
        decoded_frame_samples: None,
        fail_at_pts: None,
        again_on_first_send: false,
        other_stream_noise: false,
        duplicate_packet_at: None,
    };
    let (mut source, stats) = open_source(cfg);

    read_range(&mut source, 0, 1000);
    assert_eq!(stats.seeks(), 1);

    // 目标落在预读缓冲内：只丢前缀，不碰 backend
    let (range, samples) = read_range(&mut source, 2000, 2500);
    assert_eq!(range, IndexRange::between(2000, 2500));
    assert_eq!(samples, expected_samples(2000, 2500, 0, 2));
    assert_eq!(stats.seeks(), 1);

    // 顺序续读（恰好在缓冲右端）同样不触发 seek
    let (range, _) = read_range(&mut source, 2500, 4500);
    assert_eq!(range, IndexRange::between(2500, 4500));
    assert_eq!(stats.seeks(), 1);

    // 回退到缓冲之前才需要真正 seek
    read_range(&mut source, 0, 100);
    assert_eq!(stats.seeks(), 2);
}

#[test]
fn duplicate_packet_triggers_rewind_and_rewrite() {
    let mut cfg = mp3_config(20000, 0);
    // 第 5 个包（[5760, 6912)）会重复出现一次
    cfg.duplicate_packet_at = Some(5);

    let ((range, samples), warnings) = count_warnings(|| {
        let (mut source, _) = open_source(cfg);
        read_range(&mut source, 0, 10000)
    });
    // 重叠发生在流中间，必须告警（overlap + rewind）
    assert!(warnings > 0);
    assert_eq!(range, IndexRange::between(0, 10000));
    // 回卷重写后输出仍然逐位正确
    assert_eq!(samples, expected_samples(0, 10000, 0, 2));
}

#[test]
fn multi_frame_packets_accumulate_in_read_ahead_buffer() {
    // 一个包解出两帧：第二帧必须追加在第一帧的缓冲尾部之后
    let mut cfg = mp3_config(10000, 0);
    cfg.packet_frames = 2304;
    cfg.decoded_frame_samples = Some(1152);

    let ((), warnings) = count_warnings(|| {
        let (mut source, stats) = open_source(cfg);

        let (range, samples) = read_range(&mut source, 0, 1000);
        assert_eq!(range, IndexRange::between(0, 1000));
        assert_eq!(samples, expected_samples(0, 1000, 0, 2));
        assert_eq!(stats.seeks(), 1);

        // 两帧的剩余部分 [1000, 2304) 全部还在预读缓冲里
        let (range, samples) = read_range(&mut source, 1000, 2304);
        assert_eq!(range, IndexRange::between(1000, 2304));
        assert_eq!(samples, expected_samples(1000, 2304, 0, 2));
        assert_eq!(stats.seeks(), 1);
    });
    assert_eq!(warnings, 0);
}

#[test]
fn eof_shortfall_pads_with_silence_and_recovers_after_reseek() {
    // duration 说 5000，解码器只有 4000 帧可给
    let mut cfg = mp3_config(5000, 0);
    cfg.total_decoded_frames = 4000;
    cfg.packet_frames = 1000;
    let (mut source, _) = open_source(cfg);

    let (range, samples) = read_range(&mut source, 0, 5000);
    assert_eq!(range, IndexRange::between(0, 5000));
    assert_eq!(&samples[..8000], expected_samples(0, 4000, 0, 2).as_slice());
    assert!(samples[8000..].iter().all(|&s| s == 0.0));

    // 位置已作废，但下一次读取会内部重新 seek
    let (range, samples) = read_range(&mut source, 0, 1000);
    assert_eq!(range, IndexRange::between(0, 1000));
    assert_eq!(samples, expected_samples(0, 1000, 0, 2));
}

#[test]
fn open_rejects_unknown_duration() {
    let mut cfg = mp3_config(1000, 0);
    cfg.stream.duration = None;
    let stats = BackendStats::new();
    let backend = FakeBackend {
        cfg,
        stats,
    };
    let result = AudioFileSource::open(
        &backend,
        Path::new("fake://input"),
        &OpenParams::default(),
    );
    assert!(result.is_err());
}
