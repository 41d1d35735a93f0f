// Sample Frame Containers
use crate::common::audio::index_range::IndexRange;

/// 输出信号描述；打开时确定一次，之后不变。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalInfo {
    channel_count: u16,
    sample_rate: u32,
}

impl SignalInfo {
    pub fn new(channel_count: u16, sample_rate: u32) -> Self {
        debug_assert!(channel_count > 0);
        debug_assert!(sample_rate > 0);
        Self {
            channel_count,
            sample_rate,
        }
    }

    pub const fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 帧数 -> 采样点数（interleaved 存储下的 f32 个数）。
    pub const fn frames_to_samples(&self, frames: i64) -> usize {
        debug_assert!(frames >= 0);
        frames as usize * self.channel_count as usize
    }

    pub const fn samples_to_frames(&self, samples: usize) -> i64 {
        (samples / self.channel_count as usize) as i64
    }
}

/// 调用方给出的可写请求：帧索引范围 + 承接输出的 interleaved f32 缓冲。
pub struct WritableSampleFrames<'a> {
    frame_range: IndexRange,
    samples: &'a mut [f32],
}

impl<'a> WritableSampleFrames<'a> {
    pub fn new(frame_range: IndexRange, samples: &'a mut [f32]) -> Self {
        Self {
            frame_range,
            samples,
        }
    }

    pub fn frame_range(&self) -> IndexRange {
        self.frame_range
    }

    pub(crate) fn into_parts(self) -> (IndexRange, &'a mut [f32]) {
        (self.frame_range, self.samples)
    }
}

/// 一次读取实际产出的只读结果。
///
/// `frame_range().start()` 等于请求范围的起点；范围比请求短表示提前
/// 终止（EOF 或不可恢复错误）。
pub struct ReadableSampleFrames<'a> {
    frame_range: IndexRange,
    samples: &'a [f32],
}

impl<'a> ReadableSampleFrames<'a> {
    pub(crate) fn new(frame_range: IndexRange, samples: &'a [f32]) -> Self {
        Self {
            frame_range,
            samples,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            frame_range: IndexRange::between(0, 0),
            samples: &[],
        }
    }

    pub fn frame_range(&self) -> IndexRange {
        self.frame_range
    }

    pub fn frame_length(&self) -> i64 {
        self.frame_range.length()
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.frame_range.is_empty()
    }
}

/// 输出游标：对调用方缓冲的顺序写入，外加少量回卷。
///
/// 解码出的帧可能比已写出的位置更早（overlap），此时要把输出指针
/// 往回拨重写；游标把这类指针运算集中在一处。
pub(crate) struct SampleWriter<'a> {
    signal_info: SignalInfo,
    dst: &'a mut [f32],
    write_pos: usize,
}

impl<'a> SampleWriter<'a> {
    pub fn new(signal_info: SignalInfo, dst: &'a mut [f32]) -> Self {
        Self {
            signal_info,
            dst,
            write_pos: 0,
        }
    }

    pub fn written_frames(&self) -> i64 {
        self.signal_info.samples_to_frames(self.write_pos)
    }

    /// 写入 `frames` 帧静音。
    pub fn fill_silence(&mut self, frames: i64) {
        let want = self.signal_info.frames_to_samples(frames.max(0));
        let take = want.min(self.dst.len() - self.write_pos);
        debug_assert_eq!(want, take);
        self.dst[self.write_pos..self.write_pos + take].fill(0.0);
        self.write_pos += take;
    }

    /// 追加拷贝 interleaved 采样（以采样点计，调用方保证帧对齐）。
    pub fn copy_samples(&mut self, src: &[f32]) {
        let take = src.len().min(self.dst.len() - self.write_pos);
        debug_assert_eq!(src.len(), take);
        self.dst[self.write_pos..self.write_pos + take].copy_from_slice(&src[..take]);
        self.write_pos += take;
    }

    /// 回卷 `frames` 帧（已写出的数据作废，等待重写）。
    pub fn rewind_frames(&mut self, frames: i64) {
        let back = self.signal_info.frames_to_samples(frames.max(0));
        debug_assert!(back <= self.write_pos);
        self.write_pos -= back.min(self.write_pos);
    }

    /// 结束写入，返回已写出的前缀。
    pub fn finish(self) -> &'a [f32] {
        let Self { dst, write_pos, .. } = self;
        &dst[..write_pos]
    }
}
