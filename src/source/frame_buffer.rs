//! 预读帧缓冲：保存本轮调用没消费完的解码 PCM。
//!
//! 缓冲内容始终是从 `first_frame` 起连续的 interleaved f32 帧。
//! 「当前流位置」有三态：
//! - valid + ready：`first_frame` 已知，缓冲范围 = [first_frame, first_frame + count)
//! - valid + 位置未知：刚 seek 完、还没收到第一个解码帧
//! - invalid：发生过不可恢复错误，重新 seek 之前不允许产出数据
//!
//! 所有状态迁移都在单线程内发生，没有并发访问。

use crate::common::audio::index_range::IndexRange;
use crate::source::sample_frames::{SampleWriter, SignalInfo};
use std::collections::VecDeque;

/// `buffer_frames` 对缓冲尾与新数据之间空隙的处理方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferingMode {
    /// 出现空隙时直接拒绝追加（返回未追加的范围）。
    SkipGap,
    /// 用静音帧垫平空隙后再追加。
    FillGapWithSilence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    Invalid,
    Unknown,
    At(i64),
}

pub struct ReadAheadFrameBuffer {
    signal_info: SignalInfo,
    samples: VecDeque<f32>,
    position: Position,
}

impl ReadAheadFrameBuffer {
    /// `capacity_frames` 只是初始容量预估，超出会自动增长。
    pub fn new(signal_info: SignalInfo, capacity_frames: i64) -> Self {
        Self {
            signal_info,
            samples: VecDeque::with_capacity(
                signal_info.frames_to_samples(capacity_frames.max(0)),
            ),
            position: Position::Unknown,
        }
    }

    pub fn signal_info(&self) -> SignalInfo {
        self.signal_info
    }

    pub fn is_valid(&self) -> bool {
        self.position != Position::Invalid
    }

    /// 位置已知（缓冲可能为空）。
    pub fn is_ready(&self) -> bool {
        matches!(self.position, Position::At(_))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 缓冲首帧索引；位置未知或 invalid 时为 None。
    pub fn first_frame(&self) -> Option<i64> {
        match self.position {
            Position::At(first) => Some(first),
            _ => None,
        }
    }

    pub fn buffered_frame_count(&self) -> i64 {
        self.signal_info.samples_to_frames(self.samples.len())
    }

    /// 已缓冲的帧索引范围；位置未知时为一个 empty 区间。
    pub fn buffered_range(&self) -> IndexRange {
        match self.position {
            Position::At(first) => IndexRange::forward(first, self.buffered_frame_count()),
            _ => IndexRange::between(0, 0),
        }
    }

    /// 尝试把缓冲首帧挪到 `frame_index`（丢弃之前的前缀）。
    ///
    /// `frame_index` 允许等于缓冲范围的右端：丢光所有数据、位置保持
    /// 已知。顺序读取因此永远不触发 backend seek。
    pub fn try_seek_to_first_frame(&mut self, frame_index: i64) -> bool {
        let Position::At(first) = self.position else {
            return false;
        };
        if frame_index < first || frame_index > first + self.buffered_frame_count() {
            return false;
        }
        let skip = self.signal_info.frames_to_samples(frame_index - first);
        self.samples.drain(..skip);
        self.position = Position::At(frame_index);
        true
    }

    /// 把缓冲头部灌进调用方的可写范围，返回仍未满足的尾部范围。
    ///
    /// 只有可写起点落在缓冲范围内才会发生消费；缓冲帮不上忙时原样
    /// 返回（后续由 seek 调整流位置）。
    pub(crate) fn consume_buffered_frames(
        &mut self,
        writable: IndexRange,
        writer: &mut SampleWriter<'_>,
    ) -> IndexRange {
        if writable.is_empty() || !self.is_ready() || self.is_empty() {
            return writable;
        }
        let buffered = self.buffered_range();
        if !buffered.contains_index(writable.start()) {
            return writable;
        }
        // 丢掉请求起点之前的前缀
        if !self.try_seek_to_first_frame(writable.start()) {
            return writable;
        }
        let consumable = self.buffered_frame_count().min(writable.length());
        debug_assert!(consumable > 0);
        let take = self.signal_info.frames_to_samples(consumable);
        // VecDeque 内部可能分两段，逐段拷贝
        let (front, back) = self.samples.as_slices();
        let from_front = take.min(front.len());
        writer.copy_samples(&front[..from_front]);
        if from_front < take {
            writer.copy_samples(&back[..take - from_front]);
        }
        self.samples.drain(..take);
        self.position = Position::At(writable.start() + consumable);

        let mut remaining = writable;
        remaining.shrink_front(consumable);
        remaining
    }

    /// 追加解码出来的采样帧，返回没能追加的子范围（正常流程下为空，
    /// 仅用于断言）。
    ///
    /// 位置未知时以 `readable.start()` 为锚点建立位置。
    pub fn buffer_frames(
        &mut self,
        mode: BufferingMode,
        readable: IndexRange,
        samples: &[f32],
    ) -> IndexRange {
        debug_assert_eq!(
            self.signal_info.frames_to_samples(readable.length().max(0)),
            samples.len()
        );
        if !self.is_valid() || readable.is_empty() {
            return readable;
        }
        if self.position == Position::Unknown {
            self.position = Position::At(readable.start());
        }
        let end = self.buffered_range().end();
        if readable.start() > end {
            match mode {
                BufferingMode::FillGapWithSilence => {
                    let gap = self.signal_info.frames_to_samples(readable.start() - end);
                    self.samples.extend(core::iter::repeat(0.0).take(gap));
                }
                BufferingMode::SkipGap => return readable,
            }
        } else if readable.start() < end {
            // 与缓冲尾重叠的数据不在这里调和，由读取侧先行修剪
            return readable;
        }
        self.samples.extend(samples.iter().copied());
        IndexRange::between(readable.end(), readable.end())
    }

    /// 丢弃全部缓冲数据；位置保持不变（ready 时缓冲范围塌缩成空）。
    pub fn discard_all_buffered_frames(&mut self) {
        self.samples.clear();
    }

    /// 从尾部丢弃至多 `frames` 帧，返回实际丢弃的帧数。
    pub fn discard_last_buffered_frames(&mut self, frames: i64) -> i64 {
        let discard = frames.clamp(0, self.buffered_frame_count());
        let keep = self.samples.len() - self.signal_info.frames_to_samples(discard);
        self.samples.truncate(keep);
        discard
    }

    /// 清空并回到「位置未知」态（seek 之后、首个解码帧到来之前）。
    pub fn reset(&mut self) {
        self.samples.clear();
        self.position = Position::Unknown;
    }

    /// 清空并把位置锚定在 `frame_index`。
    pub fn reset_to(&mut self, frame_index: i64) {
        self.samples.clear();
        self.position = Position::At(frame_index);
    }

    /// 进入 invalid 态；重新 seek 之前所有读取都不产出数据。
    pub fn invalidate(&mut self) {
        self.samples.clear();
        self.position = Position::Invalid;
    }
}
