//! 解码帧 -> interleaved f32 的格式归一化。
//!
//! 只做采样格式与内存布局的转换：采样率不变，声道数也不变
//! （保持与流一致，混音交给宿主引擎）。整数 PCM 按满量程缩放到
//! [-1.0, 1.0]，对齐 swresample 的取值约定。

use crate::codec::error::{CodecError, CodecResult};
use crate::common::audio::audio::{
    AudioFrameView, ChannelLayout, SampleFormat, SampleType,
};

/// 目标格式需要转换时才构造；不需要时读取侧直接走
/// `copy_interleaved_f32` 旁路。
pub struct FrameConverter {
    stream_channel_layout: ChannelLayout,
}

impl FrameConverter {
    pub fn new(stream_channel_layout: ChannelLayout) -> Self {
        Self {
            stream_channel_layout,
        }
    }

    /// 把一帧转换成 interleaved f32，追加写入 `out`。
    ///
    /// 解码器偶尔输出布局未定义的帧，先用缓存的流布局修补再消费。
    pub fn convert(&self, frame: &dyn AudioFrameView, out: &mut Vec<f32>) -> CodecResult<()> {
        let mut format = frame.format();
        if format.channel_layout.is_undefined() {
            format.channel_layout = self.stream_channel_layout;
        }
        if format.channels() != self.stream_channel_layout.channels {
            return Err(CodecError::InvalidData(
                "decoded frame channel count mismatch",
            ));
        }

        let channels = format.channels() as usize;
        let nb_samples = frame.nb_samples();
        let ty = format.sample_format.sample_type();
        out.reserve(nb_samples * channels);

        if format.is_planar() {
            // 逐帧交错输出
            let mut planes = Vec::with_capacity(channels);
            for c in 0..channels {
                planes.push(
                    frame
                        .plane(c)
                        .ok_or(CodecError::InvalidData("missing plane"))?,
                );
            }
            let bps = format.sample_format.bytes_per_sample();
            for i in 0..nb_samples {
                for plane in &planes {
                    out.push(decode_sample(&plane[i * bps..(i + 1) * bps], ty)?);
                }
            }
        } else {
            let plane = frame
                .plane(0)
                .ok_or(CodecError::InvalidData("missing plane 0"))?;
            decode_interleaved(plane, ty, nb_samples * channels, out)?;
        }
        Ok(())
    }
}

/// 旁路：帧本身就是 interleaved f32 时的逐字节读取。
pub(crate) fn copy_interleaved_f32(
    frame: &dyn AudioFrameView,
    out: &mut Vec<f32>,
) -> CodecResult<()> {
    let format = frame.format();
    if format.sample_format != (SampleFormat::F32 { planar: false }) {
        return Err(CodecError::InvalidData(
            "decoded frame is not interleaved f32",
        ));
    }
    let plane = frame
        .plane(0)
        .ok_or(CodecError::InvalidData("missing plane 0"))?;
    out.reserve(plane.len() / 4);
    for chunk in plane.chunks_exact(4) {
        out.push(f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(())
}

fn decode_interleaved(
    bytes: &[u8],
    ty: SampleType,
    expected_samples: usize,
    out: &mut Vec<f32>,
) -> CodecResult<()> {
    let bps = match ty {
        SampleType::U8 => 1,
        SampleType::I16 => 2,
        SampleType::I32 | SampleType::F32 => 4,
        SampleType::I64 | SampleType::F64 => 8,
    };
    if bytes.len() != expected_samples * bps {
        return Err(CodecError::InvalidData("unexpected plane size"));
    }
    for chunk in bytes.chunks_exact(bps) {
        out.push(decode_sample(chunk, ty)?);
    }
    Ok(())
}

fn decode_sample(bytes: &[u8], ty: SampleType) -> CodecResult<f32> {
    let v = match ty {
        SampleType::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        SampleType::I16 => {
            i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
        }
        SampleType::I32 => {
            i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                / 2147483648.0
        }
        SampleType::I64 => {
            i64::from_ne_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
                bytes[7],
            ]) as f32
                / 9223372036854775808.0
        }
        SampleType::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleType::F64 => f64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) as f32,
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::audio::audio::{AudioFormat, AudioFrame, AudioFrameViewMut};

    fn format(sample_format: SampleFormat, layout: ChannelLayout) -> AudioFormat {
        AudioFormat {
            sample_rate: 44100,
            sample_format,
            channel_layout: layout,
        }
    }

    #[test]
    fn planar_i16_interleaves_and_scales() {
        let fmt = format(SampleFormat::I16 { planar: true }, ChannelLayout::stereo());
        let mut frame = AudioFrame::new_alloc(fmt, 2).unwrap();
        // 左声道 [16384, -32768]，右声道 [0, 8192]
        frame.plane_mut(0).unwrap()[..4].copy_from_slice(
            &[16384i16.to_ne_bytes(), (-32768i16).to_ne_bytes()].concat(),
        );
        frame.plane_mut(1).unwrap()[..4].copy_from_slice(
            &[0i16.to_ne_bytes(), 8192i16.to_ne_bytes()].concat(),
        );

        let conv = FrameConverter::new(ChannelLayout::stereo());
        let mut out = Vec::new();
        conv.convert(&frame, &mut out).unwrap();
        assert_eq!(out, vec![0.5, 0.0, -1.0, 0.25]);
    }

    #[test]
    fn interleaved_u8_scales_around_midpoint() {
        let fmt = format(SampleFormat::U8 { planar: false }, ChannelLayout::mono());
        let mut frame = AudioFrame::new_alloc(fmt, 3).unwrap();
        frame.plane_mut(0).unwrap().copy_from_slice(&[128, 0, 255]);

        let conv = FrameConverter::new(ChannelLayout::mono());
        let mut out = Vec::new();
        conv.convert(&frame, &mut out).unwrap();
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!((out[2] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn undefined_layout_is_patched_from_stream() {
        let fmt = format(
            SampleFormat::F32 { planar: false },
            ChannelLayout::unspecified(1),
        );
        let mut frame = AudioFrame::new_alloc(fmt, 1).unwrap();
        frame
            .plane_mut(0)
            .unwrap()
            .copy_from_slice(&0.75f32.to_ne_bytes());

        let conv = FrameConverter::new(ChannelLayout::mono());
        let mut out = Vec::new();
        conv.convert(&frame, &mut out).unwrap();
        assert_eq!(out, vec![0.75]);
    }

    #[test]
    fn channel_count_mismatch_is_rejected() {
        let fmt = format(SampleFormat::F32 { planar: false }, ChannelLayout::stereo());
        let frame = AudioFrame::new_alloc(fmt, 4).unwrap();
        let conv = FrameConverter::new(ChannelLayout::mono());
        let mut out = Vec::new();
        assert!(conv.convert(&frame, &mut out).is_err());
    }

    #[test]
    fn f32_passthrough_copies_bytes() {
        let fmt = format(SampleFormat::F32 { planar: false }, ChannelLayout::stereo());
        let mut frame = AudioFrame::new_alloc(fmt, 2).unwrap();
        let samples = [0.1f32, -0.2, 0.3, -0.4];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        frame.plane_mut(0).unwrap().copy_from_slice(&bytes);

        let mut out = Vec::new();
        copy_interleaved_f32(&frame, &mut out).unwrap();
        assert_eq!(out, samples);
    }
}
