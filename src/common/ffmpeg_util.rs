//! FFmpeg backend 共享工具（仅在 `feature="ffmpeg"` 启用时编译）。

#[cfg(feature = "ffmpeg")]
extern crate ffmpeg_sys_next as ff;

#[cfg(feature = "ffmpeg")]
use crate::codec::error::CodecError;

#[cfg(feature = "ffmpeg")]
use libc;

#[cfg(feature = "ffmpeg")]
use std::ffi::CStr;

#[cfg(feature = "ffmpeg")]
use crate::common::audio::audio::{ChannelLayout, Rational, SampleFormat};

/// 将 FFmpeg 错误码转换为可读字符串。
///
/// 注意 `av_strerror` 接收的是缓冲区真实字节数。
#[cfg(feature = "ffmpeg")]
pub fn ff_err_to_string(err: i32) -> String {
    let mut buf = [0u8; 256];
    unsafe {
        ff::av_strerror(err, buf.as_mut_ptr() as *mut i8, buf.len());
    }
    let cstr = match CStr::from_bytes_until_nul(&buf) {
        Ok(s) => s,
        Err(_) => return format!("ffmpeg error {err}"),
    };
    cstr.to_string_lossy().into_owned()
}

/// 将 FFmpeg API 返回的错误码映射为统一的 `CodecError`。
///
/// 约定：
/// - EAGAIN/EWOULDBLOCK => `Again`
/// - AVERROR_EOF        => `Eof`
/// - 其它              => `Other(<string>)`
#[cfg(feature = "ffmpeg")]
pub fn map_ff_err(err: i32) -> CodecError {
    #[cfg(unix)]
    let is_again = err == ff::AVERROR(libc::EAGAIN) || err == ff::AVERROR(libc::EWOULDBLOCK);
    #[cfg(windows)]
    let is_again = err == ff::AVERROR(libc::WSAEWOULDBLOCK);

    if is_again {
        return CodecError::Again;
    }
    if err == ff::AVERROR_EOF {
        return CodecError::Eof;
    }
    CodecError::Other(ff_err_to_string(err))
}

#[cfg(feature = "ffmpeg")]
pub fn tb_from_avr(tb: ff::AVRational) -> Rational {
    Rational::new(tb.num, tb.den)
}

/// 从 FFmpeg 的 `AVChannelLayout` 提取 channel layout。
///
/// 说明（FFmpeg 6+）：
/// - `order == AV_CHANNEL_ORDER_NATIVE` 时 `u.mask` 才有意义
/// - 其它 order（UNSPEC / CUSTOM / AMBISONIC）拿不到 mask，
///   这里保留 unspecified（mask=0），由上层决定是否套用默认布局
///   （容器不声明布局本身是上层要识别并记录的异常）
#[cfg(feature = "ffmpeg")]
pub fn channel_layout_from_av(ch: &ff::AVChannelLayout) -> ChannelLayout {
    let channels = ch.nb_channels.max(0) as u16;

    if channels == 0 {
        return ChannelLayout::unspecified(0);
    }

    // 不直接引用 `AV_CHANNEL_ORDER_NATIVE` 常量名：
    // ffmpeg-sys-next 的 bindings 在 build 时生成，不同平台/版本下
    // 符号名可能不同。AVChannelOrder 的值序是：
    //   0=UNSPEC, 1=NATIVE, 2=CUSTOM, 3=AMBISONIC
    let order = ch.order as i32;
    if order == 1 {
        // bindgen union 读取需要 unsafe
        let mask = unsafe { ch.u.mask };
        if mask != 0 {
            return ChannelLayout { channels, mask };
        }
    }

    ChannelLayout::unspecified(channels)
}

/// 按本项目的 `ChannelLayout` 填充一个 `AVChannelLayout`。
#[cfg(feature = "ffmpeg")]
pub fn fill_av_channel_layout(
    dst: &mut ff::AVChannelLayout,
    layout: ChannelLayout,
) -> Result<(), CodecError> {
    unsafe {
        *dst = core::mem::zeroed();
        let channels = layout.channels as i32;
        if channels <= 0 {
            return Err(CodecError::InvalidData("invalid channel count"));
        }
        if layout.mask != 0 {
            let ret = ff::av_channel_layout_from_mask(dst, layout.mask);
            if ret < 0 {
                return Err(map_ff_err(ret));
            }
        } else {
            ff::av_channel_layout_default(dst, channels);
        }
        Ok(())
    }
}

/// 本项目采样格式 -> FFmpeg `AVSampleFormat`。
#[cfg(feature = "ffmpeg")]
pub fn map_sample_format(sf: SampleFormat) -> Result<ff::AVSampleFormat, CodecError> {
    use ff::AVSampleFormat::*;
    let av = match sf {
        SampleFormat::U8 { planar: false } => AV_SAMPLE_FMT_U8,
        SampleFormat::U8 { planar: true } => AV_SAMPLE_FMT_U8P,
        SampleFormat::I16 { planar: false } => AV_SAMPLE_FMT_S16,
        SampleFormat::I16 { planar: true } => AV_SAMPLE_FMT_S16P,
        SampleFormat::I32 { planar: false } => AV_SAMPLE_FMT_S32,
        SampleFormat::I32 { planar: true } => AV_SAMPLE_FMT_S32P,
        SampleFormat::I64 { planar: false } => AV_SAMPLE_FMT_S64,
        SampleFormat::I64 { planar: true } => AV_SAMPLE_FMT_S64P,
        SampleFormat::F32 { planar: false } => AV_SAMPLE_FMT_FLT,
        SampleFormat::F32 { planar: true } => AV_SAMPLE_FMT_FLTP,
        SampleFormat::F64 { planar: false } => AV_SAMPLE_FMT_DBL,
        SampleFormat::F64 { planar: true } => AV_SAMPLE_FMT_DBLP,
    };
    Ok(av)
}

/// FFmpeg `AVSampleFormat` -> 本项目采样格式。
#[cfg(feature = "ffmpeg")]
pub fn map_av_sample_format(av: ff::AVSampleFormat) -> Result<SampleFormat, CodecError> {
    use ff::AVSampleFormat::*;
    let sf = match av {
        AV_SAMPLE_FMT_U8 => SampleFormat::U8 { planar: false },
        AV_SAMPLE_FMT_U8P => SampleFormat::U8 { planar: true },
        AV_SAMPLE_FMT_S16 => SampleFormat::I16 { planar: false },
        AV_SAMPLE_FMT_S16P => SampleFormat::I16 { planar: true },
        AV_SAMPLE_FMT_S32 => SampleFormat::I32 { planar: false },
        AV_SAMPLE_FMT_S32P => SampleFormat::I32 { planar: true },
        AV_SAMPLE_FMT_S64 => SampleFormat::I64 { planar: false },
        AV_SAMPLE_FMT_S64P => SampleFormat::I64 { planar: true },
        AV_SAMPLE_FMT_FLT => SampleFormat::F32 { planar: false },
        AV_SAMPLE_FMT_FLTP => SampleFormat::F32 { planar: true },
        AV_SAMPLE_FMT_DBL => SampleFormat::F64 { planar: false },
        AV_SAMPLE_FMT_DBLP => SampleFormat::F64 { planar: true },
        _ => return Err(CodecError::Unsupported("unsupported FFmpeg sample format")),
    };
    Ok(sf)
}
