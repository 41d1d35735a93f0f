//! FFmpeg demux/decode backend（流式 send_packet/receive_frame）。

use crate::codec::demuxer::demuxer_interface::{InputFormatInfo, MediaBackend, MediaInput};
use crate::codec::error::{CodecError, CodecResult};
use std::path::Path;

#[cfg(not(feature = "ffmpeg"))]
pub struct FfmpegBackend;

#[cfg(not(feature = "ffmpeg"))]
impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(feature = "ffmpeg"))]
impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(feature = "ffmpeg"))]
impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg(placeholder)"
    }

    fn init_once(&self) {}

    fn open_input(&self, _path: &Path) -> CodecResult<Box<dyn MediaInput>> {
        Err(CodecError::Unsupported(
            "FFmpeg backend not linked (enable the `ffmpeg` feature)",
        ))
    }

    fn input_formats(&self) -> Vec<InputFormatInfo> {
        Vec::new()
    }
}

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use super::*;
    use crate::codec::decoder::decoder_interface::AudioDecoder;
    use crate::codec::demuxer::demuxer_interface::{AudioCodecId, DecoderConfig, StreamInfo};
    use crate::codec::packet::CodecPacket;
    use crate::common::audio::audio::{AudioFormat, AudioFrame, Rational};
    use crate::common::ffmpeg_util::{
        channel_layout_from_av, ff_err_to_string, map_av_sample_format, map_ff_err,
        map_sample_format, tb_from_avr,
    };
    use core::ptr;
    use std::ffi::{CStr, CString};
    use std::sync::Once;
    use tracing::{debug, warn};

    extern crate ffmpeg_sys_next as ff;

    static INIT_FFMPEG: Once = Once::new();

    pub struct FfmpegBackend;

    impl FfmpegBackend {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for FfmpegBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MediaBackend for FfmpegBackend {
        fn name(&self) -> &'static str {
            "ffmpeg"
        }

        fn init_once(&self) {
            // 新版 FFmpeg 不再需要 av_register_all；
            // 这里只收紧全局日志级别，避免刷屏
            INIT_FFMPEG.call_once(|| unsafe {
                ff::av_log_set_level(ff::AV_LOG_WARNING as i32);
            });
        }

        fn open_input(&self, path: &Path) -> CodecResult<Box<dyn MediaInput>> {
            let path_c = CString::new(path.to_string_lossy().as_bytes())
                .map_err(|_| CodecError::InvalidData("path contains NUL"))?;
            unsafe {
                let mut ctx: *mut ff::AVFormatContext = ptr::null_mut();
                let ret = ff::avformat_open_input(
                    &mut ctx,
                    path_c.as_ptr(),
                    ptr::null(),
                    ptr::null_mut(),
                );
                if ret != 0 {
                    warn!(
                        "avformat_open_input() failed: {}",
                        ff_err_to_string(ret)
                    );
                    return Err(map_ff_err(ret));
                }

                let ret = ff::avformat_find_stream_info(ctx, ptr::null_mut());
                if ret < 0 {
                    warn!(
                        "avformat_find_stream_info() failed: {}",
                        ff_err_to_string(ret)
                    );
                    ff::avformat_close_input(&mut ctx);
                    return Err(map_ff_err(ret));
                }

                Ok(Box::new(FfmpegMediaInput {
                    ctx,
                    stream_index: None,
                }))
            }
        }

        fn input_formats(&self) -> Vec<InputFormatInfo> {
            let mut list = Vec::new();
            unsafe {
                let mut opaque: *mut libc::c_void = ptr::null_mut();
                loop {
                    let ifmt = ff::av_demuxer_iterate(&mut opaque as *mut _);
                    if ifmt.is_null() {
                        break;
                    }
                    if (*ifmt).name.is_null() {
                        continue;
                    }
                    let name = CStr::from_ptr((*ifmt).name).to_string_lossy().into_owned();
                    let seek_to_pts = ((*ifmt).flags & ff::AVFMT_SEEK_TO_PTS as i32) != 0;
                    list.push(InputFormatInfo { name, seek_to_pts });
                }
            }
            list
        }
    }

    pub struct FfmpegMediaInput {
        ctx: *mut ff::AVFormatContext,
        stream_index: Option<i32>,
    }

    // 实例不跨线程共享，语义上可 Send。
    unsafe impl Send for FfmpegMediaInput {}

    impl Drop for FfmpegMediaInput {
        fn drop(&mut self) {
            unsafe {
                if !self.ctx.is_null() {
                    ff::avformat_close_input(&mut self.ctx);
                }
            }
        }
    }

    impl FfmpegMediaInput {
        unsafe fn stream_ptr(&self, index: i32) -> *mut ff::AVStream {
            *(*self.ctx).streams.add(index as usize)
        }
    }

    fn map_codec_id(id: ff::AVCodecID) -> AudioCodecId {
        use ff::AVCodecID::*;
        match id {
            AV_CODEC_ID_MP3 => AudioCodecId::Mp3,
            AV_CODEC_ID_MP3ON4 => AudioCodecId::Mp3On4,
            AV_CODEC_ID_AAC => AudioCodecId::Aac,
            AV_CODEC_ID_AAC_LATM => AudioCodecId::AacLatm,
            _ => AudioCodecId::Other,
        }
    }

    impl MediaInput for FfmpegMediaInput {
        fn select_best_audio_stream(&mut self) -> CodecResult<StreamInfo> {
            unsafe {
                let mut decoder: *const ff::AVCodec = ptr::null();
                let ret = ff::av_find_best_stream(
                    self.ctx,
                    ff::AVMediaType::AVMEDIA_TYPE_AUDIO,
                    -1,
                    -1,
                    &mut decoder as *mut _,
                    0,
                );
                if ret < 0 {
                    return match ret {
                        ff::AVERROR_STREAM_NOT_FOUND => {
                            warn!("av_find_best_stream() failed to find an audio stream");
                            Err(CodecError::Unsupported("no audio stream"))
                        }
                        ff::AVERROR_DECODER_NOT_FOUND => {
                            warn!(
                                "av_find_best_stream() failed to find a decoder for any audio stream"
                            );
                            Err(CodecError::Unsupported("no decoder for audio stream"))
                        }
                        _ => {
                            warn!("av_find_best_stream() failed: {}", ff_err_to_string(ret));
                            Err(map_ff_err(ret))
                        }
                    };
                }

                let stream = self.stream_ptr(ret);
                let par = (*stream).codecpar;
                let av_format =
                    core::mem::transmute::<i32, ff::AVSampleFormat>((*par).format);

                let info = StreamInfo {
                    index: (*stream).index,
                    codec_id: map_codec_id((*par).codec_id),
                    time_base: tb_from_avr((*stream).time_base),
                    start_time: if (*stream).start_time == ff::AV_NOPTS_VALUE {
                        None
                    } else {
                        Some((*stream).start_time)
                    },
                    duration: if (*stream).duration == ff::AV_NOPTS_VALUE {
                        None
                    } else {
                        Some((*stream).duration)
                    },
                    sample_rate: (*par).sample_rate.max(0) as u32,
                    channel_layout: channel_layout_from_av(&(*par).ch_layout),
                    sample_format: map_av_sample_format(av_format)?,
                    bit_rate: (*par).bit_rate,
                    frame_size: (*par).frame_size,
                    seek_preroll: (*par).seek_preroll as i64,
                };

                self.stream_index = Some(info.index);
                Ok(info)
            }
        }

        fn new_stream_decoder(
            &mut self,
            config: &DecoderConfig,
        ) -> CodecResult<Box<dyn AudioDecoder>> {
            let Some(index) = self.stream_index else {
                return Err(CodecError::InvalidState("no audio stream selected"));
            };
            unsafe {
                let stream = self.stream_ptr(index);
                let par = (*stream).codecpar;

                let codec = ff::avcodec_find_decoder((*par).codec_id);
                if codec.is_null() {
                    return Err(CodecError::Unsupported("FFmpeg decoder not found"));
                }

                let mut cctx = ff::avcodec_alloc_context3(codec);
                if cctx.is_null() {
                    return Err(CodecError::Unsupported("avcodec_alloc_context3() failed"));
                }

                let ret = ff::avcodec_parameters_to_context(cctx, par);
                if ret != 0 {
                    warn!(
                        "avcodec_parameters_to_context() failed: {}",
                        ff_err_to_string(ret)
                    );
                    ff::avcodec_free_context(&mut cctx);
                    return Err(CodecError::InvalidData(
                        "avcodec_parameters_to_context() failed",
                    ));
                }

                // 解码输出的时间基对齐选中流
                (*cctx).pkt_timebase = (*stream).time_base;

                // 请求输出采样格式；解码器尽力满足，不满足时由上层转换
                let request_sample_fmt = match map_sample_format(config.request_sample_format) {
                    Ok(fmt) => fmt,
                    Err(e) => {
                        ff::avcodec_free_context(&mut cctx);
                        return Err(e);
                    }
                };
                (*cctx).request_sample_fmt = request_sample_fmt;

                if let Some(channels) = config.request_channel_count {
                    // advisory：只有部分解码器（如 AC-3）支持 downmix
                    debug!("requesting decoder downmix to {} channel(s)", channels);
                    ff::av_channel_layout_default(
                        &mut (*cctx).downmix_layout,
                        channels as i32,
                    );
                }

                let ret = ff::avcodec_open2(cctx, codec, ptr::null_mut());
                if ret != 0 {
                    warn!("avcodec_open2() failed: {}", ff_err_to_string(ret));
                    ff::avcodec_free_context(&mut cctx);
                    return Err(CodecError::Other(format!(
                        "avcodec_open2() failed: {}",
                        ff_err_to_string(ret)
                    )));
                }

                Ok(Box::new(FfmpegStreamDecoder {
                    ctx: cctx,
                    time_base: tb_from_avr((*stream).time_base),
                }))
            }
        }

        fn read_packet(&mut self) -> CodecResult<CodecPacket> {
            unsafe {
                let mut pkt = ff::av_packet_alloc();
                if pkt.is_null() {
                    return Err(CodecError::Other("av_packet_alloc() failed".into()));
                }

                let ret = ff::av_read_frame(self.ctx, pkt);
                if ret < 0 {
                    ff::av_packet_free(&mut pkt);
                    return Err(map_ff_err(ret));
                }

                let stream_index = (*pkt).stream_index;
                let data = if (*pkt).data.is_null() || (*pkt).size <= 0 {
                    Vec::new()
                } else {
                    core::slice::from_raw_parts((*pkt).data, (*pkt).size as usize).to_vec()
                };
                let time_base = tb_from_avr((*self.stream_ptr(stream_index)).time_base);

                let mut packet = CodecPacket::new(stream_index, data, time_base);
                if (*pkt).pts != ff::AV_NOPTS_VALUE {
                    packet.pts = Some((*pkt).pts);
                }
                if (*pkt).dts != ff::AV_NOPTS_VALUE {
                    packet.dts = Some((*pkt).dts);
                }
                if (*pkt).duration != 0 {
                    packet.duration = Some((*pkt).duration);
                }

                ff::av_packet_free(&mut pkt);
                Ok(packet)
            }
        }

        fn seek_backward(&mut self, pts: i64) -> CodecResult<()> {
            let Some(index) = self.stream_index else {
                return Err(CodecError::InvalidState("no audio stream selected"));
            };
            unsafe {
                let ret =
                    ff::av_seek_frame(self.ctx, index, pts, ff::AVSEEK_FLAG_BACKWARD as i32);
                if ret < 0 {
                    return Err(CodecError::Other(format!(
                        "av_seek_frame() failed: {}",
                        ff_err_to_string(ret)
                    )));
                }
                Ok(())
            }
        }
    }

    pub struct FfmpegStreamDecoder {
        ctx: *mut ff::AVCodecContext,
        time_base: Rational,
    }

    // 实例不跨线程共享，语义上可 Send。
    unsafe impl Send for FfmpegStreamDecoder {}

    impl Drop for FfmpegStreamDecoder {
        fn drop(&mut self) {
            unsafe {
                if !self.ctx.is_null() {
                    ff::avcodec_free_context(&mut self.ctx);
                }
            }
        }
    }

    impl AudioDecoder for FfmpegStreamDecoder {
        fn name(&self) -> &'static str {
            "ffmpeg"
        }

        fn send_packet(&mut self, packet: Option<CodecPacket>) -> CodecResult<()> {
            unsafe {
                let Some(packet) = packet else {
                    // drain
                    let ret = ff::avcodec_send_packet(self.ctx, ptr::null());
                    if ret < 0 {
                        return Err(map_ff_err(ret));
                    }
                    return Ok(());
                };

                let mut pkt = ff::av_packet_alloc();
                if pkt.is_null() {
                    return Err(CodecError::Other("av_packet_alloc() failed".into()));
                }

                let ret = ff::av_new_packet(pkt, packet.data.len() as i32);
                if ret < 0 {
                    ff::av_packet_free(&mut pkt);
                    return Err(map_ff_err(ret));
                }
                if !(*pkt).data.is_null() && !packet.data.is_empty() {
                    ptr::copy_nonoverlapping(
                        packet.data.as_ptr(),
                        (*pkt).data,
                        packet.data.len(),
                    );
                }

                (*pkt).stream_index = packet.stream_index;
                (*pkt).pts = packet.pts.unwrap_or(ff::AV_NOPTS_VALUE);
                (*pkt).dts = packet.dts.unwrap_or(ff::AV_NOPTS_VALUE);
                (*pkt).duration = packet.duration.unwrap_or(0);

                let ret = ff::avcodec_send_packet(self.ctx, pkt);
                ff::av_packet_free(&mut pkt);
                if ret < 0 {
                    // Again 时调用方保留包并在下一轮重发
                    return Err(map_ff_err(ret));
                }
                Ok(())
            }
        }

        fn receive_frame(&mut self) -> CodecResult<AudioFrame> {
            unsafe {
                let mut avf = ff::av_frame_alloc();
                if avf.is_null() {
                    return Err(CodecError::Other("av_frame_alloc() failed".into()));
                }

                let ret = ff::avcodec_receive_frame(self.ctx, avf);
                if ret < 0 {
                    ff::av_frame_free(&mut avf);
                    return Err(map_ff_err(ret));
                }

                let nb_samples = (*avf).nb_samples as usize;
                let channels = (*avf).ch_layout.nb_channels.max(0) as u16;
                let sample_rate = (*avf).sample_rate.max(0) as u32;

                let av_sf = core::mem::transmute::<i32, ff::AVSampleFormat>((*avf).format);
                let sf = match map_av_sample_format(av_sf) {
                    Ok(sf) => sf,
                    Err(e) => {
                        ff::av_frame_free(&mut avf);
                        return Err(e);
                    }
                };

                let format = AudioFormat {
                    sample_rate,
                    sample_format: sf,
                    channel_layout: channel_layout_from_av(&(*avf).ch_layout),
                };

                let bps = format.sample_format.bytes_per_sample();
                let mut planes: Vec<Vec<u8>> = Vec::new();
                if format.is_planar() {
                    planes.reserve(channels as usize);
                    let expected = nb_samples * bps;
                    for ch in 0..(channels as usize) {
                        let src_ptr = (*avf).data[ch] as *const u8;
                        if src_ptr.is_null() {
                            ff::av_frame_free(&mut avf);
                            return Err(CodecError::InvalidData("ffmpeg frame plane is null"));
                        }
                        // audio linesize 可能带对齐 padding，这里只取有效字节
                        let src = core::slice::from_raw_parts(src_ptr, expected);
                        planes.push(src.to_vec());
                    }
                } else {
                    let expected = nb_samples * (channels as usize) * bps;
                    let src_ptr = (*avf).data[0] as *const u8;
                    if src_ptr.is_null() {
                        ff::av_frame_free(&mut avf);
                        return Err(CodecError::InvalidData("ffmpeg frame data[0] is null"));
                    }
                    let src = core::slice::from_raw_parts(src_ptr, expected);
                    planes.push(src.to_vec());
                }

                let pts = if (*avf).pts == ff::AV_NOPTS_VALUE {
                    None
                } else {
                    Some((*avf).pts)
                };

                ff::av_frame_free(&mut avf);

                AudioFrame::from_planes(format, nb_samples, self.time_base, pts, planes)
                    .map_err(|_| CodecError::InvalidData("failed to build AudioFrame"))
            }
        }

        fn reset(&mut self) -> CodecResult<()> {
            unsafe {
                ff::avcodec_flush_buffers(self.ctx);
            }
            Ok(())
        }
    }
}

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::*;
