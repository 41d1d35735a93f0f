//! Provider：扩展名白名单 + backend 一次性初始化屏障。
//!
//! 白名单是静态表：只有既编入 backend、又声明支持按 pts 精确寻址的
//! demuxer 才会贡献扩展名。其余 demuxer 一律排除并记录。

use crate::codec::demuxer::demuxer_interface::MediaBackend;
use crate::source::session::{AudioFileSource, OpenError, OpenParams};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 在宿主引擎的 provider 注册表里的优先级。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderPriority {
    /// 兜底：更专门的解码器都拒绝之后才轮到这里。
    Lowest,
    Lower,
    Default,
    Higher,
    Highest,
}

/// demuxer 短名 -> 扩展名的静态映射（经过验证的白名单）。
///
/// 逗号分隔的复合短名是 demuxer 自己的命名习惯，按原样匹配。
const DEMUXER_FILE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("aac", &["aac"]),
    ("aiff", &["aif", "aiff"]),
    ("mp3", &["mp3"]),
    ("mp4", &["mp4"]),
    ("m4v", &["m4v"]),
    ("mov,mp4,m4a,3gp,3g2,mj2", &["mov", "mp4", "m4a", "3gp", "3g2", "mj2"]),
    ("opus", &["opus"]),
    ("libopus", &["opus"]),
    ("wav", &["wav"]),
    ("wv", &["wv"]),
];

pub struct AudioFileSourceProvider {
    backend: Arc<dyn MediaBackend>,
}

impl AudioFileSourceProvider {
    /// 构造即触发 backend 的一次性全局初始化；
    /// 构造多少个 provider 实例都只初始化一次。
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        backend.init_once();
        Self { backend }
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn priority_hint(&self, _file_extension: &str) -> ProviderPriority {
        ProviderPriority::Lowest
    }

    /// 收集支持的扩展名。
    ///
    /// 条件：demuxer 编入 backend 且声明 seek_to_pts 能力，并且在
    /// 白名单表里。排除项记录在 info 日志里。
    pub fn supported_file_extensions(&self) -> Vec<&'static str> {
        let mut list: Vec<&'static str> = Vec::new();
        for format in self.backend.input_formats() {
            if !format.seek_to_pts {
                info!("disabling input format without pts seeking: {}", format.name);
                continue;
            }
            let Some((_, extensions)) = DEMUXER_FILE_EXTENSIONS
                .iter()
                .find(|(name, _)| *name == format.name)
            else {
                info!("disabling untested input format: {}", format.name);
                continue;
            };
            for &ext in *extensions {
                if !list.contains(&ext) {
                    list.push(ext);
                }
            }
        }
        list
    }

    /// 打开一个解码会话。
    pub fn open(
        &self,
        path: &Path,
        params: &OpenParams,
    ) -> Result<AudioFileSource, OpenError> {
        AudioFileSource::open(&*self.backend, path, params)
    }
}
