use crate::core::{MediaInfo, RawPacket, Result, StreamInfo, StreamKind};
use std::collections::HashMap;

/// Demuxer 数据源抽象接口
///
/// 这个 trait 定义了所有 Demuxer 实现必须提供的方法
/// 不同的媒体源（本地文件、网络流、合成测试源等）可以实现这个接口
pub trait DemuxerSource: Send {
    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（不在这一层重试）
    fn read_packet(&mut self) -> Result<Option<RawPacket>>;

    /// 获取媒体信息
    fn media_info(&self) -> &MediaInfo;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 流下标 -> 流类型 的查找表
///
/// 打开流时构建一次；每种类型只路由第一路流，其余流的包直接丢弃。
#[derive(Debug, Clone, Default)]
pub struct StreamRouter {
    routes: HashMap<usize, StreamKind>,
}

impl StreamRouter {
    pub fn from_streams(streams: &[StreamInfo]) -> Self {
        let mut routes = HashMap::new();
        let mut taken = [false; StreamKind::COUNT];

        for stream in streams {
            if taken[stream.kind.index()] || routes.contains_key(&stream.index) {
                continue;
            }
            taken[stream.kind.index()] = true;
            routes.insert(stream.index, stream.kind);
        }

        Self { routes }
    }

    /// 包属于哪种流；None 表示不相关的流
    pub fn classify(&self, stream_index: usize) -> Option<StreamKind> {
        self.routes.get(&stream_index).copied()
    }

    pub fn routes(&self, kind: StreamKind) -> bool {
        self.routes.values().any(|k| *k == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rational;

    #[test]
    fn test_router_maps_first_stream_of_each_kind() {
        let streams = vec![
            StreamInfo::audio(0, 48000, 2),
            StreamInfo::video(1, Rational::new(1, 90000), 25.0, 640, 360),
            StreamInfo::audio(2, 44100, 2),
            StreamInfo::subtitle(4, Rational::new(1, 1000)),
        ];
        let router = StreamRouter::from_streams(&streams);

        assert_eq!(router.classify(0), Some(StreamKind::Audio));
        assert_eq!(router.classify(1), Some(StreamKind::Video));
        assert_eq!(router.classify(2), None); // 第二路音频不路由
        assert_eq!(router.classify(3), None);
        assert_eq!(router.classify(4), Some(StreamKind::Subtitle));
        assert_eq!(router.classify(99), None);
        assert!(router.routes(StreamKind::Subtitle));
    }

    #[test]
    fn test_router_accepts_sparse_stream_indices() {
        let streams = vec![
            StreamInfo::video(usize::MAX, Rational::new(1, 90000), 25.0, 640, 360),
            StreamInfo::audio(usize::MAX / 2, 48000, 2),
        ];
        let router = StreamRouter::from_streams(&streams);

        assert_eq!(router.classify(usize::MAX), Some(StreamKind::Video));
        assert_eq!(router.classify(usize::MAX / 2), Some(StreamKind::Audio));
        assert_eq!(router.classify(0), None);
    }
}
