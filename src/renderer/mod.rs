// 渲染输出抽象（窗口/纹理等由外部实现）

pub mod log_renderer;

pub use log_renderer::{LogRenderer, PresentRecord, PresentStats};

use crate::core::{Result, SubtitleFrame, VideoFrame};

/// 视频呈现接口
pub trait VideoRenderer: Send {
    fn present_video(&mut self, frame: &VideoFrame) -> Result<()>;
}

/// 字幕事件分发接口（只负责时间与分发，不负责绘制）
pub trait SubtitleRenderer: Send {
    /// 分发一条字幕事件；`id` 在本次播放中唯一
    fn present_subtitle(&mut self, id: u64, frame: &SubtitleFrame) -> Result<()>;

    /// 字幕显示窗口结束
    fn expire_subtitle(&mut self, _id: u64) {}
}
