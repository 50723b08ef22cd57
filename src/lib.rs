// avpipe - 多路流同步播放引擎
//
// 解封装 -> 每路流的包队列 -> 解码/呈现调度器 -> 流时钟 -> 主时钟仲裁

pub mod core;
pub mod player;
pub mod renderer;
