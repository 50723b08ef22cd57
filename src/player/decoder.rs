use crate::core::{CodedPacket, DecodedUnit, Result, StreamKind};

/// 解码器抽象接口
///
/// 一个包可能产生 0 个或多个解码单元；返回空 Vec 表示“暂时没有输出”。
pub trait Decoder: Send {
    /// 解码数据包
    fn decode(&mut self, packet: &CodedPacket) -> Result<Vec<DecodedUnit>>;

    /// 刷新解码器（获取缓冲的帧），在流结束时调用
    fn flush(&mut self) -> Result<Vec<DecodedUnit>> {
        Ok(Vec::new())
    }

    /// 获取解码器信息
    fn info(&self) -> String;
}

/// 按流类型查表的解码器集合
#[derive(Default)]
pub struct DecoderSet {
    decoders: [Option<Box<dyn Decoder>>; StreamKind::COUNT],
}

impl DecoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: StreamKind, decoder: Box<dyn Decoder>) {
        self.decoders[kind.index()] = Some(decoder);
    }

    pub fn with(mut self, kind: StreamKind, decoder: Box<dyn Decoder>) -> Self {
        self.insert(kind, decoder);
        self
    }

    pub fn take(&mut self, kind: StreamKind) -> Option<Box<dyn Decoder>> {
        self.decoders[kind.index()].take()
    }

    pub fn contains(&self, kind: StreamKind) -> bool {
        self.decoders[kind.index()].is_some()
    }
}
