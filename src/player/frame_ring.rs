/// 调度器私有的解码帧环
///
/// 固定数量的槽位，按下标读写；一次解码产生的多个单元按顺序入环，
/// 之后每次唤醒取出一个呈现。
pub struct FrameRing<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, len: 0 }
    }

    /// 放入队尾；环已满时原样返回
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    pub fn peek(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// 清空，返回丢弃的数量
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        while self.pop().is_some() {}
        self.head = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
