use crate::core::{CodedPacket, PlayerError, Result, StreamKind};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 出队结果
#[derive(Debug, PartialEq)]
pub enum Dequeue {
    Packet(CodedPacket),
    /// 暂时没有数据（非阻塞或等待超时）
    Empty,
    /// 队列已关闭且已取空
    Closed,
}

/// 单路流的线程安全包队列（FIFO）
///
/// - `put` 从不阻塞，只在内存分配失败或队列关闭后失败
/// - `get_timeout` / `get_blocking` 在条件变量上等待，醒来后重新检查
/// - `close` 唤醒所有等待者；关闭前入队的包仍会被取出
pub struct StreamQueue {
    kind: StreamKind,
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
}

struct QueueInner {
    packets: VecDeque<CodedPacket>,
    count: usize,
    bytes: usize,
    closed: bool,
}

impl StreamQueue {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                count: 0,
                bytes: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 入队（追加到队尾并唤醒一个等待者）
    pub fn put(&self, packet: CodedPacket) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PlayerError::QueueClosed(self.kind));
        }
        if inner.packets.try_reserve(1).is_err() {
            return Err(PlayerError::QueueAlloc(self.kind));
        }

        inner.count += 1;
        inner.bytes += packet.size();
        inner.packets.push_back(packet);
        drop(inner);

        self.not_empty.notify_one();
        Ok(())
    }

    /// 非阻塞出队
    pub fn try_get(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        Self::pop_locked(&mut inner)
    }

    /// 带超时的阻塞出队
    pub fn get_timeout(&self, timeout: Duration) -> Dequeue {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            match Self::pop_locked(&mut inner) {
                Dequeue::Empty => {}
                done => return done,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Dequeue::Empty;
            }
            // 醒来后回到循环顶部重新检查（防止虚假唤醒）
            self.not_empty.wait_for(&mut inner, remaining);
        }
    }

    /// 阻塞出队，直到有数据或队列关闭
    pub fn get_blocking(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        loop {
            match Self::pop_locked(&mut inner) {
                Dequeue::Empty => self.not_empty.wait(&mut inner),
                done => return done,
            }
        }
    }

    /// 关闭队列并唤醒所有等待者（可重复调用）
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            debug!("🔒 {} 包队列关闭，剩余 {} 个包", self.kind, inner.count);
        }
        drop(inner);
        self.not_empty.notify_all();
    }

    /// 丢弃所有未消费的包，返回丢弃数量
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.count;
        inner.packets.clear();
        inner.count = 0;
        inner.bytes = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.inner.lock().bytes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn pop_locked(inner: &mut QueueInner) -> Dequeue {
        match inner.packets.pop_front() {
            Some(packet) => {
                inner.count -= 1;
                inner.bytes -= packet.size();
                Dequeue::Packet(packet)
            }
            None if inner.closed => Dequeue::Closed,
            None => Dequeue::Empty,
        }
    }
}

/// 按流类型查表的队列集合（每种类型最多一个）
#[derive(Clone, Default)]
pub struct StreamQueues {
    queues: [Option<Arc<StreamQueue>>; StreamKind::COUNT],
}

impl StreamQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某种流类型创建队列（已存在则返回已有的）
    pub fn open(&mut self, kind: StreamKind) -> Arc<StreamQueue> {
        self.queues[kind.index()]
            .get_or_insert_with(|| Arc::new(StreamQueue::new(kind)))
            .clone()
    }

    pub fn get(&self, kind: StreamKind) -> Option<&Arc<StreamQueue>> {
        self.queues[kind.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<StreamQueue>> {
        self.queues.iter().flatten()
    }

    pub fn close_all(&self) {
        for queue in self.iter() {
            queue.close();
        }
    }

    /// 所有队列都已关闭（没有队列时也为 true）
    pub fn all_closed(&self) -> bool {
        self.iter().all(|q| q.is_closed())
    }

    /// 所有队列中剩余的包总数
    pub fn pending(&self) -> usize {
        self.iter().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rational;
    use std::thread;

    fn packet(id: u32) -> CodedPacket {
        CodedPacket {
            kind: StreamKind::Video,
            stream_index: 0,
            pts: Some(id as i64),
            time_base: Rational::new(1, 1000),
            data: id.to_le_bytes().to_vec(),
        }
    }

    fn id_of(packet: &CodedPacket) -> u32 {
        u32::from_le_bytes([packet.data[0], packet.data[1], packet.data[2], packet.data[3]])
    }

    #[test]
    fn test_fifo_order_and_counters() {
        let queue = StreamQueue::new(StreamKind::Video);
        for id in 0..5 {
            queue.put(packet(id)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.byte_size(), 20);

        for expected in 0..5 {
            match queue.try_get() {
                Dequeue::Packet(p) => assert_eq!(id_of(&p), expected),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.byte_size(), 0);
        assert_eq!(queue.try_get(), Dequeue::Empty);
    }

    #[test]
    fn test_get_timeout_returns_empty() {
        let queue = StreamQueue::new(StreamKind::Audio);
        let started = Instant::now();
        assert_eq!(queue.get_timeout(Duration::from_millis(20)), Dequeue::Empty);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_get_timeout_wakes_on_put() {
        let queue = Arc::new(StreamQueue::new(StreamKind::Video));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.put(packet(7)).unwrap();
            })
        };
        match queue.get_timeout(Duration::from_secs(2)) {
            Dequeue::Packet(p) => assert_eq!(id_of(&p), 7),
            other => panic!("unexpected {:?}", other),
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_close_drains_before_reporting_closed() {
        let queue = StreamQueue::new(StreamKind::Subtitle);
        queue.put(packet(1)).unwrap();
        queue.close();

        assert!(matches!(queue.try_get(), Dequeue::Packet(_)));
        assert_eq!(queue.try_get(), Dequeue::Closed);
        assert_eq!(queue.get_blocking(), Dequeue::Closed);
    }

    #[test]
    fn test_put_after_close_is_rejected() {
        let queue = StreamQueue::new(StreamKind::Video);
        queue.close();
        let err = queue.put(packet(1)).unwrap_err();
        assert!(matches!(err, PlayerError::QueueClosed(StreamKind::Video)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_close_wakes_all_blocked_getters() {
        let queue = Arc::new(StreamQueue::new(StreamKind::Video));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.get_blocking())
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        let closed_at = Instant::now();
        queue.close();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Dequeue::Closed);
        }
        assert!(closed_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_no_loss_no_duplication() {
        const PRODUCERS: u32 = 4;
        const CONSUMERS: usize = 3;
        const PER_PRODUCER: u32 = 500;

        let queue = Arc::new(StreamQueue::new(StreamKind::Video));

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match queue.get_timeout(Duration::from_millis(50)) {
                            Dequeue::Packet(p) => seen.push(id_of(&p)),
                            Dequeue::Empty => continue,
                            Dequeue::Closed => break,
                        }
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.put(packet(p * PER_PRODUCER + i)).unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<u32> = (0..PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(all, expected);
        assert_eq!(queue.byte_size(), 0);
    }

    #[test]
    fn test_clear_resets_counters() {
        let queue = StreamQueue::new(StreamKind::Audio);
        queue.put(packet(1)).unwrap();
        queue.put(packet(2)).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.byte_size(), 0);
    }

    #[test]
    fn test_stream_queues_lookup_by_kind() {
        let mut queues = StreamQueues::new();
        let video = queues.open(StreamKind::Video);
        let again = queues.open(StreamKind::Video);
        assert!(Arc::ptr_eq(&video, &again));
        assert!(queues.get(StreamKind::Audio).is_none());

        video.put(packet(1)).unwrap();
        assert_eq!(queues.pending(), 1);
        let audio = queues.open(StreamKind::Audio);
        video.close();
        assert!(!queues.all_closed());
        audio.close();
        assert!(queues.all_closed());
        assert_eq!(queues.pending(), 1);
    }
}
