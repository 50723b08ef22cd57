use crate::core::{CodedPacket, PlayerError, Result, StreamKind};
use crate::player::demuxer_source::{DemuxerSource, StreamRouter};
use crate::player::packet_queue::StreamQueues;
use crate::player::log_ctx;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::thread::{self, JoinHandle};

/// Demuxer 线程命令
pub enum DemuxerCommand {
    Stop,
}

/// Demuxer 线程统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DemuxSummary {
    pub total_packets: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub subtitle_packets: u64,
    /// 不属于任何已打开流的包
    pub discarded_packets: u64,
    /// 入队失败被丢弃的包（包括已结束流的包）
    pub dropped_packets: u64,
    /// 因 Stop 命令或所有队列关闭而提前退出
    pub stopped_early: bool,
}

impl DemuxSummary {
    fn count(&mut self, kind: StreamKind) -> u64 {
        let counter = match kind {
            StreamKind::Video => &mut self.video_packets,
            StreamKind::Audio => &mut self.audio_packets,
            StreamKind::Subtitle => &mut self.subtitle_packets,
        };
        *counter += 1;
        *counter
    }
}

/// Demuxer 线程的最终结果
#[derive(Debug)]
pub struct DemuxExit {
    pub summary: DemuxSummary,
    /// 读包失败时的错误（到达 EOF 或被停止时为 Ok）
    pub result: Result<()>,
}

/// Demuxer 线程管理器
/// - 单线程顺序读取数据源，按流类型把包放入对应的 StreamQueue
/// - 某路流提前结束（队列关闭）时只丢弃该流的包，其余流照常
/// - 到达 EOF、读包失败、收到 Stop 或所有队列都已关闭时关闭所有队列并退出
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<DemuxExit>>,
    command_tx: Sender<DemuxerCommand>,
    queues: StreamQueues,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start(mut source: Box<dyn DemuxerSource>, queues: StreamQueues) -> Result<Self> {
        // 命令通道（unbounded 足够）
        let (command_tx, command_rx) = unbounded::<DemuxerCommand>();

        let router = StreamRouter::from_streams(&source.media_info().streams);
        let thread_queues = queues.clone();

        let thread_handle = thread::Builder::new()
            .name("avpipe-demux".to_string())
            .spawn(move || Self::demux_loop(&mut *source, &router, &thread_queues, &command_rx))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
            queues,
        })
    }

    /// Demuxer 循环（在独立线程中运行）
    ///
    /// 关键点：
    /// - put() 从不阻塞，生产者可以自由领先于消费者
    /// - 处理命令使用 try_recv()（非阻塞），以保证尽快响应 Stop
    /// - 退出前恰好关闭一次所有队列，阻塞在 get 上的调度器随之醒来
    fn demux_loop(
        source: &mut dyn DemuxerSource,
        router: &StreamRouter,
        queues: &StreamQueues,
        command_rx: &Receiver<DemuxerCommand>,
    ) -> DemuxExit {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), source.description());

        let mut summary = DemuxSummary::default();
        let mut result = Ok(());

        // 阈值（仅用于日志）
        const LOG_FIRST_N: u64 = 5;

        loop {
            match command_rx.try_recv() {
                Ok(DemuxerCommand::Stop) => {
                    info!("{} ⏹ Demuxer 线程收到停止命令", log_ctx());
                    summary.stopped_early = true;
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            match source.read_packet() {
                Ok(Some(raw)) => {
                    summary.total_packets += 1;

                    let Some(kind) = router.classify(raw.stream_index) else {
                        summary.discarded_packets += 1;
                        continue;
                    };
                    let Some(queue) = queues.get(kind) else {
                        summary.discarded_packets += 1;
                        continue;
                    };

                    let n = summary.count(kind);
                    if n <= LOG_FIRST_N || n % 100 == 0 {
                        info!(
                            "{} 📦 Demuxer 读取 {} 包 #{}（total packets {}）",
                            log_ctx(),
                            kind,
                            n,
                            summary.total_packets
                        );
                    }

                    if let Err(e) = queue.put(CodedPacket::from_raw(kind, raw)) {
                        summary.dropped_packets += 1;
                        match e {
                            PlayerError::QueueClosed(_) => {
                                if queues.all_closed() {
                                    info!("{} ⏹ 所有包队列都已关闭，Demuxer 停止读取", log_ctx());
                                    summary.stopped_early = true;
                                    break;
                                }
                                debug!("{} {}，丢弃 {} 包", log_ctx(), e, kind);
                            }
                            _ => warn!("{} ⚠ 丢弃 {} 包: {}", log_ctx(), kind, e),
                        }
                    }
                }
                Ok(None) => {
                    info!("{} 📄 Demuxer 到达文件末尾", log_ctx());
                    break;
                }
                Err(e) => {
                    error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                    result = Err(e);
                    break;
                }
            }
        }

        queues.close_all();

        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频，{} 字幕，{} 丢弃）",
            log_ctx(),
            summary.total_packets,
            summary.video_packets,
            summary.audio_packets,
            summary.subtitle_packets,
            summary.discarded_packets + summary.dropped_packets
        );

        DemuxExit { summary, result }
    }

    /// 请求停止（不等待线程结束）
    /// - 发送 Stop 命令
    /// - 关闭所有队列，让阻塞的消费者立即返回
    pub fn stop(&self) {
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        let _ = self.command_tx.send(DemuxerCommand::Stop);
        self.queues.close_all();
    }

    /// 等待线程结束，返回其最终结果（只能取一次）
    pub fn join(&mut self) -> Option<DemuxExit> {
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("{} ❌ Demuxer 线程 panic", log_ctx());
                Some(DemuxExit {
                    summary: DemuxSummary::default(),
                    result: Err(PlayerError::DemuxError("demuxer thread panicked".to_string())),
                })
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 join()，正在尝试优雅停止", log_ctx());
            self.stop();
            let _ = self.join();
        }
    }
}
