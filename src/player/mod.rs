// 播放器核心模块

pub mod packet_queue;
pub mod demuxer_source;
pub mod demuxer_thread;
pub mod decoder;
pub mod frame_ring;
pub mod master_clock;
pub mod controller;
pub mod scheduler;
pub mod audio_output;
pub mod manager;
pub mod synthetic;

#[cfg(test)]
pub(crate) mod testing;

pub use packet_queue::{Dequeue, StreamQueue, StreamQueues};
pub use demuxer_source::{DemuxerSource, StreamRouter};
pub use demuxer_thread::{DemuxSummary, DemuxerThread};
pub use decoder::{Decoder, DecoderSet};
pub use master_clock::{ClockSource, MasterClock, MasterTime};
pub use controller::{PlaybackController, UserEvent};
pub use scheduler::{AudioScheduler, StreamEnd, StreamOutcome, TimedScheduler, Wake};
pub use audio_output::{AudioDevice, AudioOutput, AudioSink, AudioSpec, PcmSink};
pub use manager::{PlaybackBuilder, PlaybackManager, PlaybackReport};
pub use synthetic::{synthetic_decoders, SyntheticOptions, SyntheticSource};

use std::process;
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}
