//! 网络后端模块
//!
//! 核心只通过窄接口（send/recv/schedule/time/notify）向后端下发工作。
//! 内置的分析型后端按每维度 带宽 + 链路延迟 估算 chunk 传输时间，
//! 并用会合匹配器配对两端的回调。

mod analytical;
mod api;
mod matcher;

pub use analytical::{AnalyticalBackend, LinkParams};
pub use api::{Handler, NetworkBackend};
pub use matcher::{CallbackEntry, CallbackTracker, ChunkIdGenerator, ChunkKey, FlowKey};
