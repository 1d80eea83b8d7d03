//! 系统层
//!
//! 每个 rank 一套工作负载引擎 / 调度器 / stream 集合，共享全局事件队列与
//! 网络后端。集合通信在这里被展开成阶段化的 stream 并下发给算法。

pub mod dataset;
pub mod events;
mod sys;

pub use dataset::DataSet;
pub use sys::{ClusterWorld, NodeSys, RankReport};
