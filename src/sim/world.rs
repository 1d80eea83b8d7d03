//! 世界 trait
//!
//! 定义仿真世界接口。由业务层实现（例如集群状态/统计等），
//! 事件通过 `as_any_mut` 向下转型访问具体世界。

use super::simulator::Simulator;
use std::any::Any;

/// 仿真世界：事件执行时的可变共享状态。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn on_tick(&mut self, _sim: &mut Simulator) {}
}
