//! 环形维度拓扑
//!
//! 以模运算提供 (rank, 方向) 的上/下游邻居查询。

use super::{DimensionKind, RankId};

/// 环上的传输方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingDirection {
    Clockwise,
    Anticlockwise,
}

/// 单个维度上的环：成员按环序排列。
#[derive(Debug, Clone)]
pub struct RingTopology {
    members: Vec<RankId>,
    kind: DimensionKind,
}

impl RingTopology {
    pub fn new(members: Vec<RankId>, kind: DimensionKind) -> Self {
        assert!(!members.is_empty(), "ring must have at least one member");
        Self { members, kind }
    }

    pub fn nodes_in_ring(&self) -> usize {
        self.members.len()
    }

    pub fn dimension_kind(&self) -> DimensionKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.kind == DimensionKind::Local
    }

    fn index_of(&self, rank: RankId) -> usize {
        self.members
            .iter()
            .position(|m| *m == rank)
            .unwrap_or_else(|| panic!("rank {:?} is not a member of this ring", rank))
    }

    /// 数据流向 `dir` 时，`rank` 把消息发给谁。
    pub fn get_receiver(&self, rank: RankId, dir: RingDirection) -> RankId {
        let n = self.members.len();
        let idx = self.index_of(rank);
        let next = match dir {
            RingDirection::Clockwise => (idx + 1) % n,
            RingDirection::Anticlockwise => (idx + n - 1) % n,
        };
        self.members[next]
    }

    /// 数据流向 `dir` 时，`rank` 从谁那里收到消息。
    pub fn get_sender(&self, rank: RankId, dir: RingDirection) -> RankId {
        let n = self.members.len();
        let idx = self.index_of(rank);
        let prev = match dir {
            RingDirection::Clockwise => (idx + n - 1) % n,
            RingDirection::Anticlockwise => (idx + 1) % n,
        };
        self.members[prev]
    }
}
