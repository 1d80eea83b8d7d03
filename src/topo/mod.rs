//! 逻辑拓扑模块
//!
//! 描述 rank 在多个维度上的布局，并提供环/二叉树的邻居查询。
//! 拓扑是纯函数，不持有可变状态。

mod ring;
mod binary_tree;

pub use binary_tree::{BinaryTree, TreeNodeType};
pub use ring::{RingDirection, RingTopology};

use serde::{Deserialize, Serialize};

/// Rank 标识符：集群中的一个加速器节点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RankId(pub usize);

/// 维度类别：Local（片上）维度走快速内存总线。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Local,
    Remote,
}

/// 单个逻辑维度：大小 + 类别。
#[derive(Debug, Clone, Copy)]
pub struct LogicalDim {
    pub size: usize,
    pub kind: DimensionKind,
}

/// 多维逻辑布局：各维度大小的乘积等于 rank 总数。
/// rank 与坐标按行主序（低维变化最快）互相映射。
#[derive(Debug, Clone)]
pub struct LogicalDims {
    dims: Vec<LogicalDim>,
}

impl LogicalDims {
    pub fn new(dims: Vec<LogicalDim>) -> Self {
        assert!(!dims.is_empty(), "topology needs at least one dimension");
        assert!(
            dims.iter().all(|d| d.size >= 1),
            "dimension sizes must be >= 1"
        );
        Self { dims }
    }

    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, d: usize) -> LogicalDim {
        self.dims[d]
    }

    /// 集群中 rank 总数。
    pub fn num_ranks(&self) -> usize {
        self.dims.iter().map(|d| d.size).product()
    }

    /// rank → 各维度坐标（低维变化最快）。
    pub fn coords_of(&self, rank: RankId) -> Vec<usize> {
        let mut rest = rank.0;
        let mut coords = Vec::with_capacity(self.dims.len());
        for d in &self.dims {
            coords.push(rest % d.size);
            rest /= d.size;
        }
        coords
    }

    /// 各维度坐标 → rank。
    pub fn rank_of(&self, coords: &[usize]) -> RankId {
        let mut rank = 0usize;
        let mut stride = 1usize;
        for (c, d) in coords.iter().zip(&self.dims) {
            rank += c * stride;
            stride *= d.size;
        }
        RankId(rank)
    }

    /// 给定 rank 与维度，返回该维度的环成员（按环序），即固定其它坐标、
    /// 变化第 `dim` 维坐标得到的 rank 列表。
    pub fn ring_members(&self, rank: RankId, dim: usize) -> Vec<RankId> {
        let mut coords = self.coords_of(rank);
        (0..self.dims[dim].size)
            .map(|c| {
                coords[dim] = c;
                self.rank_of(&coords)
            })
            .collect()
    }

    /// 构建某 rank 在某维度上的环拓扑。
    pub fn ring(&self, rank: RankId, dim: usize) -> RingTopology {
        RingTopology::new(self.ring_members(rank, dim), self.dims[dim].kind)
    }

    /// 构建某 rank 在某维度上的二叉树拓扑。
    pub fn binary_tree(&self, rank: RankId, dim: usize) -> BinaryTree {
        BinaryTree::new(self.ring_members(rank, dim))
    }
}
