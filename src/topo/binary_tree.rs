//! 二叉树维度拓扑
//!
//! 根节点只有一个孩子；其余节点按堆式布局展开。用于树形 All-Reduce。

use super::RankId;

/// 树中节点的角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNodeType {
    Leaf,
    Intermediate,
    Root,
}

/// 一个维度成员上的二叉树。
///
/// 布局：index 0 为根，唯一的孩子是 index 1；index i (i >= 1) 的孩子是
/// 2i 和 2i+1（越界则缺席）。成员数为奇数时恰有一个中间节点只有一个孩子。
#[derive(Debug, Clone)]
pub struct BinaryTree {
    members: Vec<RankId>,
}

impl BinaryTree {
    pub fn new(members: Vec<RankId>) -> Self {
        assert!(!members.is_empty(), "tree must have at least one member");
        Self { members }
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    fn index_of(&self, rank: RankId) -> usize {
        self.members
            .iter()
            .position(|m| *m == rank)
            .unwrap_or_else(|| panic!("rank {:?} is not a member of this tree", rank))
    }

    fn member_at(&self, idx: usize) -> Option<RankId> {
        self.members.get(idx).copied()
    }

    pub fn parent_id(&self, rank: RankId) -> Option<RankId> {
        match self.index_of(rank) {
            0 => None,
            1 => self.member_at(0),
            i => self.member_at(i / 2),
        }
    }

    pub fn left_child_id(&self, rank: RankId) -> Option<RankId> {
        match self.index_of(rank) {
            0 => self.member_at(1),
            i => self.member_at(2 * i),
        }
    }

    pub fn right_child_id(&self, rank: RankId) -> Option<RankId> {
        match self.index_of(rank) {
            0 => None,
            i => self.member_at(2 * i + 1),
        }
    }

    pub fn node_type(&self, rank: RankId) -> TreeNodeType {
        if self.index_of(rank) == 0 {
            return TreeNodeType::Root;
        }
        if self.left_child_id(rank).is_none() && self.right_child_id(rank).is_none() {
            return TreeNodeType::Leaf;
        }
        TreeNodeType::Intermediate
    }
}
