//! Double-binary-tree All-Reduce.
//!
//! Role-dispatched state machine: leaves push their contribution up, each
//! intermediate reduces its children's data before forwarding to its parent,
//! the root reduces its single child's data and broadcasts back down. The
//! `reductions` counter gates the memory-bus completions an intermediate
//! must absorb before the parent send.

use crate::collective::algorithm::{AlgAction, AlgEvent, Algorithm};
use crate::mem::{PacketBundle, Transmission};
use crate::stream::{Stream, StreamState};
use crate::topo::{BinaryTree, RankId, TreeNodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeState {
    Begin,
    WaitingForTwoChildData,
    WaitingForOneChildData,
    SendingDataToParent,
    WaitingDataFromParent,
    SendingDataToChilds,
    End,
}

pub struct DoubleBinaryTreeAllReduce {
    id: RankId,
    parent: Option<RankId>,
    left_child: Option<RankId>,
    right_child: Option<RankId>,
    node_type: TreeNodeType,
    state: TreeState,
    reductions: usize,
    data_size: u64,
}

impl DoubleBinaryTreeAllReduce {
    pub fn new(id: RankId, tree: &BinaryTree, data_size: u64) -> Self {
        Self {
            id,
            parent: tree.parent_id(id),
            left_child: tree.left_child_id(id),
            right_child: tree.right_child_id(id),
            node_type: tree.node_type(id),
            state: TreeState::Begin,
            reductions: 0,
            data_size,
        }
    }

    fn present_children(&self) -> Vec<RankId> {
        [self.left_child, self.right_child]
            .into_iter()
            .flatten()
            .collect()
    }

    fn membus(&self, processed: bool, send_back: bool, to_npu: bool) -> AlgAction {
        AlgAction::MemBus {
            bundle: PacketBundle {
                size: self.data_size,
                transmission: Transmission::Usual,
                processed,
                send_back,
            },
            to_npu,
        }
    }

    fn send(&self, stream: &Stream, dst: RankId) -> AlgAction {
        AlgAction::Send {
            dst,
            size: self.data_size,
            tag: stream.stream_id,
            notify: None,
        }
    }

    fn recv(&self, stream: &Stream, src: RankId) -> AlgAction {
        AlgAction::Recv {
            src,
            size: self.data_size,
            tag: stream.stream_id,
            arg: 0,
        }
    }
}

impl Algorithm for DoubleBinaryTreeAllReduce {
    fn run(&mut self, event: AlgEvent, stream: &mut Stream, out: &mut Vec<AlgAction>) {
        use TreeNodeType::{Intermediate, Leaf, Root};
        use TreeState::*;

        if matches!(stream.state, StreamState::Created | StreamState::Ready) {
            stream.change_state(StreamState::Executing);
        }

        let is_received = matches!(event, AlgEvent::PacketReceived { .. });
        let is_general = matches!(event, AlgEvent::General { .. });
        let expected_children = self.present_children().len();

        if self.state == Begin && self.node_type == Leaf {
            out.push(self.membus(false, false, false));
            self.state = SendingDataToParent;
        } else if self.state == SendingDataToParent && self.node_type == Leaf {
            let parent = self.parent.expect("leaf has a parent");
            out.push(self.send(stream, parent));
            out.push(self.recv(stream, parent));
            self.state = WaitingDataFromParent;
        } else if self.state == WaitingDataFromParent && self.node_type == Leaf {
            out.push(self.membus(false, false, true));
            self.state = End;
        } else if self.state == End && self.node_type == Leaf {
            stream.change_state(StreamState::Zombie);
            out.push(AlgAction::Exit);
        } else if self.state == Begin && self.node_type == Intermediate {
            for child in self.present_children() {
                out.push(self.recv(stream, child));
            }
            self.state = if expected_children == 2 {
                WaitingForTwoChildData
            } else {
                WaitingForOneChildData
            };
        } else if self.state == WaitingForTwoChildData
            && self.node_type == Intermediate
            && is_received
        {
            out.push(self.membus(true, false, true));
            self.state = WaitingForOneChildData;
        } else if self.state == WaitingForOneChildData
            && self.node_type == Intermediate
            && is_received
        {
            out.push(self.membus(true, true, true));
            self.state = SendingDataToParent;
        } else if self.reductions + 1 < expected_children
            && self.node_type == Intermediate
            && is_general
        {
            // 第一次子数据归约完成：记一笔，等第二次。
            self.reductions += 1;
        } else if self.state == SendingDataToParent && self.node_type == Intermediate {
            let parent = self.parent.expect("intermediate has a parent");
            out.push(self.send(stream, parent));
            out.push(self.recv(stream, parent));
            self.state = WaitingDataFromParent;
        } else if self.state == WaitingDataFromParent
            && self.node_type == Intermediate
            && is_received
        {
            out.push(self.membus(true, true, true));
            self.state = SendingDataToChilds;
        } else if self.state == SendingDataToChilds && self.node_type == Intermediate {
            for child in self.present_children() {
                out.push(self.send(stream, child));
            }
            stream.change_state(StreamState::Zombie);
            out.push(AlgAction::Exit);
        } else if self.state == Begin && self.node_type == Root {
            let only_child = self
                .left_child
                .or(self.right_child)
                .expect("root has one child");
            out.push(self.recv(stream, only_child));
            self.state = WaitingForOneChildData;
        } else if self.state == WaitingForOneChildData && self.node_type == Root {
            out.push(self.membus(true, true, true));
            self.state = SendingDataToChilds;
        } else if self.state == SendingDataToChilds && self.node_type == Root {
            let only_child = self
                .left_child
                .or(self.right_child)
                .expect("root has one child");
            out.push(self.send(stream, only_child));
            stream.change_state(StreamState::Zombie);
            out.push(AlgAction::Exit);
        }
    }
}
