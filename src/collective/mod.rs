//! Collective communication algorithms.
//!
//! Each algorithm is a state machine bound to a single stream: given a data
//! size, a topology slice and an injection policy it drives the stream to
//! completion by emitting chunks and reacting to {StreamInit, General,
//! PacketReceived} events.

pub mod algorithm;
mod binary_tree;
mod halving_doubling;
mod ring;
mod trace_driven;

pub use algorithm::{AlgAction, AlgEvent, Algorithm, CollectiveDescriptor, CollectivePhase};
pub use binary_tree::DoubleBinaryTreeAllReduce;
pub use halving_doubling::HalvingDoubling;
pub use ring::Ring;
pub use trace_driven::TraceDrivenCollective;

use serde::{Deserialize, Serialize};

/// Collective communication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComType {
    ReduceScatter,
    AllGather,
    AllReduce,
    AllToAll,
}

/// Which algorithm implements a collective on a given dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Ring,
    AllToAll,
    DoubleBinaryTree,
    HalvingDoubling,
    TraceDriven,
}
