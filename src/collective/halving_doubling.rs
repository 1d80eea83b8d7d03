//! Recursive halving-doubling All-Reduce.
//!
//! log2(n) reduce-scatter rounds with halving message sizes and doubling
//! partner distances, then the mirror-image all-gather rounds. Requires a
//! power-of-two member count.

use crate::collective::algorithm::{AlgAction, AlgEvent, Algorithm};
use crate::mem::{PacketBundle, Transmission};
use crate::stream::{Stream, StreamState};
use crate::topo::{DimensionKind, RankId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HdPhase {
    ReduceScatter,
    AllGather,
}

pub struct HalvingDoubling {
    my_index: usize,
    members: Vec<RankId>,
    rounds: usize,
    round: usize,
    phase: HdPhase,
    data_size: u64,
    transmission: Transmission,
}

impl HalvingDoubling {
    pub fn new(id: RankId, members: Vec<RankId>, data_size: u64, dim_kind: DimensionKind) -> Self {
        assert!(
            members.len().is_power_of_two(),
            "halving-doubling needs a power-of-two member count"
        );
        let my_index = members
            .iter()
            .position(|m| *m == id)
            .expect("owner is a member of its own dimension");
        let rounds = members.len().trailing_zeros() as usize;
        Self {
            my_index,
            members,
            rounds,
            round: 0,
            phase: HdPhase::ReduceScatter,
            data_size,
            transmission: if dim_kind == DimensionKind::Local {
                Transmission::Fast
            } else {
                Transmission::Usual
            },
        }
    }

    fn partner(&self) -> RankId {
        let distance = match self.phase {
            HdPhase::ReduceScatter => 1usize << self.round,
            HdPhase::AllGather => 1usize << (self.rounds - 1 - self.round),
        };
        self.members[self.my_index ^ distance]
    }

    fn msg_size(&self) -> u64 {
        match self.phase {
            HdPhase::ReduceScatter => self.data_size >> (self.round + 1),
            HdPhase::AllGather => self.data_size >> (self.rounds - self.round),
        }
    }

    fn exchange(&self, stream: &Stream, out: &mut Vec<AlgAction>) {
        let partner = self.partner();
        let size = self.msg_size().max(1);
        out.push(AlgAction::Send {
            dst: partner,
            size,
            tag: stream.stream_id,
            notify: None,
        });
        out.push(AlgAction::Recv {
            src: partner,
            size,
            tag: stream.stream_id,
            arg: 0,
        });
    }
}

impl Algorithm for HalvingDoubling {
    fn run(&mut self, event: AlgEvent, stream: &mut Stream, out: &mut Vec<AlgAction>) {
        match event {
            AlgEvent::StreamInit => {
                stream.change_state(StreamState::Executing);
                if self.rounds == 0 {
                    stream.change_state(StreamState::Zombie);
                    out.push(AlgAction::Exit);
                    return;
                }
                self.exchange(stream, out);
            }
            AlgEvent::PacketReceived { .. } => {
                out.push(AlgAction::MemBus {
                    bundle: PacketBundle {
                        size: self.msg_size().max(1),
                        transmission: self.transmission,
                        processed: self.phase == HdPhase::ReduceScatter,
                        send_back: false,
                    },
                    to_npu: true,
                });
            }
            AlgEvent::General { .. } => {
                self.round += 1;
                if self.round == self.rounds {
                    match self.phase {
                        HdPhase::ReduceScatter => {
                            self.phase = HdPhase::AllGather;
                            self.round = 0;
                        }
                        HdPhase::AllGather => {
                            stream.change_state(StreamState::Zombie);
                            out.push(AlgAction::Exit);
                            return;
                        }
                    }
                }
                self.exchange(stream, out);
            }
            AlgEvent::PacketSent { .. } => {}
        }
    }
}
