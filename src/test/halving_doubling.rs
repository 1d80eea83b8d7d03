use crate::collective::algorithm::Algorithm;
use crate::collective::HalvingDoubling;
use crate::test::harness::run_algorithms;
use crate::topo::{DimensionKind, RankId};

fn hd_cluster(n: usize, data_size: u64) -> Vec<Box<dyn Algorithm>> {
    let members: Vec<RankId> = (0..n).map(RankId).collect();
    (0..n)
        .map(|r| {
            Box::new(HalvingDoubling::new(
                RankId(r),
                members.clone(),
                data_size,
                DimensionKind::Remote,
            )) as Box<dyn Algorithm>
        })
        .collect()
}

#[test]
fn four_ranks_run_two_log_n_rounds() {
    let n = 4;
    let data_size = 4096;
    let counts = run_algorithms(hd_cluster(n, data_size));
    for (rank, c) in counts.iter().enumerate() {
        assert!(c.done, "rank={rank}");
        // log2(4) 轮 reduce-scatter + log2(4) 轮 all-gather
        assert_eq!(c.sends, vec![2048, 1024, 1024, 2048], "rank={rank}");
        assert_eq!(c.recv_deliveries, 4, "rank={rank}");
        assert_eq!(c.reduces, 2, "rank={rank} reduces once per RS round");
    }
}

#[test]
fn eight_ranks_halve_message_sizes_each_round() {
    let n = 8;
    let data_size = 8192;
    let counts = run_algorithms(hd_cluster(n, data_size));
    for c in &counts {
        assert!(c.done);
        assert_eq!(c.sends, vec![4096, 2048, 1024, 1024, 2048, 4096]);
        assert_eq!(c.reduces, 3);
    }
}

#[test]
fn two_ranks_exchange_half_the_payload_twice() {
    let counts = run_algorithms(hd_cluster(2, 1024));
    for c in &counts {
        assert!(c.done);
        assert_eq!(c.sends, vec![512, 512]);
    }
}

#[test]
#[should_panic(expected = "power-of-two")]
fn non_power_of_two_member_count_is_rejected() {
    let members: Vec<RankId> = (0..3).map(RankId).collect();
    let _ = HalvingDoubling::new(RankId(0), members, 1024, DimensionKind::Remote);
}
