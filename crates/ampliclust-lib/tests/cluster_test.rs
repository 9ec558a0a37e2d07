use ampliclust_lib::config::{FastidiousCheckMode, FilterMode};
use ampliclust_lib::{cluster, AmpliconPools, ClusterConfig, InputRecord, Otu};

fn records(data: &[(&str, &str, u64)]) -> Vec<InputRecord> {
    data.iter()
        .map(|&(id, seq, ab)| InputRecord::new(id, seq.as_bytes().to_vec(), ab))
        .collect()
}

fn run(data: &[(&str, &str, u64)], cfg: &ClusterConfig) -> (AmpliconPools, Vec<Otu>) {
    let pools = AmpliconPools::build(records(data), cfg.threshold).unwrap();
    let otus = cluster(&pools, cfg).unwrap();
    (pools, otus)
}

/// Member identifiers in growth order, following pool context switches.
fn member_ids(pools: &AmpliconPools, otu: &Otu) -> Vec<String> {
    let mut ac = pools.get(otu.pool_id);
    let mut out = Vec::new();
    for member in &otu.members {
        if member.gen == 0 {
            ac = pools.get(member.parent_id);
        }
        out.push(String::from_utf8_lossy(ac.id(member.id)).into_owned());
    }
    out
}

fn fingerprint(pools: &AmpliconPools, otus: &[Otu]) -> Vec<(Vec<String>, u64, bool)> {
    otus.iter()
        .map(|o| (member_ids(pools, o), o.mass, o.attached))
        .collect()
}

#[test]
fn scenario_dereplication() {
    let cfg = ClusterConfig {
        threshold: 0,
        dereplicate: true,
        ..ClusterConfig::default()
    };
    let (pools, otus) = run(
        &[("a1", "ACGT", 5), ("a2", "ACGT", 3), ("a3", "ACGA", 2)],
        &cfg,
    );

    assert_eq!(otus.len(), 2);
    // dereplication output is ordered by mass
    assert_eq!(member_ids(&pools, &otus[0]), vec!["a1", "a2"]);
    assert_eq!(otus[0].mass, 8);
    assert_eq!(member_ids(&pools, &otus[1]), vec!["a3"]);
    assert_eq!(otus[1].mass, 2);
}

#[test]
fn scenario_one_step_chain() {
    let cfg = ClusterConfig::default();
    let (pools, otus) = run(
        &[("s", "ACGTA", 10), ("m", "ACGTT", 4), ("t", "AGGTT", 2)],
        &cfg,
    );

    assert_eq!(otus.len(), 1);
    let otu = &otus[0];
    assert_eq!(member_ids(&pools, otu), vec!["s", "m", "t"]);
    let dists: Vec<usize> = otu.members.iter().map(|m| m.parent_dist).collect();
    assert_eq!(dists, vec![0, 1, 1]);
    assert_eq!(otu.max_gen, 2);
}

#[test]
fn scenario_abundance_monotone_chaining() {
    // a more abundant amplicon behind a weaker subseed breaks the chain
    let cfg = ClusterConfig::default();
    let (pools, otus) = run(
        &[("s", "ACGTACGT", 10), ("a", "ACGTACGA", 3), ("b", "ACGTACAA", 5)],
        &cfg,
    );
    assert_eq!(otus.len(), 2);
    assert_eq!(member_ids(&pools, &otus[0]), vec!["s", "a"]);
    assert_eq!(member_ids(&pools, &otus[1]), vec!["b"]);

    let cfg = ClusterConfig {
        no_otu_breaking: true,
        ..ClusterConfig::default()
    };
    let (pools, otus) = run(
        &[("s", "ACGTACGT", 10), ("a", "ACGTACGA", 3), ("b", "ACGTACAA", 5)],
        &cfg,
    );
    assert_eq!(otus.len(), 1);
    assert_eq!(member_ids(&pools, &otus[0]), vec!["s", "a", "b"]);
}

#[test]
fn scenario_length_gap_pool_split() {
    let cfg = ClusterConfig {
        threshold: 2,
        ..ClusterConfig::default()
    };
    let long: String = "ACGT".repeat(25);
    let short: String = "ACGT".repeat(8).chars().take(30).collect();
    let (pools, otus) = run(&[("a", &short, 1), ("b", &long, 1)], &cfg);

    assert_eq!(pools.num_pools(), 2);
    assert_eq!(otus.len(), 2);
    assert!(otus.iter().all(|o| o.size() == 1));
}

#[test]
fn scenario_filter_false_positive_is_rejected() {
    // shares the first half (>= k segments) but sits at distance 2
    let cfg = ClusterConfig::default();
    let (_, otus) = run(
        &[("a", "AAAATTCCCGGG", 5), ("b", "AAAATTCCCGTT", 3)],
        &cfg,
    );
    assert_eq!(otus.len(), 2);
    assert!(otus.iter().all(|o| o.size() == 1));
}

#[test]
fn scenario_fastidious_graft() {
    let cfg = ClusterConfig {
        fastidious: true,
        boundary: 3,
        ..ClusterConfig::default()
    };
    let heavy = "AAAAAAAAAAAA";
    let light = "AACCAAAAAAAA"; // distance 2: only the fastidious phase links them
    let (pools, otus) = run(&[("h", heavy, 100), ("l", light, 1)], &cfg);

    let surviving: Vec<&Otu> = otus.iter().filter(|o| !o.attached).collect();
    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].mass, 101);
    assert_eq!(member_ids(&pools, surviving[0]), vec!["h", "l"]);

    let attached: Vec<&Otu> = otus.iter().filter(|o| o.attached).collect();
    assert_eq!(attached.len(), 1);
    assert!(attached[0].members.is_empty());
}

#[test]
fn fastidious_grafts_across_pool_boundaries() {
    // lengths 12 and 14 end up in different pools at threshold 1, but the
    // doubled threshold reaches across the gap
    let cfg = ClusterConfig {
        fastidious: true,
        boundary: 3,
        ..ClusterConfig::default()
    };
    let (pools, otus) = run(
        &[("h", "AAAAAAAAAAAA", 100), ("l", "AAAAAAAAAAAAAA", 1)],
        &cfg,
    );
    assert_eq!(pools.num_pools(), 2);

    let surviving: Vec<&Otu> = otus.iter().filter(|o| !o.attached).collect();
    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].mass, 101);
    assert_eq!(member_ids(&pools, surviving[0]), vec!["h", "l"]);
}

#[test]
fn fastidious_boundary_splits_light_from_heavy() {
    // mass 3 with boundary 3 is heavy: nothing to graft
    let cfg = ClusterConfig {
        fastidious: true,
        boundary: 3,
        ..ClusterConfig::default()
    };
    let (_, otus) = run(
        &[("h", "AAAAAAAAAAAA", 100), ("l", "AACCAAAAAAAA", 3)],
        &cfg,
    );
    assert_eq!(otus.iter().filter(|o| !o.attached).count(), 2);
}

#[test]
fn every_amplicon_belongs_to_exactly_one_otu() {
    let data = &[
        ("a", "ACGTACGTACGTACGT", 30),
        ("b", "ACGTACGTACGTACGA", 12),
        ("c", "ACGTACGTACGTACAA", 5),
        ("d", "ACGTACGTACGTACG", 8),
        ("e", "TTGTACGTACGTACGT", 4),
        ("f", "CCCCCCCCCCCCCCCC", 9),
        ("g", "CCCCCCCCCCCCCCCG", 1),
        ("h", "ACGTACGTACGTACGTA", 2),
    ];
    let cfg = ClusterConfig::default();
    let pools = AmpliconPools::build(records(data), cfg.threshold).unwrap();
    let otus = cluster(&pools, &cfg).unwrap();

    let mut total = 0;
    for otu in &otus {
        total += otu.size();
        for m in &otu.members {
            if m.gen > 0 {
                let pool = pools.get(otu.pool_id);
                assert!(pool.abundance(m.id) <= pool.abundance(m.parent_id));
                assert!(pool.abundance(m.id) <= otu.seed_abundance);
            }
        }
    }
    assert_eq!(total, pools.num_amplicons());
}

#[test]
fn filter_modes_agree_on_the_result() {
    let data = &[
        ("a", "ACGTACGTACGTACGT", 30),
        ("b", "ACGTACGTACGTACGA", 12),
        ("c", "ACGTACGTACGTAC", 5),
        ("d", "ACGTACGTACGTACG", 8),
        ("e", "TTTTACGTACGTACGT", 4),
    ];
    let cfg = ClusterConfig {
        threshold: 2,
        ..ClusterConfig::default()
    };
    let pools = AmpliconPools::build(records(data), cfg.threshold).unwrap();
    let reference = fingerprint(&pools, &cluster(&pools, &cfg).unwrap());

    for mode in [
        FilterMode::Backward,
        FilterMode::ForwardBackward,
        FilterMode::BackwardForward,
    ] {
        let cfg = ClusterConfig {
            filter_mode: mode,
            ..cfg.clone()
        };
        let result = fingerprint(&pools, &cluster(&pools, &cfg).unwrap());
        assert_eq!(result, reference, "mode {mode:?} diverged");
    }
}

#[test]
fn scored_verification_matches_unit_cost_on_substitution_chains() {
    let data = &[("s", "ACGTA", 10), ("m", "ACGTT", 4), ("t", "AGGTT", 2)];
    let unit = ClusterConfig::default();
    let scored = ClusterConfig {
        use_score: true,
        ..ClusterConfig::default()
    };
    let pools = AmpliconPools::build(records(data), 1).unwrap();
    assert_eq!(
        fingerprint(&pools, &cluster(&pools, &unit).unwrap()),
        fingerprint(&pools, &cluster(&pools, &scored).unwrap())
    );
}

#[test]
fn results_are_deterministic_across_runs_and_thread_counts() {
    let mut data: Vec<(String, String, u64)> = Vec::new();
    let base = "ACGTACGGTCAATGCAACGT";
    data.push(("seed".to_string(), base.to_string(), 50));
    for i in 0..base.len() {
        for (j, b) in ["A", "C", "G", "T"].iter().enumerate() {
            let mut v = base.to_string();
            v.replace_range(i..i + 1, b);
            if v != base {
                data.push((format!("v{i}_{j}"), v, ((i * 7 + j) % 9 + 1) as u64));
            }
            let mut ins = base.to_string();
            ins.insert_str(i, b);
            data.push((format!("i{i}_{j}"), ins, ((i * 5 + j) % 7 + 1) as u64));
        }
        let mut del = base.to_string();
        del.remove(i);
        data.push((format!("d{i}"), del, (i % 6 + 1) as u64));
    }
    let borrowed: Vec<(&str, &str, u64)> =
        data.iter().map(|(a, b, c)| (a.as_str(), b.as_str(), *c)).collect();

    let serial = ClusterConfig::default();
    let pools = AmpliconPools::build(records(&borrowed), serial.threshold).unwrap();
    let reference = fingerprint(&pools, &cluster(&pools, &serial).unwrap());

    // identical rerun
    assert_eq!(
        fingerprint(&pools, &cluster(&pools, &serial).unwrap()),
        reference
    );

    // parallel configurations must not change the output
    for cfg in [
        ClusterConfig {
            verifier_threads: 3,
            ..ClusterConfig::default()
        },
        ClusterConfig {
            filter_threads: 2,
            verifier_threads: 2,
            ..ClusterConfig::default()
        },
        ClusterConfig {
            explorers: 4,
            ..ClusterConfig::default()
        },
    ] {
        assert_eq!(
            fingerprint(&pools, &cluster(&pools, &cfg).unwrap()),
            reference
        );
    }
}

#[test]
fn fastidious_check_modes_agree() {
    let data = &[
        ("h1", "AAAAAAAAAACC", 50),
        ("h2", "AAAAAAAAAATT", 80),
        ("l1", "AAAAAAAAAAAA", 1),
        ("l2", "AAAAAAAAAAAAAA", 2),
    ];
    let base = ClusterConfig {
        fastidious: true,
        boundary: 10,
        ..ClusterConfig::default()
    };
    let pools = AmpliconPools::build(records(data), base.threshold).unwrap();
    let reference = fingerprint(&pools, &cluster(&pools, &base).unwrap());

    for mode in [FastidiousCheckMode::ParallelSelf, FastidiousCheckMode::PerDirection] {
        let cfg = ClusterConfig {
            check_mode: mode,
            check_threads: 2,
            grafters: 2,
            ..base.clone()
        };
        assert_eq!(
            fingerprint(&pools, &cluster(&pools, &cfg).unwrap()),
            reference,
            "mode {mode:?} diverged"
        );
    }
}

#[test]
fn dereplication_rejects_conflicting_options() {
    let cfg = ClusterConfig {
        threshold: 1,
        dereplicate: true,
        ..ClusterConfig::default()
    };
    let pools = AmpliconPools::build(records(&[("a", "ACGT", 1)]), 0).unwrap();
    assert!(cluster(&pools, &cfg).is_err());
}
