mod util;

use dataflow_redist::prelude::*;
use dataflow_redist::redist::zcurve::dest_of_code;
use dataflow_redist::redist::block::DOMAIN_BLOCK;
use util::*;

fn collective() -> RedistConfig {
    RedistConfig::default()
}

fn p2p() -> RedistConfig {
    RedistConfig {
        comm_method: CommMethod::P2P,
        ..RedistConfig::default()
    }
}

/// One iteration: every rank runs both roles and returns what it received.
fn one_iteration(red: &mut DynRedistComp<LocalComm>, mut data: Container) -> Container {
    red.process(&mut data, RedistRole::Source).unwrap();
    let mut got = Container::new();
    red.process(&mut got, RedistRole::Dest).unwrap();
    red.flush();
    got
}

#[test]
fn count_one_to_three() {
    for config in [collective(), p2p()] {
        let out = run_ranks(4, |comm| {
            let mut red = redist(&comm, (0, 1), (1, 3), StrategyKind::Count, config);
            let data = if comm.rank() == 0 {
                vector_i32("v", (1..=10).collect())
            } else {
                Container::new()
            };
            ints(&one_iteration(&mut red, data), "v")
        });
        assert_eq!(out[0], Vec::<i32>::new());
        assert_eq!(out[1], vec![1, 2, 3, 4]);
        assert_eq!(out[2], vec![5, 6, 7]);
        assert_eq!(out[3], vec![8, 9, 10]);
    }
}

#[test]
fn count_one_to_three_overlapping() {
    for config in [collective(), p2p()] {
        let out = run_ranks(3, |comm| {
            let mut red = redist(&comm, (0, 1), (0, 3), StrategyKind::Count, config);
            let data = if comm.rank() == 0 {
                vector_i32("v", (1..=10).collect())
            } else {
                Container::new()
            };
            ints(&one_iteration(&mut red, data), "v")
        });
        assert_eq!(out, vec![vec![1, 2, 3, 4], vec![5, 6, 7], vec![8, 9, 10]]);
    }
}

#[test]
fn round_four_to_two_adds() {
    for config in [collective(), p2p()] {
        let out = run_ranks(6, |comm| {
            let mut red = redist(&comm, (0, 4), (4, 2), StrategyKind::Round, config);
            let value = (comm.rank() as i32 + 1) * 10;
            let data = simple_i32("x", value, MergePolicy::AddValue);
            one_iteration(&mut red, data).get_simple::<i32>("x")
        });
        assert_eq!(out[4], Some(10 + 30));
        assert_eq!(out[5], Some(20 + 40));
    }
}

#[test]
fn proc_gather_four_to_two_keeps_source_order() {
    for (dst, world) in [(4, 6), (0, 4)] {
        let out = run_ranks(world, |comm| {
            let mut red = redist(&comm, (0, 4), (dst, 2), StrategyKind::Proc, collective());
            let r = comm.rank() as i32;
            let data = if comm.rank() < 4 {
                vector_i32("v", vec![r * 10, r * 10 + 1])
            } else {
                Container::new()
            };
            ints(&one_iteration(&mut red, data), "v")
        });
        assert_eq!(out[dst], vec![0, 1, 10, 11]);
        assert_eq!(out[dst + 1], vec![20, 21, 30, 31]);
    }
}

#[test]
fn proc_broadcast_two_to_four() {
    let out = run_ranks(6, |comm| {
        let mut red = redist(&comm, (0, 2), (2, 4), StrategyKind::Proc, collective());
        let data = vector_i32("v", vec![comm.rank() as i32]);
        ints(&one_iteration(&mut red, data), "v")
    });
    assert_eq!(&out[2..], &[vec![0], vec![0], vec![1], vec![1]]);
}

#[test]
fn merge_once_matches_merge_step() {
    let run = |merge_method| {
        run_ranks(3, |comm| {
            let config = RedistConfig {
                merge_method,
                ..RedistConfig::default()
            };
            let mut red = redist(&comm, (0, 2), (2, 1), StrategyKind::Count, config);
            let r = comm.rank() as i32;
            let data = vector_i32("v", vec![r; 3]);
            let mut got = ints(&one_iteration(&mut red, data), "v");
            got.sort_unstable();
            got
        })
    };
    let step = run(MergeMethod::Step);
    assert_eq!(step[2], vec![0, 0, 0, 1, 1, 1]);
    assert_eq!(run(MergeMethod::Once), step);
}

#[test]
fn system_fields_reach_destinations_without_items() {
    let out = run_ranks(4, |comm| {
        let mut red = redist(&comm, (0, 1), (1, 3), StrategyKind::Count, collective());
        let data = with_system(vector_i32("v", vec![7]), "step", 42);
        let got = one_iteration(&mut red, data);
        (got.get_simple::<i32>("step"), ints(&got, "v"))
    });
    assert_eq!(out[1], (Some(42), vec![7]));
    assert_eq!(out[2], (Some(42), vec![]));
    assert_eq!(out[3], (Some(42), vec![]));
}

#[test]
fn quit_message_reaches_every_destination() {
    for kind in [StrategyKind::Count, StrategyKind::Round, StrategyKind::ZCurve] {
        let out = run_ranks(5, |comm| {
            let mut red = redist(&comm, (0, 2), (2, 3), kind, collective());
            let mut quit = Container::new();
            set_quit(&mut quit).unwrap();
            is_quit(&one_iteration(&mut red, quit))
        });
        assert_eq!(out, vec![false, false, true, true, true], "{kind:?}");
    }
}

#[test]
fn iterations_do_not_mix() {
    let out = run_ranks(3, |comm| {
        let mut red = redist(&comm, (0, 1), (1, 2), StrategyKind::Count, collective());
        let mut seen = Vec::new();
        for it in 0..3 {
            let data = if comm.rank() == 0 {
                vector_i32("v", vec![it; 4])
            } else {
                Container::new()
            };
            seen.push(ints(&one_iteration(&mut red, data), "v"));
        }
        seen
    });
    for it in 0..3 {
        assert_eq!(out[1][it as usize], vec![it; 2]);
        assert_eq!(out[2][it as usize], vec![it; 2]);
    }
}

#[test]
fn zcurve_buckets_follow_the_curve() {
    let bbox = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let cfg = ZCurveConfig {
        bbox: Some(bbox),
        slices: [4, 4, 4],
    };
    let probe = ZCurveStrategy::new(cfg.clone());
    let out = run_ranks(2, |comm| {
        let mut red: DynRedistComp<LocalComm> = RedistComp::new(
            &comm,
            0,
            2,
            0,
            2,
            Box::new(ZCurveStrategy::new(cfg.clone())) as Box<dyn dataflow_redist::redist::Strategy<LocalComm>>,
            collective(),
        )
        .unwrap();
        let r = comm.rank();
        let mut pos = Vec::new();
        let mut ids = Vec::new();
        for i in 0..8 {
            let t = (i as f32 + 0.5) / 8.0;
            let p = if r == 0 { [t, t, t] } else { [1.0 - t, t, 0.5] };
            pos.extend_from_slice(&p);
            ids.push((r * 100 + i) as i32);
        }
        let mut data = vector_i32("id", ids);
        data.append_data(
            "pos",
            Field::array(pos, 3),
            Flags::ZCURVEKEY,
            Scope::Private,
            SplitPolicy::Default,
            MergePolicy::AppendValues,
        )
        .unwrap();
        let got = one_iteration(&mut red, data);
        let pos = got.get_values::<f32>("pos").unwrap_or(&[]).to_vec();
        (ints(&got, "id"), pos)
    });

    let mut all_ids: Vec<i32> = out.iter().flat_map(|(ids, _)| ids.clone()).collect();
    all_ids.sort_unstable();
    let want: Vec<i32> = (0..8).chain(100..108).collect();
    assert_eq!(all_ids, want);

    for (d, (ids, pos)) in out.iter().enumerate() {
        assert_eq!(ids.len() * 3, pos.len());
        for p in pos.chunks_exact(3) {
            let code = probe.cell_code([p[0], p[1], p[2]]).unwrap();
            assert_eq!(dest_of_code(code, probe.max_index(), 2), d);
        }
    }
}

#[test]
fn block_split_routes_points_and_sub_blocks() {
    let out = run_ranks(3, |comm| {
        let mut red = redist(&comm, (0, 1), (1, 2), StrategyKind::Block, collective());
        let mut data = Container::new();
        if comm.rank() == 0 {
            data = vector_i32("id", vec![1, 2]);
            data.append_data(
                "pos",
                Field::array(vec![0.5f32, 1.0, 1.0, 3.5, 1.0, 1.0], 3),
                Flags::ZCURVEKEY,
                Scope::Private,
                SplitPolicy::Default,
                MergePolicy::AppendValues,
            )
            .unwrap();
            data.append_data(
                DOMAIN_BLOCK,
                Field::block(Block::domain(
                    BBox::new([0.0; 3], [4.0; 3]),
                    Extents::new([0; 3], [4; 3]),
                    1.0,
                )),
                Flags::NOFLAG,
                Scope::Shared,
                SplitPolicy::Default,
                MergePolicy::Default,
            )
            .unwrap();
        }
        let got = one_iteration(&mut red, data);
        (
            ints(&got, "id"),
            got.get_block(DOMAIN_BLOCK).and_then(|b| b.local_extents),
        )
    });
    assert_eq!(out[1].0, vec![1]);
    assert_eq!(out[1].1, Some(Extents::new([0; 3], [2, 4, 4])));
    assert_eq!(out[2].0, vec![2]);
    assert_eq!(out[2].1, Some(Extents::new([2, 0, 0], [2, 4, 4])));
}

#[test]
fn non_dividing_process_counts_are_fatal() {
    let mut red = RedistComp::new(
        &NoComm,
        0,
        3,
        3,
        2,
        ProcStrategy::new(),
        RedistConfig::default(),
    )
    .unwrap();
    let mut data = vector_i32("v", vec![1]);
    let err = red.process(&mut data, RedistRole::Source).unwrap_err();
    assert!(matches!(err, RedistError::InvalidConfig(_)));
    assert!(err.is_fatal());
}

#[test]
fn non_countable_data_is_fatal_for_count() {
    let mut red = RedistComp::new(
        &NoComm,
        0,
        1,
        0,
        1,
        CountStrategy::new(),
        RedistConfig::default(),
    )
    .unwrap();
    let mut data = vector_i32("a", vec![1, 2, 3]);
    data.append_data(
        "b",
        Field::vector(vec![1i32, 2], 1),
        Flags::NOFLAG,
        Scope::Private,
        SplitPolicy::Default,
        MergePolicy::AppendValues,
    )
    .unwrap();
    let err = red.process(&mut data, RedistRole::Source).unwrap_err();
    assert_eq!(err, RedistError::NotCountable);
    assert!(err.is_fatal());
}

#[test]
fn empty_rank_ranges_are_rejected() {
    for (nb_sources, nb_dests) in [(1, 0), (0, 1)] {
        let built = RedistComp::new(
            &NoComm,
            0,
            nb_sources,
            0,
            nb_dests,
            CountStrategy::new(),
            RedistConfig::default(),
        );
        assert!(matches!(built, Err(RedistError::InvalidConfig(_))));
    }
}

#[test]
#[should_panic(expected = "requested abort")]
fn fatal_errors_abort_the_job() {
    let comm = LocalComm::world(1).remove(0);
    let red = redist(&comm, (0, 1), (0, 1), StrategyKind::Count, collective());
    let _ = red.abort_on_fatal::<()>(Err(RedistError::NotCountable));
}

#[test]
fn soft_errors_are_returned() {
    let comm = LocalComm::world(1).remove(0);
    let red = redist(&comm, (0, 1), (0, 1), StrategyKind::Count, collective());
    let err = RedistError::MergeValueMismatch("x".into());
    assert_eq!(red.abort_on_fatal::<()>(Err(err.clone())), Err(err));
}
