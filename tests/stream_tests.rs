mod util;

use dataflow_redist::prelude::*;
use dataflow_redist::stream::{
    FileStorage, FramePolicy, Storage, StorageCollection, StorageCollectionPolicy, StorageType,
    STORAGE_FOLDER_ENV,
};
use serial_test::serial;
use std::path::PathBuf;
use util::{ints, run_ranks, vector_i32};

const PROD: usize = 0;
const DFLOW: usize = 1;
const CON: usize = 2;

fn count_link(comm: &LocalComm, src: usize, dst: usize) -> DynRedistComp<LocalComm> {
    util::redist(comm, (src, 1), (dst, 1), StrategyKind::Count, RedistConfig::default())
}

/// Producer on rank 0, dataflow on rank 1, consumer on rank 2. The
/// producer emits `nb_frames` frames then quits; returns the frames seen
/// by the consumer.
fn run_dataflow(config: StreamConfig, nb_frames: i32) -> Vec<i32> {
    let out = run_ranks(3, |comm| {
        let ranks = StreamRanks {
            prod: PROD..PROD + 1,
            dflow: DFLOW..DFLOW + 1,
            con: CON..CON + 1,
        };
        let links = StreamLinks::Dataflow {
            prod_dflow: count_link(&comm, PROD, DFLOW),
            dflow_con: count_link(&comm, DFLOW, CON),
        };
        let mut stream = build_datastream(&config, &comm, ranks, links)
            .unwrap()
            .expect("stream policy set");
        let mut seen = Vec::new();
        match comm.rank() {
            PROD => {
                for i in 0..nb_frames {
                    stream.process_prod(&mut vector_i32("v", vec![i])).unwrap();
                }
                let mut quit = Container::new();
                set_quit(&mut quit).unwrap();
                assert!(stream.process_prod(&mut quit).unwrap());
            }
            DFLOW => {
                let mut data = Container::new();
                while stream.process_dflow(&mut data).unwrap() {}
            }
            _ => loop {
                let mut data = Container::new();
                stream.process_con(&mut data).unwrap();
                if is_quit(&data) {
                    break;
                }
                seen.extend(ints(&data, "v"));
            },
        }
        seen
    });
    out[CON].clone()
}

fn stream(policy: StreamPolicy, frame_policy: FramePolicy) -> StreamConfig {
    StreamConfig {
        stream: policy,
        frame_policy,
        storage_max_buffer: vec![3],
        ..StreamConfig::default()
    }
}

#[test]
fn single_feedback_seq_delivers_every_frame() {
    let got = run_dataflow(stream(StreamPolicy::Single, FramePolicy::Seq), 8);
    assert_eq!(got, (0..8).collect::<Vec<_>>());
}

#[test]
fn double_feedback_seq_delivers_every_frame() {
    let got = run_dataflow(stream(StreamPolicy::Double, FramePolicy::Seq), 8);
    assert_eq!(got, (0..8).collect::<Vec<_>>());
}

#[test]
fn recent_policy_skips_but_keeps_order() {
    for policy in [StreamPolicy::Single, StreamPolicy::Double] {
        let got = run_dataflow(stream(policy, FramePolicy::Recent), 8);
        assert_eq!(got.last(), Some(&7), "{policy}");
        assert!(got.windows(2).all(|w| w[0] < w[1]), "{policy}");
    }
}

#[test]
fn low_high_only_forwards_high_multiples() {
    let config = StreamConfig {
        low_frequency: 4,
        high_frequency: 2,
        ..stream(StreamPolicy::Single, FramePolicy::LowHigh)
    };
    let got = run_dataflow(config, 9);
    assert!(!got.is_empty());
    assert!(got.iter().all(|v| v % 2 == 0));
    assert!(got.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(got.last(), Some(&8));
}

#[test]
fn producer_frequency_thins_the_stream() {
    let config = StreamConfig {
        prod_freq_output: 3,
        ..stream(StreamPolicy::Double, FramePolicy::Seq)
    };
    assert_eq!(run_dataflow(config, 7), vec![0, 3, 6]);
}

#[test]
fn non_blocking_double_feedback_spills_to_overflow() {
    let config = StreamConfig {
        blocking: false,
        storage_max_buffer: vec![1],
        ..stream(StreamPolicy::Double, FramePolicy::Seq)
    };
    assert_eq!(run_dataflow(config, 6), (0..6).collect::<Vec<_>>());
}

#[test]
fn no_link_waits_for_the_consumer() {
    let out = run_ranks(2, |comm| {
        let config = stream(StreamPolicy::Single, FramePolicy::Seq);
        let ranks = StreamRanks {
            prod: 0..1,
            dflow: 2..2,
            con: 1..2,
        };
        let links = StreamLinks::Direct {
            prod_con: count_link(&comm, 0, 1),
        };
        let mut stream = build_datastream(&config, &comm, ranks, links)
            .unwrap()
            .expect("stream policy set");
        assert!(!stream.process_dflow(&mut Container::new()).unwrap());
        let mut seen = Vec::new();
        if comm.rank() == 0 {
            for i in 0..5 {
                assert!(stream.process_prod(&mut vector_i32("v", vec![i])).unwrap());
            }
            let mut quit = Container::new();
            set_quit(&mut quit).unwrap();
            stream.process_prod(&mut quit).unwrap();
        } else {
            loop {
                let mut data = Container::new();
                stream.process_con(&mut data).unwrap();
                if is_quit(&data) {
                    break;
                }
                seen.extend(ints(&data, "v"));
            }
        }
        seen
    });
    assert_eq!(out[1], vec![0, 1, 2, 3, 4]);
}

#[test]
fn no_stream_policy_builds_nothing() {
    let comm = LocalComm::world(1).remove(0);
    let links = StreamLinks::Direct {
        prod_con: count_link(&comm, 0, 0),
    };
    let ranks = StreamRanks {
        prod: 0..1,
        dflow: 1..1,
        con: 0..1,
    };
    let built = build_datastream(&StreamConfig::default(), &comm, ranks, links).unwrap();
    assert!(built.is_none());
}

#[test]
fn double_feedback_needs_a_dataflow() {
    let comm = LocalComm::world(1).remove(0);
    let links = StreamLinks::Direct {
        prod_con: count_link(&comm, 0, 0),
    };
    let ranks = StreamRanks {
        prod: 0..1,
        dflow: 1..1,
        con: 0..1,
    };
    let config = stream(StreamPolicy::Double, FramePolicy::Seq);
    assert!(matches!(
        build_datastream(&config, &comm, ranks, links),
        Err(RedistError::InvalidConfig(_))
    ));
}

#[test]
fn configs_parse_from_json() {
    let stream: StreamConfig = serde_json::from_str(
        r#"{"stream":"double","frame_policy":"lowhigh","storages":["mainmem","file"],
            "storage_max_buffer":[2,8],"high_frequency":5}"#,
    )
    .unwrap();
    assert_eq!(stream.stream, StreamPolicy::Double);
    assert_eq!(stream.frame_policy, FramePolicy::LowHigh);
    assert_eq!(stream.storages, vec![StorageType::MainMem, StorageType::File]);
    assert_eq!(stream.high_frequency, 5);
    assert_eq!(stream.low_frequency, 1);
    assert!(stream.blocking);

    let redist: RedistConfig = serde_json::from_str(r#"{"comm_method":"p2p"}"#).unwrap();
    assert_eq!(redist.comm_method, CommMethod::P2P);
    assert_eq!(redist.merge_method, MergeMethod::Step);
    let kind: StrategyKind = serde_json::from_str(r#""zcurve""#).unwrap();
    assert_eq!(kind, StrategyKind::ZCurve);
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("redist-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
#[serial]
fn file_storage_save_and_reopen() {
    let dir = scratch("save");
    let mut coll = StorageCollection::new(StorageCollectionPolicy::Greedy);
    coll.add_storage(FileStorage::new(&dir, 3, 2));
    for id in 0..3 {
        coll.insert(id, vector_i32("v", vec![id as i32; 2])).unwrap();
    }
    assert_eq!(coll.nb_overflow(), 1);
    assert_eq!(coll.save(3, &dir).unwrap(), 3);

    let reopened = FileStorage::from_filelist(&dir, 3).unwrap();
    assert_eq!(reopened.ids(), vec![0, 1, 2]);
    let frame = reopened.get(2).unwrap().unwrap();
    assert_eq!(ints(&frame, "v"), vec![2, 2]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
#[serial]
fn stale_frame_files_are_replaced() {
    let dir = scratch("stale");
    std::fs::create_dir_all(&dir).unwrap();
    let mut a = FileStorage::new(&dir, 0, 4);
    std::fs::write(a.path_of(1), b"left over by a crashed run").unwrap();
    a.insert(1, vector_i32("v", vec![1])).unwrap();
    assert_eq!(ints(&a.get(1).unwrap().unwrap(), "v"), vec![1]);
    assert!(matches!(
        a.insert(1, vector_i32("v", vec![2])),
        Err(RedistError::Storage(_))
    ));
    a.remove(1).unwrap();
    assert!(!a.path_of(1).exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
#[serial]
fn storage_folder_falls_back_to_the_environment() {
    let dir = scratch("env");
    // SAFETY: serialized with the other environment-dependent tests.
    unsafe { std::env::set_var(STORAGE_FOLDER_ENV, &dir) };
    let config = StreamConfig::default();
    assert_eq!(config.storage_folder(), dir);
    let explicit = StreamConfig {
        storage_folder: Some(PathBuf::from("/tmp/elsewhere")),
        ..StreamConfig::default()
    };
    assert_eq!(explicit.storage_folder(), PathBuf::from("/tmp/elsewhere"));
    unsafe { std::env::remove_var(STORAGE_FOLDER_ENV) };
}
