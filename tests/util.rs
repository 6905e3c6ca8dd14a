#![allow(dead_code)]
use dataflow_redist::prelude::*;

/// Run `f` on `n` in-process ranks, one thread each; results by rank.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::world(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                let f = &f;
                s.spawn(move || f(c))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Container with one PRIVATE `Vector<i32>` field merged by appending.
pub fn vector_i32(name: &str, values: Vec<i32>) -> Container {
    let mut c = Container::new();
    c.append_data(
        name,
        Field::vector(values, 1),
        Flags::NOFLAG,
        Scope::Private,
        SplitPolicy::Default,
        MergePolicy::AppendValues,
    )
    .unwrap();
    c
}

/// Container with one PRIVATE `Simple<i32>` field.
pub fn simple_i32(name: &str, value: i32, merge: MergePolicy) -> Container {
    let mut c = Container::new();
    c.append_data(
        name,
        Field::simple(value),
        Flags::NOFLAG,
        Scope::Private,
        SplitPolicy::Default,
        merge,
    )
    .unwrap();
    c
}

/// Add a SYSTEM `Simple<i32>` field.
pub fn with_system(mut c: Container, name: &str, value: i32) -> Container {
    c.append_data(
        name,
        Field::simple(value),
        Flags::NOFLAG,
        Scope::System,
        SplitPolicy::Default,
        MergePolicy::FirstValue,
    )
    .unwrap();
    c
}

/// One redistribution component per rank for a `Box<dyn Strategy>`.
pub fn redist(
    comm: &LocalComm,
    src: (usize, usize),
    dst: (usize, usize),
    kind: StrategyKind,
    config: RedistConfig,
) -> DynRedistComp<LocalComm> {
    RedistComp::new(
        comm,
        src.0,
        src.1,
        dst.0,
        dst.1,
        kind.build(ZCurveConfig::default()),
        config,
    )
    .unwrap()
}

/// Values of the `Vector<i32>`/`Array<i32>` field `name`, empty if absent.
pub fn ints(c: &Container, name: &str) -> Vec<i32> {
    c.get_values::<i32>(name).map(<[i32]>::to_vec).unwrap_or_default()
}
