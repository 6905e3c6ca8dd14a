mod util;

use dataflow_redist::algs::channel::{Command, OneWayChannel};
use dataflow_redist::algs::communicator::Communicator;
use util::run_ranks;

#[test]
fn latest_value_wins() {
    let out = run_ranks(3, |c| {
        let ch = OneWayChannel::new(&c, 0, 1, 2, Command::Wait as i32);
        if ch.is_source() {
            ch.send_int(1);
            ch.send_int(2);
        }
        c.barrier();
        ch.check_self_int()
    });
    // The source is not a receiver: its own slot keeps the default.
    assert_eq!(out, vec![Command::Wait as i32, 2, 2]);
}

#[test]
fn check_and_replace_consumes_the_value() {
    let out = run_ranks(2, |c| {
        let ch = OneWayChannel::new(&c, 1, 0, 1, Command::Wait as i32);
        if ch.is_source() {
            ch.send_command(Command::Ok);
            c.barrier();
            return (false, false);
        }
        c.barrier();
        let first = ch.check_and_replace_self_command(Command::Ok, Command::Wait);
        let second = ch.check_and_replace_self_command(Command::Ok, Command::Wait);
        (first, second)
    });
    assert_eq!(out[0], (true, false));
}

#[test]
fn recv_int_blocks_for_each_value() {
    let out = run_ranks(3, |c| {
        let ch = OneWayChannel::new(&c, 0, 0, 3, -1);
        let mut seen = Vec::new();
        for v in [5, 6, 7] {
            ch.send_int(v);
            seen.push(ch.recv_int());
        }
        seen
    });
    assert!(out.iter().all(|s| s == &[5, 6, 7]));
}

#[test]
fn ranks_outside_the_channel_read_ok() {
    let out = run_ranks(3, |c| {
        let ch = OneWayChannel::new(&c, 0, 1, 1, Command::Wait as i32);
        (
            ch.is_in_channel(),
            ch.check_self_command(Command::Ok),
            ch.check_different_and_replace_self_int(Command::Ok as i32, 0),
        )
    });
    assert_eq!(out[2], (false, true, None));
    assert_eq!(out[1], (true, false, Some(Command::Wait as i32)));
}

#[test]
fn source_after_receivers() {
    let out = run_ranks(3, |c| {
        let ch = OneWayChannel::new(&c, 2, 0, 2, 0);
        (ch.is_source(), ch.is_recep())
    });
    assert_eq!(out, vec![(false, true), (false, true), (true, false)]);
}

#[test]
fn commands_decode() {
    for cmd in [Command::Ok, Command::Wait, Command::Get, Command::Put] {
        assert_eq!(Command::from_i32(cmd as i32), Some(cmd));
    }
    assert_eq!(Command::from_i32(3), None);
}
