//! End-to-end tests: a mock host firing scope requests at a running observer
//! and a consumer decoding what comes out of the control channel.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use kextlog_audit::scope::{
    FILEOP_CLOSE, FILEOP_CLOSE_MODIFIED, FILEOP_EXCHANGE, FILEOP_LINK, FILEOP_OPEN,
    FILEOP_RENAME, FILEOP_WILL_RENAME, GENERIC_ISSUSER, PROCESS_CANSIGNAL, PROCESS_CANTRACE,
};
use kextlog_audit::{
    ChannelError, Credential, Error, FallbackReason, KextlogConfig, Scope, ScopeArg,
    ScopeRequest, Verdict, VnodeAction, VnodeType, FAST_PATH_CAPACITY, INVALIDATED,
};
use kextlog_core::Level;
use kextlog_test::{
    assert_enqueued, assert_fallback, FailingAllocator, MockHost, MockProcess, MockVnode,
    TestBench, DEFAULT_PID,
};

// ============================================================================
// Control channel
// ============================================================================

#[test]
fn test_racing_connects_admit_one_consumer() {
    let bench = TestBench::new();
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<(u32, Result<(), ChannelError>)> = [5, 7]
        .into_iter()
        .map(|unit| {
            let kextlog = Arc::clone(&bench.kextlog);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (unit, kextlog.connect(unit))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let winners: Vec<u32> = results
        .iter()
        .filter(|(_, result)| result.is_ok())
        .map(|(unit, _)| *unit)
        .collect();
    assert_eq!(winners.len(), 1, "exactly one connect must win: {results:?}");
    let winner = winners[0];

    for (unit, result) in &results {
        if *unit != winner {
            assert_eq!(*result, Err(ChannelError::AlreadyConnected { current: winner }));
        }
    }

    assert_enqueued(bench.kextlog.log(Level::Info, format_args!("after the race")));
    assert_eq!(bench.socket.units(), [winner]);
    assert_eq!(bench.messages(), ["after the race"]);
}

#[test]
fn test_stale_disconnect_keeps_consumer() {
    let bench = TestBench::new();
    bench.connect(5);

    assert!(!bench.kextlog.disconnect(7));
    assert_eq!(bench.kextlog.channel().connected_unit(), Some(5));

    assert!(bench.kextlog.disconnect(5));
    assert!(!bench.kextlog.channel().is_connected());
    bench.connect(7);
}

#[test]
fn test_unconnected_log_flags_next_record() {
    let bench = TestBench::new();

    assert_fallback(
        bench.kextlog.log(Level::Warning, format_args!("lost {}", 1)),
        FallbackReason::NotConnected,
    );
    assert_eq!(bench.syslog_messages(), ["lost 1"]);

    bench.connect(9);
    bench.kextlog.log(Level::Info, format_args!("first seen"));
    bench.kextlog.log(Level::Info, format_args!("second seen"));

    let records = bench.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_dropped_predecessor());
    assert!(!records[1].is_dropped_predecessor());
    assert_eq!(records[0].message(), "first seen");
}

#[test]
fn test_full_socket_falls_back_and_flags_next_record() {
    let bench = TestBench::builder().socket_capacity(120).build();
    bench.connect(1);

    // one small record fits, the second does not
    assert_enqueued(bench.kextlog.log(Level::Info, format_args!("{}", "a".repeat(60))));
    assert_fallback(
        bench.kextlog.log(Level::Info, format_args!("{}", "b".repeat(60))),
        FallbackReason::EnqueueFailed,
    );
    assert_eq!(bench.syslog_messages(), ["b".repeat(60)]);

    let drained = bench.records();
    assert_eq!(drained.len(), 1);
    assert!(!drained[0].is_dropped_predecessor());

    assert_enqueued(bench.kextlog.log(Level::Info, format_args!("c")));
    let after = bench.records();
    assert!(after[0].is_dropped_predecessor());
    assert_eq!(after[0].message(), "c");

    let stats = bench.kextlog.statistics();
    assert_eq!(stats.enqueue_failure, 1);
    assert_eq!(stats.syslog, 1);
}

#[test]
fn test_records_carry_host_identity() {
    let bench = TestBench::builder()
        .host(MockHost::new().with_pid(4242))
        .build();
    bench.connect(1);

    bench.kextlog.log(Level::Error, format_args!("one"));
    bench.kextlog.log(Level::Debug, format_args!("two"));

    let records = bench.records();
    assert_eq!(records[0].header.pid, 4242);
    assert_eq!(records[0].header.level, Level::Error);
    assert_eq!(records[1].header.level, Level::Debug);
    assert!(records[1].header.timestamp > records[0].header.timestamp);
    assert_eq!(records[0].header.tid, records[1].header.tid);
    assert_eq!(records[0].header.size, 4);
}

// ============================================================================
// Encoding routes
// ============================================================================

#[test]
fn test_long_message_uses_heap_route() {
    let bench = TestBench::new();
    bench.connect(1);
    let text = "x".repeat(FAST_PATH_CAPACITY * 4);

    assert_enqueued(bench.kextlog.log(Level::Info, format_args!("{text}")));

    let records = bench.records();
    assert_eq!(records[0].message(), text);
    assert!(!records[0].is_truncated());
    assert_eq!(bench.kextlog.statistics().heapmsg, 1);
}

#[test]
fn test_allocation_failure_truncates_to_inline_capacity() {
    let allocator = Arc::new(FailingAllocator::always());
    let bench = TestBench::builder().allocator(allocator.clone()).build();
    bench.connect(1);

    let text = "y".repeat(FAST_PATH_CAPACITY * 2);
    let delivery = bench.kextlog.log(Level::Info, format_args!("{text}"));
    assert_eq!(
        delivery,
        kextlog_audit::Delivery::Enqueued {
            route: kextlog_audit::Route::Inline,
            truncated: true,
        }
    );

    let records = bench.records();
    assert!(records[0].is_truncated());
    assert_eq!(records[0].message(), &text[..FAST_PATH_CAPACITY - 1]);
    assert_eq!(allocator.refused(), 1);
    assert_eq!(bench.kextlog.statistics().oom, 1);
}

#[test]
fn test_payload_limit_truncates() {
    let config = KextlogConfig::builder().max_payload_len(200).build().unwrap();
    let bench = TestBench::builder().config(config).build();
    bench.connect(1);

    let delivery = bench
        .kextlog
        .log(Level::Info, format_args!("{}", "z".repeat(500)));
    assert_eq!(
        delivery,
        kextlog_audit::Delivery::Enqueued {
            route: kextlog_audit::Route::Inline,
            truncated: true,
        }
    );
    assert_eq!(bench.records()[0].payload.len(), FAST_PATH_CAPACITY);
}

// ============================================================================
// Scope callbacks
// ============================================================================

#[test]
fn test_start_attaches_one_listener_per_scope() {
    let bench = TestBench::new();
    let registration = bench.start().unwrap();

    assert_eq!(registration.listener_count(), 4);
    for scope in Scope::ALL {
        assert_eq!(bench.host.listener_count(scope), 1);
    }
    assert_eq!(registration.scopes().collect::<Vec<_>>(), Scope::ALL);

    registration.deregister();
    assert_eq!(bench.host.total_listeners(), 0);
    assert_eq!(bench.kextlog.gate().read(), INVALIDATED);
}

#[test]
fn test_refused_scope_rolls_back() {
    let bench = TestBench::builder()
        .host(MockHost::new().refusing(Scope::Vnode))
        .build();

    let err = bench.start().unwrap_err();
    assert!(matches!(
        err,
        Error::ScopeRegistration {
            scope: Scope::Vnode,
            ..
        }
    ));
    assert!(err.to_string().contains("listener table full"));
    assert_eq!(bench.host.total_listeners(), 0);
    assert!(bench.kextlog.gate().is_invalidated());
}

#[test]
fn test_generic_scope_logs_superuser_check() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let verdicts = bench
        .host
        .authorize(Scope::Generic, &bench.request(GENERIC_ISSUSER));
    assert_eq!(verdicts, [Verdict::Defer]);

    let records = bench.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].header.level, Level::Info);
    assert_eq!(
        records[0].message(),
        format!("generic  act: 0x1(ISSUSER) {}", bench.actor_suffix())
    );
}

#[test]
fn test_process_scope_names_target() {
    let safari = MockProcess::new(42, "Safari");
    let bench = TestBench::builder()
        .host(MockHost::new().with_process(safari.clone()))
        .build();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let signal = bench
        .request(PROCESS_CANSIGNAL)
        .arg(0, safari.arg())
        .arg(1, ScopeArg::Int(15));
    bench.host.authorize(Scope::Process, &signal);

    let trace = bench
        .request(PROCESS_CANTRACE)
        .arg(0, MockProcess::new(77, "gone").arg());
    bench.host.authorize(Scope::Process, &trace);

    let records = bench.records();
    assert_eq!(
        records[0].message(),
        format!(
            "process  act: 0x1(CANSIGNAL) {} dst: 42 Safari sig: 15",
            bench.actor_suffix()
        )
    );
    assert_eq!(records[0].header.level, Level::Info);

    // unknown pid resolves to a placeholder
    assert_eq!(
        records[1].message(),
        format!("process  act: 0x2(CANTRACE) {} dst: 77 ?", bench.actor_suffix())
    );
    assert_eq!(records[1].header.level, Level::Warning);
}

#[test]
fn test_vnode_scope_renders_directory_rights() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let dir = MockVnode::dir("/Users/me").with_identity(0xffff_ff80_1234_5600);
    let parent = MockVnode::dir("/Users").with_identity(0xffff_ff80_1234_0000);
    let action = VnodeAction::READ_DATA | VnodeAction::WRITE_ATTRIBUTES;
    let request = bench
        .request(action)
        .arg(0, ScopeArg::Context(0xdead))
        .arg(1, dir.arg())
        .arg(2, parent.arg());
    bench.host.authorize(Scope::Vnode, &request);

    let records = bench.records();
    assert_eq!(
        records[0].message(),
        format!(
            "vnode  act: 0x102(LIST_DIRECTORY|WRITE_ATTRIBUTES) vp: 0xffffff8012345600 2 VDIR \
             /Users/me dvp: 0xffffff8012340000 {}",
            bench.actor_suffix()
        )
    );
}

#[test]
fn test_vnode_scope_on_file_uses_file_names() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let request = bench
        .request(VnodeAction::READ_DATA | VnodeAction::EXECUTE)
        .arg(1, MockVnode::file("/bin/ls").arg());
    bench.host.authorize(Scope::Vnode, &request);

    let message = bench.messages().remove(0);
    assert!(message.contains("(READ_DATA|EXECUTE)"), "{message}");
    assert!(message.contains(" 1 VREG /bin/ls dvp: (null) "), "{message}");
}

#[test]
fn test_vnode_path_failure_logs_error_record() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let vnode = MockVnode::new(VnodeType::Reg)
        .with_identity(0xabc0)
        .with_vid(3)
        .unresolvable();
    let request = bench.request(VnodeAction::DELETE).arg(1, vnode.arg());
    bench.host.authorize(Scope::Vnode, &request);

    let records = bench.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].header.level, Level::Error);
    assert!(records[0]
        .message()
        .starts_with("vnode path lookup failed  vp: 0xabc0 vid: 0x3 vt: 1 ("));
}

#[test]
fn test_vnode_path_buffer_allocation_failure() {
    let allocator = Arc::new(FailingAllocator::always());
    let config = KextlogConfig::builder().max_path_len(64).build().unwrap();
    let bench = TestBench::builder()
        .config(config)
        .allocator(allocator.clone())
        .build();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let request = bench
        .request(VnodeAction::READ_DATA)
        .arg(1, MockVnode::file("/etc/hosts").arg());
    bench.host.authorize(Scope::Vnode, &request);

    let records = bench.records();
    assert_eq!(records[0].header.level, Level::Error);
    assert!(
        records[0].message().ends_with("(cannot allocate 64 byte path buffer)"),
        "{}",
        records[0].message()
    );
    assert_eq!(allocator.refused(), 1);
}

#[test]
fn test_malformed_arguments_are_reported() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    // vnode scope without a vnode
    let verdicts = bench.host.authorize(Scope::Vnode, &bench.request(2));
    assert_eq!(verdicts, [Verdict::Defer]);

    let records = bench.records();
    assert_eq!(records[0].header.level, Level::Error);
    assert!(records[0]
        .message()
        .starts_with("malformed arguments in com.apple.kauth.vnode: "));
}

#[test]
fn test_fileop_scope_formats() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);
    let actor = bench.actor_suffix();

    let file = MockVnode::file("/tmp/a").with_identity(0x10);
    let requests = [
        bench
            .request(FILEOP_OPEN)
            .arg(0, file.clone().arg())
            .arg(1, ScopeArg::Path("/tmp/a".into())),
        bench
            .request(FILEOP_CLOSE)
            .arg(0, file.clone().arg())
            .arg(1, ScopeArg::Path("/tmp/a".into()))
            .arg(2, ScopeArg::Int(i64::from(FILEOP_CLOSE_MODIFIED))),
        bench
            .request(FILEOP_RENAME)
            .arg(0, ScopeArg::Path("/tmp/a".into()))
            .arg(1, ScopeArg::Path("/tmp/b".into())),
        bench
            .request(FILEOP_EXCHANGE)
            .arg(0, ScopeArg::Path("/tmp/a".into()))
            .arg(1, ScopeArg::Path("/tmp/b".into())),
        bench
            .request(FILEOP_LINK)
            .arg(0, ScopeArg::Path("/tmp/a".into()))
            .arg(1, ScopeArg::Path("/tmp/c".into())),
        bench
            .request(FILEOP_WILL_RENAME)
            .arg(0, file.arg())
            .arg(1, ScopeArg::Path("/tmp/a".into()))
            .arg(2, ScopeArg::Path("/tmp/d".into())),
    ];
    for request in &requests {
        bench.host.authorize(Scope::FileOp, request);
    }

    assert_eq!(
        bench.messages(),
        [
            format!("fileop  act: 0x1(OPEN) vp: 0x10 1 /tmp/a {actor}"),
            format!("fileop  act: 0x2(CLOSE) vp: 0x10 1 /tmp/a flags: 0x2 {actor}"),
            format!("fileop  act: 0x3(RENAME) /tmp/a -> /tmp/b {actor}"),
            format!("fileop  act: 0x4(EXCHANGE) /tmp/a <=> /tmp/b {actor}"),
            format!("fileop  act: 0x5(LINK) /tmp/a ~> /tmp/c {actor}"),
            format!("fileop  act: 0x8(WILL_RENAME) vp: 0x10 1 /tmp/a -> /tmp/d {actor}"),
        ]
    );
}

#[test]
fn test_fileop_missing_arguments_render_null() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    bench.host.authorize(Scope::FileOp, &bench.request(FILEOP_OPEN));
    bench.host.authorize(Scope::FileOp, &bench.request(FILEOP_RENAME));

    let actor = bench.actor_suffix();
    assert_eq!(
        bench.messages(),
        [
            format!("fileop  act: 0x1(OPEN) vp: (null) (null) {actor}"),
            format!("fileop  act: 0x3(RENAME) (null) -> (null) {actor}"),
        ]
    );
}

#[test]
fn test_unknown_actions_warn() {
    let bench = TestBench::new();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    bench.host.authorize(Scope::FileOp, &bench.request(0x40));
    bench.host.authorize(Scope::Process, &bench.request(0x9));
    bench.host.authorize(Scope::Generic, &bench.request(0x7));

    let records = bench.records();
    assert_eq!(records[0].message(), "unknown action 0x40 in fileop scope");
    assert_eq!(records[0].header.level, Level::Warning);
    assert_eq!(records[1].message(), "unknown action 0x9 in process scope");
    assert!(records[2].message().starts_with("generic  act: 0x7((?)) "));
}

#[test]
fn test_actor_uses_request_credential() {
    let bench = TestBench::builder()
        .host(MockHost::new().with_proc_name("sudo"))
        .build();
    let _registration = bench.start().unwrap();
    bench.connect(1);

    let request = ScopeRequest::new(Credential::root(), GENERIC_ISSUSER);
    bench.host.authorize(Scope::Generic, &request);

    assert_eq!(
        bench.messages(),
        [format!("generic  act: 0x1(ISSUSER) uid: 0 pid: {DEFAULT_PID} sudo")]
    );
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_deregister_waits_for_in_flight_callbacks() {
    let bench = TestBench::new();
    let registration = bench.start().unwrap();
    bench.connect(1);

    let hold = bench.host.hold_callbacks();
    let workers: Vec<_> = (0..3)
        .map(|_| {
            let host = Arc::clone(&bench.host);
            thread::spawn(move || {
                host.authorize(Scope::Generic, &kextlog_test::request(GENERIC_ISSUSER))
            })
        })
        .collect();
    hold.wait_for_parked(3);
    assert_eq!(bench.kextlog.gate().read(), 3);

    let teardown = thread::spawn(move || registration.deregister());

    // listeners go first, then the gate starts draining and turns
    // newcomers away
    while bench.host.total_listeners() > 0 {
        thread::yield_now();
    }
    while bench.kextlog.gate().enter().is_some() {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(50));
    assert!(!teardown.is_finished());
    assert!(!bench.kextlog.gate().is_invalidated());
    assert_eq!(bench.kextlog.gate().read(), 3);

    hold.release();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), [Verdict::Defer]);
    }
    teardown.join().unwrap();

    assert!(bench.kextlog.gate().is_invalidated());
    assert_eq!(bench.records().len(), 3);
}

#[test]
fn test_no_records_after_deregister() {
    let bench = TestBench::new();
    let registration = bench.start().unwrap();
    bench.connect(1);
    drop(registration);

    let verdicts = bench
        .host
        .authorize(Scope::Generic, &bench.request(GENERIC_ISSUSER));
    assert!(verdicts.is_empty());

    // a callback that slipped past unlisten sees a closed gate
    let dispatcher = kextlog_audit::Dispatcher::new(Arc::clone(&bench.kextlog));
    assert_eq!(
        dispatcher.dispatch(Scope::Generic, &bench.request(GENERIC_ISSUSER)),
        Verdict::Defer
    );
    assert!(bench.records().is_empty());
}
