//! End-to-end RPC tests: real sockets, framed messages, full lifecycle.

use std::sync::Arc;

use vireo_jit_client::{JitClient, LocalTransport, SocketTransport};
use vireo_jit_proto::bytecode::{JitBody, JitOp};
use vireo_jit_proto::workitem::{
    CodeGenWorkItem, NumberPageSegment, ScriptContextData, ThreadContextData,
};
use vireo_jit_proto::Status;
use vireo_jit_server::{JitServer, JitService};

fn thread_data() -> ThreadContextData {
    ThreadContextData {
        process_id: std::process::id(),
        client_base_addr: 0x40_0000,
    }
}

fn script_data() -> ScriptContextData {
    ScriptContextData {
        global_this_addr: 0x7000_0000,
    }
}

fn add_work_item() -> CodeGenWorkItem {
    CodeGenWorkItem {
        body: JitBody {
            body_id: 1,
            name: "add".to_string(),
            arg_count: 2,
            consts: vec![],
            ops: vec![
                JitOp::LoadArg(0),
                JitOp::LoadArg(1),
                JitOp::Add,
                JitOp::Return,
            ],
        },
        source_context: 1,
        inline_caches: vec![],
        global_this_addr: 0x7000_0000,
        number_page_segment: None,
        submitted_at_micros: 0,
    }
}

#[test]
fn test_socket_full_lifecycle() {
    let service = Arc::new(JitService::new());
    let server = JitServer::bind("127.0.0.1:0", Arc::clone(&service)).unwrap();
    let addr = server.local_addr().unwrap();
    let join = server.spawn();

    let mut client = JitClient::new(SocketTransport::connect(addr).unwrap());
    let info = client.initialize_thread_context(thread_data()).unwrap();
    let sc = client
        .initialize_script_context(info.handle, script_data())
        .unwrap();

    let output = client.remote_codegen(sc, add_work_item()).unwrap();
    assert!(output.code_addr >= info.pre_reserved_base);
    assert!(output.code_addr < info.pre_reserved_base + info.pre_reserved_size);
    assert!(client.is_native_addr(info.handle, output.code_addr).unwrap());

    client.close_script_context(sc).unwrap();
    client.cleanup_script_context(sc).unwrap();
    client.cleanup_thread_context(info.handle).unwrap();

    client.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn test_stale_handle_after_cleanup() {
    let mut client = JitClient::new(LocalTransport::new(Arc::new(JitService::new())));
    let info = client.initialize_thread_context(thread_data()).unwrap();
    client.cleanup_thread_context(info.handle).unwrap();

    let err = client
        .initialize_script_context(info.handle, script_data())
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::InvalidArg));

    // the slot may be reused, but the old generation stays dead
    let fresh = client.initialize_thread_context(thread_data()).unwrap();
    let err = client.set_well_known_host_type(info.handle, 1).unwrap_err();
    assert_eq!(err.status(), Some(Status::InvalidArg));
    client.cleanup_thread_context(fresh.handle).unwrap();
}

#[test]
fn test_close_race_has_one_winner() {
    let service = Arc::new(JitService::new());
    let mut setup = JitClient::new(LocalTransport::new(Arc::clone(&service)));
    let info = setup.initialize_thread_context(thread_data()).unwrap();
    let sc = setup
        .initialize_script_context(info.handle, script_data())
        .unwrap();

    let mut racers = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        racers.push(std::thread::spawn(move || {
            let mut c = JitClient::new(LocalTransport::new(service));
            c.close_script_context(sc).is_ok()
        }));
    }
    let wins: usize = racers
        .into_iter()
        .map(|t| t.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1);

    // losers observed AccessDenied, and the realm really is closed
    let err = setup.set_is_prng_seeded(sc, true).unwrap_err();
    assert_eq!(err.status(), Some(Status::AccessDenied));
}

#[test]
fn test_number_page_is_native_after_codegen() {
    let mut client = JitClient::new(LocalTransport::new(Arc::new(JitService::new())));
    let info = client.initialize_thread_context(thread_data()).unwrap();
    let sc = client
        .initialize_script_context(info.handle, script_data())
        .unwrap();

    let mut item = add_work_item();
    item.body = JitBody {
        body_id: 2,
        name: "page_user".to_string(),
        arg_count: 0,
        consts: vec![],
        ops: vec![JitOp::PageConst(1), JitOp::Return],
    };
    item.number_page_segment = Some(NumberPageSegment {
        segment_id: 9,
        base_addr: 0,
        constants: vec![1.5, 2.5, 3.5],
    });

    let output = client.remote_codegen(sc, item).unwrap();
    let seg = output.number_page_segment.expect("segment handed back");
    assert_eq!(seg.segment_id, 9);
    assert_ne!(seg.base_addr, 0);
    assert_eq!(seg.constants, vec![1.5, 2.5, 3.5]);

    // both the code and the page are attributable allocations
    assert!(client.is_native_addr(info.handle, output.code_addr).unwrap());
    assert!(client.is_native_addr(info.handle, seg.base_addr).unwrap());
    // an invented address is not
    assert!(!client.is_native_addr(info.handle, 0xdead_beef).unwrap());
}

#[test]
fn test_cleanup_process_leaves_other_processes() {
    // distinct pids: the scripted probe is not consulted here, but the
    // registry partitions by the pid the contexts were registered with
    let service = Arc::new(JitService::new());
    let mut client = JitClient::new(LocalTransport::new(Arc::clone(&service)));

    let me = std::process::id();
    let mine_a = client.initialize_thread_context(thread_data()).unwrap();
    let mine_b = client.initialize_thread_context(thread_data()).unwrap();
    let mine_c = client.initialize_thread_context(thread_data()).unwrap();
    let other = client
        .initialize_thread_context(ThreadContextData {
            process_id: 1,
            client_base_addr: 0,
        })
        .unwrap();
    let _sc = client
        .initialize_script_context(mine_a.handle, script_data())
        .unwrap();

    client.cleanup_process(me).unwrap();
    assert_eq!(service.registry().thread_count(), 1);
    assert_eq!(service.registry().script_count(), 0);

    for stale in [mine_a.handle, mine_b.handle, mine_c.handle] {
        let err = client.set_well_known_host_type(stale, 1).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidArg));
    }
    client.set_well_known_host_type(other.handle, 1).unwrap();
}
