//! End-to-end scenarios exercising a full session against the in-process
//! stand-in worker: round-trip primitives, present/absent optional
//! callbacks (including a real reverse-RPC round-trip), pointer-reached
//! buffer sync-back, a null-pointer violation, a configuration broadcast,
//! and a startup timeout.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use winbridge::argtree::Value;
use winbridge::config::Config;
use winbridge::error::BridgeError;
use winbridge::farside::InProcessFarSide;
use winbridge::library::StubLibrary;
use winbridge::marshaller::CallArgument;
use winbridge::memsync::{MemSyncDirective, PathStep};
use winbridge::session::Session;
use winbridge::types::{Convention, Field, Packing, PointerDirection, PrimitiveKind, TypeDescriptor};

fn test_config() -> Config {
    let mut config = Config::default();
    config.timeout_start = 5;
    config.timeout_stop = 5;
    config
}

#[test]
fn round_trip_primitive_call() {
    let stub = StubLibrary::new();
    stub.on_symbol("f", |args, _argtypes, _buffers, _reverse| {
        let Value::I16(x) = args[0] else { panic!() };
        Ok(Value::I16(x + 1))
    });

    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();
    let library = session
        .library()
        .load_library("a.dll", Convention::StandardC, 0, false, false)
        .unwrap();
    let f = library.resolve("f");
    f.set_types(
        vec![TypeDescriptor::primitive(PrimitiveKind::I16)],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    )
    .unwrap();
    f.set_memsync(vec![]).unwrap();

    let result = f.call(vec![CallArgument::Scalar(Value::I16(41))]).unwrap();
    assert!(matches!(result, Value::I16(42)));

    session.terminate().unwrap();
}

#[test]
fn optional_callback_present_is_invoked() {
    let stub = StubLibrary::new();
    stub.on_symbol("g", |args, argtypes, _buffers, reverse| {
        let Value::I16(x) = args[0] else { panic!() };
        let Value::Callback(Some(handle_id)) = args[1] else {
            panic!("callback expected to be present")
        };
        let TypeDescriptor::Funcptr {
            argtypes: cb_argtypes,
            restype: cb_restype,
            ..
        } = &argtypes[1]
        else {
            panic!("argument 1 must be a funcptr descriptor")
        };
        let Value::I16(y) = reverse.invoke(handle_id, cb_argtypes, cb_restype, &[Value::I16(x)])? else {
            panic!()
        };
        Ok(Value::I16(y * 2))
    });

    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();
    let library = session
        .library()
        .load_library("b.dll", Convention::StandardC, 0, false, false)
        .unwrap();
    let g = library.resolve("g");
    g.set_types(
        vec![
            TypeDescriptor::primitive(PrimitiveKind::I16),
            TypeDescriptor::funcptr(
                vec![TypeDescriptor::primitive(PrimitiveKind::I16)],
                TypeDescriptor::primitive(PrimitiveKind::I16),
                Convention::StandardC,
                false,
                false,
            ),
        ],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    )
    .unwrap();
    g.set_memsync(vec![]).unwrap();

    let invoked = Arc::new(AtomicI32::new(0));
    let invoked_clone = invoked.clone();
    let handle = g.register_callback(
        Arc::new(move |args: &[Value]| {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            let Value::I16(x) = args[0] else { panic!() };
            Ok(Value::I16(x * 3))
        }),
        vec![TypeDescriptor::primitive(PrimitiveKind::I16)],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    );

    let result = g
        .call(vec![
            CallArgument::Scalar(Value::I16(3)),
            CallArgument::Callback(Some(handle)),
        ])
        .unwrap();
    assert!(matches!(result, Value::I16(18)));
    assert_eq!(invoked.load(Ordering::SeqCst), 1);

    session.terminate().unwrap();
}

#[test]
fn optional_callback_absent_is_passed_as_null() {
    let stub = StubLibrary::new();
    stub.on_symbol("g", |args, _argtypes, _buffers, _reverse| {
        let Value::Callback(None) = args[1] else {
            panic!("callback expected to be absent")
        };
        Ok(Value::I16(0))
    });

    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();
    let library = session
        .library()
        .load_library("c.dll", Convention::StandardC, 0, false, false)
        .unwrap();
    let g = library.resolve("g");
    g.set_types(
        vec![
            TypeDescriptor::primitive(PrimitiveKind::I16),
            TypeDescriptor::funcptr(
                vec![TypeDescriptor::primitive(PrimitiveKind::I16)],
                TypeDescriptor::primitive(PrimitiveKind::I16),
                Convention::StandardC,
                false,
                false,
            ),
        ],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    )
    .unwrap();
    g.set_memsync(vec![]).unwrap();

    let result = g
        .call(vec![
            CallArgument::Scalar(Value::I16(10)),
            CallArgument::Callback(None),
        ])
        .unwrap();
    assert!(matches!(result, Value::I16(0)));

    session.terminate().unwrap();
}

#[test]
fn pointer_reached_buffer_is_synced_back() {
    let stub = StubLibrary::new();
    stub.on_symbol("h", |args, _argtypes, buffers, _reverse| {
        let Value::Pointer(Some(id)) = args[0] else {
            panic!("expected a non-null pointer")
        };
        let buf = buffers.get_mut(&id).expect("pointer argument must be synced into buffers");
        for (i, chunk) in buf.chunks_mut(std::mem::size_of::<i16>()).enumerate() {
            chunk.copy_from_slice(&(i as i16).to_ne_bytes());
        }
        Ok(Value::I16(0))
    });

    // `h` writes its index into every element of the synced buffer; the
    // marshaller scatters that mutation back into the caller's memory once
    // the call returns, which is what this test asserts.
    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();
    let library = session
        .library()
        .load_library("d.dll", Convention::StandardC, 0, false, false)
        .unwrap();
    let h = library.resolve("h");
    h.set_types(
        vec![
            TypeDescriptor::pointer(
                TypeDescriptor::primitive(PrimitiveKind::I16),
                PointerDirection::InOut,
            ),
            TypeDescriptor::primitive(PrimitiveKind::I16),
        ],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    )
    .unwrap();
    h.set_memsync(vec![MemSyncDirective {
        path: vec![PathStep::Argument(0)],
        length_path: vec![PathStep::Argument(1)],
        element_type: TypeDescriptor::primitive(PrimitiveKind::I16),
        null_ok: false,
    }])
    .unwrap();

    let mut buffer: Vec<i16> = vec![9, 9, 9, 9, 9];
    let ptr = buffer.as_mut_ptr() as *mut u8;
    let len_bytes = buffer.len() * std::mem::size_of::<i16>();

    let result = h
        .call(vec![
            CallArgument::Pointer { ptr, len_bytes },
            CallArgument::Scalar(Value::I16(5)),
        ])
        .unwrap();
    assert!(matches!(result, Value::I16(0)));
    assert_eq!(buffer, vec![0, 1, 2, 3, 4]);

    session.terminate().unwrap();
}

#[test]
fn null_pointer_without_null_ok_is_rejected() {
    let stub = StubLibrary::new();
    stub.on_symbol("h", |_args, _argtypes, _buffers, _reverse| Ok(Value::I16(0)));

    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();
    let library = session
        .library()
        .load_library("e.dll", Convention::StandardC, 0, false, false)
        .unwrap();
    let h = library.resolve("h");
    h.set_types(
        vec![
            TypeDescriptor::pointer(
                TypeDescriptor::primitive(PrimitiveKind::I16),
                PointerDirection::InOut,
            ),
            TypeDescriptor::primitive(PrimitiveKind::I16),
        ],
        TypeDescriptor::primitive(PrimitiveKind::I16),
    )
    .unwrap();
    h.set_memsync(vec![MemSyncDirective {
        path: vec![PathStep::Argument(0)],
        length_path: vec![PathStep::Argument(1)],
        element_type: TypeDescriptor::primitive(PrimitiveKind::I16),
        null_ok: false,
    }])
    .unwrap();

    let err = h
        .call(vec![CallArgument::Null, CallArgument::Scalar(Value::I16(0))])
        .unwrap_err();
    assert!(matches!(err, BridgeError::NullViolation { .. }));

    session.terminate().unwrap();
}

#[test]
fn set_parameter_broadcasts_to_both_sides() {
    let stub = StubLibrary::new();
    let session = Session::start(test_config(), Arc::new(InProcessFarSide::new(stub))).unwrap();

    session.set_parameter("winedebug", serde_json::json!("+relay")).unwrap();
    assert_eq!(session.config().winedebug, "+relay");

    session.terminate().unwrap();
}

#[test]
fn startup_times_out_when_far_side_never_reports_live() {
    struct NeverLaunches;
    impl winbridge::session::FarSideLauncher for NeverLaunches {
        fn launch(&self, _config: &Config, _reverse_port: u16) -> winbridge::Result<u16> {
            // Never calls set_server_status; the session must give up.
            Ok(0)
        }
    }

    let mut config = test_config();
    config.timeout_start = 0;

    let err = Session::start(config, Arc::new(NeverLaunches)).unwrap_err();
    assert!(matches!(err, BridgeError::StartupTimeout { .. }));
}

#[test]
fn struct_field_layout_used_by_memsync_length_path() {
    // Not a session-level scenario, but exercises the "length_path steps
    // into a struct field" path the scope note in `memsync.rs` documents as
    // supported even though the pointer path itself must stay top-level.
    let header = TypeDescriptor::struct_of(
        vec![
            Field {
                name: "count".into(),
                ty: TypeDescriptor::primitive(PrimitiveKind::I32),
            },
            Field {
                name: "flag".into(),
                ty: TypeDescriptor::primitive(PrimitiveKind::I8),
            },
        ],
        Packing::Natural,
    );
    let argtypes = vec![
        TypeDescriptor::pointer(TypeDescriptor::primitive(PrimitiveKind::I16), PointerDirection::Out),
        header,
    ];
    let directive = MemSyncDirective {
        path: vec![PathStep::Argument(0)],
        length_path: vec![PathStep::Argument(1), PathStep::Field("count".into())],
        element_type: TypeDescriptor::primitive(PrimitiveKind::I16),
        null_ok: false,
    };
    directive.compile(&argtypes).unwrap();
}
