//! Host-side smoke-test driver: brings a session up against the in-process
//! stand-in worker, loads a stub library, calls one exported-looking symbol,
//! and tears the session down again.

use std::sync::Arc;
use winbridge::argtree::Value;
use winbridge::config::Config;
use winbridge::farside::InProcessFarSide;
use winbridge::library::StubLibrary;
use winbridge::marshaller::CallArgument;
use winbridge::memsync::MemSyncDirective;
use winbridge::session::Session;
use winbridge::types::{Convention, PrimitiveKind, TypeDescriptor};

fn main() -> winbridge::Result<()> {
    env_logger::init();

    let stub = StubLibrary::new();
    stub.on_symbol("Square", |args, _argtypes, _buffers, _reverse| {
        let Value::I32(x) = args[0] else {
            return Err(winbridge::BridgeError::TypeMismatch {
                path: "argument 0".into(),
                expected: "i32".into(),
            });
        };
        Ok(Value::I32(x * x))
    });

    let config = Config::load(None)?;
    let far_side = Arc::new(InProcessFarSide::new(stub));
    let session = Session::start(config, far_side)?;
    session.install_signal_handlers()?;

    let library = session
        .library()
        .load_library("demo.dll", Convention::StandardC, 0, false, false)?;
    let square = library.resolve("Square");
    square.set_types(
        vec![TypeDescriptor::primitive(PrimitiveKind::I32)],
        TypeDescriptor::primitive(PrimitiveKind::I32),
    )?;
    square.set_memsync(Vec::<MemSyncDirective>::new())?;

    let result = square.call(vec![CallArgument::Scalar(Value::I32(7))])?;
    let Value::I32(squared) = result else {
        unreachable!("Square always returns an i32");
    };
    println!("Square(7) = {squared}");

    session.terminate()?;
    Ok(())
}
