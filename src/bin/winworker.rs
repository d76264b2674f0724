//! Far-side worker process entry point.
//!
//! A real deployment runs this (or an equivalent) under the Wine-hosted
//! Python/interpreter layer this crate does not implement; here it serves
//! the forward RPC surface against a [`StubLibrary`] so the wire protocol
//! and library table can be exercised end to end without real Windows code.
//! Takes the reverse port to report liveness to as its one argument.

use std::sync::Arc;
use std::time::Duration;
use winbridge::library::{StubLibrary, WorkerLibraryTable};
use winbridge::rpc;
use winbridge::transport::{RpcClient, RpcServer};

fn main() -> winbridge::Result<()> {
    env_logger::init();

    let reverse_port: u16 = std::env::args()
        .nth(1)
        .expect("usage: winworker <reverse-port>")
        .parse()
        .expect("reverse-port must be a u16");

    let reverse = Arc::new(RpcClient::connect_with_timeout(
        &format!("127.0.0.1:{reverse_port}"),
        Duration::from_secs(30),
    )?);

    let stub = StubLibrary::new();
    let table = Arc::new(WorkerLibraryTable::new(stub, reverse.clone()));
    let server = RpcServer::new();

    {
        let table = table.clone();
        server.register(rpc::forward::LOAD_LIBRARY, move |params| {
            let params: rpc::LoadLibraryParams = serde_json::from_value(params)?;
            table.handle_load_library(params)?;
            Ok(serde_json::Value::Null)
        });
    }
    {
        let table = table.clone();
        server.register(rpc::forward::BIND_SYMBOL, move |params| {
            let params: rpc::BindSymbolParams = serde_json::from_value(params)?;
            table.handle_bind_symbol(params)?;
            Ok(serde_json::Value::Null)
        });
    }
    {
        let table = table.clone();
        server.register(rpc::forward::CALL_SYMBOL, move |params| {
            let params: rpc::CallSymbolParams = serde_json::from_value(params)?;
            let response = table.handle_call_symbol(params)?;
            Ok(serde_json::to_value(response)?)
        });
    }

    {
        let table = table.clone();
        server.register(rpc::forward::SET_PARAMETER, move |params| {
            let params: rpc::SetParameterParams = serde_json::from_value(params)?;
            table.handle_set_parameter(params)?;
            Ok(serde_json::Value::Null)
        });
    }
    {
        let reverse = reverse.clone();
        server.register(rpc::forward::TERMINATE, move |_| {
            let _ = reverse.call(
                rpc::reverse::SET_SERVER_STATUS,
                serde_json::json!({ "status": false }),
            );
            std::process::exit(0);
        });
    }

    let forward_port = server.serve_in_thread()?;
    reverse.call(
        rpc::reverse::SET_SERVER_STATUS,
        serde_json::json!({ "status": true }),
    )?;
    println!("winworker listening on 127.0.0.1:{forward_port}");

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
