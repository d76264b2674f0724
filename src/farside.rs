//! An in-process stand-in for the emulated Windows worker.
//!
//! This crate's non-goal is executing Windows code natively, so there is no
//! real Wine-backed worker to launch. [`InProcessFarSide`] plays the role of
//! [`crate::session::FarSideLauncher`] by running a
//! [`crate::library::WorkerLibraryTable`] on a background thread instead of
//! a child process, wired to the session's reverse transport exactly as a
//! real worker would be.

use crate::config::Config;
use crate::error::Result;
use crate::library::{NativeLibrary, WorkerLibraryTable};
use crate::rpc;
use crate::session::FarSideLauncher;
use crate::transport::{RpcClient, RpcServer};
use std::sync::Arc;
use std::time::Duration;

pub struct InProcessFarSide<L: NativeLibrary + 'static> {
    native: L,
}

impl<L: NativeLibrary + 'static> InProcessFarSide<L> {
    pub fn new(native: L) -> Self {
        Self { native }
    }
}

impl<L: NativeLibrary + Clone + 'static> FarSideLauncher for InProcessFarSide<L> {
    fn launch(&self, _config: &Config, reverse_port: u16) -> Result<u16> {
        let reverse = Arc::new(RpcClient::connect_with_timeout(
            &format!("127.0.0.1:{reverse_port}"),
            Duration::from_secs(5),
        )?);

        let table = Arc::new(WorkerLibraryTable::new(self.native.clone(), reverse.clone()));
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
                Ok(serde_json::Value::Null)
            });
        }

        let forward_port = server.serve_in_thread()?;
        reverse.call(
            rpc::reverse::SET_SERVER_STATUS,
            serde_json::json!({ "status": true }),
        )?;

        Ok(forward_port)
    }
}
