use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::injection::{run_injection_policy, Injector, ProcessInfo};
use crate::ipc::protocol::{self, Command};
use crate::session::Session;

/// Everything a connection handler needs to dispatch a command. Cheap to
/// clone (every field is an `Arc`), so one instance is shared across every
/// accepted connection.
#[derive(Clone)]
pub struct HandlerContext {
    pub session: Arc<Session>,
    pub injector: Arc<dyn Injector>,
    pub process_info: Arc<dyn ProcessInfo>,
    pub default_dll: String,
}

/// Handles one request/response exchange: parse, dispatch, return the
/// reply bytes. The caller (the pipe server) is responsible for reading
/// the full message and for writing the reply back before closing the
/// handle.
pub async fn handle_message(ctx: &HandlerContext, line: &str) -> Vec<u8> {
    match protocol::parse(line.trim_end()) {
        Ok(command) => dispatch(ctx, command).await,
        Err(e) => {
            warn!(error = %e, raw = %line, "malformed command from monitor");
            Vec::new()
        }
    }
}

async fn dispatch(ctx: &HandlerContext, command: Command) -> Vec<u8> {
    match command {
        Command::Debug(msg) => {
            debug!(%msg, "monitor debug");
            ok()
        }
        Command::Info(msg) => {
            info!(%msg, "monitor info");
            ok()
        }
        Command::Critical(msg) => {
            error!(%msg, "monitor critical");
            ok()
        }
        Command::Loaded(pid) => {
            // Added idempotently; doesn't verify the pid was previously
            // authorized via PROCESS/PROCESS2.
            ctx.session.processes.add(pid);
            debug!(pid, "monitor reported loaded");
            ok()
        }
        Command::GetPids => getpids_reply(ctx),
        Command::Process(pid) => {
            run_injection_policy(
                &ctx.session,
                ctx.process_info.as_ref(),
                ctx.injector.as_ref(),
                &ctx.default_dll,
                pid,
                None,
            )
            .await;
            ok()
        }
        Command::Process2 { pid, tid } => {
            run_injection_policy(
                &ctx.session,
                ctx.process_info.as_ref(),
                ctx.injector.as_ref(),
                &ctx.default_dll,
                pid,
                Some(tid),
            )
            .await;
            ok()
        }
        Command::FileNew(path) => {
            ctx.session.files.add(&path);
            ok()
        }
        Command::FileDel(path) => {
            ctx.session.files.delete(&path).await;
            ok()
        }
        Command::FileMove { old, new } => {
            ctx.session.files.move_path(&old, &new);
            ok()
        }
    }
}

fn ok() -> Vec<u8> {
    b"OK".to_vec()
}

fn getpids_reply(ctx: &HandlerContext) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&ctx.session.supervisor_pid.to_le_bytes());
    buf.extend_from_slice(&ctx.session.supervisor_ppid.to_le_bytes());
    buf
}
