//! galdrdb — CLI обслуживания базы: init/status/check/checkpoint/vacuum.
//!
//! Коды выхода: 0 — успех, 1 — ошибка, 2 — usage (clap), 3 — обнаружено
//! повреждение.

mod cli;
mod cmd_check;
mod cmd_init;
mod cmd_maint;
mod cmd_status;

use clap::Parser;

use GaldrDB::GaldrError;

use crate::cli::{Cli, Cmd};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let res = match cli.cmd {
        Cmd::Init {
            path,
            page_size,
            wal,
        } => cmd_init::run(&path, page_size, wal),
        Cmd::Status { path, json } => cmd_status::run(&path, json),
        Cmd::Check { path, json } => cmd_check::run(&path, json),
        Cmd::Checkpoint { path } => cmd_maint::checkpoint(&path),
        Cmd::Vacuum { path, json } => cmd_maint::vacuum(&path, json),
        Cmd::Orphans {
            path,
            cleanup,
            delete_documents,
        } => cmd_maint::orphans(&path, cleanup, delete_documents),
    };

    match res {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = match e.downcast_ref::<GaldrError>() {
                Some(ge) if ge.is_corruption() => 3,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}
