mod cli;
mod core;
mod platform;
mod util;

use std::process;

fn main() {
    util::log::init();

    let args = cli::parse();

    if let Err(e) = cli::commands::dispatch(args) {
        log::error!("{e:#}");
        eprintln!("craterun: {e:#}");
        process::exit(1);
    }
}
