//! Logging initialisation. `RUST_LOG` controls verbosity; defaults to
//! `info` so normal lifecycle transitions are visible without opting in.

pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
