use env_logger::{Builder, Env};

/// Install `env_logger` as the global `log` implementation, defaulting to the
/// `info` level unless `RUST_LOG` says otherwise.
///
/// Calling this more than once is harmless: later calls are ignored.
pub fn init_logger() {
    let _ = Builder::from_env(Env::default().default_filter_or("info")).try_init();
}
