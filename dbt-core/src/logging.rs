//! Logger setup
//!
//! The translator logs through the `log` facade. Front ends call
//! [`init_logging`] once; `RUST_LOG` still overrides the computed filter.

use log::LevelFilter;

use crate::DbtOptions;

/// Log target for run-loop decisions
pub const TARGET_RUNTIME: &str = "dbt::runtime";
/// Log target for system calls
pub const TARGET_SYSCALL: &str = "dbt::syscall";
/// Log target for trace compilation
pub const TARGET_TRANSLATION: &str = "dbt::translation";

/// Default filter level for the given options: `debug` when any of the debug
/// flags is set, `info` otherwise.
pub fn default_level(options: &DbtOptions) -> LevelFilter {
    if options.debug_runtime || options.debug_syscall || options.debug_translation {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install `env_logger` as the global logger.
///
/// Returns `false` if a logger was already installed.
pub fn init_logging(options: &DbtOptions) -> bool {
    let default = default_level(options).to_string().to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", default))
        .try_init()
        .is_ok()
}
