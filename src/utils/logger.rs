use env_logger::Env;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn";

pub fn setup_logger() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format_timestamp_millis()
        .try_init();
}
