/// Install a fmt subscriber filtered by `RUST_LOG` (default `rewear=info`).
///
/// Safe to call more than once: later calls are no-ops when a global
/// subscriber is already set, which lets every test call it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rewear=info".into()),
        )
        .with_test_writer()
        .try_init();
}
