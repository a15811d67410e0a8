/// Process-wide tracing initialization, called once from `ChatApp::new()`.
/// `RUST_LOG` overrides the default filter; repeated init attempts are
/// harmless (`try_init` ignores an already-installed subscriber).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cipherchat_core=debug,info".into()),
        )
        .try_init();
}
