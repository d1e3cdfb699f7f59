pub mod shutdown;

/// Installs the process-wide bits every binary in this workspace needs before
/// it does anything else: colored output toggling and the default TLS crypto
/// provider used by every rustls-backed HTTP client.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}

/// Drops a readiness marker file consumed by the `/readyz` probe, matching the
/// on-disk readiness convention used by every long-running binary here.
pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}
