use anyhow::Result;

/// The daemon runs everything cooperatively on one thread. The runtime is
/// built after daemonization, so this can't be a `#[tokio::main]`.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
