/// Recommended error type for your scenario `main` function. Compatible with every fallible
/// operation in the runner so you can use `?` to propagate errors.
pub type QosTunnelResult<T> = anyhow::Result<T>;
