use std::{future::Future, time::Duration};

#[cfg(feature = "redis-tokio")]
pub(crate) async fn timeout<F>(duration: Duration, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::time::timeout(duration, fut).await.ok()
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(crate) async fn timeout<F>(duration: Duration, fut: F) -> Option<F::Output>
where
    F: Future,
{
    use futures::future::{Either, select};

    let fut = std::pin::pin!(fut);
    match select(fut, smol::Timer::after(duration)).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}
