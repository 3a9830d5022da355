use std::future::Future;
use std::time::Duration;

use pin_project::pin_project;

#[derive(Clone, Copy, Debug)]
pub struct TimedOut;

/// Resolves to the inner future's output, unless the delay elapses first.
#[pin_project]
pub struct Timeout<F: Future> {
    #[pin]
    inner: F,
    #[pin]
    delay: futures_timer::Delay,
}

impl<F: Future> Timeout<F> {
    pub fn after(duration: Duration, inner: F) -> Self {
        Self {
            inner,
            delay: futures_timer::Delay::new(duration),
        }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, TimedOut>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            std::task::Poll::Ready(r) => std::task::Poll::Ready(Ok(r)),
            std::task::Poll::Pending => match this.delay.poll(cx) {
                std::task::Poll::Ready(()) => std::task::Poll::Ready(Err(TimedOut)),
                std::task::Poll::Pending => std::task::Poll::Pending,
            },
        }
    }
}

pub fn timeout<F: Future>(duration: Duration, inner: F) -> Timeout<F> {
    Timeout::after(duration, inner)
}
