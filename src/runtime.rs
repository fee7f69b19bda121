use std::future::Future;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Runtime};

// Only drives timers for bounded waits, so one worker is plenty.
static HELPER_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .thread_name("media-kit-runtime")
        .build()
        .expect("media_kit: failed to build tokio runtime")
});

pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    HELPER_RUNTIME.block_on(future)
}
