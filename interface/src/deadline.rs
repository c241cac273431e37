use std::future::Future;
use std::time::Duration;

use futures::future::{self, Either};
use futures_timer::Delay;
use log::warn;

use crate::error::{GeolocatorError, GeolocatorResult};

/// Races `operation` against an optional time limit.
///
/// The first of the two to resolve decides the result. When the limit wins,
/// the operation future is dropped together with whatever it would have
/// produced, so a late reply can never reach the caller.
pub(crate) async fn race<F, T>(
    label: &str,
    operation: F,
    limit: Option<Duration>,
) -> GeolocatorResult<T>
where
    F: Future<Output = GeolocatorResult<T>>,
{
    let Some(limit) = limit else {
        return operation.await;
    };

    let operation = Box::pin(operation);
    match future::select(operation, Delay::new(limit)).await {
        Either::Left((result, _timer)) => result,
        Either::Right(((), _abandoned)) => {
            warn!("{label} did not complete within {limit:?}; discarding any late reply");
            Err(GeolocatorError::Timeout(limit))
        }
    }
}
