//! Fallback for platforms without a location backend.

use futures::future::{self, BoxFuture};
use futures::stream;
use geolocator_platform_interface::{EventStream, PlatformException, Transport, TransportResult};
use serde_json::Value;

const UNSUPPORTED_PLATFORM: &str = "UNSUPPORTED_PLATFORM";

/// Fails every call and subscription with `UNSUPPORTED_PLATFORM`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedTransport;

fn unsupported(what: &str) -> PlatformException {
    PlatformException::new(
        UNSUPPORTED_PLATFORM,
        format!("{what} is not available on {}", std::env::consts::OS),
    )
}

impl Transport for UnsupportedTransport {
    fn invoke(
        &self,
        _channel: &str,
        method: &str,
        _arguments: Option<Value>,
    ) -> BoxFuture<'static, TransportResult> {
        let reply: TransportResult = Err(unsupported(method));
        Box::pin(future::ready(reply))
    }

    fn subscribe(&self, channel: &str, _arguments: Option<Value>) -> EventStream {
        let event: TransportResult = Err(unsupported(channel));
        Box::pin(stream::once(future::ready(event)))
    }
}
