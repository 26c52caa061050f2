//! HTTP transport layer.
//!
//! A channel talks to the network through a [`BoxTransport`]: any tower
//! service from `http::Request<TransportBody>` to an `http::Response` whose
//! body yields [`Bytes`]. [`HyperTransport`] is the production
//! implementation; tests plug in in-process services through [`boxed`].
//!
//! # Feature Flags
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots`
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod body;
mod connector;
mod hyper;

use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;
use tower_service::Service;

use crate::ClientError;

pub use body::TransportBody;
pub use connector::{TlsError, build_https_connector, default_tls_config, has_tls_support};
pub use hyper::{HyperTransport, HyperTransportBuilder};

pub use rustls::ClientConfig as TlsClientConfig;

/// Response body as seen by the channel.
pub type ResponseBody = UnsyncBoxBody<Bytes, ClientError>;

/// Type-erased transport shared by every call on a channel.
pub type BoxTransport = BoxCloneSyncService<
    http::Request<TransportBody>,
    http::Response<ResponseBody>,
    ClientError,
>;

/// Erase a transport service into a [`BoxTransport`].
///
/// Service and body errors are converted into [`ClientError`]; a service
/// that wants the channel to treat a failure as connection loss returns
/// [`ClientError::connection_lost`].
pub fn boxed<S, B>(service: S) -> BoxTransport
where
    S: Service<http::Request<TransportBody>, Response = http::Response<B>>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    S::Error: Into<ClientError>,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<ClientError>,
{
    BoxCloneSyncService::new(
        service
            .map_response(|response: http::Response<B>| {
                response.map(|body| body.map_err(Into::into).boxed_unsync())
            })
            .map_err(Into::into),
    )
}
