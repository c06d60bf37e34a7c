use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Who a request is counted against for admission: the remote IP address.
///
/// Falls back to `unknown` when the server was not started with connect info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn unknown() -> Self {
        Self::new("unknown")
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self(addr.ip().to_string()))
            .unwrap_or_else(Self::unknown)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_the_remote_ip_without_port() {
        let mut req = Request::new(());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 51234))));
        assert_eq!(ClientIdentity::from_request(&req).as_str(), "10.0.0.7");
    }

    #[test]
    fn missing_connect_info_is_unknown() {
        let req = Request::new(());
        assert_eq!(ClientIdentity::from_request(&req), ClientIdentity::unknown());
    }
}
