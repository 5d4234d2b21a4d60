use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Public IP lookup service queried when the public address is requested.
pub const PUBLIC_IP_SERVICE: &str = "https://api.meineip.eu/?format=json";

/// Address of the interface that routes to the internet, or loopback if
/// there is none. Connecting a UDP socket sends no packets.
///
/// Interfaces are not enumerated: on a host with a LAN address but no
/// default route this returns loopback. Pass `--announce-host` there.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("192.0.2.1:9")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!(error = %e, "no routable local address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ipaddress: String,
}

/// Looks up the public address via an HTTPS JSON service, falling back to
/// [`local_ip`] on any failure.
#[derive(Clone)]
pub struct PublicIpResolver {
    client: reqwest::Client,
    url: String,
}

impl PublicIpResolver {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build public ip client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn lookup(&self) -> Result<IpAddr> {
        let res = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("query public ip service")?
            .error_for_status()
            .context("public ip service status")?;
        let body: IpResponse = res.json().await.context("decode public ip response")?;
        body.ipaddress
            .trim()
            .parse()
            .with_context(|| format!("public ip service returned {:?}", body.ipaddress))
    }

    pub async fn resolve(&self) -> IpAddr {
        match self.lookup().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "public ip lookup failed, falling back to local address");
                local_ip()
            }
        }
    }
}

/// Host part of a URL for `ip`; IPv6 addresses are bracketed.
pub fn host_for_url(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
        _ => host.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(host_for_url("10.1.2.3"), "10.1.2.3");
        assert_eq!(host_for_url("fe80::1"), "[fe80::1]");
        assert_eq!(host_for_url("share.local"), "share.local");
    }

    #[test]
    fn local_ip_is_never_unspecified() {
        assert!(!local_ip().is_unspecified());
    }

    #[tokio::test]
    async fn public_ip_is_read_from_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ipaddress": "203.0.113.7",
                "ipversion": "4"
            })))
            .mount(&server)
            .await;

        let resolver = PublicIpResolver::new(format!("{}/", server.uri())).unwrap();
        assert_eq!(
            resolver.lookup().await.unwrap(),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn service_error_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = PublicIpResolver::new(server.uri()).unwrap();
        assert!(resolver.lookup().await.is_err());
        assert_eq!(resolver.resolve().await, local_ip());
    }

    #[tokio::test]
    async fn garbage_address_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ipaddress": "nope"})),
            )
            .mount(&server)
            .await;

        let resolver = PublicIpResolver::new(server.uri()).unwrap();
        assert!(resolver.lookup().await.is_err());
    }
}
