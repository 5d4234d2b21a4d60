use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

/// Trust-on-first-connect admission: the first `max_clients` distinct client
/// addresses are trusted for the rest of the process, everyone else is
/// turned away.
///
/// One gate is shared by every endpoint of a server, so a client trusted on
/// one share is trusted on all of them. The admitted set never shrinks.
#[derive(Debug)]
pub struct TrustGate {
    max_clients: usize,
    admitted: Mutex<HashSet<IpAddr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already trusted.
    Known,
    /// Trusted just now; carries the new number of admitted clients.
    Admitted(usize),
    /// Gate is closed to new clients.
    Rejected,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

impl TrustGate {
    /// A negative `max_clients` disables the gate, in which case no gate is
    /// built. Zero builds a gate that admits nobody.
    pub fn new(max_clients: i64) -> Option<Self> {
        let max_clients = usize::try_from(max_clients).ok()?;
        Some(Self {
            max_clients,
            admitted: Mutex::new(HashSet::new()),
        })
    }

    /// Check-and-possibly-insert under the gate lock.
    pub fn admit(&self, client: IpAddr) -> Admission {
        let mut admitted = self.admitted.lock().unwrap_or_else(PoisonError::into_inner);
        if admitted.contains(&client) {
            return Admission::Known;
        }
        if admitted.len() < self.max_clients {
            admitted.insert(client);
            return Admission::Admitted(admitted.len());
        }
        Admission::Rejected
    }

    pub fn is_open(&self) -> bool {
        self.admitted_count() < self.max_clients
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

/// Address-only trust key for a connection. IPv4-mapped IPv6 addresses
/// collapse onto their IPv4 form.
pub fn client_key(addr: SocketAddr) -> IpAddr {
    addr.ip().to_canonical()
}

/// Remote address of the connection a request arrived on, if the server was
/// started with connect info.
pub fn remote_addr<B>(request: &http::Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Axum middleware enforcing a shared [`TrustGate`]. Requests without a
/// usable remote address are rejected without consuming a slot.
pub async fn trust_on_first_connect(
    State(gate): State<Arc<TrustGate>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(addr) = remote_addr(&request) else {
        warn!("remote address unavailable, blocking request");
        return unauthorized();
    };
    let client = client_key(addr);

    match gate.admit(client) {
        Admission::Known => {
            debug!(%client, "trusted client");
        }
        Admission::Admitted(n) => {
            info!(%client, admitted = n, max = gate.max_clients, "trusting client");
        }
        Admission::Rejected => {
            warn!(%client, max = gate.max_clients, "blocking client: trust limit reached");
            return unauthorized();
        }
    }

    next.run(request).await
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::thread;

    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn negative_ceiling_disables_gate() {
        assert!(TrustGate::new(-1).is_none());
    }

    #[test]
    fn zero_ceiling_admits_nobody() {
        let gate = TrustGate::new(0).unwrap();
        assert!(!gate.is_open());
        assert_eq!(gate.admit(ip(1)), Admission::Rejected);
        assert_eq!(gate.admitted_count(), 0);
    }

    #[test]
    fn closes_after_ceiling_but_keeps_known_clients() {
        let gate = TrustGate::new(2).unwrap();
        assert_eq!(gate.admit(ip(1)), Admission::Admitted(1));
        assert!(gate.is_open());
        assert_eq!(gate.admit(ip(1)), Admission::Known);
        assert_eq!(gate.admit(ip(2)), Admission::Admitted(2));
        assert!(!gate.is_open());

        assert_eq!(gate.admit(ip(3)), Admission::Rejected);
        assert_eq!(gate.admit(ip(4)), Admission::Rejected);
        for _ in 0..10 {
            assert_eq!(gate.admit(ip(1)), Admission::Known);
            assert_eq!(gate.admit(ip(2)), Admission::Known);
        }
        assert_eq!(gate.admitted_count(), 2);
    }

    #[test]
    fn port_is_not_part_of_the_key() {
        let a: SocketAddr = "192.168.1.5:50000".parse().unwrap();
        let b: SocketAddr = "192.168.1.5:50001".parse().unwrap();
        assert_eq!(client_key(a), client_key(b));
    }

    #[test]
    fn mapped_ipv6_collapses_to_ipv4() {
        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv4Addr::new(192, 168, 1, 5).to_ipv6_mapped()),
            80,
        );
        assert_eq!(
            client_key(mapped),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))
        );
        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 80);
        assert_eq!(client_key(v6), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn concurrent_clients_within_ceiling_are_all_admitted() {
        let gate = Arc::new(TrustGate::new(32).unwrap());
        let handles: Vec<_> = (0..32u8)
            .map(|n| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.admit(ip(n)))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_accepted());
        }
        for n in 0..32u8 {
            assert_eq!(gate.admit(ip(n)), Admission::Known);
        }
    }

    #[test]
    fn concurrent_clients_beyond_ceiling_admit_exactly_ceiling() {
        let gate = Arc::new(TrustGate::new(5).unwrap());
        let handles: Vec<_> = (0..50u8)
            .map(|n| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || (n, gate.admit(ip(n))))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted: Vec<u8> = results
            .iter()
            .filter(|(_, a)| a.is_accepted())
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(admitted.len(), 5);
        for (n, a) in &results {
            let again = gate.admit(ip(*n));
            assert_eq!(a.is_accepted(), again.is_accepted());
        }
    }
}
