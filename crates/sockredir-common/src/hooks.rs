//! The three hook handlers.
//!
//! Each handler is built from references to the tables it needs and turns
//! one decoded kernel event into an outcome, possibly mutating the event.
//! Handlers never call each other; the only coupling is the shared tables:
//!
//! ```text
//! connect4  --cookie->dest-->  SOCKETS
//! sockops   --port->cookie-->  PORTS   (client side, after checking SOCKETS)
//! sockops   --cookie->cookie->  PEERS   (proxy's accepted socket -> client)
//! getsockopt  PORTS -> SOCKETS -> sockaddr_in
//! ```
//!
//! Entries of an established connection live until the proxy's accepted
//! socket closes, so the proxy can still resolve a connection whose client
//! has already gone away. A redirected socket that never establishes is
//! reclaimed when it closes.
//!
//! All fields of the event types are in host byte order.

use crate::table::{ConfigSource, CorrelationTable};
use crate::{
    Endpoint, SockaddrIn, AF_INET, BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB,
    BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB, BPF_SOCK_OPS_STATE_CB, BPF_SOCK_OPS_TCP_CONNECT_CB,
    IPPROTO_TCP, LOOPBACK_ADDR, SOL_IP, SO_ORIGINAL_DST, TCP_CLOSE,
};

/// A `connect()` attempt as seen by the connect4 hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub family: u32,
    pub protocol: u32,
    /// Process id (tgid) of the caller.
    pub pid: u64,
    pub cookie: u64,
    /// Requested destination. Rewritten in place when redirected.
    pub dest: Endpoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    PassThrough,
    Redirected,
}

/// Records the original destination and points the attempt at the proxy.
pub struct ConnectInterceptor<'a, C, S> {
    config: &'a C,
    sockets: &'a S,
}

impl<'a, C, S> ConnectInterceptor<'a, C, S>
where
    C: ConfigSource,
    S: CorrelationTable<u64, Endpoint>,
{
    pub fn new(config: &'a C, sockets: &'a S) -> Self {
        Self { config, sockets }
    }

    pub fn on_connect(&self, attempt: &mut ConnectAttempt) -> ConnectOutcome {
        if attempt.family != AF_INET || attempt.protocol != IPPROTO_TCP {
            return ConnectOutcome::PassThrough;
        }

        let Some(config) = self.config.load() else {
            return ConnectOutcome::PassThrough;
        };

        // The proxy's own outbound connections go to the real destination.
        if attempt.pid == config.proxy_pid {
            return ConnectOutcome::PassThrough;
        }

        // Without a recorded destination the proxy could never resolve this
        // connection, so leave it alone.
        if self.sockets.upsert(&attempt.cookie, &attempt.dest).is_err() {
            return ConnectOutcome::PassThrough;
        }

        attempt.dest = Endpoint::new(LOOPBACK_ADDR, config.proxy_port);
        ConnectOutcome::Redirected
    }
}

/// The sockops callbacks the observer distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockOp {
    TcpConnect,
    ActiveEstablished,
    PassiveEstablished,
    StateChange { old_state: u32, new_state: u32 },
    Other(u32),
}

impl SockOp {
    /// Decode a raw `bpf_sock_ops.op` with its first two arguments.
    pub fn from_raw(op: u32, arg0: u32, arg1: u32) -> Self {
        match op {
            BPF_SOCK_OPS_TCP_CONNECT_CB => SockOp::TcpConnect,
            BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB => SockOp::ActiveEstablished,
            BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB => SockOp::PassiveEstablished,
            BPF_SOCK_OPS_STATE_CB => SockOp::StateChange {
                old_state: arg0,
                new_state: arg1,
            },
            other => SockOp::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockOpEvent {
    pub family: u32,
    pub op: SockOp,
    pub cookie: u64,
    /// Locally bound port of the socket.
    pub local_port: u16,
    /// Port of the other end.
    pub remote_port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverOutcome {
    Ignored,
    /// The socket was redirected; state-change callbacks should be enabled
    /// so it can be reclaimed if it closes before establishing.
    Track,
    /// Port entry written. Also implies `Track`.
    Recorded,
    /// The proxy accepted a redirected connection; its socket now owns the
    /// entries and is tracked until it closes.
    Paired,
    /// Entries owned by a closing socket were removed.
    Evicted,
}

impl ObserverOutcome {
    pub fn wants_state_callbacks(self) -> bool {
        matches!(
            self,
            ObserverOutcome::Track | ObserverOutcome::Recorded | ObserverOutcome::Paired
        )
    }
}

/// Links a redirected socket's local port to its cookie once the connection
/// to the proxy is established, and reclaims entries when their owner closes.
///
/// The client socket owns its entries until it establishes. After that the
/// proxy's accepted socket owns them, through a `PEERS` entry from its cookie
/// to the client cookie.
pub struct EstablishedObserver<'a, C, S, P, R> {
    config: &'a C,
    sockets: &'a S,
    ports: &'a P,
    peers: &'a R,
}

impl<'a, C, S, P, R> EstablishedObserver<'a, C, S, P, R>
where
    C: ConfigSource,
    S: CorrelationTable<u64, Endpoint>,
    P: CorrelationTable<u16, u64>,
    R: CorrelationTable<u64, u64>,
{
    pub fn new(config: &'a C, sockets: &'a S, ports: &'a P, peers: &'a R) -> Self {
        Self {
            config,
            sockets,
            ports,
            peers,
        }
    }

    pub fn on_sock_op(&self, event: &SockOpEvent) -> ObserverOutcome {
        if event.family != AF_INET {
            return ObserverOutcome::Ignored;
        }

        match event.op {
            SockOp::TcpConnect => self.claim_port(event),
            SockOp::ActiveEstablished => {
                // Sockets we never redirected (the proxy's egress) have no entry.
                if self.sockets.lookup(&event.cookie).is_none() {
                    return ObserverOutcome::Ignored;
                }
                match self.ports.upsert(&event.local_port, &event.cookie) {
                    Ok(()) => ObserverOutcome::Recorded,
                    Err(_) => ObserverOutcome::Track,
                }
            }
            SockOp::PassiveEstablished => self.pair(event),
            SockOp::StateChange { new_state, .. } if new_state == TCP_CLOSE => self.on_close(event),
            _ => ObserverOutcome::Ignored,
        }
    }

    /// The port is bound by now. A port entry left by an earlier connection
    /// on the same port is stale, and so is that connection's socket entry.
    fn claim_port(&self, event: &SockOpEvent) -> ObserverOutcome {
        if self.sockets.lookup(&event.cookie).is_none() {
            return ObserverOutcome::Ignored;
        }

        if let Some(previous) = self.ports.lookup(&event.local_port) {
            if previous != event.cookie {
                let _ = self.ports.remove(&event.local_port);
                let _ = self.sockets.remove(&previous);
            }
        }

        ObserverOutcome::Track
    }

    fn pair(&self, event: &SockOpEvent) -> ObserverOutcome {
        let Some(config) = self.config.load() else {
            return ObserverOutcome::Ignored;
        };
        if event.local_port != config.proxy_port {
            return ObserverOutcome::Ignored;
        }

        // From the accepted side the client's source port is the remote port.
        let Some(client) = self.ports.lookup(&event.remote_port) else {
            return ObserverOutcome::Ignored;
        };
        match self.peers.upsert(&event.cookie, &client) {
            Ok(()) => ObserverOutcome::Paired,
            Err(_) => ObserverOutcome::Ignored,
        }
    }

    fn on_close(&self, event: &SockOpEvent) -> ObserverOutcome {
        if let Some(client) = self.peers.lookup(&event.cookie) {
            let mut evicted = self.peers.remove(&event.cookie).is_ok();
            evicted |= self.sockets.remove(&client).is_ok();

            // The port may already belong to a newer connection.
            if self.ports.lookup(&event.remote_port) == Some(client) {
                evicted |= self.ports.remove(&event.remote_port).is_ok();
            }
            return outcome(evicted);
        }

        if self.sockets.lookup(&event.cookie).is_none() {
            return ObserverOutcome::Ignored;
        }

        // Established client: the entries stay until the accepted socket closes.
        if self.ports.lookup(&event.local_port) == Some(event.cookie) {
            return ObserverOutcome::Ignored;
        }

        outcome(self.sockets.remove(&event.cookie).is_ok())
    }
}

fn outcome(evicted: bool) -> ObserverOutcome {
    if evicted {
        ObserverOutcome::Evicted
    } else {
        ObserverOutcome::Ignored
    }
}

/// A `getsockopt()` call as seen by the getsockopt hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OriginalDstQuery {
    pub level: i32,
    pub optname: i32,
    pub family: u32,
    pub protocol: u32,
    /// Remote port of the accepted socket, i.e. the client's source port.
    pub peer_port: u16,
    /// Bytes available in the caller's option buffer.
    pub capacity: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OriginalDstAnswer {
    pub family: u16,
    pub dest: Endpoint,
}

impl OriginalDstAnswer {
    pub fn to_sockaddr(&self) -> SockaddrIn {
        SockaddrIn::new(self.family, self.dest)
    }
}

/// Answers `SO_ORIGINAL_DST` from the correlation tables.
pub struct OriginalDstResolver<'a, S, P> {
    sockets: &'a S,
    ports: &'a P,
}

impl<'a, S, P> OriginalDstResolver<'a, S, P>
where
    S: CorrelationTable<u64, Endpoint>,
    P: CorrelationTable<u16, u64>,
{
    pub fn new(sockets: &'a S, ports: &'a P) -> Self {
        Self { sockets, ports }
    }

    /// Returns `None` when the call should pass through untouched.
    pub fn on_getsockopt(&self, query: &OriginalDstQuery) -> Option<OriginalDstAnswer> {
        if query.level != SOL_IP || query.optname != SO_ORIGINAL_DST {
            return None;
        }
        if query.family != AF_INET || query.protocol != IPPROTO_TCP {
            return None;
        }

        let cookie = self.ports.lookup(&query.peer_port)?;
        let dest = self.sockets.lookup(&cookie)?;

        if query.capacity < SockaddrIn::LEN {
            return None;
        }

        Some(OriginalDstAnswer {
            family: query.family as u16,
            dest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableError;
    use crate::ProxyConfig;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    const PROXY_PID: u64 = 4242;
    const PROXY_PORT: u16 = 15001;

    struct TestTable<K, V> {
        entries: RefCell<BTreeMap<K, V>>,
        fail_writes: Cell<bool>,
    }

    impl<K: Ord, V> TestTable<K, V> {
        fn new() -> Self {
            Self {
                entries: RefCell::new(BTreeMap::new()),
                fail_writes: Cell::new(false),
            }
        }

        fn len(&self) -> usize {
            self.entries.borrow().len()
        }
    }

    impl<K: Ord + Copy, V: Copy> CorrelationTable<K, V> for TestTable<K, V> {
        fn lookup(&self, key: &K) -> Option<V> {
            self.entries.borrow().get(key).copied()
        }

        fn upsert(&self, key: &K, value: &V) -> Result<(), TableError> {
            if self.fail_writes.get() {
                return Err(TableError::FULL);
            }
            self.entries.borrow_mut().insert(*key, *value);
            Ok(())
        }

        fn remove(&self, key: &K) -> Result<(), TableError> {
            self.entries
                .borrow_mut()
                .remove(key)
                .map(|_| ())
                .ok_or(TableError::NOT_FOUND)
        }
    }

    struct TestConfig(Option<ProxyConfig>);

    impl ConfigSource for TestConfig {
        fn load(&self) -> Option<ProxyConfig> {
            self.0
        }
    }

    fn config() -> TestConfig {
        TestConfig(Some(ProxyConfig::new(PROXY_PORT, PROXY_PID)))
    }

    fn attempt(pid: u64, cookie: u64, dest: Endpoint) -> ConnectAttempt {
        ConnectAttempt {
            family: AF_INET,
            protocol: IPPROTO_TCP,
            pid,
            cookie,
            dest,
        }
    }

    fn query(peer_port: u16) -> OriginalDstQuery {
        OriginalDstQuery {
            level: SOL_IP,
            optname: SO_ORIGINAL_DST,
            family: AF_INET,
            protocol: IPPROTO_TCP,
            peer_port,
            capacity: SockaddrIn::LEN,
        }
    }

    struct Tables {
        config: TestConfig,
        sockets: TestTable<u64, Endpoint>,
        ports: TestTable<u16, u64>,
        peers: TestTable<u64, u64>,
    }

    impl Tables {
        fn new() -> Self {
            Self {
                config: config(),
                sockets: TestTable::new(),
                ports: TestTable::new(),
                peers: TestTable::new(),
            }
        }

        fn observe(&self, event: &SockOpEvent) -> ObserverOutcome {
            EstablishedObserver::new(&self.config, &self.sockets, &self.ports, &self.peers)
                .on_sock_op(event)
        }
    }

    fn event(op: SockOp, cookie: u64, local_port: u16, remote_port: u16) -> SockOpEvent {
        SockOpEvent {
            family: AF_INET,
            op,
            cookie,
            local_port,
            remote_port,
        }
    }

    fn established(cookie: u64, local_port: u16) -> SockOpEvent {
        event(SockOp::ActiveEstablished, cookie, local_port, PROXY_PORT)
    }

    fn accepted(cookie: u64, client_port: u16) -> SockOpEvent {
        event(SockOp::PassiveEstablished, cookie, PROXY_PORT, client_port)
    }

    fn closed(cookie: u64, local_port: u16, remote_port: u16) -> SockOpEvent {
        event(
            SockOp::StateChange {
                old_state: 1,
                new_state: TCP_CLOSE,
            },
            cookie,
            local_port,
            remote_port,
        )
    }

    #[test]
    fn test_connect_redirects_to_proxy() {
        let cfg = config();
        let sockets = TestTable::new();
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let original = Endpoint::new(0x5db8_d822, 443);
        let mut a = attempt(1000, 7, original);
        assert_eq!(interceptor.on_connect(&mut a), ConnectOutcome::Redirected);
        assert_eq!(a.dest, Endpoint::new(LOOPBACK_ADDR, PROXY_PORT));
        assert_eq!(sockets.lookup(&7), Some(original));
    }

    #[test]
    fn test_connect_overwrites_existing_entry() {
        let cfg = config();
        let sockets = TestTable::new();
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let mut first = attempt(1000, 7, Endpoint::new(1, 80));
        let mut second = attempt(1000, 7, Endpoint::new(2, 81));
        interceptor.on_connect(&mut first);
        interceptor.on_connect(&mut second);
        assert_eq!(sockets.lookup(&7), Some(Endpoint::new(2, 81)));
    }

    #[test]
    fn test_connect_from_proxy_is_untouched() {
        let cfg = config();
        let sockets = TestTable::new();
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let mut a = attempt(PROXY_PID, 9, Endpoint::new(0x0808_0808, 53));
        let before = a;
        assert_eq!(interceptor.on_connect(&mut a), ConnectOutcome::PassThrough);
        assert_eq!(a, before);
        assert_eq!(sockets.len(), 0);
    }

    #[test]
    fn test_connect_out_of_scope() {
        let cfg = config();
        let sockets = TestTable::new();
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let mut udp = attempt(1000, 1, Endpoint::new(0x0808_0808, 53));
        udp.protocol = 17;
        let mut v6 = attempt(1000, 2, Endpoint::new(0x0808_0808, 443));
        v6.family = 10;

        for a in [&mut udp, &mut v6] {
            let before = *a;
            assert_eq!(interceptor.on_connect(a), ConnectOutcome::PassThrough);
            assert_eq!(*a, before);
        }
        assert_eq!(sockets.len(), 0);
    }

    #[test]
    fn test_connect_without_config() {
        let cfg = TestConfig(None);
        let sockets = TestTable::new();
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let mut a = attempt(1000, 1, Endpoint::new(0x0a00_0001, 22));
        let before = a;
        assert_eq!(interceptor.on_connect(&mut a), ConnectOutcome::PassThrough);
        assert_eq!(a, before);
    }

    #[test]
    fn test_connect_insert_failure_leaves_destination() {
        let cfg = config();
        let sockets = TestTable::new();
        sockets.fail_writes.set(true);
        let interceptor = ConnectInterceptor::new(&cfg, &sockets);

        let mut a = attempt(1000, 1, Endpoint::new(0x0a00_0001, 22));
        let before = a;
        assert_eq!(interceptor.on_connect(&mut a), ConnectOutcome::PassThrough);
        assert_eq!(a, before);
    }

    #[test]
    fn test_established_records_only_redirected_sockets() {
        let t = Tables::new();

        assert_eq!(t.observe(&established(5, 40000)), ObserverOutcome::Ignored);
        assert_eq!(t.ports.len(), 0);

        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        assert_eq!(t.observe(&established(5, 40000)), ObserverOutcome::Recorded);
        assert_eq!(t.ports.lookup(&40000), Some(5));
    }

    #[test]
    fn test_observer_ignores_other_ops_and_families() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();

        let mut v6 = established(5, 40000);
        v6.family = 10;
        assert_eq!(t.observe(&v6), ObserverOutcome::Ignored);

        let retransmit = event(SockOp::from_raw(8, 0, 0), 5, 40000, PROXY_PORT);
        assert_eq!(t.observe(&retransmit), ObserverOutcome::Ignored);
        assert_eq!(t.ports.len(), 0);
    }

    #[test]
    fn test_from_raw_decodes_passive_established() {
        assert_eq!(SockOp::from_raw(5, 0, 0), SockOp::PassiveEstablished);
        assert_eq!(
            SockOp::from_raw(BPF_SOCK_OPS_STATE_CB, 1, TCP_CLOSE),
            SockOp::StateChange {
                old_state: 1,
                new_state: TCP_CLOSE
            }
        );
    }

    #[test]
    fn test_tcp_connect_requests_tracking() {
        let t = Tables::new();
        let connect = event(SockOp::TcpConnect, 5, 40000, PROXY_PORT);

        assert!(!t.observe(&connect).wants_state_callbacks());

        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        assert!(t.observe(&connect).wants_state_callbacks());
    }

    #[test]
    fn test_tcp_connect_drops_stale_port_entry() {
        let t = Tables::new();
        t.sockets.upsert(&4, &Endpoint::new(1, 80)).unwrap();
        t.sockets.upsert(&5, &Endpoint::new(2, 80)).unwrap();
        t.ports.upsert(&40000, &4).unwrap();

        let connect = event(SockOp::TcpConnect, 5, 40000, PROXY_PORT);
        assert_eq!(t.observe(&connect), ObserverOutcome::Track);
        assert_eq!(t.ports.lookup(&40000), None);
        assert_eq!(t.sockets.lookup(&4), None);
        assert_eq!(t.sockets.lookup(&5), Some(Endpoint::new(2, 80)));
    }

    #[test]
    fn test_close_before_established_evicts_socket_entry() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();

        assert_eq!(
            t.observe(&closed(5, 40000, PROXY_PORT)),
            ObserverOutcome::Evicted
        );
        assert_eq!(t.sockets.len(), 0);
    }

    #[test]
    fn test_client_close_after_established_keeps_entries() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        t.observe(&established(5, 40000));

        assert_eq!(
            t.observe(&closed(5, 40000, PROXY_PORT)),
            ObserverOutcome::Ignored
        );
        assert_eq!(t.sockets.lookup(&5), Some(Endpoint::new(1, 80)));
        assert_eq!(t.ports.lookup(&40000), Some(5));
    }

    #[test]
    fn test_accepted_socket_pairs_with_client() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        t.observe(&established(5, 40000));

        let outcome = t.observe(&accepted(90, 40000));
        assert_eq!(outcome, ObserverOutcome::Paired);
        assert!(outcome.wants_state_callbacks());
        assert_eq!(t.peers.lookup(&90), Some(5));
    }

    #[test]
    fn test_accept_on_other_port_or_unknown_peer_ignored() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        t.observe(&established(5, 40000));

        let other_server = event(SockOp::PassiveEstablished, 90, 8080, 40000);
        assert_eq!(t.observe(&other_server), ObserverOutcome::Ignored);
        assert_eq!(t.observe(&accepted(91, 40001)), ObserverOutcome::Ignored);
        assert_eq!(t.peers.len(), 0);

        let missing = Tables {
            config: TestConfig(None),
            ..Tables::new()
        };
        missing.ports.upsert(&40000, &5).unwrap();
        assert_eq!(missing.observe(&accepted(90, 40000)), ObserverOutcome::Ignored);
    }

    #[test]
    fn test_accepted_close_evicts_entries() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        t.observe(&established(5, 40000));
        t.observe(&accepted(90, 40000));

        assert_eq!(
            t.observe(&closed(90, PROXY_PORT, 40000)),
            ObserverOutcome::Evicted
        );
        assert_eq!(t.sockets.len(), 0);
        assert_eq!(t.ports.len(), 0);
        assert_eq!(t.peers.len(), 0);
    }

    #[test]
    fn test_accepted_close_keeps_port_owned_by_newer_socket() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        t.sockets.upsert(&6, &Endpoint::new(2, 80)).unwrap();
        t.observe(&established(5, 40000));
        t.observe(&accepted(90, 40000));
        t.observe(&established(6, 40000));

        t.observe(&closed(90, PROXY_PORT, 40000));
        assert_eq!(t.ports.lookup(&40000), Some(6));
        assert_eq!(t.sockets.lookup(&6), Some(Endpoint::new(2, 80)));
        assert_eq!(t.sockets.lookup(&5), None);
    }

    #[test]
    fn test_non_close_state_change_ignored() {
        let t = Tables::new();
        t.sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();

        let fin_wait = event(
            SockOp::from_raw(BPF_SOCK_OPS_STATE_CB, 1, 4),
            5,
            40000,
            PROXY_PORT,
        );
        assert_eq!(t.observe(&fin_wait), ObserverOutcome::Ignored);
        assert_eq!(t.sockets.len(), 1);
    }

    #[test]
    fn test_resolve_chains_port_and_cookie() {
        let sockets = TestTable::new();
        let ports = TestTable::new();
        sockets.upsert(&5, &Endpoint::new(0x5db8_d822, 443)).unwrap();
        ports.upsert(&40000, &5).unwrap();
        let resolver = OriginalDstResolver::new(&sockets, &ports);

        let answer = resolver.on_getsockopt(&query(40000)).unwrap();
        assert_eq!(answer.family, AF_INET as u16);
        assert_eq!(answer.dest, Endpoint::new(0x5db8_d822, 443));
        assert_eq!(answer.to_sockaddr().endpoint(), answer.dest);
    }

    #[test]
    fn test_resolve_passes_through_on_misses() {
        let sockets = TestTable::new();
        let ports = TestTable::new();
        let resolver = OriginalDstResolver::new(&sockets, &ports);

        assert_eq!(resolver.on_getsockopt(&query(40000)), None);

        // Port known, socket entry gone.
        ports.upsert(&40000, &5).unwrap();
        assert_eq!(resolver.on_getsockopt(&query(40000)), None);
    }

    #[test]
    fn test_resolve_scope_and_buffer_checks() {
        let sockets = TestTable::new();
        let ports = TestTable::new();
        sockets.upsert(&5, &Endpoint::new(1, 80)).unwrap();
        ports.upsert(&40000, &5).unwrap();
        let resolver = OriginalDstResolver::new(&sockets, &ports);

        let mut other_opt = query(40000);
        other_opt.optname = 1;
        let mut other_level = query(40000);
        other_level.level = 1;
        let mut udp = query(40000);
        udp.protocol = 17;
        let mut v6 = query(40000);
        v6.family = 10;
        let mut small = query(40000);
        small.capacity = SockaddrIn::LEN - 1;

        for q in [other_opt, other_level, udp, v6, small] {
            assert_eq!(resolver.on_getsockopt(&q), None);
        }
        assert!(resolver.on_getsockopt(&query(40000)).is_some());
    }
}
