#![cfg_attr(not(any(feature = "user", test)), no_std)]

pub mod hooks;
pub mod table;

/// Capacity of each correlation table.
pub const MAX_CONNECTIONS: u32 = 20_000;

pub const AF_INET: u32 = 2;
pub const IPPROTO_TCP: u32 = 6;

/// `getsockopt` level and option the proxy uses to ask for the original destination.
pub const SOL_IP: i32 = 0;
pub const SO_ORIGINAL_DST: i32 = 80;

/// 127.0.0.1 in host byte order.
pub const LOOPBACK_ADDR: u32 = 0x7f00_0001;

// sockops callback ids and flags (include/uapi/linux/bpf.h).
pub const BPF_SOCK_OPS_TCP_CONNECT_CB: u32 = 3;
pub const BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB: u32 = 4;
pub const BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB: u32 = 5;
pub const BPF_SOCK_OPS_STATE_CB: u32 = 10;
pub const BPF_SOCK_OPS_STATE_CB_FLAG: i32 = 1 << 2;

/// `TCP_CLOSE` from the kernel's TCP state enum.
pub const TCP_CLOSE: u32 = 7;

/// Names shared by the loader and the kernel programs.
pub mod names {
    pub const CONFIG_MAP: &str = "CONFIG";
    pub const SOCKET_MAP: &str = "SOCKETS";
    pub const PORT_MAP: &str = "PORTS";
    pub const PEER_MAP: &str = "PEERS";

    pub const CONNECT_PROGRAM: &str = "redirect_connect4";
    pub const SOCKOPS_PROGRAM: &str = "observe_established";
    pub const GETSOCKOPT_PROGRAM: &str = "resolve_original_dst";
}

/// Configuration record written once by the loader (array index 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy listening port in host byte order.
    pub proxy_port: u16,
    pub _pad: [u8; 6],
    /// Process id (tgid) of the proxy; its own connects are never redirected.
    pub proxy_pid: u64,
}

impl ProxyConfig {
    pub const fn new(proxy_port: u16, proxy_pid: u64) -> Self {
        Self {
            proxy_port,
            _pad: [0; 6],
            proxy_pid,
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProxyConfig {}

/// An IPv4 address and port, both in host byte order.
///
/// This is the value stored in the socket table. Conversion from and to the
/// network-order fields of kernel contexts happens only in the eBPF crate.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: u32,
    pub port: u16,
    pub _pad: u16,
}

impl Endpoint {
    pub const fn new(addr: u32, port: u16) -> Self {
        Self { addr, port, _pad: 0 }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for Endpoint {}

#[cfg(feature = "user")]
impl From<Endpoint> for std::net::SocketAddrV4 {
    fn from(ep: Endpoint) -> Self {
        std::net::SocketAddrV4::new(std::net::Ipv4Addr::from(ep.addr), ep.port)
    }
}

#[cfg(feature = "user")]
impl From<std::net::SocketAddrV4> for Endpoint {
    fn from(addr: std::net::SocketAddrV4) -> Self {
        Endpoint::new(u32::from(*addr.ip()), addr.port())
    }
}

/// Wire layout of `struct sockaddr_in`, as returned for `SO_ORIGINAL_DST`.
///
/// `port` and `addr` are in network byte order.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockaddrIn {
    pub family: u16,
    pub port: u16,
    pub addr: u32,
    pub zero: [u8; 8],
}

impl SockaddrIn {
    pub const LEN: usize = core::mem::size_of::<SockaddrIn>();

    pub fn new(family: u16, dest: Endpoint) -> Self {
        Self {
            family,
            port: dest.port.to_be(),
            addr: dest.addr.to_be(),
            zero: [0; 8],
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(u32::from_be(self.addr), u16::from_be(self.port))
    }
}
