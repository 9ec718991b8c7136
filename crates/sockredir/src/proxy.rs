//! The proxy side of the contract: accepting redirected connections and
//! asking the kernel for their original destination.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use sockredir_common::{SOL_IP, SO_ORIGINAL_DST};

/// A connection accepted on the proxy port.
#[derive(Debug)]
pub struct AcceptedConnection {
    /// Client address as seen by the proxy; its port is the key the
    /// getsockopt hook resolves.
    pub peer: SocketAddr,
    /// `None` when no original destination is available.
    pub original_dst: Option<SocketAddrV4>,
    pub stream: TcpStream,
}

/// Accept loop: resolve each accepted connection and hand it to `tx`.
///
/// Returns when the receiver is dropped.
pub async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<AcceptedConnection>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let original_dst = original_dst(&stream);
                if original_dst.is_none() {
                    tracing::debug!(
                        peer = %peer,
                        "no original destination for accepted connection"
                    );
                }

                let conn = AcceptedConnection {
                    peer,
                    original_dst,
                    stream,
                };
                if tx.send(conn).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "accept error");
            }
        }
    }
}

/// Query `SO_ORIGINAL_DST` on an accepted socket.
///
/// Inside an intercepted cgroup the getsockopt hook answers this from the
/// correlation tables.
pub fn original_dst(stream: &TcpStream) -> Option<SocketAddrV4> {
    let fd = stream.as_raw_fd();
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            SOL_IP,
            SO_ORIGINAL_DST,
            &mut addr as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if ret != 0 || (len as usize) < std::mem::size_of::<libc::sockaddr_in>() {
        return None;
    }
    if addr.sin_family != libc::AF_INET as libc::sa_family_t {
        return None;
    }

    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    Some(SocketAddrV4::new(ip, port))
}
