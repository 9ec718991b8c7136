#![no_std]
#![no_main]

mod maps;

use aya_ebpf::{
    helpers::bpf_get_socket_cookie,
    macros::{cgroup_sock_addr, cgroup_sockopt, sock_ops},
    programs::{SockAddrContext, SockOpsContext, SockoptContext},
    EbpfContext,
};
use aya_log_ebpf::debug;
use sockredir_common::hooks::{
    ConnectAttempt, ConnectInterceptor, ConnectOutcome, EstablishedObserver, ObserverOutcome,
    OriginalDstQuery, OriginalDstResolver, SockOp, SockOpEvent,
};
use sockredir_common::{Endpoint, SockaddrIn, BPF_SOCK_OPS_STATE_CB_FLAG};

use crate::maps::{BpfConfig, BpfTable, PEERS, PORTS, SOCKETS};

// --- Program 1: cgroup/connect4 ---
// Records the requested destination and redirects the connect() to the proxy.

#[cgroup_sock_addr(connect4)]
pub fn redirect_connect4(ctx: SockAddrContext) -> i32 {
    let sock_addr = ctx.sock_addr;

    // user_ip4 is network order; user_port carries the network-order port
    // in its low 16 bits.
    let mut attempt = unsafe {
        ConnectAttempt {
            family: (*sock_addr).user_family,
            protocol: (*sock_addr).protocol,
            pid: ctx.tgid() as u64,
            cookie: bpf_get_socket_cookie(ctx.as_ptr()),
            dest: Endpoint::new(
                u32::from_be((*sock_addr).user_ip4),
                u16::from_be((*sock_addr).user_port as u16),
            ),
        }
    };
    let original = attempt.dest;

    let sockets = BpfTable(&SOCKETS);
    let interceptor = ConnectInterceptor::new(&BpfConfig, &sockets);

    if interceptor.on_connect(&mut attempt) == ConnectOutcome::Redirected {
        unsafe {
            (*sock_addr).user_ip4 = attempt.dest.addr.to_be();
            (*sock_addr).user_port = attempt.dest.port.to_be() as u32;
        }
        debug!(
            &ctx,
            "redirect {:i}:{} -> proxy port {}",
            original.addr,
            original.port,
            attempt.dest.port
        );
    }

    // Never block a connect.
    1
}

// --- Program 2: sockops ---
// Links the local port to the cookie once the redirected connection is
// established, pairs the proxy's accepted socket with it, and evicts the
// entries when their owning socket closes.

#[sock_ops]
pub fn observe_established(ctx: SockOpsContext) -> u32 {
    match try_observe(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0,
    }
}

fn try_observe(ctx: &SockOpsContext) -> Result<u32, i64> {
    let op = SockOp::from_raw(ctx.op(), ctx.arg(0), ctx.arg(1));
    if let SockOp::Other(_) = op {
        return Ok(0);
    }

    let event = SockOpEvent {
        family: ctx.family(),
        op,
        cookie: unsafe { bpf_get_socket_cookie(ctx.as_ptr()) },
        // local_port is host order; remote_port is the network-order port
        // in the upper 16 bits.
        local_port: ctx.local_port() as u16,
        remote_port: u32::from_be(ctx.remote_port()) as u16,
    };

    let sockets = BpfTable(&SOCKETS);
    let ports = BpfTable(&PORTS);
    let peers = BpfTable(&PEERS);
    let outcome =
        EstablishedObserver::new(&BpfConfig, &sockets, &ports, &peers).on_sock_op(&event);

    if outcome.wants_state_callbacks() {
        let flags = unsafe { (*ctx.ops).bpf_sock_ops_cb_flags } as i32;
        ctx.set_cb_flags(flags | BPF_SOCK_OPS_STATE_CB_FLAG)?;
    }

    if outcome == ObserverOutcome::Recorded {
        debug!(ctx, "port {} -> cookie {}", event.local_port, event.cookie);
    } else if outcome == ObserverOutcome::Paired {
        debug!(
            ctx,
            "accepted cookie {} for port {}",
            event.cookie,
            event.remote_port
        );
    } else if outcome == ObserverOutcome::Evicted {
        debug!(ctx, "evicted cookie {}", event.cookie);
    }

    Ok(0)
}

// --- Program 3: cgroup/getsockopt ---
// Answers SO_ORIGINAL_DST on the proxy's accepted socket from the tables.

#[cgroup_sockopt(getsockopt)]
pub fn resolve_original_dst(ctx: SockoptContext) -> i32 {
    let sockopt = ctx.sockopt;

    let (sk, optval, optval_end) = unsafe {
        (
            (*sockopt).__bindgen_anon_1.sk,
            (*sockopt).__bindgen_anon_2.optval as *mut u8,
            (*sockopt).__bindgen_anon_3.optval_end as *mut u8,
        )
    };
    if sk.is_null() {
        return 1;
    }

    // The verifier only learns the buffer size from a direct comparison
    // against optval_end.
    let capacity = if fits(optval, optval_end, SockaddrIn::LEN) {
        SockaddrIn::LEN
    } else {
        0
    };

    // From the proxy side the client's source port is the remote port.
    let query = unsafe {
        OriginalDstQuery {
            level: (*sockopt).level,
            optname: (*sockopt).optname,
            family: (*sk).family,
            protocol: (*sk).protocol,
            peer_port: u16::from_be((*sk).dst_port as u16),
            capacity,
        }
    };

    let sockets = BpfTable(&SOCKETS);
    let ports = BpfTable(&PORTS);
    let Some(answer) = OriginalDstResolver::new(&sockets, &ports).on_getsockopt(&query) else {
        return 1;
    };

    if !fits(optval, optval_end, SockaddrIn::LEN) {
        return 1;
    }
    unsafe {
        core::ptr::write_unaligned(optval as *mut SockaddrIn, answer.to_sockaddr());
        (*sockopt).optlen = SockaddrIn::LEN as i32;
        (*sockopt).retval = 0;
    }

    debug!(
        &ctx,
        "resolved port {} -> {:i}:{}",
        query.peer_port,
        answer.dest.addr,
        answer.dest.port
    );

    1
}

#[inline(always)]
fn fits(start: *mut u8, end: *mut u8, len: usize) -> bool {
    (start as usize + len) <= end as usize
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
