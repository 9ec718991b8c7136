use std::fs::File;
use std::path::{Path, PathBuf};

use aya::maps::{Array, HashMap as AyaHashMap, MapData};
use aya::programs::{
    CgroupAttachMode, CgroupSockAddr, CgroupSockopt, Program, ProgramError, SockOps,
};
use aya::Ebpf;

use sockredir_common::{names, Endpoint, ProxyConfig};

use crate::config::Config;
use crate::error::RedirectError;

/// Control plane for the kernel programs.
///
/// Loads the object, writes the configuration record, and attaches the
/// connect4, sockops and getsockopt programs to one cgroup. Dropping the
/// `Redirector` detaches everything.
pub struct Redirector {
    bpf: Ebpf,
    cgroup: PathBuf,
    proxy: ProxyConfig,
}

/// Current number of entries in each correlation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableUsage {
    pub sockets: usize,
    pub ports: usize,
    pub peers: usize,
}

impl Redirector {
    /// Load and attach, treating `proxy_pid` as the proxy process.
    pub fn attach(config: &Config, proxy_pid: u32) -> Result<Self, RedirectError> {
        config.validate()?;

        let object = &config.bpf.object;
        let mut bpf = Ebpf::load_file(object).map_err(|e| RedirectError::Load {
            path: object.clone(),
            reason: e.to_string(),
        })?;

        // Kernel-side diagnostics only; nothing depends on them.
        if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
            tracing::warn!(error = %e, "eBPF logger not initialised");
        }

        // The record must be in place before any program can fire.
        let proxy = ProxyConfig::new(config.proxy.port, u64::from(proxy_pid));
        {
            let map = bpf
                .map_mut(names::CONFIG_MAP)
                .ok_or(RedirectError::NotFound(names::CONFIG_MAP))?;
            let mut config_map: Array<&mut MapData, ProxyConfig> =
                Array::try_from(map).map_err(|e| map_error(names::CONFIG_MAP, e))?;
            config_map
                .set(0, proxy, 0)
                .map_err(|e| map_error(names::CONFIG_MAP, e))?;
        }

        let cgroup = config.cgroup.path.clone();
        let cgroup_fd = File::open(&cgroup)?;

        {
            let connect4: &mut CgroupSockAddr = program(&mut bpf, names::CONNECT_PROGRAM)?;
            connect4
                .load()
                .map_err(|e| program_error(names::CONNECT_PROGRAM, e))?;
            connect4
                .attach(&cgroup_fd, CgroupAttachMode::AllowMultiple)
                .map_err(|e| attach_error(names::CONNECT_PROGRAM, &cgroup, e))?;
        }

        {
            let sockops: &mut SockOps = program(&mut bpf, names::SOCKOPS_PROGRAM)?;
            sockops
                .load()
                .map_err(|e| program_error(names::SOCKOPS_PROGRAM, e))?;
            sockops
                .attach(&cgroup_fd, CgroupAttachMode::AllowMultiple)
                .map_err(|e| attach_error(names::SOCKOPS_PROGRAM, &cgroup, e))?;
        }

        {
            let getsockopt: &mut CgroupSockopt = program(&mut bpf, names::GETSOCKOPT_PROGRAM)?;
            getsockopt
                .load()
                .map_err(|e| program_error(names::GETSOCKOPT_PROGRAM, e))?;
            getsockopt
                .attach(&cgroup_fd, CgroupAttachMode::AllowMultiple)
                .map_err(|e| attach_error(names::GETSOCKOPT_PROGRAM, &cgroup, e))?;
        }

        tracing::info!(
            cgroup = %cgroup.display(),
            proxy_port = proxy.proxy_port,
            proxy_pid = proxy.proxy_pid,
            "eBPF programs loaded and attached to cgroup"
        );

        Ok(Self { bpf, cgroup, proxy })
    }

    pub fn proxy(&self) -> ProxyConfig {
        self.proxy
    }

    pub fn cgroup(&self) -> &Path {
        &self.cgroup
    }

    /// Count the entries currently held in the kernel tables.
    pub fn table_usage(&self) -> Result<TableUsage, RedirectError> {
        let sockets: AyaHashMap<&MapData, u64, Endpoint> = AyaHashMap::try_from(
            self.bpf
                .map(names::SOCKET_MAP)
                .ok_or(RedirectError::NotFound(names::SOCKET_MAP))?,
        )
        .map_err(|e| map_error(names::SOCKET_MAP, e))?;

        let ports: AyaHashMap<&MapData, u16, u64> = AyaHashMap::try_from(
            self.bpf
                .map(names::PORT_MAP)
                .ok_or(RedirectError::NotFound(names::PORT_MAP))?,
        )
        .map_err(|e| map_error(names::PORT_MAP, e))?;

        let peers: AyaHashMap<&MapData, u64, u64> = AyaHashMap::try_from(
            self.bpf
                .map(names::PEER_MAP)
                .ok_or(RedirectError::NotFound(names::PEER_MAP))?,
        )
        .map_err(|e| map_error(names::PEER_MAP, e))?;

        Ok(TableUsage {
            sockets: sockets.keys().filter_map(Result::ok).count(),
            ports: ports.keys().filter_map(Result::ok).count(),
            peers: peers.keys().filter_map(Result::ok).count(),
        })
    }
}

impl Drop for Redirector {
    fn drop(&mut self) {
        // Dropping the Ebpf object detaches all programs.
        tracing::info!(cgroup = %self.cgroup.display(), "eBPF programs detached");
    }
}

fn program<'a, T>(bpf: &'a mut Ebpf, name: &'static str) -> Result<&'a mut T, RedirectError>
where
    &'a mut T: TryFrom<&'a mut Program, Error = ProgramError>,
{
    bpf.program_mut(name)
        .ok_or(RedirectError::NotFound(name))?
        .try_into()
        .map_err(|e: ProgramError| program_error(name, e))
}

fn program_error(program: &'static str, e: ProgramError) -> RedirectError {
    RedirectError::Program {
        program,
        reason: e.to_string(),
    }
}

fn attach_error(program: &'static str, cgroup: &Path, e: ProgramError) -> RedirectError {
    RedirectError::Attach {
        program,
        cgroup: cgroup.to_path_buf(),
        reason: e.to_string(),
    }
}

fn map_error(map: &'static str, e: aya::maps::MapError) -> RedirectError {
    RedirectError::Map {
        map,
        reason: e.to_string(),
    }
}
