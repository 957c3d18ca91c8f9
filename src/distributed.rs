//! Process group setup and collectives
//!
//! Ranks form a star around rank 0 over TCP. Rank 0 listens on the master
//! address; every other rank connects to it and announces its rank. An
//! all-reduce sends each worker's buffer to rank 0, which averages and sends
//! the result back.

use crate::config::GlobalConfig;
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

pub const ENV_RANK: &str = "OCRTRAIN_RANK";
pub const ENV_WORLD_SIZE: &str = "OCRTRAIN_WORLD_SIZE";
pub const ENV_MASTER_ADDR: &str = "OCRTRAIN_MASTER_ADDR";
pub const ENV_CONNECT_TIMEOUT: &str = "OCRTRAIN_CONNECT_TIMEOUT_SECS";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Position of this process in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroupInfo {
    pub rank: usize,
    pub world_size: usize,
}

impl ProcessGroupInfo {
    pub const fn single() -> Self {
        Self { rank: 0, world_size: 1 }
    }

    /// Rank 0 writes checkpoints and the resolved config.
    pub const fn is_master(&self) -> bool {
        self.rank == 0
    }
}

impl Default for ProcessGroupInfo {
    fn default() -> Self {
        Self::single()
    }
}

/// Collective operations shared by all ranks.
pub trait Collective: Send {
    fn info(&self) -> ProcessGroupInfo;

    /// Replace `values` with their element-wise mean across ranks.
    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()>;

    /// Block until every rank reaches this point.
    fn barrier(&mut self) -> Result<()>;
}

/// Single-process group; every collective is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGroup;

impl Collective for LocalGroup {
    fn info(&self) -> ProcessGroupInfo {
        ProcessGroupInfo::single()
    }

    fn all_reduce_mean(&mut self, _values: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Launch parameters read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: Option<String>,
    pub connect_timeout: Duration,
}

impl LaunchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse launch parameters through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<usize>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<usize>().map_err(|_| {
                        Error::DistributedInit(format!("{key}='{raw}' is not a non-negative integer"))
                    })
                })
                .transpose()
        };

        let world_size = number(ENV_WORLD_SIZE)?.unwrap_or(1);
        let rank = number(ENV_RANK)?.unwrap_or(0);
        if world_size == 0 {
            return Err(Error::DistributedInit(format!("{ENV_WORLD_SIZE} must be at least 1")));
        }
        if rank >= world_size {
            return Err(Error::DistributedInit(format!(
                "{ENV_RANK}={rank} is out of range for {ENV_WORLD_SIZE}={world_size}"
            )));
        }
        let master_addr = lookup(ENV_MASTER_ADDR).filter(|addr| !addr.trim().is_empty());
        if world_size > 1 && master_addr.is_none() {
            return Err(Error::DistributedInit(format!(
                "{ENV_MASTER_ADDR} is required when {ENV_WORLD_SIZE} > 1"
            )));
        }
        let connect_timeout = number(ENV_CONNECT_TIMEOUT)?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Ok(Self { rank, world_size, master_addr, connect_timeout })
    }
}

/// Set up the process group declared by `Global.distributed`.
pub fn init(global: &GlobalConfig) -> Result<Box<dyn Collective>> {
    if !global.distributed {
        return Ok(Box::new(LocalGroup));
    }
    let launch = LaunchConfig::from_env()?;
    if launch.world_size == 1 {
        tracing::info!("distributed run with a single rank, collectives are no-ops");
        return Ok(Box::new(LocalGroup));
    }
    let group = TcpGroup::establish(&launch)?;
    tracing::info!(rank = launch.rank, world_size = launch.world_size, "process group ready");
    Ok(Box::new(group))
}

#[derive(Debug)]
enum Role {
    Master { workers: Vec<TcpStream> },
    Worker { master: TcpStream },
}

/// Star-shaped TCP process group.
#[derive(Debug)]
pub struct TcpGroup {
    info: ProcessGroupInfo,
    role: Role,
}

impl TcpGroup {
    /// Listen (rank 0) or connect (other ranks) per `launch`.
    pub fn establish(launch: &LaunchConfig) -> Result<Self> {
        let addr = launch
            .master_addr
            .as_deref()
            .ok_or_else(|| Error::DistributedInit(format!("{ENV_MASTER_ADDR} is not set")))?;
        let addr = resolve(addr)?;
        if launch.rank == 0 {
            let listener = TcpListener::bind(addr)
                .map_err(|e| Error::DistributedInit(format!("cannot listen on {addr}: {e}")))?;
            Self::listen(listener, launch.world_size, launch.connect_timeout)
        } else {
            Self::connect(addr, launch.rank, launch.world_size, launch.connect_timeout)
        }
    }

    /// Accept `world_size - 1` workers on `listener`.
    pub fn listen(listener: TcpListener, world_size: usize, timeout: Duration) -> Result<Self> {
        let init_err = |e: std::io::Error| Error::DistributedInit(format!("accept failed: {e}"));
        listener.set_nonblocking(true).map_err(init_err)?;

        let deadline = Instant::now() + timeout;
        let mut slots: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        while slots.iter().any(Option::is_none) {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    stream.set_nonblocking(false).map_err(init_err)?;
                    stream.set_nodelay(true).map_err(init_err)?;
                    let rank = read_u64(&mut stream).map_err(init_err)? as usize;
                    let announced = read_u64(&mut stream).map_err(init_err)? as usize;
                    if announced != world_size || rank == 0 || rank >= world_size {
                        return Err(Error::DistributedInit(format!(
                            "peer {peer} announced rank {rank} of {announced}, expected a rank below {world_size}"
                        )));
                    }
                    let slot = &mut slots[rank - 1];
                    if slot.is_some() {
                        return Err(Error::DistributedInit(format!("rank {rank} connected twice")));
                    }
                    tracing::debug!(rank, %peer, "worker joined");
                    *slot = Some(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        let missing: Vec<usize> = slots
                            .iter()
                            .enumerate()
                            .filter(|(_, s)| s.is_none())
                            .map(|(i, _)| i + 1)
                            .collect();
                        return Err(Error::DistributedInit(format!(
                            "timed out waiting for ranks {missing:?}"
                        )));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(init_err(e)),
            }
        }

        let workers = slots.into_iter().flatten().collect();
        let mut group = Self { info: ProcessGroupInfo { rank: 0, world_size }, role: Role::Master { workers } };
        group.barrier().map_err(|e| Error::DistributedInit(e.to_string()))?;
        Ok(group)
    }

    /// Connect to rank 0 at `addr`, retrying until `timeout`.
    pub fn connect(addr: SocketAddr, rank: usize, world_size: usize, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match TcpStream::connect_timeout(&addr, CONNECT_ATTEMPT_TIMEOUT) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() >= deadline => {
                    return Err(Error::DistributedInit(format!(
                        "rank {rank} could not reach {addr} within {timeout:?}: {e}"
                    )))
                }
                Err(_) => thread::sleep(RETRY_INTERVAL),
            }
        };

        let init_err = |e: std::io::Error| Error::DistributedInit(format!("handshake failed: {e}"));
        stream.set_nodelay(true).map_err(init_err)?;
        write_u64(&mut stream, rank as u64).map_err(init_err)?;
        write_u64(&mut stream, world_size as u64).map_err(init_err)?;

        let mut group = Self { info: ProcessGroupInfo { rank, world_size }, role: Role::Worker { master: stream } };
        group.barrier().map_err(|e| Error::DistributedInit(e.to_string()))?;
        Ok(group)
    }
}

impl Collective for TcpGroup {
    fn info(&self) -> ProcessGroupInfo {
        self.info
    }

    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()> {
        let io_err = |e: std::io::Error| Error::Backend(format!("all-reduce failed: {e}"));
        match &mut self.role {
            Role::Master { workers } => {
                let mut sum: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
                for (i, worker) in workers.iter_mut().enumerate() {
                    let received = read_frame(worker, sum.len())
                        .map_err(|e| Error::Backend(format!("rank {}: {e}", i + 1)))?;
                    for (acc, v) in sum.iter_mut().zip(received) {
                        *acc += f64::from(v);
                    }
                }
                let world = self.info.world_size as f64;
                for (v, acc) in values.iter_mut().zip(&sum) {
                    *v = (*acc / world) as f32;
                }
                for worker in workers.iter_mut() {
                    write_frame(worker, values).map_err(io_err)?;
                }
            }
            Role::Worker { master } => {
                write_frame(master, values).map_err(io_err)?;
                let reduced = read_frame(master, values.len())
                    .map_err(|e| Error::Backend(format!("rank 0: {e}")))?;
                values.copy_from_slice(&reduced);
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        self.all_reduce_mean(&mut [])
    }
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| Error::DistributedInit(format!("invalid {ENV_MASTER_ADDR} '{addr}': {e}")))?
        .next()
        .ok_or_else(|| Error::DistributedInit(format!("{ENV_MASTER_ADDR} '{addr}' resolved to nothing")))
}

fn write_u64(stream: &mut TcpStream, value: u64) -> std::io::Result<()> {
    stream.write_all(&value.to_le_bytes())
}

fn read_u64(stream: &mut TcpStream) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_frame(stream: &mut TcpStream, values: &[f32]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(8 + values.len() * 4);
    buf.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    stream.write_all(&buf)?;
    stream.flush()
}

/// Read one frame, rejecting any header that disagrees with `expected`
/// before allocating for it.
fn read_frame(stream: &mut TcpStream, expected: usize) -> Result<Vec<f32>> {
    let io_err = |e: std::io::Error| Error::Backend(format!("all-reduce failed: {e}"));
    let len = read_u64(stream).map_err(io_err)?;
    if usize::try_from(len).ok() != Some(expected) {
        return Err(Error::Backend(format!("frame holds {len} values, expected {expected}")));
    }
    let byte_len = expected
        .checked_mul(4)
        .ok_or_else(|| Error::Backend(format!("frame of {expected} values overflows")))?;
    let mut buf = vec![0u8; byte_len];
    stream.read_exact(&mut buf).map_err(io_err)?;
    Ok(buf
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
