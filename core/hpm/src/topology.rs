//! Hardware threads, sockets and cores.

use std::collections::HashMap;

use crate::access::CpuTopology;
use crate::error::InitError;

/// A hardware thread that is monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareThread {
    /// Platform identifier, used as entity id of the per-thread values.
    pub id: u32,
    /// Position in every per-thread array.
    pub index: usize,
    pub socket: u32,
    pub core: u32,
}

/// A cpu socket and the thread that provides its per-socket values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socket {
    pub id: u32,
    /// Index of the first thread discovered on this socket.
    pub representative: usize,
}

/// Maps hardware threads to physical cores, for per-core summarization.
///
/// Core indices are dense: `0..num_cores()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreMapping {
    core_of_thread: Vec<usize>,
    core_ids: Vec<u32>,
}

impl CoreMapping {
    fn build(threads: &[HardwareThread]) -> Self {
        let mut index_of_core: HashMap<(u32, u32), usize> = HashMap::new();
        let mut core_of_thread = Vec::with_capacity(threads.len());
        let mut core_ids = Vec::new();
        for t in threads {
            let next = core_ids.len();
            let core_index = *index_of_core.entry((t.socket, t.core)).or_insert(next);
            if core_index == next {
                // The first thread of a core gives its identifier to the core.
                core_ids.push(t.id);
            }
            log::debug!("hw thread:core id:core index {}:{}:{}", t.id, t.core, core_index);
            core_of_thread.push(core_index);
        }
        Self {
            core_of_thread,
            core_ids,
        }
    }

    /// Index of the core that runs the given thread.
    pub fn core_index(&self, thread_index: usize) -> usize {
        self.core_of_thread[thread_index]
    }

    /// Identifier used as entity id of the per-core values.
    pub fn core_id(&self, core_index: usize) -> u32 {
        self.core_ids[core_index]
    }

    pub fn num_cores(&self) -> usize {
        self.core_ids.len()
    }

    fn max_threads_per_core(&self) -> usize {
        let mut counts = vec![0usize; self.core_ids.len()];
        for &c in &self.core_of_thread {
            counts[c] += 1;
        }
        counts.into_iter().max().unwrap_or(0)
    }
}

/// Thread, socket and core tables, built once at startup.
#[derive(Debug, Clone)]
pub struct Topology {
    threads: Vec<HardwareThread>,
    sockets: Vec<Socket>,
    socket_data: Vec<bool>,
    cores: Option<CoreMapping>,
}

impl Topology {
    /// Builds the tables from the discovered cpu topology.
    ///
    /// If `per_core` is requested but no core runs more than one thread,
    /// the core mapping is not built: summing per core would change nothing.
    pub fn resolve(cpu: &CpuTopology, per_core: bool) -> Result<Self, InitError> {
        if cpu.threads.is_empty() {
            return Err(InitError::EmptyTopology);
        }

        let threads: Vec<HardwareThread> = cpu
            .threads
            .iter()
            .enumerate()
            .map(|(index, t)| HardwareThread {
                id: t.id,
                index,
                socket: t.socket,
                core: t.core,
            })
            .collect();

        // the first thread discovered on a socket provides the per-socket data
        let mut sockets: Vec<Socket> = Vec::new();
        let mut socket_data = vec![false; threads.len()];
        for t in &threads {
            if !sockets.iter().any(|s| s.id == t.socket) {
                log::info!("collecting per-socket metrics of socket {} with thread {}", t.socket, t.index);
                sockets.push(Socket {
                    id: t.socket,
                    representative: t.index,
                });
                socket_data[t.index] = true;
            }
        }

        let cores = if per_core {
            let mapping = CoreMapping::build(&threads);
            let threads_per_core = mapping.max_threads_per_core();
            if threads_per_core > 1 {
                log::info!(
                    "collect per core ({} cores, {threads_per_core} threads per core)",
                    mapping.num_cores()
                );
                Some(mapping)
            } else {
                log::info!("one thread per core, per-core summarization is disabled");
                None
            }
        } else {
            None
        };

        Ok(Self {
            threads,
            sockets,
            socket_data,
            cores,
        })
    }

    pub fn threads(&self) -> &[HardwareThread] {
        &self.threads
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    /// Platform identifiers of the threads, in index order.
    pub fn thread_ids(&self) -> Vec<u32> {
        self.threads.iter().map(|t| t.id).collect()
    }

    /// Returns `true` if the thread at this index provides the per-socket data of its socket.
    pub fn has_socket_data(&self, thread_index: usize) -> bool {
        self.socket_data[thread_index]
    }

    /// The core mapping, if per-core summarization is active.
    pub fn cores(&self) -> Option<&CoreMapping> {
        self.cores.as_ref()
    }
}
