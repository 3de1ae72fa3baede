//! Device placement.
//!
//! Every tensor lives on the host [Cpu]. Accelerators are described by an
//! [AcceleratorRuntime] that only answers how many devices exist; a
//! [Placement] is resolved against it once and a [Bound] network carries
//! it. A data parallel placement splits each batch into one contiguous
//! chunk per replica, runs every chunk and concatenates the results, so
//! callers see the same shapes as on a single device.

use crate::error::ModelError;
use crate::heads::Outputs;
use crate::prelude::*;

/// Tells how many accelerators are available.
pub trait AcceleratorRuntime: std::fmt::Debug + Send + Sync {
    fn device_count(&self) -> usize;
}

/// A runtime without accelerators.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostOnly;

impl AcceleratorRuntime for HostOnly {
    fn device_count(&self) -> usize {
        0
    }
}

/// Where a network runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Host,
    /// Weights live on `primary` (always `replicas[0]`) and every batch is
    /// split over `replicas`.
    DataParallel { primary: usize, replicas: Vec<usize> },
}

impl Placement {
    /// Empty `ids` means the host. Otherwise every id must name an
    /// available accelerator.
    pub fn resolve(ids: &[usize], runtime: &dyn AcceleratorRuntime) -> crate::Result<Self> {
        let Some(&primary) = ids.first() else {
            return Ok(Self::Host);
        };
        let available = runtime.device_count();
        if available == 0 || ids.iter().any(|&id| id >= available) {
            return Err(ModelError::AcceleratorUnavailable {
                requested: ids.to_vec(),
                available,
            });
        }
        Ok(Self::DataParallel {
            primary,
            replicas: ids.to_vec(),
        })
    }

    pub fn num_replicas(&self) -> usize {
        match self {
            Self::Host => 1,
            Self::DataParallel { replicas, .. } => replicas.len(),
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("cpu"),
            Self::DataParallel { primary, replicas } => {
                write!(f, "accelerator:{primary} (data parallel over {replicas:?})")
            }
        }
    }
}

/// A batch that can be split into contiguous chunks along its first axis.
pub trait Scatter: Sized {
    fn batch_size(&self) -> usize;
    fn try_narrow(&self, start: usize, len: usize) -> Result<Self, Error>;
}

/// Per chunk outputs that can be joined back into one batch.
pub trait Gather: Sized {
    fn try_gather(parts: Vec<Self>) -> Result<Self, Error>;
}

impl<E: Dtype> Scatter for Tensor<E> {
    fn batch_size(&self) -> usize {
        self.dims().first().copied().unwrap_or(0)
    }
    fn try_narrow(&self, start: usize, len: usize) -> Result<Self, Error> {
        self.try_narrow_batch(start, len)
    }
}

impl<E: Dtype> Gather for Tensor<E> {
    fn try_gather(parts: Vec<Self>) -> Result<Self, Error> {
        Tensor::try_concat_along(&parts, 0)
    }
}

impl<E: Dtype> Gather for Outputs<E> {
    fn try_gather(parts: Vec<Self>) -> Result<Self, Error> {
        Outputs::try_concat_batches(parts)
    }
}

/// `(start, len)` of every chunk when `batch` samples are split over `n`
/// replicas. Chunks hold `ceil(batch / n)` samples except the last one;
/// replicas that would get nothing are left out.
pub fn chunk_ranges(batch: usize, n: usize) -> Vec<(usize, usize)> {
    if batch == 0 || n == 0 {
        return vec![(0, batch)];
    }
    let size = batch.div_ceil(n);
    (0..batch)
        .step_by(size)
        .map(|start| (start, size.min(batch - start)))
        .collect()
}

fn scatter<X: Scatter>(x: X, n: usize) -> Result<Vec<X>, Error> {
    let ranges = chunk_ranges(x.batch_size(), n);
    if ranges.len() == 1 {
        return Ok(vec![x]);
    }
    ranges
        .into_iter()
        .map(|(start, len)| x.try_narrow(start, len))
        .collect()
}

/// A network together with the placement it runs on.
#[derive(Debug, Clone)]
pub struct Bound<N> {
    network: N,
    placement: Placement,
}

impl<N> Bound<N> {
    pub fn bind(network: N, placement: Placement) -> Self {
        tracing::info!(%placement, "network bound");
        Self { network, placement }
    }

    /// Moves the network to `placement`. Binding to the current placement
    /// changes nothing.
    pub fn rebind(&mut self, placement: Placement) {
        if self.placement == placement {
            tracing::debug!(%placement, "network already bound");
            return;
        }
        tracing::info!(from = %self.placement, to = %placement, "network rebound");
        self.placement = placement;
    }

    /// Swaps in a new network on the current placement.
    pub fn replace(&mut self, network: N) -> N {
        std::mem::replace(&mut self.network, network)
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// The primary replica, which holds the authoritative weights.
    pub fn primary(&self) -> &N {
        &self.network
    }

    pub fn primary_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn into_inner(self) -> N {
        self.network
    }
}

impl<X, N> Module<X> for Bound<N>
where
    X: Scatter,
    N: Module<X> + Clone,
    N::Output: Gather,
{
    type Output = N::Output;

    fn try_forward(&self, x: X) -> Result<Self::Output, Error> {
        let mut chunks = scatter(x, self.placement.num_replicas())?;
        if chunks.len() == 1 {
            return self.network.try_forward(chunks.remove(0));
        }
        let outputs = chunks
            .into_iter()
            .map(|c| self.network.try_forward(c))
            .collect::<Result<Vec<_>, _>>()?;
        N::Output::try_gather(outputs)
    }

    /// The first chunk runs on the primary. Later chunks run on a
    /// broadcast copy whose buffer updates are discarded.
    fn try_forward_mut(&mut self, x: X) -> Result<Self::Output, Error> {
        let mut chunks = scatter(x, self.placement.num_replicas())?;
        if chunks.len() == 1 {
            return self.network.try_forward_mut(chunks.remove(0));
        }
        let mut replica = self.network.clone();
        let mut outputs = Vec::with_capacity(chunks.len());
        for (i, c) in chunks.into_iter().enumerate() {
            outputs.push(if i == 0 {
                self.network.try_forward_mut(c)?
            } else {
                replica.try_forward_mut(c)?
            });
        }
        N::Output::try_gather(outputs)
    }
}
