// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Run one closure per worker over an in-process mesh.

use crate::recording::{Op, RecordingFabric};
use halo_fabric_local::LocalFabric;

/// Runs `work` once per worker on scoped threads and returns the results in
/// rank order. A panicking worker re-raises its panic on the caller.
pub fn run_workers<T, F>(workers: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalFabric) -> T + Sync,
{
    let work = &work;
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalFabric::mesh(workers)
            .into_iter()
            .map(|fabric| s.spawn(move || work(fabric)))
            .collect();

        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(out) => out,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    })
}

/// Like [`run_workers`], wrapping each endpoint in a [`RecordingFabric`].
///
/// Returns each worker's result together with its dispatched batches.
pub fn run_recorded<T, F>(workers: usize, work: F) -> Vec<(T, Vec<Vec<Op>>)>
where
    T: Send,
    F: Fn(&mut RecordingFabric<LocalFabric>) -> T + Sync,
{
    run_workers(workers, |fabric| {
        let mut recording = RecordingFabric::new(fabric);
        let out = work(&mut recording);
        (out, recording.into_batches())
    })
}
