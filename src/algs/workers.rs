//! In-process worker groups: one scoped thread per worker over a shared
//! [`ThreadComm`] hub.
//!
//! A worker that returns an error or panics aborts the whole group, so peers
//! blocked in a barrier or receive wake up with [`MeshHaloError::Aborted`]
//! instead of hanging. The reported error is the root cause, not one of the
//! follow-on aborts.

use crate::algs::communicator::{Communicator, ThreadComm};
use crate::mesh_error::MeshHaloError;
use std::any::Any;
use std::thread;
use std::time::Duration;

struct AbortOnPanic<'a>(&'a ThreadComm);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("worker panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `f` on `size` workers and collect their results by rank.
pub fn run_workers<T, F>(
    size: usize,
    deadline: Option<Duration>,
    f: F,
) -> Result<Vec<T>, MeshHaloError>
where
    T: Send,
    F: Fn(&ThreadComm) -> Result<T, MeshHaloError> + Sync,
{
    let comms = ThreadComm::world(size, deadline)?;
    let f = &f;

    // (result, whether the failure originated on this worker)
    let outcomes: Vec<(Result<T, MeshHaloError>, bool)> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|c| {
                thread::Builder::new()
                    .name(format!("worker-{}", c.rank()))
                    .spawn_scoped(s, move || {
                        let _guard = AbortOnPanic(c);
                        let out = f(c);
                        if let Err(e) = &out {
                            c.abort(&e.to_string());
                        }
                        out
                    })
                    .inspect_err(|_| c.abort("worker thread could not be spawned"))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| match h {
                Ok(h) => match h.join() {
                    Ok(Ok(v)) => (Ok(v), false),
                    Ok(Err(e)) => {
                        let root = !matches!(e, MeshHaloError::Aborted { .. });
                        (Err(e), root)
                    }
                    Err(payload) => {
                        let reason = format!("worker panicked: {}", panic_message(&*payload));
                        (Err(MeshHaloError::Aborted { rank, reason }), true)
                    }
                },
                Err(e) => (
                    Err(MeshHaloError::Config(format!("cannot spawn worker {rank}: {e}"))),
                    true,
                ),
            })
            .collect()
    });

    let mut first_err = None;
    let mut root_err = None;
    let mut values = Vec::with_capacity(size);
    for (rank, (out, root)) in outcomes.into_iter().enumerate() {
        match out {
            Ok(v) => values.push(v),
            Err(e) => {
                log::error!("rank {rank} failed: {e}");
                if root && root_err.is_none() {
                    root_err = Some(e);
                } else if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match root_err.or(first_err) {
        Some(e) => Err(e),
        None => Ok(values),
    }
}
