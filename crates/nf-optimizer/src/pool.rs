//! Fixed-size pool of worker threads with a single elected master.
//!
//! At startup every worker draws a distinct id from a shared queue and
//! reports it back; the smallest reported id becomes the master. The master
//! id travels with every dispatched job so each job knows whether it runs on
//! the master without any global state.

use crossbeam_channel::{bounded, unbounded, Sender};
use nf_types::{config_error, internal_error, NfResult};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Identity of the worker executing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub id: usize,
    pub master_id: usize,
}

impl WorkerContext {
    pub fn is_master(&self) -> bool {
        self.id == self.master_id
    }
}

type Job = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

struct Dispatch {
    master_id: usize,
    job: Job,
}

pub struct WorkerPool {
    size: usize,
    master_id: usize,
    sender: Option<Sender<Dispatch>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> NfResult<Self> {
        if size == 0 {
            return Err(config_error!("worker pool needs at least one worker"));
        }

        let (id_tx, id_rx) = bounded::<usize>(size);
        for id in 0..size {
            id_tx
                .send(id)
                .map_err(|_| internal_error!("worker id queue closed during startup"))?;
        }
        drop(id_tx);

        let (ready_tx, ready_rx) = bounded::<usize>(size);
        let (job_tx, job_rx) = unbounded::<Dispatch>();
        let mut handles = Vec::with_capacity(size);

        for n in 0..size {
            let id_rx = id_rx.clone();
            let ready_tx = ready_tx.clone();
            let job_rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("nestfit-worker-{n}"))
                .spawn(move || {
                    let Ok(id) = id_rx.recv() else {
                        return;
                    };
                    if ready_tx.send(id).is_err() {
                        return;
                    }
                    drop(ready_tx);
                    for dispatch in job_rx.iter() {
                        let context = WorkerContext {
                            id,
                            master_id: dispatch.master_id,
                        };
                        (dispatch.job)(&context);
                    }
                })?;
            handles.push(handle);
        }
        drop(ready_tx);

        let mut reported = Vec::with_capacity(size);
        for _ in 0..size {
            let id = ready_rx
                .recv()
                .map_err(|_| internal_error!("worker exited before reporting its id"))?;
            reported.push(id);
        }
        let master_id = reported
            .into_iter()
            .min()
            .ok_or_else(|| internal_error!("no worker reported an id"))?;
        debug!(size, master_id, "worker pool started");

        Ok(Self {
            size,
            master_id,
            sender: Some(job_tx),
            handles,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn master_id(&self) -> usize {
        self.master_id
    }

    fn dispatch(&self, job: Job) -> NfResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| internal_error!("worker pool is shut down"))?;
        sender
            .send(Dispatch {
                master_id: self.master_id,
                job,
            })
            .map_err(|_| internal_error!("all workers have exited"))
    }

    /// Apply `f` to every item on the pool. Results come back in input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> NfResult<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(&WorkerContext, T) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let count = items.len();
        let (result_tx, result_rx) = unbounded::<(usize, R)>();

        for (index, item) in items.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let result_tx = result_tx.clone();
            self.dispatch(Box::new(move |context| {
                let _ = result_tx.send((index, f(context, item)));
            }))?;
        }
        drop(result_tx);

        let mut slots: Vec<Option<R>> = (0..count).map(|_| None).collect();
        for (index, value) in result_rx.iter() {
            slots[index] = Some(value);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| internal_error!("task {index} was dropped by its worker"))
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("master_id", &self.master_id)
            .finish()
    }
}
