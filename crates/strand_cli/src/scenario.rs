//! Scenarios driven by the CLI.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use strand_runtime::{RecursiveLock, ThreadHandle, ThreadOptions};

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

pub struct HandoffOptions {
    pub rounds: u32,
}

#[derive(Debug)]
pub struct HandoffReport {
    rounds: u32,
    elapsed: Duration,
}

impl fmt::Display for HandoffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let per_round = self.elapsed / self.rounds.max(1);
        write!(
            f,
            "handoff: {} rounds in {:?} ({:?} per round)",
            self.rounds, self.elapsed, per_round
        )
    }
}

struct Mailbox {
    lock: RecursiveLock,
    counter: AtomicU32,
    signalled: AtomicBool,
}

/// Run the two-thread handoff: the worker bumps a counter to 1 under the
/// lock and waits; this thread observes 1, signals, and joins; the worker
/// then bumps it to 2.
pub fn run_handoff(options: &HandoffOptions) -> Result<HandoffReport> {
    let start = Instant::now();

    for round in 0..options.rounds {
        let mailbox = Arc::new(Mailbox {
            lock: RecursiveLock::new(),
            counter: AtomicU32::new(0),
            signalled: AtomicBool::new(false),
        });

        let worker_mailbox = mailbox.clone();
        let mut worker = ThreadHandle::spawn(
            ThreadOptions::named(format!("handoff-{round}")),
            move || {
                let mailbox = worker_mailbox;
                mailbox.lock.acquire(false);
                mailbox.counter.store(1, Ordering::Relaxed);
                mailbox
                    .lock
                    .wait_while(|| !mailbox.signalled.load(Ordering::Relaxed));
                mailbox.counter.store(2, Ordering::Relaxed);
                mailbox.lock.release(false);
            },
        )
        .with_context(|| format!("starting handoff worker for round {round}"))?;

        loop {
            mailbox.lock.acquire(false);
            if mailbox.counter.load(Ordering::Relaxed) == 1 {
                break;
            }
            mailbox.lock.release(false);
            thread::yield_now();
        }
        mailbox.signalled.store(true, Ordering::Relaxed);
        mailbox.lock.send_signal();
        mailbox.lock.release(false);

        worker.join();

        let counter = mailbox.counter.load(Ordering::Relaxed);
        if counter != 2 {
            bail!("round {round}: counter ended at {counter}, expected 2");
        }
        tracing::debug!(round, "handoff round complete");
    }

    Ok(HandoffReport {
        rounds: options.rounds,
        elapsed: start.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Contention
// ---------------------------------------------------------------------------

pub struct ContendOptions {
    pub threads: u32,
    pub iterations: u32,
    pub depth: u32,
}

#[derive(Debug)]
pub struct ContendReport {
    total: u64,
    elapsed: Duration,
}

impl fmt::Display for ContendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contend: {} critical sections in {:?}", self.total, self.elapsed)
    }
}

/// Run `threads` workers that each enter a critical section `iterations`
/// times, acquiring the shared lock `depth` levels deep. The unsynchronized
/// read-modify-write inside the section only adds up if the lock excludes.
pub fn run_contend(options: &ContendOptions) -> Result<ContendReport> {
    if options.depth == 0 {
        bail!("depth must be at least 1");
    }

    let lock = Arc::new(RecursiveLock::new());
    let counter = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut workers = Vec::with_capacity(options.threads as usize);
    for index in 0..options.threads {
        let lock = lock.clone();
        let counter = counter.clone();
        let iterations = options.iterations;
        let depth = options.depth;

        let worker = ThreadHandle::spawn(ThreadOptions::named(format!("contend-{index}")), move || {
            for _ in 0..iterations {
                for _ in 0..depth {
                    lock.acquire(true);
                }
                let value = counter.load(Ordering::Relaxed);
                counter.store(value + 1, Ordering::Relaxed);
                for _ in 0..depth {
                    lock.release(true);
                }
            }
        })
        .with_context(|| format!("starting contention worker {index}"))?;
        workers.push(worker);
    }

    for worker in &mut workers {
        worker.join();
    }

    let expected = u64::from(options.threads) * u64::from(options.iterations);
    let total = counter.load(Ordering::Relaxed);
    if total != expected {
        bail!("lost updates: counted {total}, expected {expected}");
    }

    Ok(ContendReport {
        total,
        elapsed: start.elapsed(),
    })
}
