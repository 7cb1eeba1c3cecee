//! Reads input lines and fans them out to worker tasks

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tallylog_core::Runtime;

/// Lines buffered per worker before the reader waits
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub lines: u64,
    pub matched: u64,
    pub errors: u64,
}

impl Stats {
    fn merge(&mut self, other: Stats) {
        self.lines += other.lines;
        self.matched += other.matched;
        self.errors += other.errors;
    }
}

/// Process `input` (stdin when `None`) on `workers` tasks until EOF, Ctrl-C
/// or `cancel`
pub async fn run(
    runtime: Arc<Runtime>,
    input: Option<&Path>,
    workers: usize,
    cancel: CancellationToken,
) -> Result<Stats> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            process(runtime, BufReader::new(file), workers, cancel).await
        }
        None => process(runtime, BufReader::new(tokio::io::stdin()), workers, cancel).await,
    }
}

pub async fn process<R>(
    runtime: Arc<Runtime>,
    reader: R,
    workers: usize,
    cancel: CancellationToken,
) -> Result<Stats>
where
    R: AsyncBufRead + Unpin,
{
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel::<String>(QUEUE_DEPTH * workers);
    let rx = Arc::new(Mutex::new(rx));

    let handles: Vec<_> = (0..workers)
        .map(|id| tokio::spawn(worker(id, Arc::clone(&runtime), Arc::clone(&rx))))
        .collect();

    let mut lines = reader.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("input cancelled");
                break;
            }
            result = &mut ctrl_c => {
                result.context("listening for Ctrl-C")?;
                info!("interrupted, finishing queued lines");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading input")? else {
                    break;
                };
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        }
    }
    // Closing the channel lets the workers drain and exit.
    drop(tx);

    let mut stats = Stats::default();
    for handle in handles {
        stats.merge(handle.await.context("worker panicked")?);
    }
    Ok(stats)
}

async fn worker(id: usize, runtime: Arc<Runtime>, rx: Arc<Mutex<mpsc::Receiver<String>>>) -> Stats {
    let mut stats = Stats::default();
    loop {
        let line = rx.lock().await.recv().await;
        let Some(line) = line else {
            break;
        };
        let outcome = runtime.process_line(&line);
        stats.lines += 1;
        stats.matched += u64::from(outcome.matched);
        stats.errors += outcome.errors as u64;
    }
    debug!(worker = id, lines = stats.lines, "worker finished");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallylog_core::metrics::Number;
    use tallylog_core::Store;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_line_is_processed_once() {
        let runtime = Arc::new(Runtime::new(Arc::new(Store::new())));
        runtime
            .load_program("t.tl", "counter n\ncounter bad\n/ok/ { n++ }\n/v=(\\S+)/ { bad += $1 }")
            .unwrap();

        let mut input = String::new();
        for i in 0..1000 {
            input.push_str(if i % 10 == 0 { "v=x\n" } else { "ok\n" });
        }
        let stats = process(
            Arc::clone(&runtime),
            input.as_bytes(),
            4,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            Stats {
                lines: 1000,
                matched: 900,
                errors: 100
            }
        );
        let n = runtime.store().find_metric_or_nil("n", "t.tl").unwrap();
        assert_eq!(n.get_datum(&[]).unwrap().value(), Number::Int(900));
    }

    #[tokio::test]
    async fn cancelled_before_start_reads_nothing() {
        let runtime = Arc::new(Runtime::new(Arc::new(Store::new())));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = process(runtime, "a\nb\n".as_bytes(), 2, cancel).await.unwrap();
        assert_eq!(stats.lines, 0);
    }
}
