//! Recording dispatched errors into a bounded journal from several workers.

use dispatch_errors::stack::{self, CapturePolicy};
use dispatch_errors::{ErrorJournal, Outcome, context, define_codes, ensure, protect, throw};
use std::thread;
use tracing::info;

define_codes! {
    RATE_LIMITED = 429,
    UPSTREAM_TIMEOUT = 504,
    UPSTREAM_REFUSED = 502,
}

fn handle_request(worker: usize, request: usize) {
    ensure!(request % 7 != 0, RATE_LIMITED, "worker {} over quota", worker);
    if request % 5 == 0 {
        throw!(UPSTREAM_TIMEOUT, "upstream timed out after {}ms", 250 * worker; "worker" => worker, "request" => request);
    }
    if request % 11 == 0 {
        throw(UPSTREAM_REFUSED, "upstream refused connection");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 64 entries, 256 bytes each: at most 16KB held however noisy the workers get.
    let journal = ErrorJournal::new(64, 256);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let journal = journal.clone();
            thread::spawn(move || {
                // Stacks are not needed for an audit trail.
                stack::set_capture_policy(CapturePolicy::Never);

                let mut handled = 0usize;
                for request in 1..=50 {
                    let outcome = protect(|| handle_request(worker, request))
                        .on_group([UPSTREAM_TIMEOUT, UPSTREAM_REFUSED], |_| {})
                        .on_code(RATE_LIMITED, |_| {})
                        .filter(|err| err.code() != UPSTREAM_REFUSED || worker != 0)
                        .on_any(journal.recorder())
                        .run();
                    if outcome == Outcome::Handled {
                        handled += 1;
                    }
                }
                handled
            })
        })
        .collect();

    let mut handled = 0;
    for handle in handles {
        match handle.join() {
            Ok(count) => handled += count,
            Err(_) => eprintln!("worker panicked"),
        }
    }

    info!(
        handled,
        held = journal.len(),
        evicted = journal.eviction_count(),
        bytes = journal.payload_bytes(),
        "journal summary"
    );

    println!("\n--- Most recent timeouts ---");
    for entry in journal.get_by_code(UPSTREAM_TIMEOUT).iter().rev().take(5) {
        println!(
            "[{}] {} worker={} request={}",
            entry.code,
            entry.message,
            entry.context_value("worker").unwrap_or("?"),
            entry.context_value("request").unwrap_or("?"),
        );
    }

    let ctx = context! { "phase" => "shutdown", "workers" => 4 };
    println!("\nshutdown context: {ctx:?}");
}
