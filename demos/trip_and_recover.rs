//! Walkthrough: trip the circuit, watch it reject, then recover it.

use std::sync::Arc;
use std::time::Duration;
use tripswitch::{CircuitBreaker, Clock, ManualClock};

fn main() {
    let clock = Arc::new(ManualClock::new());

    let breaker = CircuitBreaker::builder("payment_api")
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .failure_rate_threshold(0.5)
        .minimum_request_threshold(10)
        .circuit_open_window(Duration::from_secs(10))
        .on_open(|name| println!("-> circuit '{name}' opened"))
        .on_half_open(|name| println!("-> circuit '{name}' probing"))
        .on_close(|name| println!("-> circuit '{name}' closed"))
        .build()
        .expect("valid configuration");

    println!("initial state: {}\n", breaker.circuit_state());

    println!("--- reporting 4 successes and 6 failures ---");
    for i in 1..=10 {
        let _ = breaker.call(|| {
            if i <= 4 {
                Ok(format!("payment {i}"))
            } else {
                Err(format!("payment {i} failed"))
            }
        });
    }
    println!("state: {}\n", breaker.circuit_state());

    println!("--- calling while open ---");
    match breaker.call(|| Ok::<_, String>("should be rejected".to_string())) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected: {e}"),
    }
    println!();

    println!("--- 10 seconds later, the trial request goes through ---");
    clock.advance(Duration::from_secs(10));
    match breaker.call(|| Ok::<_, String>("remote recovered".to_string())) {
        Ok(response) => println!("trial succeeded: {response}"),
        Err(e) => println!("trial failed: {e}"),
    }
    println!("state: {}", breaker.circuit_state());
}
