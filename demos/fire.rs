use std::collections::HashMap;

use httpfire::{
    fire, fire_for, CancellationToken, DispatchOutcome, Dispatcher, DispatcherOptions, FireArgs,
    RunArgs, METRICS_UPDATE,
};

/// Usage: `fire [url] [max_attempts] [timeout_ms] [duration_ms parallel]`
///
/// With `duration_ms` the demo keeps firing `parallel` requests per round
/// until the duration has elapsed and prints the periodic stats updates.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "http://localhost:3000".to_owned());
    let max_attempts = args.next().map(|v| v.parse()).transpose()?.unwrap_or(10);
    let timeout_ms = args.next().map(|v| v.parse()).transpose()?.unwrap_or(3_500);
    let duration_ms: Option<u64> = args.next().map(|v| v.parse()).transpose()?;
    let parallel_requests = args.next().map(|v| v.parse()).transpose()?.unwrap_or(10);

    let dispatcher = Dispatcher::with_options(DispatcherOptions::from_env()?)?;
    let listener = dispatcher.metrics().listen(|event| match event.payload() {
        Ok(payload) => println!("{METRICS_UPDATE}: {payload}"),
        Err(err) => eprintln!("could not serialize event: {err}"),
    })?;

    if let Some(duration_ms) = duration_ms {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c.cancel();
            }
        });

        let report = fire_for(
            &dispatcher,
            RunArgs {
                url,
                method: "GET".to_owned(),
                headers: HashMap::new(),
                parallel_requests,
                duration_ms,
                max_attempts,
                timeout_ms,
                report_interval_ms: 1_000,
            },
            &cancel,
        )
        .await?;
        listener.unlisten();

        println!(
            "run #{}: {} rounds, {} dispatches ({} ok, {} exhausted, {} cancelled) in {:?}",
            report.run_id,
            report.rounds,
            report.dispatches,
            report.succeeded,
            report.exhausted,
            report.cancelled,
            report.elapsed
        );
        println!("{}", serde_json::to_string_pretty(&report.stats)?);
        return Ok(());
    }

    let handle = fire(
        &dispatcher,
        FireArgs {
            url,
            method: "GET".to_owned(),
            headers: HashMap::new(),
            max_attempts,
            timeout_ms,
        },
    )?;

    let outcome = handle.await?;
    listener.unlisten();

    match outcome {
        DispatchOutcome::Success(response) => {
            println!("success {}: {}", response.status, response.body_text())
        }
        DispatchOutcome::Exhausted(last_error) => println!("exhausted: {last_error}"),
        DispatchOutcome::Cancelled => println!("cancelled"),
    }

    Ok(())
}
