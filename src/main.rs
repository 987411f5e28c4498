use partisim::{run_phold, SimulationConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("usage: partisim [CONFIG.toml] [--json]");
    std::process::exit(2);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut json = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "-h" | "--help" => usage(),
            _ if path.is_none() => path = Some(arg),
            _ => usage(),
        }
    }

    let config = match path {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    }
    .with_env_overrides()?;

    let report = match run_phold(&config) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "simulation failed");
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Partitioned PHOLD");
        println!("=================");
        println!(
            "partitions={} nodes={} init_work={} lookahead={} stop_time={} transport={:?}",
            config.partitions,
            config.workload.total_nodes,
            config.workload.init_work,
            config.lookahead,
            config.stop_time,
            config.exchange.transport,
        );
        println!();
        println!("{}", report);
    }

    if let Err(violation) = report.check_invariants() {
        error!(%violation, "invariant violated");
        return Err(violation.into());
    }
    Ok(())
}
