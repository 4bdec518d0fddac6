use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobmill::broker::{provision, MemoryBroker};
use jobmill::config::{
    AdmissionConfig, BrokerConfig, EnvironmentConfig, GatewayConfig, RunnerConfig, WatchdogConfig,
    WorkerConfig, JOBS_TOPIC,
};
use jobmill::error::MillError;
use jobmill::gateway::{SubmissionGateway, SubmitRequest};
use jobmill::shutdown::install_shutdown_handler;
use jobmill::store::{JobSnapshot, JobStore, MemoryJobStore};
use jobmill::watchdog::LostJobWatchdog;
use jobmill::worker::{
    AdmissionController, ConsumerWorker, DirJobEnvironment, JobEnvironment, LinuxResourceReader,
    ProcessRunner, RunningGauge,
};

#[derive(Parser, Debug)]
#[command(name = "jobmill")]
#[command(version)]
#[command(about = "Broker-mediated job execution with admission control and lost-job recovery")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an embedded node, execute one script, and print its result
    Exec(ExecArgs),
}

#[derive(Parser, Debug)]
struct ExecArgs {
    /// Inline script body
    #[arg(long, conflicts_with = "file")]
    script: Option<String>,

    /// Read the script from a file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Job timeout in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Number of worker instances in the consumer group
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct ExecReport {
    job_id: Uuid,
    #[serde(flatten)]
    snapshot: JobSnapshot,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Exec(exec_args) => exec(exec_args).await,
    }
}

async fn exec(args: ExecArgs) -> Result<(), Box<dyn std::error::Error>> {
    let script = match (args.script, args.file) {
        (Some(script), None) => script,
        (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
        _ => {
            return Err(
                MillError::Validation("provide a script via --script or --file".to_string()).into(),
            )
        }
    };
    let timeout = Duration::from_secs(args.timeout_secs);

    let token = install_shutdown_handler();

    // Embedded node: broker, store, workers and watchdog all in-process.
    let broker = MemoryBroker::new();
    let broker_config = BrokerConfig::default();
    provision(&broker, &broker_config).await?;

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let environment_config = EnvironmentConfig::default();
    let gauge = RunningGauge::new();

    let mut handles = Vec::new();
    for _ in 0..args.workers.max(1) {
        let consumer = Arc::new(broker.subscribe(
            JOBS_TOPIC,
            &broker_config.group_id,
            &broker_config.worker_principal,
        )?);
        let admission = Arc::new(AdmissionController::new(
            Arc::new(LinuxResourceReader::new()),
            gauge.clone(),
            environment_config.jobs_dir.clone(),
            AdmissionConfig::default(),
        ));
        let environment: Arc<dyn JobEnvironment> =
            Arc::new(DirJobEnvironment::new(environment_config.clone()));
        let worker = ConsumerWorker::new(
            consumer,
            store.clone(),
            admission,
            environment,
            Arc::new(ProcessRunner::new(RunnerConfig::default())),
            gauge.clone(),
            WorkerConfig::default(),
        );
        let worker_token = token.clone();
        handles.push(tokio::spawn(async move { worker.run(worker_token).await }));
    }

    let watchdog = LostJobWatchdog::new(store.clone(), WatchdogConfig::default());
    let watchdog_token = token.clone();
    handles.push(tokio::spawn(async move {
        watchdog.run(watchdog_token).await
    }));

    let producer = Arc::new(broker.producer(JOBS_TOPIC, &broker_config.submitter_principal));
    let gateway = SubmissionGateway::new(
        store.clone(),
        producer,
        broker_config.submitter_principal.clone(),
        GatewayConfig::default(),
    );

    let job_id = gateway.submit(SubmitRequest { script, timeout }, &token).await?;
    println!("submitted job {job_id}");

    // The watchdog bounds how long a job can stay non-terminal, so this
    // wait always ends unless shutdown arrives first.
    let outcome = loop {
        if token.is_cancelled() {
            break None;
        }
        match gateway.get_result(job_id).await? {
            Some(snapshot) if snapshot.status.is_terminal() => break Some(snapshot),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    };

    token.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    let Some(snapshot) = outcome else {
        println!("shutdown before the job reached a terminal state");
        return Ok(());
    };

    match args.output {
        OutputFormat::Json => {
            let report = ExecReport { job_id, snapshot };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("job:      {job_id}");
            println!("status:   {}", snapshot.status);
            if let Some(started) = snapshot.started_at {
                println!("started:  {started}");
            }
            if let Some(finished) = snapshot.finished_at {
                println!("finished: {finished}");
            }
            println!("result:");
            println!("{}", String::from_utf8_lossy(&snapshot.result));
        }
    }
    Ok(())
}
