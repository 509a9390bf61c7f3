use std::collections::VecDeque;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use vca_ledger::config::parse_value;
use vca_ledger::domain::{
    public_inputs, BatchId, CognitiveState, ConsentDecision, DuplicatePolicy, LedgerEntry,
    LedgerRecord, ReconfirmPolicy, VcaId, VcaRecord,
};
use vca_ledger::infra::{
    FsDocumentStore, SnarkjsToolchain, SqliteLedger, TerminalPrompt, VcaStore,
};
use vca_ledger::lifecycle::{
    BatchMinter, BatchOutcome, BatchRequest, ConsentCoordinator, GenerateRequest, LedgerService,
    VcaGenerator,
};
use vca_ledger::metrics::MetricsRegistry;
use vca_ledger::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use vca_ledger::Config;

const RULE: &str = "============================================================";

fn print_help() {
    eprintln!(
        "\
vca

USAGE:
  vca <command> [options]

COMMANDS:
  generate                        Prove a confidence threshold and create a VCA
  confirm                         Ask a human to approve or veto a VCA
  post                            Post a confirmed VCA to the ledger
  verify                          Re-verify a VCA's proof (or raw proof files)
  batch-mint                      Generate a batch of VCAs and a rollup entry
  post-batch                      Fold a batch rollup into the ledger
  ledger                          List ledger entries and totals
  export                          Write the ledger as a JSON array
  migrate                         Create or upgrade the ledger database

COMMON OPTIONS:
  --ledger-url <sqlite_url>       (defaults to env VCA_LEDGER_URL)
  --metrics                       Print this run's metrics (Prometheus text) to stderr

generate OPTIONS:
  --confidence <pct>              (required) 0-100
  --threshold <pct>               (required) 0-100
  --intent <text>                 (required)
  --task <text>                   (optional) Task details
  --fatigue <n> / --focus <n> / --urgency <n>   (optional) 0-100

confirm OPTIONS:
  --vca <id>                      (required)
  --reconfirm                     Capture consent again; the earlier record is kept
  --approve | --veto              Record a decision without prompting

post OPTIONS:
  --vca <id>                      (required)
  --allow-duplicate               Post even if the VCA is already in the ledger

verify OPTIONS:
  --vca <id>                      Verify a stored VCA's proof
  --proof <path> --public <path>  Verify raw proof files instead
  --vkey <path>                   (optional) Verification key

batch-mint OPTIONS:
  --count <n>                     (default: 10)
  --base-confidence <pct>         (default: 94.0)
  --threshold <pct>               (default: 92.0)

post-batch OPTIONS:
  --batch <id>                    (required)

export OPTIONS:
  --output <path>                 (optional) Output file path (default: stdout)

ENV:
  VCA_PROOFS_DIR, VCA_BUILD_DIR, VCA_CIRCUIT_NAME, VCA_LEDGER_URL,
  VCA_PROVER_TIMEOUT_SECS, VCA_CONSENT_TIMEOUT_SECS,
  VCA_GAS_PER_TX, VCA_GAS_BATCH_OVERHEAD, VCA_GAS_PER_ITEM,
  LOG_LEVEL, LOG_JSON, OTEL_EXPORTER_OTLP_ENDPOINT
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

/// Remove every occurrence of a boolean flag; true if it was present
fn take_flag(args: &mut VecDeque<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|arg| arg != flag);
    args.len() != before
}

fn take_number<T: std::str::FromStr>(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<T> {
    let raw = take_value(args, flag)?;
    Ok(parse_value(flag, &raw)?)
}

async fn read_public_inputs(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await?;
    let signals: serde_json::Value = serde_json::from_slice(&bytes)?;
    Ok(public_inputs(&signals))
}

fn stdin_is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

struct App {
    config: Config,
    metrics: Arc<MetricsRegistry>,
    docs: Arc<FsDocumentStore>,
}

impl App {
    fn new(config: Config) -> Self {
        let docs = Arc::new(FsDocumentStore::new(config.proofs_dir.clone()));
        Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
            docs,
        }
    }

    fn generator(&self) -> VcaGenerator {
        let toolchain =
            SnarkjsToolchain::new(self.config.snarkjs()).with_metrics(self.metrics.clone());
        VcaGenerator::new(Arc::new(toolchain), self.docs.clone()).with_metrics(self.metrics.clone())
    }

    async fn ledger(&self, ledger_url: Option<String>) -> anyhow::Result<LedgerService> {
        let url = ledger_url.unwrap_or_else(|| self.config.ledger_url.clone());
        let ledger = SqliteLedger::connect(&url).await?;
        Ok(
            LedgerService::new(Arc::new(ledger), self.docs.clone(), self.docs.clone())
                .with_metrics(self.metrics.clone()),
        )
    }
}

fn print_vca(vca: &VcaRecord) {
    let state = vca.cognitive_state();
    println!("\n{RULE}\n  VCA CREATED\n{RULE}\n");
    println!("  VCA ID: {}", vca.vca_id());
    println!("  Intent: {}", vca.intent());
    println!("  Confidence: {}%", state.confidence);
    println!("  Threshold: {}%", state.threshold);
    println!("  Proof: {}", vca.attestation().proof_file);
    println!("  Verified: {}", vca.attestation().verified);
    println!("\n  Next step:\n    vca confirm --vca {}\n", vca.vca_id());
}

fn print_entry(entry: &LedgerEntry) {
    println!("\n{RULE}\n  LEDGER ENTRY\n{RULE}\n");
    println!("  Transaction ID: {}", entry.tx_id);
    println!("  Timestamp: {}", entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"));
    match &entry.record {
        LedgerRecord::Vca(body) => {
            println!("  VCA ID: {}", body.vca_id);
            println!("  Intent: {}", body.intent);
            println!("  Action: {}", body.action);
            println!("  Status: {}", body.status);
            println!("  Human Consent: {}", body.human_consent);
            println!("  Proof Hash: {}...", &hex::encode(body.proof_hash)[..16]);
            println!("  Confidence: {}%", body.cognitive_state.confidence);
            println!("  VGT Earned: +{}", body.vgt_reward);
        }
        LedgerRecord::BatchRollup(rollup) => {
            println!("  Batch ID: {}", rollup.batch_id);
            println!("  Action: {}", rollup.action);
            println!("  Status: {}", rollup.status);
            println!("  VCAs: {}", rollup.vca_count);
            println!("  Average confidence: {}%", rollup.total_confidence_avg);
        }
    }
    println!();
}

fn print_batch(outcome: &BatchOutcome) {
    let rollup = &outcome.rollup;
    let gas = &rollup.metadata.gas;
    let minted = outcome.vcas.len();

    println!("\n{RULE}\n  BATCH SUMMARY\n{RULE}\n");
    println!("  Batch ID: {}", rollup.batch_id);
    println!("  VCAs in batch: {}", rollup.vca_count);
    if !outcome.failures.is_empty() {
        println!("  Failed: {}", outcome.failures.len());
        for failure in &outcome.failures {
            println!("    [{}] {}: {}", failure.index + 1, failure.intent, failure.error);
        }
    }
    println!("  Average confidence: {}%", rollup.total_confidence_avg);
    println!(
        "  Time elapsed: {:.2}s ({:.2}s per VCA)",
        outcome.elapsed.as_secs_f64(),
        outcome.elapsed.as_secs_f64() / minted as f64
    );
    println!();
    println!("  Gas Analysis:");
    println!("    Individual txs: {} gas", gas.individual_cost);
    println!("    Batch rollup: {} gas", gas.batch_cost);
    println!(
        "    Savings: {} gas ({})",
        gas.savings,
        gas.savings_percent_display()
    );
    println!();
    println!("  VGT Distribution:");
    println!(
        "    Individual model: +{} VGT total",
        rollup.metadata.vgt.individual_total
    );
    println!(
        "    Amortized model: +{} VGT (batching incentive)",
        rollup.metadata.vgt.amortized_total
    );
    println!("\n  Next steps:");
    println!("    vca post-batch --batch {}", rollup.batch_id);
    for vca in outcome.vcas.iter().take(3) {
        println!("    vca confirm --vca {}", vca.vca_id());
    }
    if minted > 3 {
        println!("    ... and {} more", minted - 3);
    }
    println!();
}

async fn run(mut args: VecDeque<String>) -> anyhow::Result<()> {
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let dump_metrics = take_flag(&mut args, "--metrics");
    let app = App::new(Config::from_env()?);

    match command.as_str() {
        "generate" => {
            let mut confidence: Option<f64> = None;
            let mut threshold: Option<f64> = None;
            let mut intent: Option<String> = None;
            let mut task = String::new();
            let mut fatigue: Option<f64> = None;
            let mut focus: Option<f64> = None;
            let mut urgency: Option<f64> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--confidence" => confidence = Some(take_number(&mut args, "--confidence")?),
                    "--threshold" => threshold = Some(take_number(&mut args, "--threshold")?),
                    "--intent" => intent = Some(take_value(&mut args, "--intent")?),
                    "--task" => task = take_value(&mut args, "--task")?,
                    "--fatigue" => fatigue = Some(take_number(&mut args, "--fatigue")?),
                    "--focus" => focus = Some(take_number(&mut args, "--focus")?),
                    "--urgency" => urgency = Some(take_number(&mut args, "--urgency")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let confidence = confidence.ok_or_else(|| anyhow::anyhow!("--confidence is required"))?;
            let threshold = threshold.ok_or_else(|| anyhow::anyhow!("--threshold is required"))?;
            let intent = intent.ok_or_else(|| anyhow::anyhow!("--intent is required"))?;

            let mut state = CognitiveState::new(confidence, threshold);
            state.fatigue = fatigue;
            state.focus = focus;
            state.urgency = urgency;

            let vca = app
                .generator()
                .generate(GenerateRequest::new(intent, task, state))
                .await?;
            print_vca(&vca);
        }
        "confirm" => {
            let mut vca_id: Option<VcaId> = None;
            let mut policy = ReconfirmPolicy::Reject;
            let mut scripted: Option<ConsentDecision> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--vca" => vca_id = Some(VcaId::from(take_value(&mut args, "--vca")?)),
                    "--reconfirm" => policy = ReconfirmPolicy::Override,
                    "--approve" => scripted = Some(ConsentDecision::Approved),
                    "--veto" => scripted = Some(ConsentDecision::Vetoed),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }
            let vca_id = vca_id.ok_or_else(|| anyhow::anyhow!("--vca is required"))?;

            let prompt = Arc::new(TerminalPrompt::stdio());
            let coordinator = ConsentCoordinator::new(app.docs.clone(), prompt.clone())
                .with_timeout(app.config.consent_timeout)
                .with_metrics(app.metrics.clone());

            let existing = app.docs.load_vca(&vca_id).await?;
            if let Some(current) = existing.consent() {
                if policy == ReconfirmPolicy::Reject && scripted.is_none() && stdin_is_interactive() {
                    prompt
                        .say(&format!(
                            "\n  Warning: this VCA already has a consent record:\n    Response: {}\n    Timestamp: {}\n\n",
                            current.user_response,
                            current.timestamp.format("%Y-%m-%dT%H:%M:%SZ")
                        ))
                        .await?;
                    match prompt.ask_yes_no("Request consent again?").await? {
                        Some(true) => policy = ReconfirmPolicy::Override,
                        _ => anyhow::bail!("cancelled: consent for {vca_id} left unchanged"),
                    }
                }
            }

            let vca = match scripted {
                Some(decision) => coordinator.record(&vca_id, decision, policy).await?,
                None => coordinator.confirm(&vca_id, policy).await?,
            };

            let approved = matches!(
                vca.consent().map(|c| &c.user_response),
                Some(vca_ledger::ConsentResponse::Approved)
            );
            println!("\n{RULE}");
            if approved {
                println!("  ACTION APPROVED\n{RULE}\n");
                println!("  The action has been approved and will be executed.");
            } else {
                println!("  ACTION VETOED\n{RULE}\n");
                println!("  The veto has been recorded. No execution will occur.");
                println!("  Post it anyway for the audit trail:");
            }
            println!("  VCA ID: {}", vca.vca_id());
            println!("\n  Next step:\n    vca post --vca {}\n", vca.vca_id());
        }
        "post" => {
            let mut vca_id: Option<VcaId> = None;
            let mut ledger_url: Option<String> = None;
            let mut policy = DuplicatePolicy::Reject;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--vca" => vca_id = Some(VcaId::from(take_value(&mut args, "--vca")?)),
                    "--ledger-url" => ledger_url = Some(take_value(&mut args, "--ledger-url")?),
                    "--allow-duplicate" => policy = DuplicatePolicy::AllowDuplicate,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }
            let vca_id = vca_id.ok_or_else(|| anyhow::anyhow!("--vca is required"))?;
            let service = app.ledger(ledger_url).await?;

            if policy == DuplicatePolicy::Reject
                && stdin_is_interactive()
                && service.is_posted(vca_id.as_str()).await?
            {
                let prompt = TerminalPrompt::stdio();
                prompt
                    .say(&format!("\n  Warning: VCA {vca_id} is already in the ledger\n"))
                    .await?;
                match prompt.ask_yes_no("Post anyway?").await? {
                    Some(true) => policy = DuplicatePolicy::AllowDuplicate,
                    _ => anyhow::bail!("cancelled: {vca_id} not posted again"),
                }
            }

            let entry = service.post(&vca_id, policy).await?;
            print_entry(&entry);
            let summary = service.summary().await?;
            println!("  Total entries: {}\n", summary.entries);
        }
        "verify" => {
            let mut vca_id: Option<VcaId> = None;
            let mut proof: Option<PathBuf> = None;
            let mut public: Option<PathBuf> = None;
            let mut vkey: Option<PathBuf> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--vca" => vca_id = Some(VcaId::from(take_value(&mut args, "--vca")?)),
                    "--proof" => proof = Some(PathBuf::from(take_value(&mut args, "--proof")?)),
                    "--public" => public = Some(PathBuf::from(take_value(&mut args, "--public")?)),
                    "--vkey" => vkey = Some(PathBuf::from(take_value(&mut args, "--vkey")?)),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let (proof, public) = match (vca_id, proof, public) {
                (Some(id), None, None) => {
                    let vca = app.docs.load_vca(&id).await?;
                    let zkp = vca.attestation();
                    (PathBuf::from(&zkp.proof_file), PathBuf::from(&zkp.public_file))
                }
                (None, Some(proof), Some(public)) => (proof, public),
                _ => anyhow::bail!("pass either --vca <id> or both --proof and --public"),
            };

            let report = app
                .generator()
                .verify_artifacts(&proof, &public, vkey.as_deref())
                .await?;
            println!("\n{RULE}");
            if report.valid {
                println!("  PROOF VALID\n{RULE}\n");
            } else {
                println!("  PROOF INVALID\n{RULE}\n");
            }
            println!("  Proof: {}", proof.display());
            println!("  Public signals: {}", public.display());
            match read_public_inputs(&public).await {
                Ok(inputs) => {
                    println!("  Public inputs:");
                    for (i, signal) in inputs.iter().enumerate() {
                        println!("    [{i}] {signal}");
                    }
                }
                Err(e) => warn!(error = %e, "public signals not readable"),
            }
            println!("\n{}", report.output.trim());
            if !report.valid {
                anyhow::bail!("proof verification failed");
            }
        }
        "batch-mint" => {
            let mut request = BatchRequest::default();

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--count" => request.count = take_number(&mut args, "--count")?,
                    "--base-confidence" => {
                        request.base_confidence = take_number(&mut args, "--base-confidence")?
                    }
                    "--threshold" => request.threshold = take_number(&mut args, "--threshold")?,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            println!(
                "  Generating {} VCAs (base confidence {}%, threshold {}%)...",
                request.count, request.base_confidence, request.threshold
            );
            let minter = BatchMinter::new(app.generator(), app.docs.clone(), app.config.gas)
                .with_metrics(app.metrics.clone());
            let outcome = minter.mint(request).await?;
            print_batch(&outcome);
        }
        "post-batch" => {
            let mut batch_id: Option<BatchId> = None;
            let mut ledger_url: Option<String> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--batch" => batch_id = Some(BatchId::from(take_value(&mut args, "--batch")?.as_str())),
                    "--ledger-url" => ledger_url = Some(take_value(&mut args, "--ledger-url")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }
            let batch_id = batch_id.ok_or_else(|| anyhow::anyhow!("--batch is required"))?;

            let entry = app.ledger(ledger_url).await?.post_rollup(&batch_id).await?;
            print_entry(&entry);
        }
        "ledger" => {
            let mut ledger_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--ledger-url" => ledger_url = Some(take_value(&mut args, "--ledger-url")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let service = app.ledger(ledger_url).await?;
            let entries = service.entries().await?;
            for entry in &entries {
                println!(
                    "{}  {}  {:<12}  {:<20}  {:>3} VGT  {}",
                    entry.tx_id,
                    entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                    entry.record.action().to_string(),
                    entry.record.status().to_string(),
                    entry.record.vgt_reward(),
                    entry.record.subject_id()
                );
            }
            let summary = vca_ledger::domain::LedgerSummary::from_entries(&entries);
            println!(
                "\nentries: {}  executed: {}  vetoed: {}  pending: {}  rollups: {}  total VGT: {}",
                summary.entries,
                summary.executed,
                summary.vetoed,
                summary.pending,
                summary.rollups,
                summary.total_vgt
            );
        }
        "export" => {
            let mut ledger_url: Option<String> = None;
            let mut output: Option<PathBuf> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--ledger-url" => ledger_url = Some(take_value(&mut args, "--ledger-url")?),
                    "--output" => output = Some(PathBuf::from(take_value(&mut args, "--output")?)),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let json = app.ledger(ledger_url).await?.export_json().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, format!("{json}\n")).await?;
                    eprintln!("ok: ledger exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        "migrate" => {
            let mut ledger_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--ledger-url" => ledger_url = Some(take_value(&mut args, "--ledger-url")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            // connecting applies the embedded migrations
            app.ledger(ledger_url).await?;
            println!("ok: migrations applied");
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    }

    debug!(metrics = %app.metrics.to_json().await, "command finished");
    if dump_metrics {
        eprint!("{}", app.metrics.to_prometheus().await);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env()).map_err(|e| anyhow::anyhow!(e))?;

    let args: VecDeque<String> = std::env::args().skip(1).collect();
    let result = run(args).await;

    shutdown_telemetry();
    result
}
