//! snarkjs / circom proving toolchain
//!
//! Shells out to `node` for witness generation and to `snarkjs` for Groth16
//! prove and verify. Every external call is bounded by a timeout; expiry or a
//! non-zero exit is a `CollaboratorFailure` and is not retried.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{ProofArtifacts, VerificationReport, DEFAULT_CIRCUIT};
use crate::metrics::{metric_names, MetricsRegistry};

use super::{ProofToolchain, Result, VcaError};

/// Default bound on each toolchain call
pub const DEFAULT_PROVER_TIMEOUT: Duration = Duration::from_secs(120);

/// Marker snarkjs prints on a successful verification
const VERIFY_OK_MARKER: &str = "OK";

/// Paths and binaries used by the snarkjs toolchain
#[derive(Debug, Clone)]
pub struct SnarkjsConfig {
    pub build_dir: PathBuf,
    pub proofs_dir: PathBuf,
    pub circuit: String,
    pub timeout: Duration,
    pub node_bin: String,
    pub snarkjs_bin: String,
}

impl Default for SnarkjsConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            proofs_dir: PathBuf::from("proofs"),
            circuit: DEFAULT_CIRCUIT.to_string(),
            timeout: DEFAULT_PROVER_TIMEOUT,
            node_bin: "node".to_string(),
            snarkjs_bin: "snarkjs".to_string(),
        }
    }
}

impl SnarkjsConfig {
    pub fn proving_key(&self) -> PathBuf {
        self.build_dir.join(format!("{}_0000.zkey", self.circuit))
    }

    pub fn verification_key(&self) -> PathBuf {
        self.build_dir.join("verification_key.json")
    }

    pub fn wasm_dir(&self) -> PathBuf {
        self.build_dir.join(format!("{}_js", self.circuit))
    }
}

/// Captured output of one external command
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// `ProofToolchain` backed by the snarkjs CLI
pub struct SnarkjsToolchain {
    config: SnarkjsConfig,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SnarkjsToolchain {
    pub fn new(config: SnarkjsConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SnarkjsConfig {
        &self.config
    }

    async fn run(&self, stage: &str, program: &str, args: &[&Path]) -> Result<CommandOutput> {
        debug!(stage, program, ?args, "running toolchain command");
        let start = Instant::now();

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.config.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(VcaError::collaborator(
                    stage,
                    format!("could not start {program}: {e}"),
                ));
            }
            Err(_) => {
                warn!(stage, timeout = ?self.config.timeout, "toolchain command timed out");
                return Err(VcaError::collaborator(
                    stage,
                    format!("timed out after {:?}", self.config.timeout),
                ));
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics
                .record_latency(metric_names::PROVER_LATENCY, start.elapsed())
                .await;
        }

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(&self, stage: &str, program: &str, args: &[&Path]) -> Result<()> {
        let output = self.run(stage, program, args).await?;
        if !output.success {
            let diagnostic = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            return Err(VcaError::collaborator(stage, diagnostic.trim()));
        }
        Ok(())
    }
}

async fn require_file(kind: &str, path: &Path) -> Result<()> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(VcaError::not_found(kind, path.display())),
        Err(e) => Err(VcaError::io(path, e)),
    }
}

async fn read_json(path: &Path) -> Result<serde_json::Value> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| VcaError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        VcaError::collaborator(
            "proof generation",
            format!("malformed JSON in {}: {e}", path.display()),
        )
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "scratch file not removed");
    }
}

#[async_trait]
impl ProofToolchain for SnarkjsToolchain {
    #[instrument(skip(self))]
    async fn prove_threshold(
        &self,
        confidence_fixed: u32,
        threshold_fixed: u32,
    ) -> Result<ProofArtifacts> {
        let cfg = &self.config;
        let wasm_dir = cfg.wasm_dir();
        let witness_js = wasm_dir.join("generate_witness.js");
        let wasm = wasm_dir.join(format!("{}.wasm", cfg.circuit));
        let zkey = cfg.proving_key();

        require_file("witness generator", &witness_js).await?;
        require_file("proving key", &zkey).await?;

        tokio::fs::create_dir_all(&cfg.proofs_dir)
            .await
            .map_err(|e| VcaError::io(&cfg.proofs_dir, e))?;

        // Per-call scratch files so concurrent proofs don't share inputs
        let run_id = Uuid::new_v4().simple().to_string();
        let short_id = &run_id[..8];
        let input_file = cfg.build_dir.join(format!("input-{short_id}.json"));
        let witness_file = cfg.build_dir.join(format!("witness-{short_id}.wtns"));
        let proof_file = cfg.proofs_dir.join(format!("proof-{short_id}.json"));
        let public_file = cfg.proofs_dir.join(format!("public-{short_id}.json"));

        let input = serde_json::json!({
            "confidence": confidence_fixed,
            "threshold": threshold_fixed,
        });
        tokio::fs::write(&input_file, serde_json::to_vec(&input)?)
            .await
            .map_err(|e| VcaError::io(&input_file, e))?;

        let result = async {
            self.run_checked(
                "witness generation",
                &cfg.node_bin,
                &[&witness_js, &wasm, &input_file, &witness_file],
            )
            .await?;

            let groth16 = Path::new("groth16");
            let prove = Path::new("prove");
            self.run_checked(
                "proof generation",
                &cfg.snarkjs_bin,
                &[groth16, prove, &zkey, &witness_file, &proof_file, &public_file],
            )
            .await
        }
        .await;

        remove_quietly(&input_file).await;
        remove_quietly(&witness_file).await;
        result?;

        let artifacts = ProofArtifacts {
            proof: read_json(&proof_file).await?,
            public_signals: read_json(&public_file).await?,
            proof_file,
            public_file,
        };
        info!(proof_file = %artifacts.proof_file.display(), "proof generated");
        Ok(artifacts)
    }

    #[instrument(skip(self))]
    async fn verify(
        &self,
        proof_file: &Path,
        public_file: &Path,
        verification_key: &Path,
    ) -> Result<VerificationReport> {
        require_file("proof file", proof_file).await?;
        require_file("public signals file", public_file).await?;
        require_file("verification key", verification_key).await?;

        let groth16 = Path::new("groth16");
        let verify = Path::new("verify");
        let output = self
            .run(
                "proof verification",
                &self.config.snarkjs_bin,
                &[groth16, verify, verification_key, public_file, proof_file],
            )
            .await?;

        let valid = output.stdout.contains(VERIFY_OK_MARKER);
        let combined = format!("{}{}", output.stdout, output.stderr);
        debug!(valid, exit_ok = output.success, "verification finished");

        Ok(if valid {
            VerificationReport::valid(combined)
        } else {
            VerificationReport::invalid(combined)
        })
    }

    fn verification_key(&self) -> PathBuf {
        self.config.verification_key()
    }

    fn circuit_name(&self) -> String {
        self.config.circuit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let cfg = SnarkjsConfig::default();
        assert_eq!(
            cfg.proving_key(),
            PathBuf::from("build/intent_threshold_0000.zkey")
        );
        assert_eq!(
            cfg.verification_key(),
            PathBuf::from("build/verification_key.json")
        );
        assert_eq!(cfg.wasm_dir(), PathBuf::from("build/intent_threshold_js"));
    }

    #[tokio::test]
    async fn test_missing_build_artifacts_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = SnarkjsToolchain::new(SnarkjsConfig {
            build_dir: dir.path().join("build"),
            proofs_dir: dir.path().join("proofs"),
            ..SnarkjsConfig::default()
        });

        let err = toolchain.prove_threshold(9430, 9200).await.unwrap_err();
        assert!(matches!(err, VcaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_verify_missing_proof_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = SnarkjsToolchain::new(SnarkjsConfig::default());
        let err = toolchain
            .verify(
                &dir.path().join("proof.json"),
                &dir.path().join("public.json"),
                &toolchain.verification_key(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VcaError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_is_collaborator_failure() {
        let toolchain = SnarkjsToolchain::new(SnarkjsConfig {
            snarkjs_bin: "vca-test-no-such-binary".to_string(),
            ..SnarkjsConfig::default()
        });
        let err = toolchain
            .run("proof verification", "vca-test-no-such-binary", &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VcaError::CollaboratorFailure { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let toolchain = SnarkjsToolchain::new(SnarkjsConfig {
            timeout: Duration::from_millis(50),
            ..SnarkjsConfig::default()
        });
        let err = toolchain
            .run("proof generation", "sleep", &[Path::new("5")])
            .await
            .err()
            .unwrap();
        match err {
            VcaError::CollaboratorFailure { diagnostic, .. } => {
                assert!(diagnostic.contains("timed out"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
