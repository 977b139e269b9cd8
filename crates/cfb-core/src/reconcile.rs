//! Periodic reconciliation of identities against the secondary platform.
//!
//! Every pass lists all identities and provisions a secondary account for
//! each one that has none on record. Passes are strictly sequential and a
//! failure for one identity never aborts the rest of the pass.

use std::{sync::Arc, time::Duration};

use rand::{distributions::Alphanumeric, Rng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    directory::IdentityDirectory, domain::Identity, ports::AccountProvisioner,
    vault::CredentialVault, Error, Result,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

const GENERATED_SECRET_LEN: usize = 24;

#[derive(Debug)]
pub struct ReconcileFailure {
    pub identity_id: String,
    pub error: Error,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub already_provisioned: usize,
    pub provisioned: usize,
    /// Identities without an e-mail address; nothing to provision with.
    pub skipped: usize,
    pub failures: Vec<ReconcileFailure>,
    /// The pass stopped early because shutdown was requested.
    pub interrupted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyProvisioned,
    Provisioned { handle: String },
}

#[derive(Clone)]
pub struct Reconciler {
    directory: IdentityDirectory,
    vault: Arc<dyn CredentialVault>,
    provisioner: Arc<dyn AccountProvisioner>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        directory: IdentityDirectory,
        vault: Arc<dyn CredentialVault>,
        provisioner: Arc<dyn AccountProvisioner>,
    ) -> Self {
        Self {
            directory,
            vault,
            provisioner,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run passes forever, sleeping `interval` between them, until `cancel`
    /// fires. A pass in progress finishes its current identity first.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciler started");
        loop {
            match self.run_pass(&cancel).await {
                Ok(report) => tracing::info!(
                    scanned = report.scanned,
                    provisioned = report.provisioned,
                    already_provisioned = report.already_provisioned,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    "reconciliation pass finished"
                ),
                Err(e) => tracing::error!(error = %e, "reconciliation pass failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }
        tracing::info!("reconciler stopped");
    }

    /// One full sweep over all identities.
    ///
    /// Only listing failures fail the pass; per-identity failures are
    /// collected in the report.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let identities = self.directory.list_identities().await?;
        let mut report = ReconcileReport::default();

        for identity in identities {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            report.scanned += 1;

            if self.vault.is_provisioned(&identity) {
                report.already_provisioned += 1;
                continue;
            }
            if identity.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
                tracing::warn!(identity_id = %identity.id, "identity has no e-mail, skipping");
                report.skipped += 1;
                continue;
            }

            match self.provision_identity(&identity).await {
                Ok(ProvisionOutcome::Provisioned { .. }) => report.provisioned += 1,
                Ok(ProvisionOutcome::AlreadyProvisioned) => report.already_provisioned += 1,
                Err(error) => {
                    tracing::warn!(identity_id = %identity.id, error = %error, "failed to provision secondary account");
                    report.failures.push(ReconcileFailure {
                        identity_id: identity.id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Provision a secondary account for one identity and store its credential.
    ///
    /// Also used for identities announced by a creation event.
    pub async fn provision_identity(&self, identity: &Identity) -> Result<ProvisionOutcome> {
        if self.vault.is_provisioned(identity) {
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }
        let email = identity
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::Provision(format!("identity {} has no e-mail", identity.id)))?;

        let secret = generate_secret();
        let account = self
            .provisioner
            .create_account(email, &secret)
            .await
            .map_err(|e| match e {
                Error::Provision(_) => e,
                other => Error::Provision(format!("account creation failed: {other}")),
            })?;

        self.vault
            .store_credential(&identity.id, &account.handle, &secret)
            .await?;

        tracing::info!(identity_id = %identity.id, handle = %account.handle, "provisioned secondary account");
        Ok(ProvisionOutcome::Provisioned {
            handle: account.handle,
        })
    }
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}
