//! SmsFlow engine: dispatch coordination, reconciliation, and rollups.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::debug;

use sf_gateway::SmsProvider;
use sf_store::{CampaignRepository, MessageRepository, QuotaLedger, RecipientRepository};

pub mod dispatch;
pub mod error;
pub mod reconcile;
pub mod rollup;

pub use dispatch::{DispatchBody, DispatchCoordinator, DispatchReceipt, DispatchRequest};
pub use error::DispatchError;
pub use reconcile::{ReconcileReport, ReconcileSettings, Reconciler, RecipientError};
pub use rollup::Rollup;

/// Facade wiring the repositories, gateway, coordinator, and reconciler
/// over one pool. Binaries and tests build one of these and go.
pub struct SmsEngine {
    pub campaigns: CampaignRepository,
    pub messages: MessageRepository,
    pub recipients: RecipientRepository,
    pub quotas: QuotaLedger,
    coordinator: DispatchCoordinator,
    reconciler: Reconciler,
}

impl SmsEngine {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn SmsProvider>,
        settings: ReconcileSettings,
    ) -> Self {
        let campaigns = CampaignRepository::new(pool.clone());
        let messages = MessageRepository::new(pool.clone());
        let recipients = RecipientRepository::new(pool.clone());
        let quotas = QuotaLedger::new(pool);

        let rollup = Rollup::new(
            messages.clone(),
            campaigns.clone(),
            recipients.clone(),
            quotas.clone(),
        );
        let coordinator = DispatchCoordinator::new(
            provider.clone(),
            campaigns.clone(),
            messages.clone(),
            recipients.clone(),
            quotas.clone(),
            rollup.clone(),
        );
        let reconciler = Reconciler::new(
            provider,
            messages.clone(),
            recipients.clone(),
            rollup,
            settings,
        );

        Self {
            campaigns,
            messages,
            recipients,
            quotas,
            coordinator,
            reconciler,
        }
    }

    /// Create all tables if they do not exist.
    pub async fn init_schema(&self) -> Result<(), DispatchError> {
        self.campaigns.init_schema().await?;
        self.messages.init_schema().await?;
        self.recipients.init_schema().await?;
        self.quotas.init_schema().await?;
        Ok(())
    }

    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.coordinator.dispatch(request).await
    }

    pub async fn reconcile(&self, message_id: &str) -> Result<ReconcileReport, DispatchError> {
        self.reconciler.reconcile(message_id).await
    }

    /// One reconciliation sweep: every message with recipients still
    /// awaiting confirmation, up to `batch_size`. Returns how many
    /// messages were reconciled.
    pub async fn sweep(&self, batch_size: u32) -> Result<usize, DispatchError> {
        let unresolved = self.messages.find_unresolved(batch_size).await?;
        let count = unresolved.len();
        debug!(count, "Sweep found unresolved messages");

        for message in unresolved {
            self.reconciler.reconcile(&message.id).await?;
        }
        Ok(count)
    }
}
