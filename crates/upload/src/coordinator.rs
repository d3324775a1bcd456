//! Session coordinator: the public entry point for uploads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ferry_connection::Connection;
use ferry_protocol::TransferId;
use ferry_transfer::{
    SourceHandle, StatusBoard, StatusSlot, TransferError, TransferRegistry, TransferStatus, new_transfer_id,
};

use crate::error::UploadError;
use crate::handle::UploadHandle;
use crate::machine::TransferMachine;

/// State shared between the coordinator and its running machines.
pub(crate) struct Session {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) registry: TransferRegistry,
    pub(crate) statuses: StatusBoard,
    abandon: Mutex<HashMap<TransferId, CancellationToken>>,
}

impl Session {
    fn abandon_tokens(&self) -> MutexGuard<'_, HashMap<TransferId, CancellationToken>> {
        self.abandon.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the abandon token of a finished transfer.
    pub(crate) fn forget(&self, id: &str) {
        self.abandon_tokens().remove(id);
    }
}

/// Starts uploads over one shared connection and tracks them.
///
/// Owns the transfer registry and the status board for the session. Each
/// started transfer runs as its own task.
pub struct UploadCoordinator {
    session: Arc<Session>,
}

impl UploadCoordinator {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            session: Arc::new(Session {
                connection,
                registry: TransferRegistry::new(),
                statuses: StatusBoard::new(),
                abandon: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Announces `source` and starts sending once the server is ready.
    ///
    /// `size_hint` is informational; the announced size is always the
    /// source's own.
    pub async fn start(
        &self,
        source: SourceHandle,
        display_name: impl Into<String>,
        size_hint: Option<u64>,
    ) -> Result<UploadHandle, UploadError> {
        let display_name = display_name.into();
        let (machine, handle) = self.prepare(source, size_hint).await?;
        self.session
            .statuses
            .track(&handle.transfer_id, display_name);
        tokio::spawn(machine.run());
        Ok(handle)
    }

    /// Adds a pending status for a source that will be started later.
    pub fn stage(&self, display_name: impl Into<String>) -> StatusSlot {
        self.session.statuses.stage(display_name)
    }

    /// Starts the transfer for a staged status.
    ///
    /// On failure the staged status is marked failed with the error. If the
    /// staged status is gone (the board was cleared), the transfer is tracked
    /// under the source's name instead.
    pub async fn start_staged(
        &self,
        slot: StatusSlot,
        source: SourceHandle,
        size_hint: Option<u64>,
    ) -> Result<UploadHandle, UploadError> {
        let name = source.name().to_string();
        match self.prepare(source, size_hint).await {
            Ok((machine, handle)) => {
                let statuses = &self.session.statuses;
                if !statuses.begin(slot, &handle.transfer_id) {
                    statuses.track(&handle.transfer_id, name);
                }
                tokio::spawn(machine.run());
                Ok(handle)
            }
            Err(e) => {
                self.session.statuses.fail_slot(slot, e.to_string());
                Err(e)
            }
        }
    }

    /// Registers, subscribes and announces a new transfer.
    async fn prepare(
        &self,
        source: SourceHandle,
        size_hint: Option<u64>,
    ) -> Result<(TransferMachine, UploadHandle), UploadError> {
        let session = &self.session;
        let connection = &session.connection;

        // Subscribe to disconnects before checking so none slips between.
        let disconnects = connection.disconnects();
        if !connection.is_connected() {
            let reason = connection
                .dispatcher()
                .down_reason()
                .unwrap_or_else(|| "not connected".into());
            return Err(UploadError::ConnectionUnavailable(reason));
        }

        let id = new_transfer_id();
        if let Some(hint) = size_hint
            && hint != source.size()
        {
            warn!(transfer = %id, hint, size = source.size(), "size hint differs from source size, ignoring hint");
        }

        let events = connection.subscribe(&id)?;
        if let Err(e) = session.registry.open(&id, source.clone()) {
            connection.unsubscribe(&id);
            return Err(e.into());
        }

        let abandon = CancellationToken::new();
        session
            .abandon_tokens()
            .insert(id.clone(), abandon.clone());

        let (mut machine, handle) = TransferMachine::new(
            id.clone(),
            source,
            session.clone(),
            events,
            disconnects,
            abandon,
        );

        if let Err(e) = machine.announce().await {
            session.registry.close(&id);
            connection.unsubscribe(&id);
            session.forget(&id);
            return Err(UploadError::ConnectionUnavailable(e.to_string()));
        }

        Ok((machine, handle))
    }

    /// Gives up on an in-flight transfer.
    ///
    /// Evicts the record, releases the subscription, marks the status failed
    /// and fires the error feed with [`TransferFailure::Abandoned`]. Nothing
    /// is sent to the server.
    ///
    /// [`TransferFailure::Abandoned`]: crate::TransferFailure::Abandoned
    pub fn abandon(&self, transfer_id: &str) -> Result<(), UploadError> {
        let session = &self.session;
        if !session.registry.close(transfer_id) {
            return Err(TransferError::UnknownTransfer(transfer_id.to_string()).into());
        }
        session.statuses.fail(transfer_id, "abandoned");
        // Cancel first: the machine reads a closed subscription as abandoned
        // only if the token is already set.
        if let Some(token) = session.abandon_tokens().remove(transfer_id) {
            token.cancel();
        }
        session.connection.unsubscribe(transfer_id);
        info!(transfer = %transfer_id, "abandoning upload");
        Ok(())
    }

    /// Ids of every transfer not yet completed or failed, oldest first.
    pub fn list_active(&self) -> Vec<TransferId> {
        self.session.registry.list()
    }

    /// Source of an in-flight transfer.
    pub fn lookup_source(&self, transfer_id: &str) -> Option<SourceHandle> {
        self.session.registry.lookup(transfer_id)
    }

    /// Bytes handed to the connection so far.
    pub fn sent_bytes(&self, transfer_id: &str) -> Option<u64> {
        self.session.registry.offset(transfer_id)
    }

    pub fn status(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.session.statuses.get(transfer_id)
    }

    pub fn statuses(&self) -> &StatusBoard {
        &self.session.statuses
    }

    /// Re-surfaces in-flight transfers on the status board.
    pub fn restore_statuses(&self) -> usize {
        self.session
            .statuses
            .restore_from_registry(&self.session.registry)
    }

    pub fn is_connected(&self) -> bool {
        self.session.connection.is_connected()
    }
}
