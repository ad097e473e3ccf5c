//! Store facade, recovery and enum seeding.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::schema::{EntityType, SchemaRegistry};
use crate::segment::{SegmentManager, SegmentRecord};
use crate::transaction::{RecoveredState, Transaction, TransactionManager, TxMode};
use crate::types::{EntityTypeId, SequenceNumber, TransactionId};
use crate::wal::{WalManager, WalRecord};
use entigraph_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// An open entity store.
///
/// The store owns the schema, the write-ahead log and the segment file. All
/// reads and writes go through a [`Transaction`]; the simplest way to run one
/// is [`Store::read`] or [`Store::write`], which commit on `Ok` and roll back
/// on `Err` or panic.
///
/// ```rust
/// use entigraph_core::schema::{EntityType, PropertyDefinition};
/// use entigraph_core::Store;
///
/// let store = Store::open_in_memory(vec![
///     EntityType::new("Note").property(PropertyDefinition::string("text").required()),
/// ])
/// .unwrap();
///
/// let id = store
///     .write(|txn| txn.create("Note", [("text", "hello".into())]))
///     .unwrap();
/// let text = store
///     .read(|txn| Ok(txn.entity(id)?.string("text").map(str::to_string)))
///     .unwrap();
/// assert_eq!(text.as_deref(), Some("hello"));
/// ```
pub struct Store {
    config: Config,
    /// Holds the directory lock. `None` for in-memory stores.
    dir: Option<DatabaseDir>,
    manifest: RwLock<Manifest>,
    schema: SchemaRegistry,
    txns: TransactionManager,
    /// Enum type to member key to entity id, filled after seeding.
    enum_members: RwLock<HashMap<EntityTypeId, HashMap<String, EntityId>>>,
    is_open: RwLock<bool>,
}

impl Store {
    /// Opens or creates a store directory with the default configuration.
    ///
    /// # Errors
    ///
    /// - `Schema` if `types` is inconsistent
    /// - `DatabaseLocked` if another handle has the directory open
    /// - `InvalidFormat` if the stored format version is incompatible
    /// - corruption errors if the logs cannot be recovered
    pub fn open(path: &Path, types: Vec<EntityType>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default(), types)
    }

    /// Opens or creates a store directory.
    pub fn open_with_config(path: &Path, config: Config, types: Vec<EntityType>) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;

        if config.error_if_exists && !dir.is_new_database() {
            return Err(CoreError::invalid_format(
                "store already exists and error_if_exists is true",
            ));
        }

        let manifest = match dir.load_manifest()? {
            Some(m) => {
                if m.format_version.0 != config.format_version.0 {
                    return Err(CoreError::invalid_format(format!(
                        "incompatible format version: store is v{}.{}, expected v{}.{}",
                        m.format_version.0,
                        m.format_version.1,
                        config.format_version.0,
                        config.format_version.1
                    )));
                }
                m
            }
            None => Manifest::new(config.format_version),
        };

        let wal_backend = FileBackend::open_with_create_dirs(&dir.wal_path())?;
        let segment_backend = FileBackend::open_with_create_dirs(&dir.segment_path())?;

        Self::assemble(
            config,
            Some(dir),
            manifest,
            Box::new(wal_backend),
            Box::new(segment_backend),
            types,
        )
    }

    /// Opens a store over caller-supplied backends.
    ///
    /// Type ids are assigned in declaration order, so reopening the same
    /// backends requires the same type list.
    pub fn open_with_backends(
        config: Config,
        wal_backend: Box<dyn StorageBackend>,
        segment_backend: Box<dyn StorageBackend>,
        types: Vec<EntityType>,
    ) -> CoreResult<Self> {
        let manifest = Manifest::new(config.format_version);
        Self::assemble(config, None, manifest, wal_backend, segment_backend, types)
    }

    /// Opens a fresh, non-persistent store.
    pub fn open_in_memory(types: Vec<EntityType>) -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            types,
        )
    }

    fn assemble(
        config: Config,
        dir: Option<DatabaseDir>,
        mut manifest: Manifest,
        wal_backend: Box<dyn StorageBackend>,
        segment_backend: Box<dyn StorageBackend>,
        types: Vec<EntityType>,
    ) -> CoreResult<Self> {
        let schema = SchemaRegistry::register_with_ids(types, |name| manifest.type_id_for(name))?;

        let wal = WalManager::new(wal_backend, config.sync_on_commit);
        let segments = SegmentManager::new(segment_backend);
        let state = recover(&wal, &segments, &manifest)?;
        manifest.next_entity_id = state.next_entity_id;

        let txns =
            TransactionManager::with_state(wal, segments, state, config.writer_wait_timeout);
        let store = Self {
            config,
            dir,
            manifest: RwLock::new(manifest),
            schema,
            txns,
            enum_members: RwLock::new(HashMap::new()),
            is_open: RwLock::new(true),
        };
        store.seed_enum_members()?;
        store.save_manifest()?;

        info!(
            path = ?store.path(),
            types = store.schema.types().count(),
            committed_seq = %store.committed_seq(),
            "store opened"
        );
        Ok(store)
    }

    /// Creates missing enum members and loads the member catalog.
    fn seed_enum_members(&self) -> CoreResult<()> {
        let mut txn = Transaction::begin(self, TxMode::ReadWrite, true)?;
        let mut created = 0usize;
        for ty in self.schema.types() {
            let Some(members) = ty.members() else {
                continue;
            };
            let info = self.schema.info(ty.name())?;
            let mut existing = HashSet::new();
            for id in txn.scan(ty.name())? {
                if let Some(key) = txn.entity(id)?.enum_key() {
                    existing.insert(key.to_string());
                }
            }
            for member in members.iter().filter(|m| !existing.contains(&m.key)) {
                let id = txn.create_enum_member(info, member)?;
                debug!(entity_type = ty.name(), key = %member.key, %id, "seeded enum member");
                created += 1;
            }
        }
        txn.commit()?;

        let txn = Transaction::begin(self, TxMode::ReadOnly, true)?;
        let mut catalog = HashMap::new();
        for ty in self.schema.types().filter(|ty| ty.is_enum()) {
            let info = self.schema.info(ty.name())?;
            let mut keys = HashMap::new();
            for id in txn.scan(ty.name())? {
                if let Some(key) = txn.entity(id)?.enum_key() {
                    keys.insert(key.to_string(), id);
                }
            }
            catalog.insert(info.id, keys);
        }
        txn.commit()?;
        *self.enum_members.write() = catalog;

        if created > 0 {
            debug!(created, "enum members seeded");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begins a transaction.
    ///
    /// A `ReadWrite` begin waits for the current writer to finish, or fails
    /// with `Conflict` once [`Config::writer_wait_timeout`] expires.
    pub fn begin(&self, mode: TxMode) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        Transaction::begin(self, mode, false)
    }

    /// Runs `body` in a transaction: commits if it returns `Ok`, rolls back
    /// if it returns `Err` or panics. The writer slot is always released.
    pub fn run_transaction<T>(
        &self,
        mode: TxMode,
        body: impl FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut txn = self.begin(mode)?;
        match body(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    warn!(error = %rollback_err, "rollback after failed body");
                }
                Err(err)
            }
        }
    }

    /// Runs `body` in a read-only transaction.
    pub fn read<T>(&self, body: impl FnOnce(&Transaction<'_>) -> CoreResult<T>) -> CoreResult<T> {
        self.run_transaction(TxMode::ReadOnly, |txn| body(txn))
    }

    /// Runs `body` in a read-write transaction.
    pub fn write<T>(
        &self,
        body: impl FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.run_transaction(TxMode::ReadWrite, body)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns the definition of a registered type.
    pub fn describe(&self, type_name: &str) -> CoreResult<&EntityType> {
        self.schema.describe(type_name)
    }

    /// Returns the registered schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.txns.committed_seq()
    }

    /// Number of live entities in the latest snapshot, enum members included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.txns
            .segments()
            .live_count_at(self.txns.committed_seq())
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    // ------------------------------------------------------------------
    // Maintenance and lifecycle
    // ------------------------------------------------------------------

    /// Syncs segments, empties the WAL and records the checkpoint.
    ///
    /// Waits for the active writer, if any.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        self.ensure_open()?;
        let sequence = self.txns.checkpoint()?;
        self.manifest.write().last_checkpoint = Some(sequence.as_u64());
        self.save_manifest()?;
        info!(%sequence, "checkpoint complete");
        Ok(sequence)
    }

    /// Flushes and closes the store. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.save_manifest()?;
        self.txns.flush()?;
        *is_open = false;
        info!(path = ?self.path(), "store closed");
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    pub(crate) fn txns(&self) -> &TransactionManager {
        &self.txns
    }

    pub(crate) fn enum_member_id(&self, type_id: EntityTypeId, key: &str) -> Option<EntityId> {
        self.enum_members
            .read()
            .get(&type_id)
            .and_then(|members| members.get(key))
            .copied()
    }

    fn save_manifest(&self) -> CoreResult<()> {
        if let Some(dir) = &self.dir {
            let mut manifest = self.manifest.write();
            manifest.next_entity_id = manifest.next_entity_id.max(self.txns.next_entity_id());
            dir.save_manifest(&manifest)?;
        }
        Ok(())
    }
}

/// Rebuilds the segment index and replays committed WAL transactions the
/// segments are missing.
///
/// The commit at the highest segment sequence is replayed too, since a crash
/// may have cut its segment writes short; duplicate versions are harmless.
/// After a replay the segments are synced and the WAL is emptied so the next
/// open does not repeat it.
fn recover(
    wal: &WalManager,
    segments: &SegmentManager,
    manifest: &Manifest,
) -> CoreResult<RecoveredState> {
    segments.rebuild_index()?;

    let scan = wal.read_all()?;
    if scan.torn_tail {
        warn!(valid_len = scan.valid_len, "discarding torn WAL tail");
        wal.truncate(scan.valid_len)?;
    }

    let applied = segments.max_sequence();
    let mut ops: HashMap<TransactionId, Vec<WalRecord>> = HashMap::new();
    let mut commits: Vec<(SequenceNumber, TransactionId)> = Vec::new();
    let mut max_txid = 0u64;
    let mut max_entity = 0u64;
    let mut committed = applied.max(manifest.last_checkpoint().unwrap_or(SequenceNumber::new(0)));

    for (_, record) in &scan.records {
        if let Some(txid) = record.txid() {
            max_txid = max_txid.max(txid.as_u64());
        }
        match record {
            WalRecord::Begin { txid } => {
                ops.entry(*txid).or_default();
            }
            WalRecord::Put { txid, entity_id, .. } | WalRecord::Delete { txid, entity_id, .. } => {
                max_entity = max_entity.max(entity_id.as_u64());
                ops.entry(*txid).or_default().push(record.clone());
            }
            WalRecord::Commit { txid, sequence } => commits.push((*sequence, *txid)),
            // an abort logged after a durable commit whose undo failed
            // does not cancel it; the commit is redone in full
            WalRecord::Abort { txid } if !commits.iter().any(|(_, t)| t == txid) => {
                ops.remove(txid);
            }
            WalRecord::Abort { .. } => {}
            WalRecord::Checkpoint { sequence } => committed = committed.max(*sequence),
        }
    }

    commits.sort_unstable();
    let mut replayed = 0usize;
    for (sequence, txid) in commits {
        committed = committed.max(sequence);
        if sequence < applied {
            continue;
        }
        let Some(records) = ops.remove(&txid) else {
            continue;
        };
        for op in records {
            let record = match op {
                WalRecord::Put { type_id, entity_id, payload, .. } => {
                    SegmentRecord::put(type_id, entity_id, payload, sequence)
                }
                WalRecord::Delete { type_id, entity_id, .. } => {
                    SegmentRecord::tombstone(type_id, entity_id, sequence)
                }
                _ => continue,
            };
            segments.append(&record)?;
        }
        replayed += 1;
    }

    if replayed > 0 {
        segments.sync()?;
        wal.clear()?;
    }

    let stored_max = segments.max_entity_id().map_or(0, EntityId::as_u64);
    let next_entity_id = manifest
        .next_entity_id
        .max(stored_max + 1)
        .max(max_entity + 1);

    info!(replayed, committed_seq = %committed, next_entity_id, "recovery complete");
    Ok(RecoveredState {
        next_txid: max_txid + 1,
        committed_seq: committed,
        next_entity_id,
    })
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("entity_count", &self.entity_count())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close store on drop");
        }
    }
}
