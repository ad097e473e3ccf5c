//! Link maintenance: inverse bookkeeping, delete policies and commit-time
//! reference checks.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::schema::{DeletePolicy, SchemaRegistry};
use crate::transaction::{ChangeSet, HeldReference, Snapshot, Staged};
use std::collections::HashSet;
use tracing::debug;

/// Applies link changes to a change-set so both ends of a bidirectional
/// pair stay in step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkManager<'a> {
    schema: &'a SchemaRegistry,
}

impl<'a> LinkManager<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Adds `target` to `source.link`, and `source` to the inverse link of
    /// `target` if the pair is bidirectional.
    pub fn add(
        &self,
        snapshot: &Snapshot<'_>,
        changes: &mut ChangeSet,
        source: EntityId,
        link: &str,
        target: EntityId,
    ) -> CoreResult<()> {
        let source_type = changes.require(snapshot, source)?.type_id;
        let source_info = self.schema.info_by_id(source_type)?;
        let def = source_info
            .def
            .link_def(link)
            .ok_or_else(|| CoreError::unknown_field(source_info.def.name(), link))?;

        let target_type = changes.require(snapshot, target)?.type_id;
        let target_info = self.schema.info_by_id(target_type)?;
        if target_info.def.name() != def.target {
            return Err(CoreError::invalid_operation(format!(
                "link '{}.{}' expects {}, got {} {}",
                source_info.def.name(),
                link,
                def.target,
                target_info.def.name(),
                target
            )));
        }

        changes.record_mut(snapshot, source)?.insert_target(link, target);
        if let Some(inverse) = &def.inverse {
            changes.record_mut(snapshot, target)?.insert_target(inverse, source);
        }
        Ok(())
    }

    /// Removes `target` from `source.link` and the mirrored reference, if any.
    ///
    /// Removing a link to an entity deleted earlier in the same transaction
    /// only touches the source side.
    pub fn remove(
        &self,
        snapshot: &Snapshot<'_>,
        changes: &mut ChangeSet,
        source: EntityId,
        link: &str,
        target: EntityId,
    ) -> CoreResult<()> {
        let source_type = changes.require(snapshot, source)?.type_id;
        let source_info = self.schema.info_by_id(source_type)?;
        let def = source_info
            .def
            .link_def(link)
            .ok_or_else(|| CoreError::unknown_field(source_info.def.name(), link))?;

        changes.record_mut(snapshot, source)?.remove_target(link, target);
        if let Some(inverse) = &def.inverse {
            if changes.is_live(snapshot, target)? {
                changes.record_mut(snapshot, target)?.remove_target(inverse, source);
            }
        }
        Ok(())
    }

    /// Deletes `root` and applies every incoming link's delete policy.
    ///
    /// Returns the ids deleted, `root` first, cascaded entities after.
    pub fn delete(
        &self,
        snapshot: &Snapshot<'_>,
        changes: &mut ChangeSet,
        root: EntityId,
        allow_enum_members: bool,
    ) -> CoreResult<Vec<EntityId>> {
        let mut doomed = HashSet::from([root]);
        let mut pending = vec![(root, true)];
        let mut deleted = Vec::new();

        while let Some((victim, explicit)) = pending.pop() {
            let record = changes.require(snapshot, victim)?.into_owned();
            let info = self.schema.info_by_id(record.type_id)?;
            if info.def.is_enum() && !allow_enum_members {
                return Err(CoreError::invalid_operation(format!(
                    "{} member {} cannot be deleted",
                    info.def.name(),
                    victim
                )));
            }

            for (source_info, link) in self.schema.incoming_links(info) {
                let referrers: Vec<EntityId> = match &link.inverse {
                    Some(inverse) => record.targets(inverse).collect(),
                    None => {
                        let mut found = Vec::new();
                        for candidate in changes.ids_of_type(snapshot, source_info.id) {
                            let references = changes
                                .require(snapshot, candidate)?
                                .targets(&link.name)
                                .any(|t| t == victim);
                            if references {
                                found.push(candidate);
                            }
                        }
                        found
                    }
                };

                for referrer in referrers {
                    if doomed.contains(&referrer) || !changes.is_live(snapshot, referrer)? {
                        continue;
                    }
                    match link.on_target_delete {
                        DeletePolicy::Clear => {
                            changes
                                .record_mut(snapshot, referrer)?
                                .remove_target(&link.name, victim);
                        }
                        DeletePolicy::Cascade => {
                            debug!(
                                %victim,
                                %referrer,
                                link = %link.name,
                                "cascading delete"
                            );
                            doomed.insert(referrer);
                            pending.push((referrer, false));
                        }
                        DeletePolicy::Fail => {
                            let remaining = changes
                                .require(snapshot, referrer)?
                                .target_count(&link.name)
                                .saturating_sub(1);
                            if explicit && remaining >= link.cardinality.floor() {
                                changes
                                    .record_mut(snapshot, referrer)?
                                    .remove_target(&link.name, victim);
                            } else {
                                changes.held.push(HeldReference {
                                    referrer,
                                    link: link.name.clone(),
                                    target: victim,
                                });
                            }
                        }
                    }
                }
            }

            changes.staged.insert(victim, Staged::Deleted(record.type_id));
            changes.changed.remove(&victim);
            deleted.push(victim);
        }
        Ok(deleted)
    }

    /// Commit-time checks: link floors and live targets for every touched
    /// entity, then references held back by deletes.
    pub fn verify(&self, snapshot: &Snapshot<'_>, changes: &ChangeSet) -> CoreResult<()> {
        for (&id, staged) in &changes.staged {
            let Staged::Live(record) = staged else {
                continue;
            };
            let info = self.schema.info_by_id(record.type_id)?;
            for def in info.def.links() {
                if record.target_count(&def.name) < def.cardinality.floor() {
                    return Err(CoreError::RequiredField {
                        entity_type: info.def.name().to_string(),
                        entity_id: id,
                        field: def.name.clone(),
                    });
                }
                for target in record.targets(&def.name) {
                    if !changes.is_live(snapshot, target)? {
                        return Err(self.dangling(changes, target, id, &def.name));
                    }
                }
            }
        }

        for held in &changes.held {
            let Some(referrer) = changes.load(snapshot, held.referrer)? else {
                continue;
            };
            let still_references = referrer.targets(&held.link).any(|t| t == held.target);
            if still_references && !changes.is_live(snapshot, held.target)? {
                return Err(self.dangling(changes, held.target, held.referrer, &held.link));
            }
        }
        Ok(())
    }

    fn dangling(
        &self,
        changes: &ChangeSet,
        target: EntityId,
        referrer: EntityId,
        link: &str,
    ) -> CoreError {
        let entity_type = changes
            .deleted_type(target)
            .and_then(|type_id| self.schema.info_by_id(type_id).ok())
            .map_or_else(|| "unknown".to_string(), |info| info.def.name().to_string());
        CoreError::DanglingReference {
            entity_type,
            entity_id: target,
            referenced_by: referrer,
            link: link.to_string(),
        }
    }
}
